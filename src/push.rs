//! Push delivery transport.

pub mod error;
pub mod gateway_transport;
pub mod stale_key;

use async_trait::async_trait;

use crate::model::Message;
use crate::model::Subscription;
use crate::model::UserId;
use crate::push::error::TransportError;

/// Transport delivering push messages to subscription endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Delivers `message` to the endpoint of `subscription`.
    async fn send(
        &self,
        subscription: &Subscription,
        message: &Message,
    ) -> Result<(), TransportError>;

    /// Invalidates the subscription registered for `endpoint`.
    async fn unsubscribe(&self, endpoint: &str) -> Result<(), TransportError>;

    /// Requests a fresh subscription for `user_id`.
    ///
    /// Returns `Ok(None)` when the transport could not issue one.
    async fn subscribe(&self, user_id: &UserId) -> Result<Option<Subscription>, TransportError>;
}
