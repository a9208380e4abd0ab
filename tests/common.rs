//! Common test utilities and fake collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use chrono::Utc;
use club_push::model::HistoryRecord;
use club_push::model::Message;
use club_push::model::Subscription;
use club_push::model::SubscriptionKeys;
use club_push::model::UserId;
use club_push::push::PushTransport;
use club_push::push::error::TransportError;
use club_push::repository::NotificationStore;
use club_push::repository::SubscriptionFilter;
use club_push::repository::error::RepositoryError;

/// A key pair that passes subscription validation.
#[allow(dead_code)]
pub fn keys(seed: u8) -> SubscriptionKeys {
    let mut point = vec![0x04u8];
    point.extend([seed; 64]);
    SubscriptionKeys {
        p256dh: URL_SAFE_NO_PAD.encode(point),
        auth: URL_SAFE_NO_PAD.encode([seed; 16]),
    }
}

#[allow(dead_code)]
pub fn subscription(user: UserId, endpoint: &str) -> Subscription {
    Subscription::new(user, endpoint, keys(1)).expect("valid subscription")
}

// FAKE STORE

/// In-memory store standing in for the hosted database.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct FakeStore {
    pub state: Arc<RwLock<FakeStoreState>>,
}

#[derive(Default)]
#[allow(dead_code)]
pub struct FakeStoreState {
    pub subscriptions: Vec<Subscription>,
    pub sports: HashMap<UserId, Vec<String>>,
    pub history: Vec<HistoryRecord>,
    pub replaced: Vec<(String, Subscription)>,
    pub fail_listing: bool,
    pub fail_history: bool,
}

#[allow(dead_code)]
impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a member with their sports and one subscription.
    pub fn add_member(&self, sports: &[&str], endpoint: &str) -> UserId {
        let user = UserId::new_v4();
        let mut state = self.state.write().unwrap();
        state
            .sports
            .insert(user, sports.iter().map(|s| s.to_string()).collect());
        state.subscriptions.push(subscription(user, endpoint));
        user
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .subscriptions
            .iter()
            .map(|s| s.endpoint().to_string())
            .collect()
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.state.read().unwrap().history.clone()
    }

    fn unavailable() -> RepositoryError {
        RepositoryError::Status {
            status: 503,
            body: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl NotificationStore for FakeStore {
    async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let state = self.state.read().unwrap();
        if state.fail_listing {
            return Err(Self::unavailable());
        }
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| match filter {
                SubscriptionFilter::All => true,
                SubscriptionFilter::Users(users) => users.contains(s.user_id()),
            })
            .cloned()
            .collect())
    }

    async fn users_with_sport(&self, sport: &str) -> Result<Vec<UserId>, RepositoryError> {
        let state = self.state.read().unwrap();
        if state.fail_listing {
            return Err(Self::unavailable());
        }
        Ok(state
            .sports
            .iter()
            .filter(|(_, sports)| sports.iter().any(|s| s == sport))
            .map(|(user, _)| *user)
            .collect())
    }

    async fn replace_subscription(
        &self,
        old_endpoint: &str,
        subscription: &Subscription,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().unwrap();
        let stored = state
            .subscriptions
            .iter_mut()
            .find(|s| s.endpoint() == old_endpoint)
            .ok_or_else(|| RepositoryError::NotFound {
                message: old_endpoint.to_string(),
            })?;
        *stored = subscription.clone();
        state
            .replaced
            .push((old_endpoint.to_string(), subscription.clone()));
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.write().unwrap();
        if state.fail_history {
            return Err(Self::unavailable());
        }
        state.history.push(record.clone());
        Ok(())
    }

    async fn count_history_since(
        &self,
        sender: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let state = self.state.read().unwrap();
        Ok(state
            .history
            .iter()
            .filter(|r| r.sent_by.as_ref() == Some(sender) && r.sent_at >= since)
            .count() as u32)
    }
}

// FAKE TRANSPORT

/// How the fake transport answers a send to one endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(dead_code)]
pub enum SendBehavior {
    Deliver,
    StaleKey,
    Fail,
}

/// Scripted push transport recording every call.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct FakeTransport {
    pub state: Arc<RwLock<FakeTransportState>>,
}

#[derive(Default)]
#[allow(dead_code)]
pub struct FakeTransportState {
    pub behaviors: HashMap<String, SendBehavior>,
    /// Subscription handed out on renewal, per user. Missing means none.
    pub renewals: HashMap<UserId, Subscription>,
    pub sent: Vec<(String, Message)>,
    pub unsubscribed: Vec<String>,
    pub subscribed: Vec<UserId>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, endpoint: &str, behavior: SendBehavior) {
        self.state
            .write()
            .unwrap()
            .behaviors
            .insert(endpoint.to_string(), behavior);
    }

    pub fn set_renewal(&self, user: UserId, endpoint: &str) {
        self.state
            .write()
            .unwrap()
            .renewals
            .insert(user, Subscription::new(user, endpoint, keys(2)).unwrap());
    }

    pub fn sent_endpoints(&self) -> Vec<String> {
        let mut sent: Vec<String> = self
            .state
            .read()
            .unwrap()
            .sent
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        sent.sort();
        sent
    }

    pub fn send_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn send(
        &self,
        subscription: &Subscription,
        message: &Message,
    ) -> Result<(), TransportError> {
        let mut state = self.state.write().unwrap();
        state
            .sent
            .push((subscription.endpoint().to_string(), message.clone()));
        let behavior = state
            .behaviors
            .get(subscription.endpoint())
            .copied()
            .unwrap_or(SendBehavior::Deliver);

        match behavior {
            SendBehavior::Deliver => Ok(()),
            SendBehavior::StaleKey => Err(TransportError::Rejected {
                status: 403,
                body: r#"{"success":false,"error":"VapidPkHashMismatch"}"#.to_string(),
            }),
            SendBehavior::Fail => Err(TransportError::Rejected {
                status: 410,
                body: "push subscription has unsubscribed or expired".to_string(),
            }),
        }
    }

    async fn unsubscribe(&self, endpoint: &str) -> Result<(), TransportError> {
        self.state
            .write()
            .unwrap()
            .unsubscribed
            .push(endpoint.to_string());
        Ok(())
    }

    async fn subscribe(&self, user_id: &UserId) -> Result<Option<Subscription>, TransportError> {
        let mut state = self.state.write().unwrap();
        state.subscribed.push(*user_id);
        Ok(state.renewals.get(user_id).cloned())
    }
}
