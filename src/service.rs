//! Business logic services for notification dispatch.

use std::sync::Arc;

use crate::push::PushTransport;
use crate::repository::NotificationStore;
use crate::service::notification_service::DispatchOptions;
use crate::service::notification_service::NotificationService;
use crate::service::quota_service::QuotaService;

pub mod error;
pub mod notification_service;
pub mod quota_service;

/// Container for all application services.
pub struct Services {
    pub notification: Arc<NotificationService>,
    pub quota: Arc<QuotaService>,
}

impl Services {
    /// Creates and wires all services.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        transport: Arc<dyn PushTransport>,
        options: DispatchOptions,
    ) -> Self {
        let notification = Arc::new(NotificationService::new(store, transport, options));
        let quota = notification.quota();

        Self {
            notification,
            quota,
        }
    }
}
