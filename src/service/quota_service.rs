//! Per-sender dispatch quota.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use log::debug;

use crate::model::UserId;
use crate::repository::NotificationStore;
use crate::service::error::ServiceError;

/// Computes how many more notifications a member may send.
pub struct QuotaService {
    store: Arc<dyn NotificationStore>,
    max_messages: u32,
    window: Duration,
}

impl QuotaService {
    pub fn new(store: Arc<dyn NotificationStore>, max_messages: u32, window: Duration) -> Self {
        Self {
            store,
            max_messages,
            window,
        }
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }

    /// Start of the quota window ending at `now`.
    ///
    /// Windows reaching past the earliest representable time start there.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Notifications `user_id` may still send in the window starting at
    /// `window_start`.
    ///
    /// # Performance
    /// * DB calls: 1
    pub async fn remaining_quota(
        &self,
        user_id: &UserId,
        window_start: DateTime<Utc>,
    ) -> Result<u32, ServiceError> {
        let sent = self.store.count_history_since(user_id, window_start).await?;
        let remaining = self.max_messages.saturating_sub(sent);
        debug!("User {user_id} sent {sent} since {window_start}, {remaining} remaining.");
        Ok(remaining)
    }
}
