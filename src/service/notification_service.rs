//! Notification fan-out with one-shot renewal of stale subscriptions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use derive_builder::Builder;
use futures::StreamExt;
use futures::stream;
use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::config::Config;
use crate::error::AppError;
use crate::model::AudienceFilter;
use crate::model::DeliveryOutcome;
use crate::model::HistoryRecord;
use crate::model::Message;
use crate::model::RunSummary;
use crate::model::Subscription;
use crate::model::UserId;
use crate::push::PushTransport;
use crate::push::error::TransportError;
use crate::push::stale_key::StaleKeyMatcher;
use crate::repository::NotificationStore;
use crate::repository::SubscriptionFilter;
use crate::repository::error::RepositoryError;
use crate::service::error::DispatchError;
use crate::service::quota_service::QuotaService;

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_QUOTA_MAX_MESSAGES: u32 = 10;
pub const DEFAULT_QUOTA_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Tuning of a [`NotificationService`].
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "immutable")]
pub struct DispatchOptions {
    /// Subscriptions delivered to at the same time.
    #[builder(default = "DEFAULT_CONCURRENCY")]
    pub concurrency: usize,
    #[builder(default)]
    pub stale_key: StaleKeyMatcher,
    #[builder(default = "DEFAULT_QUOTA_MAX_MESSAGES")]
    pub quota_max_messages: u32,
    #[builder(default = "DEFAULT_QUOTA_WINDOW")]
    pub quota_window: Duration,
}

impl DispatchOptions {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        DispatchOptionsBuilder::default()
            .concurrency(config.dispatch_concurrency)
            .stale_key(StaleKeyMatcher::new(&config.stale_key_patterns))
            .quota_max_messages(config.quota_max_messages)
            .quota_window(config.quota_window)
            .build()
            .map_err(|e| AppError::ConfigurationError { msg: e.to_string() })
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            stale_key: StaleKeyMatcher::default(),
            quota_max_messages: DEFAULT_QUOTA_MAX_MESSAGES,
            quota_window: DEFAULT_QUOTA_WINDOW,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RenewalError {
    #[error("unsubscribe failed: {0}")]
    Unsubscribe(#[source] TransportError),

    #[error("subscribe failed: {0}")]
    Subscribe(#[source] TransportError),

    #[error("no subscription was issued")]
    NotIssued,

    #[error("failed to store renewed subscription: {0}")]
    Persist(#[source] RepositoryError),
}

/// Fans a message out to every subscription of an audience.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    transport: Arc<dyn PushTransport>,
    quota: Arc<QuotaService>,
    options: DispatchOptions,
}

impl NotificationService {
    /// Creates the service along with the sender quota described by `options`.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        transport: Arc<dyn PushTransport>,
        options: DispatchOptions,
    ) -> Self {
        let quota = Arc::new(QuotaService::new(
            store.clone(),
            options.quota_max_messages,
            options.quota_window,
        ));
        Self {
            store,
            transport,
            quota,
            options,
        }
    }

    /// The quota applied to [`send_as`](Self::send_as) and
    /// [`dispatch_as`](Self::dispatch_as).
    pub fn quota(&self) -> Arc<QuotaService> {
        self.quota.clone()
    }

    /// Validates `title` and `body` and dispatches them to `audience`.
    pub async fn send(
        &self,
        title: &str,
        body: &str,
        audience: AudienceFilter,
    ) -> Result<RunSummary, DispatchError> {
        let message = Message::new(title, body)?;
        self.dispatch(message, audience).await
    }

    /// Like [`send`](Self::send), on behalf of `sender` and subject to their quota.
    pub async fn send_as(
        &self,
        sender: UserId,
        title: &str,
        body: &str,
        audience: AudienceFilter,
    ) -> Result<RunSummary, DispatchError> {
        let message = Message::new(title, body)?;
        self.dispatch_as(sender, message, audience).await
    }

    /// Delivers `message` to every subscription matching `audience`.
    ///
    /// Per-subscription failures are counted in the returned summary. Only
    /// audience resolution errors abort the run, in which case nothing is
    /// delivered and no history is written.
    pub async fn dispatch(
        &self,
        message: Message,
        audience: AudienceFilter,
    ) -> Result<RunSummary, DispatchError> {
        self.run(None, message, audience).await
    }

    pub async fn dispatch_as(
        &self,
        sender: UserId,
        message: Message,
        audience: AudienceFilter,
    ) -> Result<RunSummary, DispatchError> {
        let window_start = self.quota.window_start(Utc::now());
        if self.quota.remaining_quota(&sender, window_start).await? == 0 {
            return Err(DispatchError::QuotaExceeded {
                user_id: sender,
                limit: self.quota.max_messages(),
            });
        }
        self.run(Some(sender), message, audience).await
    }

    #[tracing::instrument(skip_all, fields(audience = %audience))]
    async fn run(
        &self,
        sender: Option<UserId>,
        message: Message,
        audience: AudienceFilter,
    ) -> Result<RunSummary, DispatchError> {
        let subscriptions = self
            .resolve_audience(&audience)
            .await
            .map_err(DispatchError::AudienceResolution)?;
        info!(
            "Dispatching \"{}\" to {} subscription(s) of {audience}.",
            message.title(),
            subscriptions.len()
        );

        let mut summary: RunSummary = stream::iter(subscriptions)
            .map(|sub| self.deliver(sub, &message))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        let record = HistoryRecord::new(&message, &audience, sender);
        if let Err(e) = self.store.append_history(&record).await {
            error!("Failed to write notification history: {e}");
            summary.history_error = Some(e.to_string());
        }

        info!(
            "Dispatch finished: {} attempted, {} delivered ({} after renewal), {} failed.",
            summary.total_attempted, summary.delivered, summary.renewed, summary.failed
        );
        Ok(summary)
    }

    async fn resolve_audience(
        &self,
        audience: &AudienceFilter,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let filter = match audience {
            AudienceFilter::Everyone => SubscriptionFilter::All,
            AudienceFilter::BySport(sport) => {
                let users = self.store.users_with_sport(sport).await?;
                if users.is_empty() {
                    debug!("No members follow sport `{sport}`.");
                    return Ok(Vec::new());
                }
                SubscriptionFilter::Users(users)
            }
        };
        self.store.list_subscriptions(&filter).await
    }

    async fn deliver(&self, subscription: Subscription, message: &Message) -> DeliveryOutcome {
        let err = match self.transport.send(&subscription, message).await {
            Ok(()) => {
                debug!("Delivered to {}.", subscription.endpoint());
                return DeliveryOutcome::Delivered;
            }
            Err(err) => err,
        };

        if !self.options.stale_key.is_stale_key_error(&err) {
            warn!(
                "Delivery to {} of user {} failed: {err}",
                subscription.endpoint(),
                subscription.user_id()
            );
            return DeliveryOutcome::Failed;
        }

        info!(
            "Stale key for {} of user {}, renewing subscription.",
            subscription.endpoint(),
            subscription.user_id()
        );
        let renewed = match self.renew(&subscription).await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(
                    "Renewal for user {} failed: {e}",
                    subscription.user_id()
                );
                return DeliveryOutcome::Failed;
            }
        };

        match self.transport.send(&renewed, message).await {
            Ok(()) => {
                debug!("Delivered to {} after renewal.", renewed.endpoint());
                DeliveryOutcome::DeliveredAfterRenewal
            }
            Err(e) => {
                warn!(
                    "Delivery to renewed {} of user {} failed: {e}",
                    renewed.endpoint(),
                    renewed.user_id()
                );
                DeliveryOutcome::Failed
            }
        }
    }

    /// Swaps `old` for a freshly issued subscription and stores it.
    async fn renew(&self, old: &Subscription) -> Result<Subscription, RenewalError> {
        self.transport
            .unsubscribe(old.endpoint())
            .await
            .map_err(RenewalError::Unsubscribe)?;

        let renewed = self
            .transport
            .subscribe(old.user_id())
            .await
            .map_err(RenewalError::Subscribe)?
            .ok_or(RenewalError::NotIssued)?;

        self.store
            .replace_subscription(old.endpoint(), &renewed)
            .await
            .map_err(RenewalError::Persist)?;

        Ok(renewed)
    }
}
