//! Persistence backed by the hosted database's REST interface.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use log::debug;
use wreq::Client;
use wreq::header::AUTHORIZATION;
use wreq::header::CONTENT_TYPE;
use wreq::header::HeaderMap;
use wreq::header::HeaderValue;

use crate::config::Config;
use crate::model::HistoryRecord;
use crate::model::Subscription;
use crate::model::UserId;
use crate::repository::error::RepositoryError;
use crate::repository::table::NotificationHistoryTable;
use crate::repository::table::ProfileTable;
use crate::repository::table::PushSubscriptionTable;

pub mod error;
pub mod table;

/// Which stored subscriptions to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    Users(Vec<UserId>),
}

/// Storage for subscriptions, the member directory, and dispatch history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Loads valid subscriptions matching `filter`.
    async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>, RepositoryError>;

    /// Members whose sport preferences include exactly `sport`.
    async fn users_with_sport(&self, sport: &str) -> Result<Vec<UserId>, RepositoryError>;

    /// Replaces the subscription stored for `old_endpoint` with `subscription`.
    async fn replace_subscription(
        &self,
        old_endpoint: &str,
        subscription: &Subscription,
    ) -> Result<(), RepositoryError>;

    async fn append_history(&self, record: &HistoryRecord) -> Result<(), RepositoryError>;

    /// Number of dispatches `sender` made at or after `since`.
    async fn count_history_since(
        &self,
        sender: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError>;
}

/// Main repository struct containing all table handlers.
pub struct Repository {
    pub push_subscription: PushSubscriptionTable,
    pub profile: ProfileTable,
    pub notification_history: NotificationHistoryTable,
}

impl Repository {
    /// Creates table handlers against `{base_url}/rest/v1`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, RepositoryError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| RepositoryError::RequestFailed(Box::new(e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| RepositoryError::RequestFailed(Box::new(e)))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder().default_headers(headers).build()?;
        let rest_url = format!("{}/rest/v1", base_url.trim_end_matches('/'));
        debug!("Using database REST endpoint {rest_url}");

        Ok(Self {
            push_subscription: PushSubscriptionTable::new(client.clone(), &rest_url),
            profile: ProfileTable::new(client.clone(), &rest_url),
            notification_history: NotificationHistoryTable::new(client, &rest_url),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, RepositoryError> {
        Self::new(&config.supabase_url, &config.supabase_key)
    }
}

#[async_trait]
impl NotificationStore for Repository {
    async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        match filter {
            SubscriptionFilter::All => self.push_subscription.select_all().await,
            SubscriptionFilter::Users(users) if users.is_empty() => Ok(Vec::new()),
            SubscriptionFilter::Users(users) => {
                self.push_subscription.select_all_by_users(users).await
            }
        }
    }

    async fn users_with_sport(&self, sport: &str) -> Result<Vec<UserId>, RepositoryError> {
        self.profile.select_ids_by_sport(sport).await
    }

    async fn replace_subscription(
        &self,
        old_endpoint: &str,
        subscription: &Subscription,
    ) -> Result<(), RepositoryError> {
        self.push_subscription
            .replace_by_endpoint(old_endpoint, subscription)
            .await
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<(), RepositoryError> {
        self.notification_history.insert(record).await
    }

    async fn count_history_since(
        &self,
        sender: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        self.notification_history
            .count_by_sender_since(sender, since)
            .await
    }
}
