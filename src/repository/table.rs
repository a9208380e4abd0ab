//! Table handles over the hosted database's REST interface.

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::de::IgnoredAny;
use serde_json::Value;
use wreq::Client;

use crate::model::HistoryRecord;
use crate::model::Subscription;
use crate::model::UserId;
use crate::repository::error::RepositoryError;

/// Base table struct providing REST access.
#[derive(Clone)]
pub struct BaseTable {
    client: Client,
    rest_url: String,
    name: &'static str,
}

impl BaseTable {
    /// Creates a handle for table `name` under `rest_url`.
    pub fn new(client: Client, rest_url: impl Into<String>, name: &'static str) -> Self {
        Self {
            client,
            rest_url: rest_url.into(),
            name,
        }
    }

    fn url(&self) -> String {
        format!("{}/{}", self.rest_url, self.name)
    }

    async fn execute(&self, request: wreq::RequestBuilder) -> Result<String, RepositoryError> {
        let request = request.build()?;
        debug!("Making request to: {} {}", request.method(), request.url());

        let response = self.client.execute(request).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(RepositoryError::Status { status, body });
        }
        Ok(body)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, RepositoryError> {
        let request = self.client.get(self.url()).query(query);
        let body = self.execute(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn insert<T: Serialize>(&self, row: &T) -> Result<(), RepositoryError> {
        let request = self
            .client
            .post(self.url())
            .header("Prefer", "return=minimal")
            .body(serde_json::to_string(row)?);
        self.execute(request).await?;
        Ok(())
    }

    /// Updates matching rows and returns how many were changed.
    async fn update<T: Serialize>(
        &self,
        query: &[(&str, String)],
        row: &T,
    ) -> Result<usize, RepositoryError> {
        let request = self
            .client
            .patch(self.url())
            .query(query)
            .header("Prefer", "return=representation")
            .body(serde_json::to_string(row)?);
        let body = self.execute(request).await?;
        let updated: Vec<Value> = serde_json::from_str(&body)?;
        Ok(updated.len())
    }
}

/// Stored row of `push_subscriptions`.
///
/// `subscription` holds the browser payload, either as a JSON object or as a
/// string containing one.
#[derive(Deserialize, Debug, Clone)]
pub struct PushSubscriptionRow {
    pub user_id: UserId,
    pub subscription: Value,
}

impl PushSubscriptionRow {
    /// Validates the stored payload into a [`Subscription`].
    pub fn into_subscription(self) -> Result<Subscription, crate::model::ModelError> {
        let payload = match self.subscription {
            Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            other => other,
        };
        Subscription::from_payload(self.user_id, &payload)
    }
}

#[derive(Serialize)]
struct PushSubscriptionUpdate<'a> {
    user_id: &'a UserId,
    endpoint: &'a str,
    subscription: Value,
}

pub struct PushSubscriptionTable {
    base: BaseTable,
}

impl PushSubscriptionTable {
    pub fn new(client: Client, rest_url: &str) -> Self {
        Self {
            base: BaseTable::new(client, rest_url, "push_subscriptions"),
        }
    }

    pub async fn select_all(&self) -> Result<Vec<Subscription>, RepositoryError> {
        let rows = self
            .base
            .select::<PushSubscriptionRow>(&[("select", "user_id,subscription".to_string())])
            .await?;
        Ok(Self::validate_rows(rows))
    }

    pub async fn select_all_by_users(
        &self,
        users: &[UserId],
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let ids = users
            .iter()
            .map(UserId::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let rows = self
            .base
            .select::<PushSubscriptionRow>(&[
                ("select", "user_id,subscription".to_string()),
                ("user_id", format!("in.({ids})")),
            ])
            .await?;
        Ok(Self::validate_rows(rows))
    }

    /// Overwrites the row registered for `old_endpoint` with `subscription`.
    pub async fn replace_by_endpoint(
        &self,
        old_endpoint: &str,
        subscription: &Subscription,
    ) -> Result<(), RepositoryError> {
        let row = PushSubscriptionUpdate {
            user_id: subscription.user_id(),
            endpoint: subscription.endpoint(),
            subscription: subscription.to_payload(),
        };
        let updated = self
            .base
            .update(&[("endpoint", format!("eq.{old_endpoint}"))], &row)
            .await?;

        if updated == 0 {
            return Err(RepositoryError::NotFound {
                message: format!("no subscription with endpoint `{old_endpoint}`"),
            });
        }
        Ok(())
    }

    fn validate_rows(rows: Vec<PushSubscriptionRow>) -> Vec<Subscription> {
        rows.into_iter()
            .filter_map(|row| {
                let user_id = row.user_id;
                match row.into_subscription() {
                    Ok(sub) => Some(sub),
                    Err(e) => {
                        warn!("Skipping invalid subscription of user {user_id}: {e}");
                        None
                    }
                }
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ProfileIdRow {
    id: UserId,
}

pub struct ProfileTable {
    base: BaseTable,
}

impl ProfileTable {
    pub fn new(client: Client, rest_url: &str) -> Self {
        Self {
            base: BaseTable::new(client, rest_url, "profiles"),
        }
    }

    /// Members whose `sports` array contains exactly `sport`.
    pub async fn select_ids_by_sport(&self, sport: &str) -> Result<Vec<UserId>, RepositoryError> {
        let rows = self
            .base
            .select::<ProfileIdRow>(&[
                ("select", "id".to_string()),
                ("sports", format!("cs.{{{}}}", quote_array_element(sport))),
            ])
            .await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }
}

/// Quotes `value` as an element of a Postgres array literal.
fn quote_array_element(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    title: &'a str,
    body: &'a str,
    url: &'a str,
    target_sport: Option<&'a str>,
    sent_by: Option<&'a UserId>,
    sent_at: &'a DateTime<Utc>,
}

pub struct NotificationHistoryTable {
    base: BaseTable,
}

impl NotificationHistoryTable {
    pub fn new(client: Client, rest_url: &str) -> Self {
        Self {
            base: BaseTable::new(client, rest_url, "notification_history"),
        }
    }

    pub async fn insert(&self, record: &HistoryRecord) -> Result<(), RepositoryError> {
        let row = HistoryRow {
            title: &record.title,
            body: &record.body,
            url: &record.url,
            target_sport: record.audience.sport(),
            sent_by: record.sent_by.as_ref(),
            sent_at: &record.sent_at,
        };
        self.base.insert(&row).await
    }

    pub async fn count_by_sender_since(
        &self,
        sender: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let rows = self
            .base
            .select::<IgnoredAny>(&[
                ("select", "id".to_string()),
                ("sent_by", format!("eq.{sender}")),
                (
                    "sent_at",
                    format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ),
            ])
            .await?;
        Ok(u32::try_from(rows.len()).unwrap_or(u32::MAX))
    }
}
