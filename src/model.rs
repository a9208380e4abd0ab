//! Domain types shared by the dispatcher and its collaborators.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Length of an uncompressed P-256 public key.
const P256DH_LEN: usize = 65;
/// Length of the push auth secret.
const AUTH_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ModelError {
    #[error("Message title must not be empty.")]
    EmptyTitle,

    #[error("Message body must not be empty.")]
    EmptyBody,

    #[error("Message target URL must not be empty.")]
    EmptyUrl,

    #[error("Subscription endpoint `{endpoint}` is not an https URL.")]
    InvalidEndpoint { endpoint: String },

    #[error("Subscription key `{key}` is invalid: {reason}")]
    InvalidKey { key: &'static str, reason: String },

    #[error("Subscription payload is missing field `{field}`.")]
    MissingField { field: String },
}

/// Identifier of a member account, as issued by the hosted auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Key material of a browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Client public encryption key (base64url).
    pub p256dh: String,
    /// Client auth secret (base64url).
    pub auth: String,
}

impl SubscriptionKeys {
    fn validate(&self) -> Result<(), ModelError> {
        let p256dh = decode_key("p256dh", &self.p256dh)?;
        if p256dh.len() != P256DH_LEN || p256dh[0] != 0x04 {
            return Err(ModelError::InvalidKey {
                key: "p256dh",
                reason: format!(
                    "expected a {P256DH_LEN}-byte uncompressed point, got {} bytes",
                    p256dh.len()
                ),
            });
        }

        let auth = decode_key("auth", &self.auth)?;
        if auth.len() != AUTH_SECRET_LEN {
            return Err(ModelError::InvalidKey {
                key: "auth",
                reason: format!("expected {AUTH_SECRET_LEN} bytes, got {}", auth.len()),
            });
        }

        Ok(())
    }
}

fn decode_key(key: &'static str, value: &str) -> Result<Vec<u8>, ModelError> {
    if value.is_empty() {
        return Err(ModelError::InvalidKey {
            key,
            reason: "empty".to_string(),
        });
    }
    // Browsers emit unpadded base64url, some stores keep the padding.
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| ModelError::InvalidKey {
            key,
            reason: e.to_string(),
        })
}

/// A validated delivery endpoint owned by one user.
///
/// Instances only exist with a well-formed endpoint and key pair. Renewal
/// never mutates a subscription; it produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSubscription")]
pub struct Subscription {
    user_id: UserId,
    endpoint: String,
    keys: SubscriptionKeys,
}

#[derive(Deserialize)]
struct RawSubscription {
    user_id: UserId,
    endpoint: String,
    keys: SubscriptionKeys,
}

impl TryFrom<RawSubscription> for Subscription {
    type Error = ModelError;

    fn try_from(raw: RawSubscription) -> Result<Self, Self::Error> {
        Subscription::new(raw.user_id, raw.endpoint, raw.keys)
    }
}

impl Subscription {
    pub fn new(
        user_id: UserId,
        endpoint: impl Into<String>,
        keys: SubscriptionKeys,
    ) -> Result<Self, ModelError> {
        let endpoint = endpoint.into();
        let host = endpoint.strip_prefix("https://").unwrap_or_default();
        if host.is_empty() || host.starts_with('/') {
            return Err(ModelError::InvalidEndpoint { endpoint });
        }
        keys.validate()?;

        Ok(Self {
            user_id,
            endpoint,
            keys,
        })
    }

    /// Builds a subscription from a browser `PushSubscription` JSON payload
    /// (`{"endpoint": .., "keys": {"p256dh": .., "auth": ..}}`).
    pub fn from_payload(user_id: UserId, payload: &serde_json::Value) -> Result<Self, ModelError> {
        let field = |path: &[&str]| -> Result<String, ModelError> {
            path.iter()
                .try_fold(payload, |v, key| v.get(*key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| ModelError::MissingField {
                    field: path.join("."),
                })
        };

        let keys = SubscriptionKeys {
            p256dh: field(&["keys", "p256dh"])?,
            auth: field(&["keys", "auth"])?,
        };
        Self::new(user_id, field(&["endpoint"])?, keys)
    }

    /// The browser-shaped JSON payload for this subscription.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "endpoint": self.endpoint,
            "keys": {
                "p256dh": self.keys.p256dh,
                "auth": self.keys.auth,
            },
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn keys(&self) -> &SubscriptionKeys {
        &self.keys
    }
}

/// Rule selecting which subscriptions receive a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "sport", rename_all = "snake_case")]
pub enum AudienceFilter {
    Everyone,
    BySport(String),
}

impl AudienceFilter {
    /// The sport restriction, if any.
    pub fn sport(&self) -> Option<&str> {
        match self {
            AudienceFilter::Everyone => None,
            AudienceFilter::BySport(sport) => Some(sport),
        }
    }
}

impl fmt::Display for AudienceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudienceFilter::Everyone => write!(f, "everyone"),
            AudienceFilter::BySport(sport) => write!(f, "sport `{sport}`"),
        }
    }
}

/// A notification as shown on the member's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    title: String,
    body: String,
    url: String,
}

impl Message {
    /// Creates a message pointing at the portal root.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Result<Self, ModelError> {
        let title = title.into();
        let body = body.into();
        if title.trim().is_empty() {
            return Err(ModelError::EmptyTitle);
        }
        if body.trim().is_empty() {
            return Err(ModelError::EmptyBody);
        }
        Ok(Self {
            title,
            body,
            url: "/".to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Result<Self, ModelError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ModelError::EmptyUrl);
        }
        self.url = url;
        Ok(self)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Result of delivering one message to one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    DeliveredAfterRenewal,
    Failed,
}

/// Aggregate of one dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_attempted: u32,
    pub delivered: u32,
    pub failed: u32,
    pub renewed: u32,
    /// Set when the history record could not be written.
    pub history_error: Option<String>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        self.total_attempted += 1;
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::DeliveredAfterRenewal => {
                self.delivered += 1;
                self.renewed += 1;
            }
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }
}

impl FromIterator<DeliveryOutcome> for RunSummary {
    fn from_iter<I: IntoIterator<Item = DeliveryOutcome>>(iter: I) -> Self {
        let mut summary = RunSummary::default();
        for outcome in iter {
            summary.record(outcome);
        }
        summary
    }
}

/// Append-only log entry written once per dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub title: String,
    pub body: String,
    pub url: String,
    pub audience: AudienceFilter,
    /// Member who triggered the run, `None` for system dispatches.
    pub sent_by: Option<UserId>,
    pub sent_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(message: &Message, audience: &AudienceFilter, sent_by: Option<UserId>) -> Self {
        Self {
            title: message.title().to_string(),
            body: message.body().to_string(),
            url: message.url().to_string(),
            audience: audience.clone(),
            sent_by,
            sent_at: Utc::now(),
        }
    }
}
