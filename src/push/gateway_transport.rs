//! HTTP push gateway integration.
//!
//! The gateway is a hosted function holding the server's VAPID key pair. It
//! exposes three JSON endpoints relative to its base URL: `send`,
//! `unsubscribe` and `subscribe`.

use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use log::debug;
use log::info;
use serde_json::Value;
use wreq::Client;
use wreq::header::AUTHORIZATION;
use wreq::header::CONTENT_TYPE;
use wreq::header::HeaderMap;
use wreq::header::HeaderValue;

use crate::config::Config;
use crate::model::Message;
use crate::model::Subscription;
use crate::model::UserId;
use crate::push::PushTransport;
use crate::push::error::TransportError;

/// [`PushTransport`] backed by the push gateway function.
pub struct GatewayTransport {
    pub base_url: String,
    client: Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl GatewayTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        requests_per_second: u32,
    ) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|e| {
            TransportError::RequestFailed(Box::new(e))
        })?;
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder().default_headers(headers).build()?;
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Self::new(
            &config.push_gateway_url,
            &config.supabase_key,
            config.push_rate_limit,
        )
    }

    /// POSTs `payload` to `path` and returns the status and raw body.
    async fn post(&self, path: &str, payload: &Value) -> Result<(u16, String), TransportError> {
        // A successful check already takes the token for this request.
        if self.limiter.check().is_err() {
            info!("Push gateway is ratelimited. Waiting...");
            self.limiter.until_ready().await;
        }

        let request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .body(payload.to_string())
            .build()?;
        debug!("Making request to: {}", request.url());

        let response = self.client.execute(request).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Maps a gateway reply to success or [`TransportError::Rejected`].
    ///
    /// A 2xx reply still counts as a rejection when its JSON body reports
    /// `"success": false` or carries an `error` field.
    fn check_reply(status: u16, body: String) -> Result<Value, TransportError> {
        if !(200..300).contains(&status) {
            return Err(TransportError::Rejected { status, body });
        }
        let json = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(&body).unwrap_or(Value::Null)
        };

        let failed = json.get("success").and_then(Value::as_bool) == Some(false)
            || json.get("error").is_some_and(|e| !e.is_null());
        if failed {
            return Err(TransportError::Rejected { status, body });
        }
        Ok(json)
    }
}

#[async_trait]
impl PushTransport for GatewayTransport {
    async fn send(
        &self,
        subscription: &Subscription,
        message: &Message,
    ) -> Result<(), TransportError> {
        let payload = serde_json::json!({
            "subscription": subscription.to_payload(),
            "payload": {
                "title": message.title(),
                "body": message.body(),
                "url": message.url(),
            },
        });

        let (status, body) = self.post("send", &payload).await?;
        Self::check_reply(status, body)?;
        Ok(())
    }

    async fn unsubscribe(&self, endpoint: &str) -> Result<(), TransportError> {
        let payload = serde_json::json!({ "endpoint": endpoint });
        let (status, body) = self.post("unsubscribe", &payload).await?;
        // Already gone counts as unsubscribed.
        if status == 404 || status == 410 {
            return Ok(());
        }
        Self::check_reply(status, body)?;
        Ok(())
    }

    async fn subscribe(&self, user_id: &UserId) -> Result<Option<Subscription>, TransportError> {
        let payload = serde_json::json!({ "user_id": user_id });
        let (status, body) = self.post("subscribe", &payload).await?;
        if status == 404 {
            return Ok(None);
        }

        let json = Self::check_reply(status, body)?;
        match json.get("subscription") {
            None | Some(Value::Null) => Ok(None),
            Some(payload) => Subscription::from_payload(*user_id, payload)
                .map(Some)
                .map_err(|e| TransportError::InvalidResponse {
                    message: e.to_string(),
                }),
        }
    }
}
