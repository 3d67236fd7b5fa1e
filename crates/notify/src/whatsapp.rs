use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use cabflow_core::config::WhatsAppConfig;

use crate::retry::RetryPolicy;
use crate::{NotifyError, SendReceipt};

/// A template message. `to` is already normalized to digits with the country
/// code and no `+`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhatsAppMessage {
    pub to: String,
    pub template_name: String,
    pub language_code: String,
    pub parameters: Vec<String>,
}

impl WhatsAppMessage {
    fn payload(&self) -> Value {
        let parameters: Vec<Value> = self
            .parameters
            .iter()
            .map(|text| json!({ "type": "text", "text": text }))
            .collect();
        json!({
            "messaging_product": "whatsapp",
            "to": self.to,
            "type": "template",
            "template": {
                "name": self.template_name,
                "language": { "code": self.language_code },
                "components": [{ "type": "body", "parameters": parameters }],
            },
        })
    }
}

#[async_trait]
pub trait WhatsAppSender: Send + Sync {
    async fn send(&self, message: &WhatsAppMessage) -> Result<SendReceipt, NotifyError>;

    /// Disabled channels are skipped by the dispatcher and leave no log row.
    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopWhatsApp;

#[async_trait]
impl WhatsAppSender for NoopWhatsApp {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn send(&self, message: &WhatsAppMessage) -> Result<SendReceipt, NotifyError> {
        debug!(
            event_name = "notify.whatsapp.skipped",
            template = %message.template_name,
            "whatsapp disabled; message not sent"
        );
        Ok(SendReceipt::default())
    }
}

#[derive(Debug, Default)]
pub struct RecordingWhatsApp {
    sent: Mutex<Vec<WhatsAppMessage>>,
}

impl RecordingWhatsApp {
    pub fn sent(&self) -> Vec<WhatsAppMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl WhatsAppSender for RecordingWhatsApp {
    async fn send(&self, message: &WhatsAppMessage) -> Result<SendReceipt, NotifyError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(SendReceipt { attempts: 1, provider_message_id: None })
    }
}

/// WhatsApp Cloud API client (Graph API `/{version}/{phone_number_id}/messages`).
pub struct WhatsAppClient {
    http: Client,
    endpoint: String,
    access_token: SecretString,
    retry: RetryPolicy,
}

impl WhatsAppClient {
    pub fn new(
        api_base_url: &str,
        api_version: &str,
        phone_number_id: &str,
        access_token: SecretString,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| NotifyError::Delivery { attempts: 0, detail: error.to_string() })?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/{}/{}/messages",
                api_base_url.trim_end_matches('/'),
                api_version.trim_matches('/'),
                phone_number_id.trim()
            ),
            access_token,
            retry,
        })
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, NotifyError> {
        let phone_number_id =
            config.phone_number_id.as_deref().ok_or(NotifyError::NotConfigured("whatsapp"))?;
        let access_token =
            config.access_token.clone().ok_or(NotifyError::NotConfigured("whatsapp"))?;
        Self::new(
            &config.api_base_url,
            &config.api_version,
            phone_number_id,
            access_token,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::for_whatsapp(config),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, payload: &Value) -> Result<Option<String>, (bool, String)> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| (true, error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message_id = body
                .pointer("/messages/0/id")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(message_id);
        }

        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        let detail = response.text().await.unwrap_or_default();
        Err((retryable, format!("status {}: {detail}", status.as_u16())))
    }
}

#[async_trait]
impl WhatsAppSender for WhatsAppClient {
    async fn send(&self, message: &WhatsAppMessage) -> Result<SendReceipt, NotifyError> {
        let payload = message.payload();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&payload).await {
                Ok(provider_message_id) => {
                    return Ok(SendReceipt { attempts: attempt, provider_message_id });
                }
                Err((true, detail)) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        event_name = "notify.whatsapp.retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %detail,
                        "retrying whatsapp send"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err((_, detail)) => {
                    return Err(NotifyError::Delivery { attempts: attempt, detail });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::{WhatsAppClient, WhatsAppMessage, WhatsAppSender};
    use crate::retry::RetryPolicy;
    use crate::NotifyError;

    #[derive(Clone, Default)]
    struct Graph {
        calls: Arc<AtomicU32>,
        throttle_first: u32,
        reject: bool,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn messages(
        State(graph): State<Graph>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let call = graph.calls.fetch_add(1, Ordering::SeqCst);
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer wa-token") {
            return (StatusCode::UNAUTHORIZED, Json(json!({}))).into_response();
        }
        if graph.reject {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": { "code": 132001 } })))
                .into_response();
        }
        if call < graph.throttle_first {
            return (StatusCode::TOO_MANY_REQUESTS, Json(json!({}))).into_response();
        }
        graph.bodies.lock().expect("bodies").push(body);
        Json(json!({ "messages": [{ "id": "wamid.HBgM" }] })).into_response()
    }

    async fn spawn(graph: Graph) -> String {
        let app = Router::new()
            .route("/v19.0/{phone_number_id}/messages", post(messages))
            .with_state(graph);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> WhatsAppClient {
        WhatsAppClient::new(
            base,
            "v19.0",
            "1234567890",
            "wa-token".to_string().into(),
            Duration::from_secs(5),
            RetryPolicy::immediate(2),
        )
        .expect("client")
    }

    fn message() -> WhatsAppMessage {
        WhatsAppMessage {
            to: "919812345678".to_string(),
            template_name: "taxi_booking_confirmed".to_string(),
            language_code: "en".to_string(),
            parameters: vec!["Asha Rao".to_string(), "TX-261018-ABC123".to_string()],
        }
    }

    #[tokio::test]
    async fn sends_template_message_after_throttling() {
        let graph = Graph { throttle_first: 1, ..Graph::default() };
        let base = spawn(graph.clone()).await;

        let receipt = client(&base).send(&message()).await.expect("send");
        assert_eq!(receipt.attempts, 2);
        assert_eq!(receipt.provider_message_id.as_deref(), Some("wamid.HBgM"));

        let bodies = graph.bodies.lock().expect("bodies").clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["to"], "919812345678");
        assert_eq!(bodies[0]["template"]["name"], "taxi_booking_confirmed");
        let parameters = &bodies[0]["template"]["components"][0]["parameters"];
        assert_eq!(parameters[1]["text"], "TX-261018-ABC123");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let graph = Graph { reject: true, ..Graph::default() };
        let base = spawn(graph.clone()).await;

        let error = client(&base).send(&message()).await.expect_err("rejected");
        assert!(matches!(error, NotifyError::Delivery { attempts: 1, .. }));
        assert_eq!(graph.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn endpoint_is_built_from_config_parts() {
        let client = client("https://graph.facebook.com/");
        assert_eq!(client.endpoint(), "https://graph.facebook.com/v19.0/1234567890/messages");
    }
}
