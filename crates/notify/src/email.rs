use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use cabflow_core::config::SmtpConfig;

use crate::retry::RetryPolicy;
use crate::{NotifyError, SendReceipt};

const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifyError>;

    /// Disabled channels are skipped by the dispatcher and leave no log row.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Accepts everything and sends nothing. Used when SMTP is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifyError> {
        debug!(
            event_name = "notify.email.skipped",
            recipients = message.to.len(),
            subject = %message.subject,
            "smtp disabled; email not sent"
        );
        Ok(SendReceipt::default())
    }
}

/// Keeps messages in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail_with: Option<String>,
}

impl RecordingMailer {
    pub fn failing(detail: impl Into<String>) -> Self {
        Self { sent: Mutex::default(), fail_with: Some(detail.into()) }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifyError> {
        if let Some(detail) = &self.fail_with {
            return Err(NotifyError::Delivery { attempts: 1, detail: detail.clone() });
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(SendReceipt { attempts: 1, provider_message_id: None })
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    retry: RetryPolicy,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let host = config.host.as_deref().ok_or(NotifyError::NotConfigured("smtp"))?;
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|error| NotifyError::Delivery { attempts: 0, detail: error.to_string() })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        builder = builder.port(config.port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox(Some(config.from_name.clone()), &config.from_address)?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_message(&self, message: &EmailMessage) -> Result<Message, NotifyError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(&message.subject);
        for recipient in &message.to {
            builder = builder.to(parse_mailbox(None, recipient)?);
        }
        builder
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|error| NotifyError::Delivery { attempts: 0, detail: error.to_string() })
    }
}

fn parse_mailbox(name: Option<String>, address: &str) -> Result<Mailbox, NotifyError> {
    let address = address.trim().parse().map_err(|error: lettre::address::AddressError| {
        NotifyError::InvalidAddress { address: address.to_string(), detail: error.to_string() }
    })?;
    Ok(Mailbox::new(name, address))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifyError> {
        let email = self.build_message(message)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(email.clone()).await {
                Ok(response) => {
                    return Ok(SendReceipt {
                        attempts: attempt,
                        provider_message_id: response.message().next().map(str::to_string),
                    });
                }
                Err(error) if error.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        event_name = "notify.email.retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient smtp failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(NotifyError::Delivery {
                        attempts: attempt,
                        detail: error.to_string(),
                    });
                }
            }
        }
    }
}
