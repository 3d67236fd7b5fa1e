//! Outbound notifications: email over SMTP and WhatsApp template messages.
//!
//! Channels sit behind the [`Mailer`] and [`WhatsAppSender`] traits so the
//! workflow can run with no-op or recording channels when a relay is not
//! configured. [`NotificationDispatcher`] fans a [`Notification`] out to every
//! channel a recipient can be reached on and reports each attempt.

pub mod dispatcher;
pub mod email;
pub mod retry;
pub mod templates;
pub mod whatsapp;

use thiserror::Error;

pub use dispatcher::{Channel, DeliveryReport, Notification, NotificationDispatcher, Recipient};
pub use email::{EmailMessage, Mailer, NoopMailer, RecordingMailer, SmtpMailer};
pub use retry::RetryPolicy;
pub use templates::{
    ArrangementView, EmailTemplates, NotificationContent, NotificationKind, RenderedEmail,
    RequestView,
};
pub use whatsapp::{
    NoopWhatsApp, RecordingWhatsApp, WhatsAppClient, WhatsAppMessage, WhatsAppSender,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("template error: {0}")]
    Template(String),
    #[error("invalid address `{address}`: {detail}")]
    InvalidAddress { address: String, detail: String },
    #[error("{0} channel is not configured")]
    NotConfigured(&'static str),
    #[error("delivery failed after {attempts} attempt(s): {detail}")]
    Delivery { attempts: u32, detail: String },
}

/// What a channel reports back after a successful send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub attempts: u32,
    pub provider_message_id: Option<String>,
}

impl NotifyError {
    /// Attempts made before the error surfaced. Errors raised before any
    /// network call report zero.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivery { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}
