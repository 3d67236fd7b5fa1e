use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use cabflow_core::domain::booking::ReferenceId;
use cabflow_core::phone::normalize_phone;

use crate::email::{EmailMessage, Mailer};
use crate::templates::{EmailTemplates, NotificationContent, NotificationKind};
use crate::whatsapp::{WhatsAppMessage, WhatsAppSender};
use crate::{NotifyError, SendReceipt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    WhatsApp,
}

impl Channel {
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::WhatsApp => "whatsapp",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Recipient {
    pub fn new(name: impl Into<String>, email: Option<String>, phone: Option<String>) -> Self {
        Self { name: name.into(), email, phone }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub reference_id: ReferenceId,
    pub recipients: Vec<Recipient>,
    pub content: NotificationContent,
}

/// One row per recipient per channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub reference_id: String,
    pub kind: NotificationKind,
    pub channel: Channel,
    pub recipient: String,
    pub delivered: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub provider_message_id: Option<String>,
}

pub struct NotificationDispatcher {
    templates: EmailTemplates,
    mailer: Arc<dyn Mailer>,
    whatsapp: Arc<dyn WhatsAppSender>,
    whatsapp_language: String,
    default_country_code: String,
}

impl NotificationDispatcher {
    pub fn new(
        templates: EmailTemplates,
        mailer: Arc<dyn Mailer>,
        whatsapp: Arc<dyn WhatsAppSender>,
        whatsapp_language: impl Into<String>,
        default_country_code: impl Into<String>,
    ) -> Self {
        Self {
            templates,
            mailer,
            whatsapp,
            whatsapp_language: whatsapp_language.into(),
            default_country_code: default_country_code.into(),
        }
    }

    /// Sends on every enabled channel. Failures are reported, never returned,
    /// so one bad address or a relay outage cannot block the workflow.
    pub async fn dispatch(&self, notification: &Notification) -> Vec<DeliveryReport> {
        let mut reports = Vec::new();
        if self.mailer.is_enabled() {
            self.send_email(notification, &mut reports).await;
        }
        if self.whatsapp.is_enabled() {
            self.send_whatsapp(notification, &mut reports).await;
        }

        let failed = reports.iter().filter(|report| !report.delivered).count();
        if failed > 0 {
            warn!(
                event_name = "notify.dispatch.partial_failure",
                reference_id = %notification.reference_id,
                kind = notification.kind.as_key(),
                failed,
                total = reports.len(),
                "some notifications were not delivered"
            );
        } else {
            info!(
                event_name = "notify.dispatch.completed",
                reference_id = %notification.reference_id,
                kind = notification.kind.as_key(),
                total = reports.len(),
                "notifications dispatched"
            );
        }
        reports
    }

    async fn send_email(&self, notification: &Notification, reports: &mut Vec<DeliveryReport>) {
        let addresses: Vec<&str> = notification
            .recipients
            .iter()
            .filter_map(|recipient| recipient.email.as_deref())
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .collect();
        if addresses.is_empty() {
            return;
        }

        let rendered = self.templates.render(notification.kind, &notification.content);
        for address in addresses {
            let outcome = match &rendered {
                Ok(rendered) => {
                    self.mailer
                        .send(&EmailMessage {
                            to: vec![address.to_string()],
                            subject: rendered.subject.clone(),
                            html_body: rendered.html.clone(),
                        })
                        .await
                }
                Err(error) => Err(error.clone()),
            };
            reports.push(report(notification, Channel::Email, address, outcome));
        }
    }

    async fn send_whatsapp(&self, notification: &Notification, reports: &mut Vec<DeliveryReport>) {
        for recipient in &notification.recipients {
            let Some(raw_phone) = recipient.phone.as_deref().filter(|p| !p.trim().is_empty())
            else {
                continue;
            };

            let to = match normalize_phone(raw_phone, &self.default_country_code) {
                Ok(to) => to,
                Err(error) => {
                    let invalid = NotifyError::InvalidAddress {
                        address: raw_phone.to_string(),
                        detail: error.to_string(),
                    };
                    reports.push(report(notification, Channel::WhatsApp, raw_phone, Err(invalid)));
                    continue;
                }
            };

            let mut parameters = vec![recipient.name.clone()];
            parameters.extend(notification.kind.whatsapp_parameters(&notification.content.request));
            let message = WhatsAppMessage {
                to: to.clone(),
                template_name: notification.kind.whatsapp_template(),
                language_code: self.whatsapp_language.clone(),
                parameters,
            };
            let outcome = self.whatsapp.send(&message).await;
            reports.push(report(notification, Channel::WhatsApp, &to, outcome));
        }
    }
}

fn report(
    notification: &Notification,
    channel: Channel,
    recipient: &str,
    outcome: Result<SendReceipt, NotifyError>,
) -> DeliveryReport {
    let (delivered, attempts, error, provider_message_id) = match outcome {
        Ok(receipt) => (true, receipt.attempts, None, receipt.provider_message_id),
        Err(error) => (false, error.attempts(), Some(error.to_string()), None),
    };
    DeliveryReport {
        reference_id: notification.reference_id.0.clone(),
        kind: notification.kind,
        channel,
        recipient: recipient.to_string(),
        delivered,
        attempts,
        error,
        provider_message_id,
    }
}
