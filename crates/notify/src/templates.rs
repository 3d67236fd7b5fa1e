use serde::Serialize;
use tera::{Context, Tera};

use cabflow_core::domain::booking::TaxiRequest;

use crate::NotifyError;

const LAYOUT: (&str, &str) =
    ("_layout.html.tera", include_str!("../../../templates/email/_layout.html.tera"));

const EMBEDDED: [(&str, &str); 8] = [
    (
        "request_submitted.html.tera",
        include_str!("../../../templates/email/request_submitted.html.tera"),
    ),
    (
        "approval_needed.html.tera",
        include_str!("../../../templates/email/approval_needed.html.tera"),
    ),
    (
        "manager_decision.html.tera",
        include_str!("../../../templates/email/manager_decision.html.tera"),
    ),
    (
        "admin_action_needed.html.tera",
        include_str!("../../../templates/email/admin_action_needed.html.tera"),
    ),
    (
        "booking_confirmed.html.tera",
        include_str!("../../../templates/email/booking_confirmed.html.tera"),
    ),
    (
        "request_rejected.html.tera",
        include_str!("../../../templates/email/request_rejected.html.tera"),
    ),
    (
        "request_cancelled.html.tera",
        include_str!("../../../templates/email/request_cancelled.html.tera"),
    ),
    ("reminder.html.tera", include_str!("../../../templates/email/reminder.html.tera")),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestSubmitted,
    ApprovalNeeded,
    ManagerDecision,
    AdminActionNeeded,
    BookingConfirmed,
    RequestRejected,
    RequestCancelled,
    Reminder,
}

impl NotificationKind {
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::RequestSubmitted => "request_submitted",
            Self::ApprovalNeeded => "approval_needed",
            Self::ManagerDecision => "manager_decision",
            Self::AdminActionNeeded => "admin_action_needed",
            Self::BookingConfirmed => "booking_confirmed",
            Self::RequestRejected => "request_rejected",
            Self::RequestCancelled => "request_cancelled",
            Self::Reminder => "reminder",
        }
    }

    pub fn template_name(&self) -> String {
        format!("{}.html.tera", self.as_key())
    }

    /// Name of the pre-approved WhatsApp template for this kind.
    pub fn whatsapp_template(&self) -> String {
        format!("taxi_{}", self.as_key())
    }

    pub fn subject(&self, request: &RequestView) -> String {
        let reference = &request.reference_id;
        match self {
            Self::RequestSubmitted => format!("Taxi request {reference} submitted"),
            Self::ApprovalNeeded => {
                format!("Approval needed: taxi request {reference} from {}", request.requester_name)
            }
            Self::ManagerDecision => {
                format!("Taxi request {reference}: {}", request.status_label)
            }
            Self::AdminActionNeeded => format!("Arrange a cab for {reference}"),
            Self::BookingConfirmed => format!("Cab confirmed for {reference}"),
            Self::RequestRejected => format!("Taxi request {reference} rejected"),
            Self::RequestCancelled => format!("Taxi request {reference} cancelled"),
            Self::Reminder => format!("Reminder: taxi request {reference} is awaiting action"),
        }
    }

    /// Positional body parameters for the WhatsApp template, after the
    /// recipient's name.
    pub fn whatsapp_parameters(&self, request: &RequestView) -> Vec<String> {
        let mut parameters = vec![request.reference_id.clone()];
        match self {
            Self::BookingConfirmed => {
                if let Some(arrangement) = &request.arrangement {
                    parameters.extend([
                        arrangement.cab_number.clone(),
                        arrangement.driver_name.clone(),
                        format!("+{}", arrangement.driver_phone),
                    ]);
                }
                parameters.push(request.pickup_at.clone());
            }
            Self::ApprovalNeeded | Self::Reminder | Self::AdminActionNeeded => {
                parameters.push(request.requester_name.clone());
                parameters.push(request.pickup_at.clone());
            }
            _ => parameters.push(request.status_label.clone()),
        }
        parameters
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArrangementView {
    pub vendor_name: String,
    pub cab_number: String,
    pub driver_name: String,
    pub driver_phone: String,
    pub estimated_fare: String,
    pub admin_comment: Option<String>,
}

/// Flattened, display-ready view of a request for templates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestView {
    pub reference_id: String,
    pub status_label: String,
    pub requester_name: String,
    pub requester_email: String,
    pub department: String,
    pub location: String,
    pub purpose: String,
    pub pickup_location: String,
    pub drop_location: String,
    pub pickup_at: String,
    pub return_at: Option<String>,
    pub passengers: u8,
    pub trip_type: String,
    pub approver_name: String,
    pub manager_comment: Option<String>,
    pub rejection_reason: Option<String>,
    pub arrangement: Option<ArrangementView>,
    pub reminder_count: u32,
    pub stage_entered_at: String,
}

const DISPLAY_TIME: &str = "%d %b %Y %H:%M UTC";

impl From<&TaxiRequest> for RequestView {
    fn from(request: &TaxiRequest) -> Self {
        Self {
            reference_id: request.id.0.clone(),
            status_label: request.status.label().to_string(),
            requester_name: request.requester.name.clone(),
            requester_email: request.requester.email.clone(),
            department: request.department.clone(),
            location: request.location.clone(),
            purpose: request.trip.purpose.clone(),
            pickup_location: request.trip.pickup_location.clone(),
            drop_location: request.trip.drop_location.clone(),
            pickup_at: request.trip.pickup_at.format(DISPLAY_TIME).to_string(),
            return_at: request.trip.return_at.map(|at| at.format(DISPLAY_TIME).to_string()),
            passengers: request.trip.passengers,
            trip_type: request.trip.trip_type.as_key().to_string(),
            approver_name: request.approver.name.clone(),
            manager_comment: request.manager_decision.as_ref().and_then(|d| d.comment.clone()),
            rejection_reason: request.rejection_reason.clone(),
            arrangement: request.arrangement.as_ref().map(|arrangement| ArrangementView {
                vendor_name: arrangement.vendor_name.clone(),
                cab_number: arrangement.cab_number.clone(),
                driver_name: arrangement.driver_name.clone(),
                driver_phone: arrangement.driver_phone.clone(),
                estimated_fare: format!("{:.2}", arrangement.estimated_fare),
                admin_comment: arrangement.admin_comment.clone(),
            }),
            reminder_count: request.reminder_count,
            stage_entered_at: request.stage_entered_at.format(DISPLAY_TIME).to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotificationContent {
    pub request: RequestView,
    pub portal_url: String,
    pub decision_url: Option<String>,
    pub decision_link_hours: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

#[derive(Clone, Debug)]
pub struct EmailTemplates {
    tera: Tera,
}

impl EmailTemplates {
    /// Templates compiled into the binary.
    pub fn embedded() -> Result<Self, NotifyError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![".html.tera"]);
        tera.add_raw_templates(std::iter::once(LAYOUT).chain(EMBEDDED))
            .map_err(|error| NotifyError::Template(error.to_string()))?;
        Ok(Self { tera })
    }

    /// Loads `*.html.tera` (layout included) from a directory so operators can
    /// restyle mail without a rebuild. Missing kinds fail at render time.
    pub fn from_dir(dir: &str) -> Result<Self, NotifyError> {
        let mut tera = Tera::new(&format!("{}/*.html.tera", dir.trim_end_matches('/')))
            .map_err(|error| NotifyError::Template(error.to_string()))?;
        tera.autoescape_on(vec![".html.tera"]);
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        kind: NotificationKind,
        content: &NotificationContent,
    ) -> Result<RenderedEmail, NotifyError> {
        let context = Context::from_serialize(content)
            .map_err(|error| NotifyError::Template(error.to_string()))?;
        let html = self
            .tera
            .render(&kind.template_name(), &context)
            .map_err(|error| NotifyError::Template(format!("{}: {error}", kind.as_key())))?;
        Ok(RenderedEmail { subject: kind.subject(&content.request), html })
    }
}
