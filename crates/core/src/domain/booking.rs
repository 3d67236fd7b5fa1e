use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::BudgetPeriod;
use crate::domain::employee::{ApproverContact, EmployeeId};
use crate::errors::DomainError;
use crate::phone::normalize_phone;

pub const MAX_PASSENGERS: u8 = 6;
pub const MAX_PURPOSE_CHARS: usize = 500;
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 90;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceId(pub String);

impl ReferenceId {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let entropy = Uuid::new_v4().simple().to_string();
        Self(format!("TX-{}-{}", now.format("%y%m%d"), entropy[..6].to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    PendingManagerApproval,
    PendingAdminApproval,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        Self::PendingManagerApproval,
        Self::PendingAdminApproval,
        Self::Approved,
        Self::Rejected,
        Self::Cancelled,
    ];

    pub fn as_key(&self) -> &'static str {
        match self {
            Self::PendingManagerApproval => "pending_manager_approval",
            Self::PendingAdminApproval => "pending_admin_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|status| status.as_key() == key)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::PendingManagerApproval => "Pending Manager Approval",
            Self::PendingAdminApproval => "Pending Admin Approval",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingManagerApproval | Self::PendingAdminApproval)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    Local,
    Airport,
    Outstation,
}

impl TripType {
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Airport => "airport",
            Self::Outstation => "outstation",
        }
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "airport" => Some(Self::Airport),
            "outstation" => Some(Self::Outstation),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDetails {
    pub purpose: String,
    pub pickup_location: String,
    pub drop_location: String,
    pub pickup_at: DateTime<Utc>,
    pub return_at: Option<DateTime<Utc>>,
    pub passengers: u8,
    pub trip_type: TripType,
    pub remarks: Option<String>,
}

impl TripDetails {
    /// Names of required fields that are blank. Kept separate from
    /// [`TripDetails::validate`] so the flow engine can refuse submission.
    pub fn missing_fields(&self) -> Vec<String> {
        [
            ("purpose", &self.purpose),
            ("pickup_location", &self.pickup_location),
            ("drop_location", &self.drop_location),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_string())
        .collect()
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        let mut problems: Vec<String> =
            self.missing_fields().into_iter().map(|field| format!("{field} is required")).collect();

        if self.pickup_at <= now {
            problems.push("pickup_at must be in the future".to_string());
        } else if self.pickup_at > now + Duration::days(MAX_BOOKING_HORIZON_DAYS) {
            problems.push(format!(
                "pickup_at must be within {MAX_BOOKING_HORIZON_DAYS} days of submission"
            ));
        }

        if let Some(return_at) = self.return_at {
            if return_at <= self.pickup_at {
                problems.push("return_at must be after pickup_at".to_string());
            }
        }

        if self.passengers == 0 || self.passengers > MAX_PASSENGERS {
            problems.push(format!("passengers must be between 1 and {MAX_PASSENGERS}"));
        }

        let pickup = self.pickup_location.trim();
        if !pickup.is_empty() && pickup.eq_ignore_ascii_case(self.drop_location.trim()) {
            problems.push("pickup_location and drop_location must differ".to_string());
        }

        if self.purpose.chars().count() > MAX_PURPOSE_CHARS {
            problems.push(format!("purpose must be at most {MAX_PURPOSE_CHARS} characters"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(problems))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub employee_id: EmployeeId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub actor_id: String,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminArrangement {
    pub vendor_name: String,
    pub cab_number: String,
    pub driver_name: String,
    pub driver_phone: String,
    pub estimated_fare: Decimal,
    pub admin_comment: Option<String>,
}

impl AdminArrangement {
    /// Validates and returns the arrangement with the driver phone in
    /// WhatsApp form.
    pub fn normalized(mut self, default_country_code: &str) -> Result<Self, DomainError> {
        let mut problems = Vec::new();
        for (name, value) in [
            ("vendor_name", &self.vendor_name),
            ("cab_number", &self.cab_number),
            ("driver_name", &self.driver_name),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{name} is required"));
            }
        }

        match normalize_phone(&self.driver_phone, default_country_code) {
            Ok(phone) => self.driver_phone = phone,
            Err(error) => problems.push(format!("driver_phone: {error}")),
        }

        if self.estimated_fare <= Decimal::ZERO {
            problems.push("estimated_fare must be greater than zero".to_string());
        }

        if !problems.is_empty() {
            return Err(DomainError::Validation(problems));
        }

        self.vendor_name = self.vendor_name.trim().to_string();
        self.cab_number = self.cab_number.trim().to_ascii_uppercase();
        self.driver_name = self.driver_name.trim().to_string();
        self.estimated_fare = self.estimated_fare.round_dp(2);
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxiRequest {
    pub id: ReferenceId,
    pub requester: Requester,
    pub department: String,
    pub location: String,
    pub trip: TripDetails,
    pub approver: ApproverContact,
    pub routing_rule_id: Option<i64>,
    pub status: RequestStatus,
    pub manager_decision: Option<Decision>,
    pub admin_decision: Option<Decision>,
    pub arrangement: Option<AdminArrangement>,
    pub rejection_reason: Option<String>,
    pub reminder_count: u32,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub stage_entered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaxiRequest {
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self.status, next),
            (PendingManagerApproval, PendingAdminApproval)
                | (PendingManagerApproval, Rejected)
                | (PendingAdminApproval, Approved)
                | (PendingAdminApproval, Rejected)
                | (PendingManagerApproval, Cancelled)
                | (PendingAdminApproval, Cancelled)
        )
    }

    /// Moves to `next` and resets the reminder bookkeeping for the new stage.
    pub fn transition_to(
        &mut self,
        next: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidStatusTransition { from: self.status, to: next });
        }

        self.status = next;
        self.stage_entered_at = at;
        self.updated_at = at;
        self.reminder_count = 0;
        self.last_reminder_at = None;
        Ok(())
    }

    /// Budget bucket the trip is charged against.
    pub fn budget_period(&self) -> BudgetPeriod {
        BudgetPeriod::from_datetime(self.trip.pickup_at)
    }

    pub fn is_requested_by(&self, employee_id: &str) -> bool {
        self.requester.employee_id.matches(employee_id)
    }

    pub fn is_assigned_to(&self, employee_id: &str) -> bool {
        self.approver.employee_id.matches(employee_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        AdminArrangement, ReferenceId, RequestStatus, Requester, TaxiRequest, TripDetails,
        TripType,
    };
    use crate::domain::employee::{ApproverContact, EmployeeId};
    use crate::errors::DomainError;

    fn trip(now: chrono::DateTime<Utc>) -> TripDetails {
        TripDetails {
            purpose: "Supplier audit".to_string(),
            pickup_location: "Plant 2 Gate".to_string(),
            drop_location: "Pune Airport".to_string(),
            pickup_at: now + Duration::hours(20),
            return_at: None,
            passengers: 2,
            trip_type: TripType::Airport,
            remarks: None,
        }
    }

    fn request(status: RequestStatus) -> TaxiRequest {
        let now = Utc::now();
        TaxiRequest {
            id: ReferenceId("TX-261018-0A1B2C".to_string()),
            requester: Requester {
                employee_id: EmployeeId("E1001".to_string()),
                name: "Asha Kulkarni".to_string(),
                email: "asha@example.com".to_string(),
                phone: None,
            },
            department: "Production".to_string(),
            location: "Pune".to_string(),
            trip: trip(now),
            approver: ApproverContact {
                employee_id: EmployeeId("E0007".to_string()),
                name: "R. Deshmukh".to_string(),
                email: "hod@example.com".to_string(),
                phone: None,
            },
            routing_rule_id: None,
            status,
            manager_decision: None,
            admin_decision: None,
            arrangement: None,
            rejection_reason: None,
            reminder_count: 2,
            last_reminder_at: Some(now),
            stage_entered_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reference_ids_are_dated_and_opaque() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).single().expect("valid date");
        let id = ReferenceId::generate(at);
        assert!(id.0.starts_with("TX-261018-"));
        assert_eq!(id.0.len(), "TX-261018-".len() + 6);
        assert_ne!(id, ReferenceId::generate(at));
    }

    #[test]
    fn status_keys_round_trip_through_labels_and_keys() {
        assert_eq!(
            RequestStatus::parse_key("Pending Manager Approval"),
            Some(RequestStatus::PendingManagerApproval)
        );
        assert_eq!(RequestStatus::parse_key("approved"), Some(RequestStatus::Approved));
        assert_eq!(RequestStatus::parse_key("on-hold"), None);
        assert_eq!(RequestStatus::PendingAdminApproval.label(), "Pending Admin Approval");
    }

    #[test]
    fn valid_trip_passes() {
        let now = Utc::now();
        trip(now).validate(now).expect("valid trip");
    }

    #[test]
    fn trip_validation_collects_every_problem() {
        let now = Utc::now();
        let mut details = trip(now);
        details.purpose = " ".to_string();
        details.drop_location = "plant 2 gate".to_string();
        details.pickup_at = now - Duration::minutes(5);
        details.return_at = Some(now - Duration::hours(1));
        details.passengers = 9;

        let Err(DomainError::Validation(problems)) = details.validate(now) else {
            panic!("expected validation failure");
        };
        assert!(problems.contains(&"purpose is required".to_string()));
        assert!(problems.contains(&"pickup_at must be in the future".to_string()));
        assert!(problems.contains(&"return_at must be after pickup_at".to_string()));
        assert!(problems.iter().any(|p| p.starts_with("passengers")));
        assert!(problems.iter().any(|p| p.contains("must differ")));
    }

    #[test]
    fn pickup_too_far_ahead_is_rejected() {
        let now = Utc::now();
        let mut details = trip(now);
        details.pickup_at = now + Duration::days(120);
        assert!(matches!(details.validate(now), Err(DomainError::Validation(_))));
    }

    #[test]
    fn transitions_follow_two_stage_chain() {
        let mut req = request(RequestStatus::PendingManagerApproval);
        let later = Utc::now() + Duration::minutes(1);
        req.transition_to(RequestStatus::PendingAdminApproval, later).expect("manager approves");
        assert_eq!(req.status, RequestStatus::PendingAdminApproval);
        assert_eq!(req.reminder_count, 0);
        assert_eq!(req.last_reminder_at, None);
        assert_eq!(req.stage_entered_at, later);

        req.transition_to(RequestStatus::Approved, later).expect("admin approves");
        let error = req
            .transition_to(RequestStatus::Cancelled, later)
            .expect_err("approved requests cannot be cancelled");
        assert!(matches!(error, DomainError::InvalidStatusTransition { .. }));
    }

    #[test]
    fn manager_stage_cannot_jump_to_approved() {
        let mut req = request(RequestStatus::PendingManagerApproval);
        assert!(req.transition_to(RequestStatus::Approved, Utc::now()).is_err());
    }

    #[test]
    fn arrangement_is_normalized() {
        let arrangement = AdminArrangement {
            vendor_name: " City Cabs ".to_string(),
            cab_number: "mh12 ab 1234".to_string(),
            driver_name: "Santosh".to_string(),
            driver_phone: "098765 43210".to_string(),
            estimated_fare: Decimal::new(145_050, 2),
            admin_comment: None,
        }
        .normalized("91")
        .expect("valid arrangement");

        assert_eq!(arrangement.vendor_name, "City Cabs");
        assert_eq!(arrangement.cab_number, "MH12 AB 1234");
        assert_eq!(arrangement.driver_phone, "919876543210");
    }

    #[test]
    fn arrangement_requires_positive_fare_and_phone() {
        let error = AdminArrangement {
            vendor_name: "City Cabs".to_string(),
            cab_number: "MH12".to_string(),
            driver_name: String::new(),
            driver_phone: "12".to_string(),
            estimated_fare: Decimal::ZERO,
            admin_comment: None,
        }
        .normalized("91")
        .expect_err("invalid arrangement");

        let DomainError::Validation(problems) = error else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn budget_period_follows_pickup_month() {
        let mut req = request(RequestStatus::Approved);
        req.trip.pickup_at =
            Utc.with_ymd_and_hms(2026, 11, 2, 6, 0, 0).single().expect("valid date");
        assert_eq!(req.budget_period().as_str(), "2026-11");
        assert!(req.is_requested_by("e1001"));
        assert!(req.is_assigned_to("E0007"));
    }
}
