//! Approval routing: which manager signs off a request.
//!
//! Routing used to be a long chain of department/location special cases. It
//! is now a table of [`RoutingRule`] rows evaluated in fixed tiers, with the
//! SAP reports-to manager as the fallback.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::employee::{ApproverContact, EmployeeId};

pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: i64,
    pub priority: i32,
    pub department: String,
    pub location: Option<String>,
    pub employee_id: Option<EmployeeId>,
    pub approver: ApproverContact,
    pub active: bool,
    pub note: Option<String>,
}

impl RoutingRule {
    fn department_matches(&self, department: &str) -> bool {
        normalize(&self.department) == normalize(department)
    }

    fn is_wildcard(&self) -> bool {
        self.department.trim() == WILDCARD
    }

    fn location_matches(&self, location: &str) -> bool {
        self.location.as_deref().is_some_and(|value| normalize(value) == normalize(location))
    }

    /// `None`, blank and `*` all mean "any location".
    fn has_location(&self) -> bool {
        self.location
            .as_deref()
            .map(|value| !value.trim().is_empty() && value.trim() != WILDCARD)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub employee_id: EmployeeId,
    pub department: String,
    pub location: String,
    pub sap_manager: Option<ApproverContact>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    EmployeeOverride,
    DepartmentAndLocation,
    Department,
    LocationWildcard,
    SapManager,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub approver: ApproverContact,
    pub source: RouteSource,
    pub rule_id: Option<i64>,
    pub manager_stage_required: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no approver configured for department `{department}` at `{location}`")]
    NoApprover { department: String, location: String },
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalRouter {
    rules: Vec<RoutingRule>,
}

impl ApprovalRouter {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        let mut rules: Vec<RoutingRule> = rules.into_iter().filter(|rule| rule.active).collect();
        rules.sort_by_key(|rule| (rule.priority, rule.id));
        Self { rules }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn resolve(&self, request: &RouteRequest) -> Result<RoutingDecision, RoutingError> {
        const TIERS: [RouteSource; 4] = [
            RouteSource::EmployeeOverride,
            RouteSource::DepartmentAndLocation,
            RouteSource::Department,
            RouteSource::LocationWildcard,
        ];

        for source in TIERS {
            let matched = self.rules.iter().find(|&rule| tier_matches(source, rule, request));
            if let Some(rule) = matched {
                return Ok(self.decision(request, rule.approver.clone(), source, Some(rule.id)));
            }
        }

        match &request.sap_manager {
            Some(manager) => {
                Ok(self.decision(request, manager.clone(), RouteSource::SapManager, None))
            }
            None => Err(RoutingError::NoApprover {
                department: request.department.clone(),
                location: request.location.clone(),
            }),
        }
    }

    fn decision(
        &self,
        request: &RouteRequest,
        approver: ApproverContact,
        source: RouteSource,
        rule_id: Option<i64>,
    ) -> RoutingDecision {
        let manager_stage_required = !approver.employee_id.matches(&request.employee_id.0);
        RoutingDecision { approver, source, rule_id, manager_stage_required }
    }
}

fn tier_matches(source: RouteSource, rule: &RoutingRule, request: &RouteRequest) -> bool {
    let personal = rule.employee_id.is_some();
    match source {
        RouteSource::EmployeeOverride => {
            rule.employee_id.as_ref().map(|id| id.matches(&request.employee_id.0)).unwrap_or(false)
        }
        RouteSource::DepartmentAndLocation => {
            !personal
                && rule.department_matches(&request.department)
                && rule.location_matches(&request.location)
        }
        RouteSource::Department => {
            !personal && rule.department_matches(&request.department) && !rule.has_location()
        }
        RouteSource::LocationWildcard => {
            !personal && rule.is_wildcard() && rule.location_matches(&request.location)
        }
        RouteSource::SapManager => false,
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{ApprovalRouter, RouteRequest, RouteSource, RoutingError, RoutingRule};
    use crate::domain::employee::{ApproverContact, EmployeeId};

    fn approver(id: &str) -> ApproverContact {
        ApproverContact {
            employee_id: EmployeeId(id.to_string()),
            name: format!("Approver {id}"),
            email: format!("{}@example.com", id.to_ascii_lowercase()),
            phone: None,
        }
    }

    fn rule(id: i64, department: &str, location: Option<&str>, approver_id: &str) -> RoutingRule {
        RoutingRule {
            id,
            priority: 100,
            department: department.to_string(),
            location: location.map(str::to_string),
            employee_id: None,
            approver: approver(approver_id),
            active: true,
            note: None,
        }
    }

    fn request(employee: &str, department: &str, location: &str) -> RouteRequest {
        RouteRequest {
            employee_id: EmployeeId(employee.to_string()),
            department: department.to_string(),
            location: location.to_string(),
            sap_manager: Some(approver("SAPMGR")),
        }
    }

    fn router() -> ApprovalRouter {
        let mut expat = rule(1, "Engineering", None, "CTO01");
        expat.employee_id = Some(EmployeeId("X9001".to_string()));

        ApprovalRouter::new(vec![
            expat,
            rule(2, "Production", Some("Pune"), "HODPUNE"),
            rule(3, "Production", None, "HODPROD"),
            rule(4, "*", Some("Chennai"), "SITECHN"),
            rule(5, "Quality", None, "HODQA"),
        ])
    }

    #[test]
    fn employee_override_wins_over_department_rules() {
        let decision = router().resolve(&request("x9001", "Production", "Pune")).expect("route");
        assert_eq!(decision.source, RouteSource::EmployeeOverride);
        assert_eq!(decision.approver.employee_id.0, "CTO01");
        assert_eq!(decision.rule_id, Some(1));
    }

    #[test]
    fn department_and_location_beats_department_only() {
        let decision = router().resolve(&request("E1", " production ", "PUNE")).expect("route");
        assert_eq!(decision.source, RouteSource::DepartmentAndLocation);
        assert_eq!(decision.approver.employee_id.0, "HODPUNE");

        let elsewhere = router().resolve(&request("E1", "Production", "Nashik")).expect("route");
        assert_eq!(elsewhere.source, RouteSource::Department);
        assert_eq!(elsewhere.approver.employee_id.0, "HODPROD");
    }

    #[test]
    fn location_wildcard_applies_before_sap_fallback() {
        let decision = router().resolve(&request("E1", "Finance", "Chennai")).expect("route");
        assert_eq!(decision.source, RouteSource::LocationWildcard);
        assert_eq!(decision.approver.employee_id.0, "SITECHN");
    }

    #[test]
    fn sap_manager_is_the_fallback() {
        let decision = router().resolve(&request("E1", "Finance", "Pune")).expect("route");
        assert_eq!(decision.source, RouteSource::SapManager);
        assert_eq!(decision.rule_id, None);
    }

    #[test]
    fn missing_manager_is_an_error() {
        let mut req = request("E1", "Finance", "Pune");
        req.sap_manager = None;
        assert_eq!(
            router().resolve(&req),
            Err(RoutingError::NoApprover {
                department: "Finance".to_string(),
                location: "Pune".to_string()
            })
        );
    }

    #[test]
    fn priority_orders_rules_within_a_tier_and_inactive_rules_are_ignored() {
        let mut preferred = rule(9, "Quality", None, "HODQA2");
        preferred.priority = 10;
        let mut disabled = rule(8, "Quality", None, "RETIRED");
        disabled.priority = 1;
        disabled.active = false;

        let router =
            ApprovalRouter::new(vec![rule(5, "Quality", None, "HODQA"), preferred, disabled]);
        let decision = router.resolve(&request("E1", "Quality", "Pune")).expect("route");
        assert_eq!(decision.approver.employee_id.0, "HODQA2");
        assert_eq!(router.rules().len(), 2);
    }

    #[test]
    fn requester_who_is_their_own_approver_skips_manager_stage() {
        let decision =
            router().resolve(&request("hodprod", "Production", "Nashik")).expect("route");
        assert!(!decision.manager_stage_required);

        let other = router().resolve(&request("E1", "Production", "Nashik")).expect("route");
        assert!(other.manager_stage_required);
    }

    #[test]
    fn star_location_means_any_location_for_a_department() {
        let router = ApprovalRouter::new(vec![rule(7, "Sales", Some("*"), "HODSALES")]);
        let decision = router.resolve(&request("E5", "sales", "Indore")).expect("route");
        assert_eq!(decision.source, RouteSource::Department);
        assert_eq!(decision.rule_id, Some(7));
    }
}
