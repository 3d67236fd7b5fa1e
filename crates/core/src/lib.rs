pub mod audit;
pub mod budget;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod phone;
pub mod routing;
pub mod security;

pub use budget::{BudgetCheck, BudgetLedger, BudgetPeriod, DepartmentBudget};
pub use directory::{DirectoryError, EmployeeDirectory, InMemoryDirectory};
pub use domain::account::{EmployeeAccount, Role};
pub use domain::booking::{
    AdminArrangement, Decision, ReferenceId, RequestStatus, Requester, TaxiRequest, TripDetails,
    TripType,
};
pub use domain::employee::{ApproverContact, EmployeeId, EmployeeOverride, EmployeeProfile};
pub use domain::feedback::TripFeedback;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use routing::{ApprovalRouter, RouteRequest, RouteSource, RoutingDecision, RoutingRule};
pub use security::{SessionClaims, SessionSigner};
