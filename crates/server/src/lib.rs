//! HTTP surface of the taxi desk: JSON API for the portal, one-click
//! decision pages for managers, and the reminder job.

pub mod admin;
pub mod approvals;
pub mod auth;
pub mod bookings;
pub mod bootstrap;
pub mod decision_links;
pub mod directory;
pub mod error;
pub mod health;
pub mod reminders;
pub mod state;
pub mod workflow;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(bookings::routes())
        .merge(approvals::routes())
        .merge(admin::routes())
        .merge(decision_links::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
