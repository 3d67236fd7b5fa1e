//! SAP SuccessFactors adapter for the employee directory seam.

pub mod cache;
pub mod client;
pub mod payload;

pub use cache::CachedDirectory;
pub use client::SapClient;
pub use payload::extract_profile;
