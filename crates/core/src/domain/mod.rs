pub mod account;
pub mod booking;
pub mod employee;
pub mod feedback;
