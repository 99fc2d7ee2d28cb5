//! API handlers.

pub mod credits;
pub mod features;
pub mod health;
pub mod sweep;
