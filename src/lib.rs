//! cadenza — lesson booking and reschedule negotiation for a music school.

pub mod auth;
pub mod builder;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
pub mod wire;
