//! Routing data model, durable per-service usage statistics, and the
//! rule-driven router with weighted load balancing.

pub mod entities;
pub mod router;
pub mod stats;
pub mod types;

pub use router::{RouteDecision, RouteError, Router};
pub use stats::{StatsKey, StatsStore};
pub use types::{AuthStyle, Provider, Rule, Service, ServiceStats, DEFAULT_TIME_WINDOW};
