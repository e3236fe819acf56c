//! Task routing: capability-matched candidate selection and scoring.

pub mod router;
pub mod types;

pub use router::TaskRouter;
pub use types::{RouteOptions, RouterConfig, RoutingDecision, TaskKind};
