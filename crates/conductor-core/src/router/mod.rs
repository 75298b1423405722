//! Policy router: RBAC checks, rate limits and route resolution.

pub mod policy;
pub mod rate_limit;
pub mod service;

pub use policy::PolicyEngine;
pub use rate_limit::RateLimiter;
pub use service::PolicyRouter;
