pub mod boundary;
pub mod rate_limit;
pub mod validator;

pub use boundary::WorkspaceBoundary;
pub use rate_limit::{RateDecision, RateLimiter, RateUsage, ResetScope};
pub use validator::{PathValidator, PathVerdict};
