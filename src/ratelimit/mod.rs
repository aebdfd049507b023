//! Rate limiting logic and state management.

mod context;
mod engine;
mod policy;
mod record;
mod registry;

pub use context::CallContext;
pub use engine::{Decision, RateLimitEngine};
pub use policy::{
    ContextPredicate, DenyAction, KeyFn, KeySource, Policy, PolicyBuilder, ResponseFormat,
};
pub use record::RateLimitRecord;
pub use registry::{Blocked, GuardRegistry, GuardVerdict};
