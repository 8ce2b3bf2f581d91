//! Error-recovery operators.
//!
//! All of them act on domain errors only. Protocol violations pass through every recovery
//! operator untouched.

mod continue_on;
mod resume;
mod retry;

pub use continue_on::ContinueStrategy;
pub use resume::ErrorBranches;
