//! Diagnostic checkers and the scheduler that runs them.

mod builtin;
pub mod progress;
pub mod registry;
pub mod scheduler;

pub use progress::ProgressTracker;
pub use registry::{CheckError, Checker, CheckerDefinitions, CheckerFn, CheckerRegistry};
pub use scheduler::CheckScheduler;
