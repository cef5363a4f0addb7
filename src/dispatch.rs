//! The task lifecycle engine: retry control, response splitting, and the
//! dispatch orchestrator that drives tasks through their state machine.

pub mod orchestrator;
pub mod retry;
pub mod splitter;

pub use orchestrator::Dispatcher;
pub use retry::{RetryError, RetryPolicy};
pub use splitter::{DEFAULT_MARKERS, Marker, SplitResponse, split};
