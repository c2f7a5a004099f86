//! Scheduling primitives shared by the upload and download pipelines.
//!
//! - [`OrderedQueue`] runs work concurrently under a limit and commits the
//!   results strictly in index order.
//! - [`PauseGate`] is a cooperative suspension point for pause/unpause.
//! - [`retry`] wraps a fallible async operation with exponential backoff.

pub mod gate;
pub mod ordered;
pub mod retry;

pub use gate::PauseGate;
pub use ordered::{OrderedQueue, QueueSettings, QueueStats};
pub use retry::{RetryAction, RetryPolicy, retry};
