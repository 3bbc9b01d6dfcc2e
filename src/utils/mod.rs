pub mod logging;
pub mod retry;

pub use retry::{poll_until, PollResult, RetryPolicy};
