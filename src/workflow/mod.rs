pub mod retry;

pub use retry::{execute_with_retry, CallOutcome, RetryPolicy};
