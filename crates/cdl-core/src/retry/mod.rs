//! Retry and backoff policy.
//!
//! This module encapsulates error classification (network failures,
//! throttling, permanent source errors, local disk errors) and exponential
//! backoff decisions so the transfer loop applies one consistent policy.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::TransferError;
pub use policy::{FailureClass, RetryDecision, RetryPolicy};
