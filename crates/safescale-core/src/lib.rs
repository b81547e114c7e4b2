//! Core error and retry machinery for SafeScale.
//!
//! This crate provides the foundations shared by every other SafeScale crate:
//!
//! - **Error taxonomy**: a closed set of error kinds with cause chaining and
//!   cleanup consequences, surfaced uniformly from every layer
//! - **Retry engine**: transient-aware retries with per-attempt and overall
//!   budgets
//! - **Timeout catalog**: the named operation timeouts used across the
//!   orchestrator
//!
//! # Example
//!
//! ```
//! use safescale_core::{Error, ErrorKind};
//!
//! let err = Error::not_found("host 'gw-1' does not exist");
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert!(!err.is_transient());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod retry;
pub mod timeouts;
pub mod tracelog;

pub use error::{Error, ErrorKind, Result};
pub use retry::{retry_with_budget, RetryBudget, RetryPolicy};
pub use timeouts::Timeouts;
