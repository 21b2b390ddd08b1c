//! Transfer service abstraction.
//!
//! This module provides a `TransferService` trait for the external service
//! that moves data between collections, and an HTTP client for a
//! Globus-transfer-style API.

mod globus;
mod types;

pub use globus::HttpTransferClient;
pub use types::*;
