//! Backend client for lorekeep.
//!
//! [`HttpBackend`] implements `lorekeep_core::Backend` over bearer-authenticated
//! JSON. Knowledge nodes and entries are critical: transient failures are
//! retried with exponential backoff and escalate as errors. Everything else
//! logs a warning and returns nothing.

pub mod http;

pub use http::HttpBackend;
