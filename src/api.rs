//! HTTP access to the Virtual Geneticist API

/// Failure classification for single attempts and retried requests
pub mod error;

/// A capability trait for single request attempts, and its reqwest implementation
pub mod client;

/// Size aware timeouts and bounded retries around a client
pub mod transport;
