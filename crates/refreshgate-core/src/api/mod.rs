//! Authenticated REST client module.
//!
//! This module provides the `ApiClient` for calling the store API with a
//! cookie-carried session credential that is renewed transparently, and the
//! `Transport` seam it dispatches through.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, ApiClientBuilder};
pub use error::{ApiError, TransportError};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
