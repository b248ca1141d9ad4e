//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{backend_settings, MockBackend};
//! use request_syncer::backend::BackendClient;
//!
//! #[tokio::test]
//! async fn test_login() {
//!     let mock = MockBackend::spawn().await;
//!     let client = BackendClient::new(&backend_settings(&mock.base_url, 0)).unwrap();
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::*;
pub use server::{MockBackend, MockState};
