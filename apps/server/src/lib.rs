//! mCSD update client server.
//!
//! Thin HTTP chassis around the [`mcsd_sync`] engine: configuration loading,
//! logging setup, and the internal endpoint that triggers a synchronization
//! run.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod state;

pub use error::{Error, Result};
