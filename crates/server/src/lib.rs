//! HTTP layer and long-running machinery for stowage.
//!
//! Ingests content-addressed archive uploads, tracks who references them,
//! migrates staged files to the remote object store, and reconciles the
//! three-way state between staging disk, database, and remote store.

pub mod admission;
pub mod auth;
pub mod error;
pub mod gc;
pub mod handlers;
pub mod holds;
pub mod notify;
pub mod queue;
pub mod quota;
pub mod routes;
pub mod scheduler;
pub mod staging;
pub mod state;
pub mod tracker;

pub use error::{ApiError, ApiResult};
pub use state::AppState;
