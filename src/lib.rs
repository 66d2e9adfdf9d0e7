//! nuo - Node Upgrade Orchestrator.
//!
//! Rolls new worker node plans across managed clusters, cordoning or draining
//! at most `maxUnavailableWorker` nodes at a time and returning each node to
//! service once its agent reports the new plan applied.

pub mod admission;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod crd;
pub mod differ;
pub mod error;
pub mod handler;
pub mod lock;
pub mod mutator;
pub mod planner;
pub mod readiness;
pub mod store;
pub mod telemetry;

pub use error::NuoError;
