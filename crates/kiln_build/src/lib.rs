//! Build orchestration across cache slots and backend adapters.
//!
//! The [`Orchestrator`] drives every [`BuildRequest`] of a run through the
//! slot state machine (`requested → slot acquired → populating → ready /
//! failed / skipped`), runs independent builds in parallel, serializes
//! builds that share a non-reentrant toolchain, retries transient failures
//! once, and collects the outcomes into a [`RunSummary`].

#![warn(missing_docs)]

pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod request;
pub mod state;
pub mod summary;

pub use error::BuildError;
pub use orchestrator::Orchestrator;
pub use policy::{ContentionPolicy, OrchestratorOptions};
pub use request::BuildRequest;
pub use state::BuildState;
pub use summary::{BuildOutcome, RunSummary};
