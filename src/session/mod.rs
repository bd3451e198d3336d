//! Session state, reconciliation, and orchestration
//!
//! - [`state`] -- the session data model (status, transcript, parsed
//!   fields).
//! - [`reconciler`] -- the pure reducer folding stream events into
//!   snapshots.
//! - [`orchestrator`] -- the lifecycle owner binding one transport to the
//!   reducer per active session.

pub mod orchestrator;
pub mod reconciler;
pub mod state;
