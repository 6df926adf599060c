//! Shared handles every route closes over.

use taskyard::control::Controller;
use taskyard::producer::Producer;

/// Cloned into each request; both fields are themselves cheap `Clone`s
/// (a pooled connection handle plus an `Arc`-wrapped queue store).
#[derive(Clone)]
pub struct AppState {
    /// Entry point for the four enqueue operations.
    pub producer: Producer,
    /// Entry point for retry/stop/status/stats reads.
    pub controller: Controller,
}
