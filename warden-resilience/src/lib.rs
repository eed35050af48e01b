//! Resilience patterns for warden
//!
//! Backoff calculation for respawning crashed processes, and a listener for
//! the termination signals supervisors and children react to.

pub mod backoff;
pub mod signals;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, BackoffStrategy, RestartBackoff};
pub use signals::{SignalListener, TerminationSignal};
