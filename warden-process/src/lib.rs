//! Process supervision for warden
//!
//! - [`handle`]: spawn a program with a stdio channel and observe its
//!   messages, exit and close
//! - [`child`]: the single-process supervisor with startup handshake,
//!   graceful stop and crash respawn
//! - [`registry`]: every live spawned process, for emergency shutdown
//! - [`once`]: run a child that handshakes once and exits

pub mod child;
pub mod error;
pub mod handle;
pub mod once;
pub mod registry;

pub use child::{Child, ChildEvent, ChildStatus};
pub use error::{ProcessError, ProcessResult, SupervisorError, SupervisorResult};
pub use handle::{ExitInfo, ProcessEvent, ProcessHandle, ProgramSpec};
pub use nix::sys::signal::Signal;
pub use once::run_once;
