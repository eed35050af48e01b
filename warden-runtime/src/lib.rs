//! Child-side runtime for warden
//!
//! Programs supervised by a warden parent implement [`ChildProcess`] and hand
//! it to [`run_child`] (single supervised child) or [`run_worker`] (pool
//! member). The runtime performs the handshake, waits for a stop trigger and
//! reports failures back to the parent. One-shot programs use [`run_once`].
//!
//! All output that is not protocol traffic must go to stderr, since stdout is
//! the channel to the parent.

pub mod child;
pub mod link;

pub use child::{run_child, run_once, run_worker, serve, ChildContext, ChildProcess, StopTrigger};
pub use link::{LinkWriter, ParentLink};
