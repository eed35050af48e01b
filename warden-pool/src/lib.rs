//! Worker pool manager
//!
//! A [`WorkerPool`] keeps a fixed number of workers running one shared
//! program. It respawns workers that die unexpectedly, counts the `"request"`
//! signals each worker reports, and recycles a worker once it reaches
//! `max_connections` by bringing a replacement online before retiring it.
//!
//! All pool state is owned by a single task; the [`WorkerPool`] handle talks
//! to it over a command channel, so nothing is shared between threads.

mod actor;
pub mod error;
pub mod events;
pub mod pool;
pub mod worker;

pub use error::{PoolError, PoolResult};
pub use events::PoolEvent;
pub use pool::{PoolSnapshot, WorkerPool, WorkerSnapshot};
pub use worker::{Worker, WorkerId};
