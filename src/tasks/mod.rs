//! Background Tasks Module
//!
//! Optional tasks that run alongside the cache.
//!
//! # Tasks
//! - Sweeper: removes expired and stale entries at a fixed interval, so
//!   memory is reclaimed even when no writes arrive

mod sweeper;

pub use sweeper::{spawn_sweeper_task, SweeperGuard};
