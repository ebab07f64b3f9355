//! Background Tasks Module
//!
//! Contains the timer tasks that run alongside cache tables.
//!
//! # Tasks
//! - Expiration sweep: one-shot, rescheduled by each table after every sweep

mod sweeper;

pub use sweeper::{background_handle, spawn_sweep};
