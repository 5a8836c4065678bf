//! Background file-replication engine core.
//!
//! Watches one or more source directories, waits for newly-created or
//! modified files to become quiescent, and mirrors them into a destination
//! root with progress reporting and cooperative cancellation. See
//! [`controller::Controller`] for the crate's entry point.
#![deny(unused)]

pub mod config;
pub mod controller;
pub mod copier;
pub mod identity;
pub mod lock;
pub mod snapshot;
pub mod transfer;
pub mod watch;
pub mod worker;

pub use controller::{Controller, ControllerEvent};
pub use transfer::Transfer;
