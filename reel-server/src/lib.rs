//! # Reel Server
//!
//! Runs the reel scheduler as a standalone process: loads the configuration,
//! opens the SQLite job store, registers the built-in jobs and logs queue
//! events until interrupted.

pub mod app;
pub mod jobs;

pub use app::App;
