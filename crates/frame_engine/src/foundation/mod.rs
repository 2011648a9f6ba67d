//! Foundation module - Core utilities shared by the engine
//!
//! Currently this is just the logging bootstrap.

pub mod logging;
