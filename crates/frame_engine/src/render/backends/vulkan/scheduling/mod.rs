//! Per-frame scheduling across the in-flight slots

pub mod scheduler;

pub use scheduler::{FrameBackend, FrameCounters, FrameOutcome, FrameScheduler, FrameSlotState};
