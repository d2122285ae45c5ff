//! Audio cry monitoring, decoupled from the video path.

mod chunk;
mod monitor;
mod tracker;


pub use chunk::{resample_linear, AudioChunk};
pub use monitor::{cry_class_indices, CryMonitor, CryMonitorStats, CryState};
pub use tracker::CryTracker;
