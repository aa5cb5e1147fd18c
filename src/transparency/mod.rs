//! Transparency module for the HumanSign agent.
//!
//! Tracks what the agent captured, dropped and shipped so users can see
//! exactly what a recording involved.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, Counter, SharedTransparencyLog,
    TransparencyLog, TransparencyStats,
};
