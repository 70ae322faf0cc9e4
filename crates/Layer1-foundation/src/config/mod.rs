//! Config - settings management
//!
//! - `engine.rs` - EngineConfig for the task engine

mod engine;

pub use engine::{
    EngineConfig, DEFAULT_GIT_PATH, DEFAULT_WORKER_THREAD_NAME, ENGINE_CONFIG_FILE,
};
