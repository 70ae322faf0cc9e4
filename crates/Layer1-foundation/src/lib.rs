//! # branchwork-foundation
//!
//! Foundation layer for branchwork:
//! - Error: shared error type and `Result` alias
//! - Core: shared traits (`Configurable`)
//! - Storage: JSON settings files (per-user, per-repository)
//! - Config: `EngineConfig` for the task engine
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Layer4-cli                                  │
//! │  └── drives tasks, renders notifications     │
//! ├──────────────────────────────────────────────┤
//! │  Layer2-task                                 │
//! │  └── TaskRunner, flows, processes, worker    │
//! ├──────────────────────────────────────────────┤
//! │  Layer1-foundation (this crate)              │
//! │  └── errors, settings, JSON storage          │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Core
// ============================================================================
pub use core::Configurable;

// ============================================================================
// Config
// ============================================================================
pub use config::{
    EngineConfig, DEFAULT_GIT_PATH, DEFAULT_WORKER_THREAD_NAME, ENGINE_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, STORE_DIR_NAME};
