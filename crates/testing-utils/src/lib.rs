//! # Mission Testing Utils
//!
//! Shared testing utilities for the mission orchestration workspace.
//!
//! ## Features
//!
//! - **In-memory repositories**: compare-and-swap mission and schedule stores
//! - **In-memory logs**: run history and operation journal without touching disk
//! - **Collaborator doubles**: scripted execution engine, recording dead-letter sink
//! - **Manual clock**: deterministic time for scheduler tests
//! - **Test data builders**: missions, nodes and schedules with sensible defaults
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! mission-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust
//! use mission_testing_utils::{InMemoryMissionRepository, MissionBuilder};
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
