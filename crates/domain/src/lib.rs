pub mod diff_engine;
pub mod integrity;
pub mod services;
pub mod snapshot_diff;

pub use diff_engine::{apply_diff, ApplyResult};
pub use integrity::check_integrity;
pub use services::{trigger_spec_from_node, MissionService, RunBookkeeping};
pub use snapshot_diff::derive_operations;
pub use mission_core::{MissionError, MissionResult};
