//! Test doubles for the external services.
//!
//! This module provides:
//! - A local music API server
//! - Flaky object storage for upload retries
//! - An in-memory warehouse and container platform
//! - Record fixtures and run assertions

mod assertions;
mod container;
mod fixtures;
mod music_api;
mod storage;
mod warehouse;

pub use assertions::{
    assert_output_status, assert_output_value, assert_stage_statuses, assert_staging_empty,
};
pub use container::MemoryContainerPlatform;
pub use fixtures::{chart_record, feature_record, SeedingLauncher};
pub use music_api::{spawn_music_api, MusicApi};
pub use storage::FlakyStorage;
pub use warehouse::MemoryWarehouse;
