// src/models/mod.rs

//! Domain models for the crawler application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod entity;
mod partition;
mod report;

// Re-export all public types
pub use config::{
    Config, GithubConfig, LoggingConfig, PartitionConfig, RetryConfig, StorageBackend,
    StorageConfig, WriteConfig,
};
pub use entity::{Entity, Metadata, MetadataValue};
pub use partition::{Page, PartitionState, Window};
pub use report::{CrawlReport, Termination, WindowKind, WindowOutcome, WriteStats};
