//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject overlapping staging/active directories, including the scratch
//!   paths staging creates next to them
//! - Validate value ranges (intervals > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SyncConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::SyncConfig;
use crate::staging::ArtifactStaging;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is not a socket address: {value}")]
    Address { field: &'static str, value: String },

    #[error("staging.active_dir and staging.staging_dir must not overlap")]
    OverlappingDirs,

    #[error("{field} collides with scratch path {path}")]
    ScratchPath { field: &'static str, path: String },

    #[error("staging.program_file must be a plain file name, got {0}")]
    ProgramFile(String),

    #[error("store.hash_key and store.blob_key must differ")]
    SameKeys,
}

pub fn validate_config(config: &SyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.controller.poll_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "controller.poll_interval_secs" });
    }
    if config.controller.error_report_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "controller.error_report_interval_secs" });
    }
    if config.store.timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "store.timeout_secs" });
    }
    if config.engine.command_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "engine.command_timeout_secs" });
    }

    if config.store.hash_key.is_empty() {
        errors.push(ValidationError::Empty { field: "store.hash_key" });
    }
    if config.store.blob_key.is_empty() {
        errors.push(ValidationError::Empty { field: "store.blob_key" });
    }
    if config.store.hash_key == config.store.blob_key {
        errors.push(ValidationError::SameKeys);
    }
    if config.bus.channel.is_empty() {
        errors.push(ValidationError::Empty { field: "bus.channel" });
    }
    if config.engine.program_prefix.is_empty() {
        errors.push(ValidationError::Empty { field: "engine.program_prefix" });
    }
    if config.engine.memory_limit.is_empty() {
        errors.push(ValidationError::Empty { field: "engine.memory_limit" });
    }

    for (field, value) in [
        ("engine.admin_address", &config.engine.admin_address),
        ("engine.listen_address", &config.engine.listen_address),
    ] {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::Address { field, value: value.clone() });
        }
    }
    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "admin.bind_address",
            value: config.admin.bind_address.clone(),
        });
    }

    let active = &config.staging.active_dir;
    let staging = &config.staging.staging_dir;
    if active.starts_with(staging) || staging.starts_with(active) {
        errors.push(ValidationError::OverlappingDirs);
    }
    for scratch in ArtifactStaging::new(&config.staging).scratch_paths() {
        for (field, dir) in [("staging.staging_dir", staging), ("staging.active_dir", active)] {
            if dir.starts_with(&scratch) {
                errors.push(ValidationError::ScratchPath {
                    field,
                    path: scratch.display().to_string(),
                });
            }
        }
    }

    let program = &config.staging.program_file;
    if program.is_empty() || program.contains('/') || program.contains('\\') || program == ".." {
        errors.push(ValidationError::ProgramFile(program.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
