//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate model edits, persistence and notification into use-case
//!   level APIs.
//! - Keep presentation layers decoupled from storage and locking details.

pub mod config;
pub mod handle;
pub mod merge_candidates;
pub mod note_validator;
pub mod topology_editor;
pub mod trace;
