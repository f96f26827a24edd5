//! Neurite annotation domain model.
//!
//! # Responsibility
//! - Define annotations, neurons and workspaces used by core business logic.
//! - Keep topology queries free of persistence and locking concerns.
//!
//! # Invariants
//! - Every annotation is identified by a stable, workspace-unique id.
//! - An annotation belongs to exactly one neuron at a time.

pub mod annotation;
pub mod neuron;
pub mod workspace;
