//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the persistence gateway the editor writes through.
//! - Isolate SQLite and JSON document details from editing logic.
//!
//! # Invariants
//! - Every stored neuron document passes `Neuron::check_integrity` on load.
//! - Multi-neuron writes are atomic.

pub mod neuron_repo;
