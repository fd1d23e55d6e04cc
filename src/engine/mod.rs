//! # Engine Module
//!
//! Store implementation.
//!
//! This module contains the core building blocks:
//! - Type registry and field storage
//! - Record identity and archetypes
//! - Value indices and the deletion protocol
//! - Query matching, chunk enumeration and parallel jobs
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod config;
pub mod component;
pub mod storage;
pub mod entity;
pub mod archetype;
pub mod index;
pub mod query;
pub mod chunks;
pub mod parallel;
pub mod store;
