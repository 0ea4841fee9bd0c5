//! Core service for the proctor skill-assessment tracker.
//!
//! This crate owns the tracker state machine (initiation, reviewer
//! assignment, approval), the repository abstraction with its in-memory and
//! SQLite backends, the reviewer selector, and the credential reconciler
//! that mirrors the external badge catalog and attaches assertions to
//! approved entries.
//!
//! Transport, request validation, and the external HTTP clients live
//! elsewhere; they reach this crate through plain request structs and the
//! collaborator traits ([`checks::CheckVerifier`],
//! [`reconciler::BadgeCatalogClient`], [`reconciler::AssertionWrangler`],
//! [`notify::ReviewerNotifier`]).

pub mod checks;
pub mod config;
pub mod notify;
pub mod reconciler;
pub mod repository;
pub mod selector;
pub mod service;
pub mod tracker;

pub use config::Config;
pub use repository::{EntityRepository, MemoryRepository, RepositoryError, SqliteRepository};
pub use service::{
    ApproveRequest, InitiateRequest, RegisterRequest, ReviewAssignment, ReviewRequest,
    TrackerService, UpdateRequest, ViewRequest,
};
