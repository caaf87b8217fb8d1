//! Integration tests for Upwell
//!
//! These tests exercise the engine end-to-end through its public surface,
//! with the file-backed record store and real temp sandboxes, verifying
//! component interactions, durable-state handling, and failure policy.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/batch_workflow.rs"]
mod batch_workflow;

#[path = "integration/failure_policy.rs"]
mod failure_policy;

#[path = "integration/recovery.rs"]
mod recovery;
