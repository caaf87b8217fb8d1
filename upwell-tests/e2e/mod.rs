//! End-to-end tests for Upwell
//!
//! These tests verify complete user workflows from start to finish:
//! pre-flight estimation, batch upload, restart recovery, and sandbox
//! hygiene, through the same surface an application would use.

#[path = "full_cycle.rs"]
mod full_cycle;
