//! This module defines the core data structures shared by the bulk operation crates.

pub mod audit_event;
pub mod document;
pub mod operation;
pub mod progress;
pub mod result;
