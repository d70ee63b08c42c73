//! Core domain types
//!
//! This module contains the core domain structures used across Relay services.
//! The orchestrator persists and mutates them, the resource processor only sees
//! them through queue messages.

pub mod operation;
pub mod resource;
pub mod status;
pub mod template;
pub mod user;
