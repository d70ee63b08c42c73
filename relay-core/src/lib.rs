//! Relay Core
//!
//! Core types and abstractions for the Relay deployment control plane.
//!
//! This crate contains:
//! - Domain types: Operations, steps, resources, templates and their statuses
//! - DTOs: Queue message schemas exchanged between the sender, the resource
//!   processor and the deployment status updater
//! - Substitution: Computing pipeline step properties from resource templates

pub mod domain;
pub mod dto;
pub mod substitution;
