//! `cr-domain`: shared types for the callrelay workspace.
//!
//! Holds the configuration tree, the error type every crate converts
//! into, the call data model exchanged between the façade and the relay
//! process, and the structured trace events.

pub mod call;
pub mod config;
pub mod error;
pub mod trace;
