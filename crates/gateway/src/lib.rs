//! `cr-gateway`: the `callrelay` binary's library half.
//!
//! Hosts the control API (`serve`), the relay HTTP server the supervisor
//! launches (`relay`), and the CLI helpers shared by both.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod relay;
pub mod state;
