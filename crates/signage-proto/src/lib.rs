//! Shared types for the signage player: the manifest data model, active-window
//! evaluation, configuration, platform paths, the presentation event protocol
//! and persisted runtime state.

pub mod config;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod schedule;
pub mod state;
