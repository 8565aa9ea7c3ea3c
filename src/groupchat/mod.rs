// src/groupchat/mod.rs

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod orchestration;
pub mod registry;
pub mod runtime;
pub mod selection;
pub mod termination;

// Also re-exported at the crate root.
pub use orchestration::Orchestrator;
