//! Core data model shared by actors and the supervisor
//!
//! This module contains:
//! - Task records, statuses and the dependency map
//! - The message schema carried by mailboxes
//! - Named locations and the travel metric
//! - Project naming

mod location;
mod message;
mod project;
mod task;

pub use location::*;
pub use message::*;
pub use project::*;
pub use task::*;
