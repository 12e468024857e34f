//! crewflow: a supervised crew of LLM-backed actors that turns one request into a reviewed
//! static website.
//!
//! The [`supervisor::Supervisor`] owns the task registry and routes every message; the
//! [`actors`] each play one role of the workflow; [`tools`] is the only side-effect boundary.

pub mod actors;
pub mod config;
pub mod constants;
pub mod core;
pub mod errors;
pub mod llm;
pub mod supervisor;
pub mod tools;
pub mod utils;
