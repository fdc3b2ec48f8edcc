#![forbid(unsafe_code)]

//! `trove-sidecar`: turns a natural-language prompt into a single-file HTML
//! app by driving the Claude Code CLI, and reports the result to its host
//! over a line protocol on stdout.

pub mod agent;
pub mod config;
pub mod errors;
pub mod locator;
pub mod output;
pub mod path_safety;
pub mod pipeline;
pub mod protocol;
pub mod request;
pub mod session;

pub use errors::{AppError, Result};
