// ABOUTME: Library root for conveyor - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod acceptance;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod trigger;
pub mod types;
