// ABOUTME: Command module aggregator for the conveyor CLI.
// ABOUTME: Re-exports run, rollback, and history command handlers.

mod backends;
mod rollback;
mod run;

pub use rollback::{history, rollback};
pub use run::run;
