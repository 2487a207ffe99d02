// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod environment;
mod id;
mod image_ref;
mod name;
mod secret;
mod tag;

pub use environment::Environment;
pub use id::{RevisionId, RunId};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use name::{AppName, NameError, Namespace};
pub use secret::ApiKey;
pub use tag::{ImageTag, TagError, short_sha};
