// ABOUTME: Guaranteed PR image cleanup around the body of a run.
// ABOUTME: The delete runs once after the body returns, fails or panics.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::trigger::Trigger;
use crate::types::ImageRef;

use super::PipelineError;
use super::registry::RegistryClient;

/// What came out of a scoped body and its cleanup.
#[derive(Debug)]
pub struct Scoped<T> {
    /// The body's value, or its panic payload.
    pub result: Result<T, Box<dyn Any + Send>>,
    /// `None` when there was nothing to clean up.
    pub cleanup: Option<Result<(), PipelineError>>,
}

impl<T> Scoped<T> {
    /// Panic message, if the body panicked with a string.
    pub fn panic_message(&self) -> Option<String> {
        let payload = self.result.as_ref().err()?;
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .or_else(|| Some("panicked".to_string()))
    }
}

/// Owns the image a PR run must delete. Consumed by [`CleanupScope::run`],
/// so the delete can happen at most once.
#[derive(Debug)]
#[must_use = "a cleanup scope does nothing until run"]
pub struct CleanupScope {
    target: Option<ImageRef>,
}

impl CleanupScope {
    /// Scope for `trigger`: PR runs clean up `image`, other runs keep it.
    pub fn for_trigger(trigger: &Trigger, image: &ImageRef) -> Self {
        Self {
            target: trigger.is_pull_request().then(|| image.clone()),
        }
    }

    /// Run `body`, then delete the target image whatever happened.
    pub async fn run<T, Fut>(self, registry: &RegistryClient, body: Fut) -> Scoped<T>
    where
        Fut: Future<Output = T>,
    {
        let result = AssertUnwindSafe(body).catch_unwind().await;

        if result.is_err() {
            tracing::error!("Run panicked, cleaning up before reporting");
        }

        let cleanup = match self.target {
            Some(ref image) => Some(registry.delete(image).await),
            None => None,
        };

        Scoped { result, cleanup }
    }
}
