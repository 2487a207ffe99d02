// ABOUTME: Image Builder: naming policy and image builds.
// ABOUTME: Derives app name, tag and image reference, then builds through the build backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{BuildBackend, BuildRequest};
use crate::trigger::Trigger;
use crate::types::{AppName, ImageRef, ImageTag, NameError, ParseImageRefError, TagError};

use super::PipelineError;

/// OCI label recording the commit an image was built from.
pub const LABEL_REVISION: &str = "org.opencontainers.image.revision";
/// OCI label recording the source repository.
pub const LABEL_SOURCE: &str = "org.opencontainers.image.source";

/// A built image. Its digest is set once, by the push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    image: ImageRef,
    tag: ImageTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(default)]
    build_args: BTreeMap<String, String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    /// Deleted from the registry when its run ends.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ephemeral: bool,
}

impl BuildArtifact {
    pub fn new(
        image: ImageRef,
        tag: ImageTag,
        build_args: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            image,
            tag,
            digest: None,
            build_args,
            labels,
            ephemeral: false,
        }
    }

    /// Mark the image as removed when its run ends, as pull request images are.
    pub fn ephemeral(self) -> Self {
        Self {
            ephemeral: true,
            ..self
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn tag(&self) -> &ImageTag {
        &self.tag
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn build_args(&self) -> &BTreeMap<String, String> {
        &self.build_args
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// The reference a cluster should pull: digest-pinned once pushed.
    pub fn deploy_reference(&self) -> ImageRef {
        match &self.digest {
            Some(digest) => self.image.with_digest(digest.clone()),
            None => self.image.clone(),
        }
    }

    /// Record the digest reported by the registry.
    pub(crate) fn pushed(self, digest: Option<String>) -> Self {
        Self {
            digest: digest.or(self.digest),
            ..self
        }
    }
}

/// The app name: explicit if given, else derived from the repository.
pub fn derive_app_name(explicit: Option<&AppName>, repository: &str) -> Result<AppName, NameError> {
    match explicit {
        Some(app) => Ok(app.clone()),
        None => AppName::from_repository(repository),
    }
}

/// The image tag: explicit if given, else `pr-{n}-{sha}` for pull requests
/// and the short SHA for everything else.
pub fn derive_tag(explicit: Option<&ImageTag>, trigger: &Trigger) -> Result<ImageTag, TagError> {
    if let Some(tag) = explicit {
        return Ok(tag.clone());
    }
    match (trigger.is_pull_request(), trigger.pull_request) {
        (true, Some(number)) => ImageTag::for_pull_request(number, &trigger.sha),
        _ => ImageTag::for_branch(&trigger.sha),
    }
}

/// `{registry}/{app}:{tag}`; `registry` already includes any namespace prefix.
pub fn image_reference(
    registry: &str,
    app: &AppName,
    tag: &ImageTag,
) -> Result<ImageRef, ParseImageRefError> {
    ImageRef::from_parts(&format!("{}/{}", registry, app), tag.as_str())
}

/// Builds images for one repository checkout.
pub struct ImageBuilder {
    backend: Arc<dyn BuildBackend>,
    context: PathBuf,
    dockerfile: PathBuf,
    build_args: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
}

impl std::fmt::Debug for ImageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuilder")
            .field("context", &self.context)
            .field("dockerfile", &self.dockerfile)
            .finish_non_exhaustive()
    }
}

impl ImageBuilder {
    pub fn new(
        backend: Arc<dyn BuildBackend>,
        context: PathBuf,
        dockerfile: PathBuf,
        build_args: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            backend,
            context,
            dockerfile,
            build_args,
            labels,
        }
    }

    /// Labels for this build: OCI defaults, overridden by configured labels.
    fn labels_for(&self, trigger: &Trigger) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_REVISION.to_string(), trigger.sha.clone());
        labels.insert(
            LABEL_SOURCE.to_string(),
            format!("https://github.com/{}", trigger.repository),
        );
        labels.extend(self.labels.clone());
        labels
    }

    /// Build `image`. Build failures are deterministic and never retried.
    pub async fn build(
        &self,
        image: &ImageRef,
        tag: &ImageTag,
        trigger: &Trigger,
    ) -> Result<BuildArtifact, PipelineError> {
        let labels = self.labels_for(trigger);
        let request = BuildRequest {
            image: image.clone(),
            context: self.context.clone(),
            dockerfile: self.dockerfile.clone(),
            args: self.build_args.clone(),
            labels: labels.clone(),
        };

        tracing::info!("Building {}", image);
        self.backend.build(&request).await?;

        let artifact = BuildArtifact::new(
            image.clone(),
            tag.clone(),
            self.build_args.clone(),
            labels,
        );
        Ok(if trigger.is_pull_request() {
            artifact.ephemeral()
        } else {
            artifact
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{ManualInputs, TriggerKind};

    fn trigger(kind: TriggerKind, git_ref: &str, sha: &str, pr: Option<u64>) -> Trigger {
        Trigger {
            kind,
            git_ref: git_ref.to_string(),
            sha: sha.to_string(),
            repository: "acme/Shop-Front".to_string(),
            pull_request: pr,
            inputs: ManualInputs::default(),
        }
    }

    #[test]
    fn push_to_main_uses_short_sha() {
        let t = trigger(TriggerKind::Push, "refs/heads/main", "abc123", None);
        assert_eq!(derive_tag(None, &t).unwrap().as_str(), "abc123");

        let t = trigger(TriggerKind::Push, "refs/heads/main", "abc123def456", None);
        assert_eq!(derive_tag(None, &t).unwrap().as_str(), "abc123d");
    }

    #[test]
    fn pull_request_uses_full_sha() {
        let t = trigger(
            TriggerKind::PullRequest,
            "refs/pull/42/merge",
            "abc123def",
            Some(42),
        );
        assert_eq!(derive_tag(None, &t).unwrap().as_str(), "pr-42-abc123def");
    }

    #[test]
    fn explicit_tag_wins() {
        let t = trigger(TriggerKind::Manual, "refs/heads/main", "abc123", None);
        let explicit = ImageTag::new("v1.2.3").unwrap();
        assert_eq!(derive_tag(Some(&explicit), &t).unwrap(), explicit);
    }

    #[test]
    fn app_name_falls_back_to_repository() {
        assert_eq!(
            derive_app_name(None, "acme/Shop-Front").unwrap().as_str(),
            "shop-front"
        );
        let explicit = AppName::new("web").unwrap();
        assert_eq!(derive_app_name(Some(&explicit), "acme/x").unwrap(), explicit);
    }

    #[test]
    fn image_reference_joins_registry_app_and_tag() {
        let app = AppName::new("shop").unwrap();
        let tag = ImageTag::new("abc1234").unwrap();
        let image = image_reference("us.icr.io/acme", &app, &tag).unwrap();
        assert_eq!(image.to_string(), "us.icr.io/acme/shop:abc1234");
    }

    #[test]
    fn configured_labels_override_defaults() {
        struct NoBuild;
        #[async_trait::async_trait]
        impl BuildBackend for NoBuild {
            async fn build(&self, _: &BuildRequest) -> Result<(), crate::backend::BuildError> {
                Ok(())
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_SOURCE.to_string(), "https://git.example.com/shop".to_string());
        let builder = ImageBuilder::new(
            Arc::new(NoBuild),
            PathBuf::from("."),
            PathBuf::from("Dockerfile"),
            BTreeMap::new(),
            labels,
        );

        let t = trigger(TriggerKind::Push, "refs/heads/main", "abc123", None);
        let labels = builder.labels_for(&t);
        assert_eq!(labels[LABEL_REVISION], "abc123");
        assert_eq!(labels[LABEL_SOURCE], "https://git.example.com/shop");
    }

    #[test]
    fn digest_pins_deploy_reference() {
        let app = AppName::new("shop").unwrap();
        let tag = ImageTag::new("abc1234").unwrap();
        let image = image_reference("r.io/acme", &app, &tag).unwrap();
        let artifact = BuildArtifact::new(image, tag, BTreeMap::new(), BTreeMap::new())
            .pushed(Some("sha256:beef".to_string()));

        assert_eq!(
            artifact.deploy_reference().to_string(),
            "r.io/acme/shop:abc1234@sha256:beef"
        );
    }

    #[tokio::test]
    async fn pull_request_images_are_ephemeral() {
        struct NoBuild;
        #[async_trait::async_trait]
        impl BuildBackend for NoBuild {
            async fn build(&self, _: &BuildRequest) -> Result<(), crate::backend::BuildError> {
                Ok(())
            }
        }

        let builder = ImageBuilder::new(
            Arc::new(NoBuild),
            PathBuf::from("."),
            PathBuf::from("Dockerfile"),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        let image = ImageRef::parse("r.io/acme/shop:pr-7-abc123").unwrap();
        let tag = ImageTag::new("pr-7-abc123").unwrap();

        let pr = trigger(TriggerKind::PullRequest, "refs/pull/7/merge", "abc123", Some(7));
        let artifact = builder.build(&image, &tag, &pr).await.unwrap();
        assert!(artifact.is_ephemeral());
        assert!(artifact.pushed(None).is_ephemeral());

        let push = trigger(TriggerKind::Push, "refs/heads/main", "abc123", None);
        assert!(!builder.build(&image, &tag, &push).await.unwrap().is_ephemeral());
    }
}
