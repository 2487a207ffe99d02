// ABOUTME: Change-request status API contract.
// ABOUTME: Posts pending, success and failure states to a commit or pull request.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::types::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
        })
    }
}

/// One status post.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub repository: String,
    pub sha: String,
    pub state: CommitState,
    pub description: String,
    pub target_url: Option<String>,
}

#[async_trait]
pub trait StatusApi: Send + Sync {
    async fn set_status(&self, run: &RunId, update: &StatusUpdate) -> Result<(), StatusError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("status API returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("status API request failed: {0}")]
    Request(String),
}
