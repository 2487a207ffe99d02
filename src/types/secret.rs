// ABOUTME: Opaque credential wrapper that never prints its value.
// ABOUTME: Debug and Display are redacted so secrets stay out of logs.

use std::fmt;

/// The cloud API key handed to registry and cluster backends.
///
/// The only way to read the value is [`ApiKey::expose`], which backends call
/// when building the environment of a child process.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
