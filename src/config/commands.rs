// ABOUTME: Backend command lines for build, push, scan, delete and apply.
// ABOUTME: Argument templates use {placeholders} filled in per invocation.

use nonempty::NonEmpty;
use serde::Deserialize;

/// A program and its argument templates.
///
/// Written in YAML either as a list (`[docker, push, "{image}"]`) or as a
/// single whitespace-separated string (`docker push {image}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(NonEmpty<String>);

impl CommandLine {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self(NonEmpty {
            head: program.to_string(),
            tail: args.iter().map(|a| a.to_string()).collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.0.head
    }

    pub fn args(&self) -> &[String] {
        &self.0.tail
    }
}

impl<'de> Deserialize<'de> for CommandLine {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Line(String),
            Argv(Vec<String>),
        }

        let argv = match Raw::deserialize(deserializer)? {
            Raw::Line(s) => s.split_whitespace().map(str::to_string).collect(),
            Raw::Argv(v) => v,
        };

        NonEmpty::from_vec(argv)
            .map(CommandLine)
            .ok_or_else(|| serde::de::Error::custom("command cannot be empty"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_build")]
    pub build: CommandLine,

    #[serde(default = "default_push")]
    pub push: CommandLine,

    /// Vulnerability scanner emitting a Trivy-style JSON report on stdout.
    #[serde(default)]
    pub scan: Option<CommandLine>,

    #[serde(default = "default_delete")]
    pub delete: CommandLine,

    /// Reads the rendered manifest on stdin.
    #[serde(default = "default_apply")]
    pub apply: CommandLine,
}

fn default_build() -> CommandLine {
    CommandLine::new(
        "docker",
        &[
            "build",
            "--tag",
            "{image}",
            "--file",
            "{dockerfile}",
            "{build_args}",
            "{labels}",
            "{context}",
        ],
    )
}

fn default_push() -> CommandLine {
    CommandLine::new("docker", &["push", "{image}"])
}

fn default_delete() -> CommandLine {
    CommandLine::new("docker", &["image", "rm", "--force", "{image}"])
}

fn default_apply() -> CommandLine {
    CommandLine::new(
        "kubectl",
        &["apply", "--namespace", "{namespace}", "--filename", "-"],
    )
}

impl Default for CommandsConfig {
    fn default() -> Self {
        CommandsConfig {
            build: default_build(),
            push: default_push(),
            scan: None,
            delete: default_delete(),
            apply: default_apply(),
        }
    }
}
