// ABOUTME: Run command implementation.
// ABOUTME: Resolves the trigger, wires the pipeline and prints the run summary.

use super::backends::default_backends;
use conveyor::config::Config;
use conveyor::error::Result;
use conveyor::output::Output;
use conveyor::pipeline::{Pipeline, PipelineOptions, SummarySinks};
use conveyor::trigger::{ManualInputs, Trigger, TriggerArgs};
use conveyor::types::RunId;
use std::env;
use std::path::{Path, PathBuf};

use crate::cli::RunArgs;

/// Execute one pipeline run. Returns whether the new version shipped.
pub async fn run(
    config: Config,
    project_dir: &Path,
    args: RunArgs,
    mut output: Output,
) -> Result<bool> {
    let trigger = Trigger::resolve(
        TriggerArgs {
            event: args.event,
            git_ref: args.git_ref,
            sha: args.sha,
            repository: args.repo,
            pull_request: args.pr,
        },
        ManualInputs {
            environment: args.environment,
            image_tag: args.image_tag,
            app_name: args.app_name,
            namespace: args.namespace,
            run_acceptance_tests: args.run_acceptance_tests,
            auto_rollback: args.auto_rollback,
        },
    )?;

    let sinks = SummarySinks {
        step_summary: env::var_os("GITHUB_STEP_SUMMARY").map(PathBuf::from),
        outputs: env::var_os("GITHUB_OUTPUT").map(PathBuf::from),
    };
    let options = PipelineOptions {
        force_lock: args.force_lock,
        sinks,
        ..Default::default()
    };

    let backends = default_backends(&config, project_dir)?;
    let pipeline = Pipeline::new(config, project_dir, backends, RunId::generate(), options)?;

    output.start_timer();
    output.progress(&format!(
        "Run {}: {} {} -> {}",
        pipeline.run_id(),
        trigger.kind,
        trigger.git_ref,
        trigger.namespace()
    ));

    let report = pipeline.execute(trigger).await;

    output.diagnostics(&report.diagnostics);
    output.summary(&report.summary);

    Ok(report.summary.outcome.is_success())
}
