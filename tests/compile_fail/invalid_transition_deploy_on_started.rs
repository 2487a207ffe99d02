// ABOUTME: Compile-fail test verifying an unbuilt run cannot be deployed.
// ABOUTME: This test should fail to compile, validating stage ordering.

use conveyor::pipeline::{DeploymentController, Run, Started};

async fn try_deploy_before_build(run: Run<Started>, controller: &DeploymentController) {
    // ERROR: deploy() method doesn't exist on Run<Started>
    let _ = run.deploy(controller).await;
}

fn main() {}
