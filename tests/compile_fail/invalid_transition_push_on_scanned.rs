// ABOUTME: Compile-fail test verifying a scanned run cannot be pushed again.
// ABOUTME: This test should fail to compile, validating stage ordering.

use conveyor::pipeline::{RegistryClient, Run, Scanned};

async fn try_push_after_scan(run: Run<Scanned>, registry: &RegistryClient) {
    // ERROR: push() method doesn't exist on Run<Scanned>
    let _ = run.push(registry).await;
}

fn main() {}
