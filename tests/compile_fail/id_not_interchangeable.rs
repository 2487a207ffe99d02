// ABOUTME: Compile-fail test verifying RunId and RevisionId are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use conveyor::types::{RevisionId, RunId};

fn takes_revision_id(_id: RevisionId) {}

fn main() {
    let run_id = RunId::new("20260101T000000000Z-42".to_string());
    takes_revision_id(run_id); // ERROR: expected RevisionId, found RunId
}
