// ABOUTME: Compile-fail test verifying RunId and BackupId are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use stagehand::types::{BackupId, RunId};

fn takes_run_id(_id: RunId) {}

fn main() {
    let backup_id = BackupId::new("b123");
    takes_run_id(backup_id); // ERROR: expected RunId, found BackupId
}
