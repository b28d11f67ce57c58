// ABOUTME: Compile-fail test verifying results cannot be appended to a completed run.
// ABOUTME: This test should fail to compile, validating state machine safety.

use stagehand::deploy::{Completed, Run, StageResult};

fn try_record(mut run: Run<Completed>, result: StageResult) {
    // ERROR: record() method doesn't exist on Run<Completed>
    run.record(result);
}

fn main() {}
