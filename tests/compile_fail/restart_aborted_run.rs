// ABOUTME: Compile-fail test verifying an aborted run cannot be resumed.
// ABOUTME: This test should fail to compile, validating state machine safety.

use stagehand::deploy::{Aborted, Run};

fn try_resume(run: Run<Aborted>) {
    // ERROR: start() method doesn't exist on Run<Aborted>
    let _ = run.start();
}

fn main() {}
