// ABOUTME: Compile-fail test verifying a BackupToken cannot be built by hand.
// ABOUTME: This test should fail to compile; only the backup manager issues tokens.

use stagehand::deploy::BackupToken;
use stagehand::types::{BackupId, TargetId};

fn forge(target: TargetId) -> BackupToken {
    // ERROR: fields of BackupToken are private
    BackupToken {
        backup: BackupId::new("fake"),
        target,
        path: "/opt/api".to_string(),
    }
}

fn main() {}
