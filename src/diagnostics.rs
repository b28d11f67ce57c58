// ABOUTME: Diagnostics accumulator for non-fatal warnings during a run.
// ABOUTME: Collects warnings that shouldn't fail a run but should be shown to users.

/// Collects non-fatal warnings during deployment operations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning collected during a run.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a lock release warning.
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    /// Create a transport close warning.
    pub fn transport_close(message: impl Into<String>) -> Self {
        Self::new(WarningKind::TransportClose, message)
    }

    /// A best-effort stage failed on a target.
    pub fn best_effort(message: impl Into<String>) -> Self {
        Self::new(WarningKind::BestEffortFailure, message)
    }

    /// Old snapshots could not be cleaned up after a successful run.
    pub fn backup_cleanup(message: impl Into<String>) -> Self {
        Self::new(WarningKind::BackupCleanup, message)
    }

    pub fn hook(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Hook, message)
    }
}

/// Categories of warnings that can occur during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Failed to release deploy lock (lock file may remain).
    LockRelease,
    /// Failed to cleanly close a transport session.
    TransportClose,
    /// A best-effort stage failed; the run continued.
    BestEffortFailure,
    /// Superseded backups were left behind.
    BackupCleanup,
    /// A lifecycle hook failed.
    Hook,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::lock_release("failed to remove lock file"));
        diag.warn(Warning::transport_close("connection reset"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
    }

    #[test]
    fn warning_constructors_set_correct_kind() {
        assert_eq!(Warning::lock_release("x").kind, WarningKind::LockRelease);
        assert_eq!(Warning::transport_close("x").kind, WarningKind::TransportClose);
        assert_eq!(Warning::best_effort("x").kind, WarningKind::BestEffortFailure);
        assert_eq!(Warning::backup_cleanup("x").kind, WarningKind::BackupCleanup);
        assert_eq!(Warning::hook("x").kind, WarningKind::Hook);
    }
}
