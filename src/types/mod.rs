// ABOUTME: Type-safe identifiers and validated domain names.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod environment;
mod id;
mod service_id;

pub use environment::{EnvironmentName, TargetId};
pub use id::{BackupId, Id, RunId};
pub use service_id::{NameError, ServiceId};
