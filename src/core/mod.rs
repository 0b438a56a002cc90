pub mod deleter;
pub mod matcher;
pub mod retention;
pub mod rotation;
pub mod scheduler;
pub mod sync;
pub mod tracker;

pub use deleter::{DeleteError, OsTrash, SafeDeleter, TrashFacility};
pub use retention::{schedule_matches, RetentionEngine, ScanResult};
pub use scheduler::{rule_due, SyncScheduler};
pub use sync::{build_key, SyncEngine};
pub use tracker::{ProgressTracker, TaskSnapshot};
