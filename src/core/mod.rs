pub mod comparator;
pub mod conflict;
pub mod engine;
pub mod executor;
pub mod mapping;
pub mod progress;
pub mod scanner;

pub use comparator::{ActionSummary, Reconciler, SyncAction, SyncPlan};
pub use conflict::{ConflictDecision, ConflictResolver};
pub use engine::{SyncConfig, SyncEngine};
pub use executor::{ActionKind, FileFailure, SyncSummary};
pub use mapping::{Mapping, MappingIndex, MappingStore};
pub use progress::{ChannelProgress, NoProgress, ProgressSink, SyncProgress};
pub use scanner::{FileScanner, ScanConfig};
