pub mod config;
pub mod queue;
pub mod guard;
pub mod encoder;
pub mod translate;
pub mod reconcile;
pub mod pipeline;

pub use config::{ConfigError, TranscodeConfig};
pub use queue::{FileQueue, QueueStore};
pub use guard::{InstanceGuard, LockFileGuard, ProcessScanGuard};
pub use encoder::{ArgTemplate, Conversion, ConversionOutcome, Encoder};
pub use translate::PathTranslator;
pub use reconcile::{Reconciler, RecordStore, SqliteStore};
pub use pipeline::{DrainSummary, ItemOutcome, Pipeline, RunOutcome};
