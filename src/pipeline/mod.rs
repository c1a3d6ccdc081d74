// Batch pipeline: normalization, storage, the batch runner and read-side helpers

pub mod daylight;
pub mod normalize;
pub mod runner;
pub mod storage;

pub use normalize::{NormalizationReport, Normalizer, Rejection};
pub use runner::{BatchRequest, BatchRunner, BatchSummary, SourceFailure};
pub use storage::{open_store, PersistSummary, RecordStore};
