//! Document field processing for SenseIndex.
//!
//! This crate ties the engine pool to documents:
//! - [`normalize`] — URL / path → readable phrase
//! - [`flatten`] — engine outcome → ordered variant strings
//! - [`fanout`] — [`FieldFanoutProcessor`], deriving new fields per document
//! - [`batch`] — runs a processor over many documents on a worker pool

pub mod batch;
pub mod fanout;
pub mod flatten;
pub mod normalize;

pub use batch::{BatchOutcome, BatchProgress, SilentBatchProgress, run_batch};
pub use fanout::{FieldFanoutProcessor, disambiguated_field_name, preprocessed_field_name};
pub use flatten::flatten;
pub use normalize::normalize;
