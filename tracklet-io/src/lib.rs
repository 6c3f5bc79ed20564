//! tracklet-io: Run-file input, parallel conversion and table output.
//!
//! This crate reads JSON run files through memory maps, converts them into
//! sorted hit and particle tables on a rayon pool, loads the JSON pipeline
//! configuration, and writes every table as CSV.
//!

mod config;
mod convert;
mod error;
mod source;
mod writer;

pub use config::{EfficiencyConfig, PipelineConfig};
pub use convert::{ConversionConfig, ConversionReport, FileFailure, RunConverter, RunTables};
pub use error::{Error, Result};
pub use source::{EventRecord, EventSource, JsonEventSource, MappedFile, RawHit, RawParticle};
pub use writer::TableWriter;
