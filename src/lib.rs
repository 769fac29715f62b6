//! Convert OpenStreetMap PBF extracts into per-kind Parquet files.
//!
//! The converter fans a stream of decoded entities out into one columnar
//! file per entity kind (`node`, `way`, `relation`). The primary shape runs
//! one independent decode pass per kind so a failure writing one kind never
//! halts the others; a single-pass shape feeds every kind from one pass via
//! a fan-out coordinator.
//!
//! # Examples
//! ```no_run
//! use osm_parquetizer::{ConvertConfig, convert};
//!
//! # fn main() -> Result<(), osm_parquetizer::ConvertError> {
//! let summary = convert(&ConvertConfig::new("map.osm.pbf"))?;
//! for (kind, count) in summary.counts() {
//!     println!("{kind}: {count}");
//! }
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

pub mod cli;
pub mod decode;
pub mod entity;
pub mod pipeline;
pub mod sink;
pub mod writer;

pub use entity::{Entity, EntityKind, Member, Metadata, Payload, Tags};
pub use pipeline::{ConvertConfig, ConvertError, ConvertSummary, convert, convert_single_pass};
