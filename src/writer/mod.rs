//! Columnar writer configuration and the per-kind writer factory.
//!
//! The sink layer talks to writers only through [`EntityWriter`] and
//! [`WriterFactory`], so tests can substitute recording writers and the
//! parquet machinery stays behind one seam.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::entity::{Entity, EntityKind};

pub mod encode;
mod parquet;

pub use parquet::ParquetEntityWriter;

/// Compression codec applied to output files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Snappy, the fixed default for this pipeline.
    #[default]
    Snappy,
    /// Zstd at the default level.
    Zstd,
    /// No compression.
    Uncompressed,
}

impl From<Compression> for ::parquet::basic::Compression {
    fn from(codec: Compression) -> Self {
        match codec {
            Compression::Snappy => Self::SNAPPY,
            Compression::Zstd => Self::ZSTD(::parquet::basic::ZstdLevel::default()),
            Compression::Uncompressed => Self::UNCOMPRESSED,
        }
    }
}

/// Configuration handed to the writer factory when a sink initialises.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Compression codec for the output file.
    pub compression: Compression,
    /// Byte threshold at which a buffered row group is flushed.
    pub row_group_bytes: usize,
    /// Replace an existing output file instead of failing.
    pub overwrite: bool,
    /// Leave the per-entity metadata columns out of the schema.
    pub exclude_metadata: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Snappy,
            row_group_bytes: 16 * 1024 * 1024,
            overwrite: true,
            exclude_metadata: false,
        }
    }
}

/// Errors produced while creating or driving a columnar writer.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The output directory could not be created.
    #[error("failed to create output directory {path:?}")]
    CreateDir {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
        /// Directory that could not be created.
        path: PathBuf,
    },
    /// The output file could not be created.
    #[error("failed to create output file {path:?}")]
    Create {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
        /// File that could not be created.
        path: PathBuf,
    },
    /// The parquet writer could not be opened over the output file.
    #[error("failed to open parquet writer for {path:?}")]
    Open {
        /// Underlying parquet failure.
        #[source]
        source: ::parquet::errors::ParquetError,
        /// File the writer was opened for.
        path: PathBuf,
    },
    /// A row could not be encoded into the columnar batch.
    #[error("failed to encode {kind} row")]
    Encode {
        /// Underlying arrow failure.
        #[source]
        source: arrow::error::ArrowError,
        /// Kind of the row being encoded.
        kind: EntityKind,
    },
    /// A buffered batch could not be written to the output file.
    #[error("failed to write {kind} row group")]
    Write {
        /// Underlying parquet failure.
        #[source]
        source: ::parquet::errors::ParquetError,
        /// Kind of the rows being written.
        kind: EntityKind,
    },
    /// The writer could not be flushed and closed.
    #[error("failed to close {kind} parquet writer")]
    Close {
        /// Underlying parquet failure.
        #[source]
        source: ::parquet::errors::ParquetError,
        /// Kind of the writer being closed.
        kind: EntityKind,
    },
    /// An entity of the wrong kind reached a typed writer.
    #[error("{actual} entity routed to a {expected} writer")]
    KindMismatch {
        /// Kind the writer encodes.
        expected: EntityKind,
        /// Kind of the offending entity.
        actual: EntityKind,
    },
}

/// A columnar writer for entities of a single kind.
pub trait EntityWriter: Send {
    /// Appends one entity row. Failure is terminal for the output file.
    fn write(&mut self, entity: &Entity) -> Result<(), WriterError>;

    /// Flushes buffered rows and finalises the output file.
    fn close(self: Box<Self>) -> Result<(), WriterError>;
}

/// Opens typed writers for sinks; keyed by entity kind.
pub trait WriterFactory: Send + Sync {
    /// Opens a writer for `kind` at `destination` using `config`.
    fn open(
        &self,
        kind: EntityKind,
        destination: &Path,
        config: &WriterConfig,
    ) -> Result<Box<dyn EntityWriter>, WriterError>;
}

/// The default factory, producing [`ParquetEntityWriter`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetWriterFactory;

impl WriterFactory for ParquetWriterFactory {
    fn open(
        &self,
        kind: EntityKind,
        destination: &Path,
        config: &WriterConfig,
    ) -> Result<Box<dyn EntityWriter>, WriterError> {
        let writer = ParquetEntityWriter::create(kind, destination, config)?;
        Ok(Box::new(writer))
    }
}
