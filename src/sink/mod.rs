//! Sink lifecycle, filter, and observer contracts.
//!
//! A decode pass drives a sink through the four-call contract:
//! `initialize` once, `process` zero or more times in source order,
//! `complete` once, then `close`. Filters and observers are registered
//! during a setup phase, before `initialize`.

use std::fmt;

use thiserror::Error;

use crate::decode::SourceMetadata;
use crate::entity::{Entity, EntityKind};
use crate::writer::WriterError;

mod multi;
mod parquet;
mod progress;

pub use multi::MultiEntitySink;
pub use parquet::ParquetSink;
pub use progress::ProgressObserver;

/// Lifecycle state of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// No writer exists yet; `process` is not legal.
    Uninitialized,
    /// The writer is open and accepting entities.
    Active,
    /// The writer has been flushed and closed.
    Completed,
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Completed => "completed",
        })
    }
}

/// Errors surfaced by sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A lifecycle call arrived in a state that does not permit it.
    #[error("{kind} sink received {operation} while {state}")]
    Lifecycle {
        /// Kind the sink is bound to.
        kind: EntityKind,
        /// The offending lifecycle call.
        operation: &'static str,
        /// State the sink was in.
        state: SinkState,
    },
    /// The underlying columnar writer failed.
    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// A consumer bound to the decode-pass lifecycle.
pub trait Sink {
    /// Opens resources for the pass. Called exactly once, first.
    fn initialize(&mut self, metadata: &SourceMetadata) -> Result<(), SinkError>;

    /// Offers one decoded entity. Entities of other kinds are ignored.
    fn process(&mut self, entity: &Entity) -> Result<(), SinkError>;

    /// Flushes and closes resources. Called exactly once, after the last
    /// `process`.
    fn complete(&mut self) -> Result<(), SinkError>;

    /// Releases anything `complete` did not. Always legal, idempotent, and
    /// performs no writer I/O of its own.
    fn close(&mut self);
}

/// A rejection predicate over entities of a sink's kind.
///
/// An entity is written only if no registered filter rejects it; filters are
/// consulted in registration order and evaluation short-circuits on the
/// first rejection.
pub trait EntityFilter: Send {
    /// Returns true to keep `entity` out of the output.
    fn rejects(&self, entity: &Entity) -> bool;
}

/// A listener notified of sink lifecycle events.
///
/// Over a sink's lifetime `started` fires exactly once before any
/// `processed`, `processed` fires once per accepted entity in write order,
/// and `ended` fires exactly once after the last `processed`. Observers may
/// be shared across decode-pass threads.
pub trait SinkObserver: Send + Sync {
    /// The sink's writer has been opened.
    fn started(&self) {}

    /// One entity passed the filter chain and was written.
    fn processed(&self, entity: &Entity);

    /// The sink's writer has been flushed and closed.
    fn ended(&self);
}

/// Handle returned by filter registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterId(usize);

/// Handle returned by observer registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(usize);

pub(crate) struct Registry<T> {
    entries: Vec<(usize, T)>,
    next_id: usize,
}

impl<T> Registry<T> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn add(&mut self, entry: T) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, entry));
        id
    }

    pub(crate) fn remove(&mut self, id: usize) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, entry)| entry)
    }
}
