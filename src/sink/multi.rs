//! The fan-out coordinator: one decode pass, several typed sinks.

use std::path::Path;

use log::error;

use crate::decode::SourceMetadata;
use crate::entity::{Entity, EntityKind};
use crate::writer::WriterConfig;

use super::{ParquetSink, Sink, SinkError};

/// Owns one typed sink per selected kind and presents the sink contract to a
/// single upstream decode pass.
///
/// Failures are isolated across kinds: a sink whose writer cannot be opened
/// is dropped from the broadcast set so the remaining kinds keep converting,
/// and `complete` is attempted on every sink before any failure is
/// surfaced. The first failure is returned; the rest are logged.
pub struct MultiEntitySink {
    sinks: Vec<ParquetSink>,
    deferred: Vec<SinkError>,
}

impl MultiEntitySink {
    /// A coordinator with one default parquet sink per kind in `kinds`, in
    /// the given order.
    #[must_use]
    pub fn new(
        source: &Path,
        destination_root: &Path,
        kinds: &[EntityKind],
        config: &WriterConfig,
    ) -> Self {
        let sinks = kinds
            .iter()
            .map(|&kind| ParquetSink::new(source, destination_root, kind, config.clone()))
            .collect();
        Self::from_sinks(sinks)
    }

    /// A coordinator over explicitly constructed sinks.
    #[must_use]
    pub const fn from_sinks(sinks: Vec<ParquetSink>) -> Self {
        Self {
            sinks,
            deferred: Vec::new(),
        }
    }

    /// Mutable access to the owned sinks, for filter and observer setup.
    pub fn sinks_mut(&mut self) -> &mut [ParquetSink] {
        &mut self.sinks
    }

    /// Accepted-entity counts per kind, in construction order.
    #[must_use]
    pub fn accepted_counts(&self) -> Vec<(EntityKind, u64)> {
        self.sinks
            .iter()
            .map(|sink| (sink.kind(), sink.accepted()))
            .collect()
    }
}

fn record(first: &mut Option<SinkError>, err: SinkError) {
    if first.is_some() {
        error!("additional sink failure: {err}");
    } else {
        *first = Some(err);
    }
}

impl Sink for MultiEntitySink {
    fn initialize(&mut self, metadata: &SourceMetadata) -> Result<(), SinkError> {
        // Sinks that cannot open their writer are dropped so the other kinds
        // keep converting; their failure surfaces from `complete`.
        let deferred = &mut self.deferred;
        self.sinks.retain_mut(|sink| match sink.initialize(metadata) {
            Ok(()) => true,
            Err(err) => {
                error!("sink failed to initialise: {err}");
                deferred.push(err);
                false
            }
        });
        Ok(())
    }

    fn process(&mut self, entity: &Entity) -> Result<(), SinkError> {
        for sink in &mut self.sinks {
            sink.process(entity)?;
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), SinkError> {
        let mut first = None;
        for err in self.deferred.drain(..) {
            record(&mut first, err);
        }
        for sink in &mut self.sinks {
            if let Err(err) = sink.complete() {
                record(&mut first, err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn close(&mut self) {
        for sink in &mut self.sinks {
            sink.close();
        }
    }
}
