//! The conversion driver: decode passes, sinks, and output-path derivation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use log::{debug, error};
use thiserror::Error;

use crate::decode::{PassError, run_pass};
use crate::entity::EntityKind;
use crate::sink::{MultiEntitySink, ParquetSink, ProgressObserver};
use crate::writer::WriterConfig;

/// Everything a conversion run needs to know.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// The OSM PBF file to convert.
    pub source: PathBuf,
    /// Destination root for the per-kind output directories; derived from
    /// the source path when absent.
    pub destination: Option<PathBuf>,
    /// Leave the per-entity metadata columns out of the output.
    pub exclude_metadata: bool,
    /// Worker-thread hint for blob decoding within each pass.
    pub decoder_threads: usize,
    /// Kinds to produce; an empty selection is legal and does no work.
    pub kinds: Vec<EntityKind>,
}

impl ConvertConfig {
    /// A configuration producing every kind with default settings.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: None,
            exclude_metadata: false,
            decoder_threads: 1,
            kinds: EntityKind::ALL.to_vec(),
        }
    }

    /// The destination root the run will write under.
    ///
    /// Defaults to a sibling directory named after the source file stripped
    /// of its extensions: `map.osm.pbf` becomes `map`, and an extensionless
    /// `data` becomes `data`.
    #[must_use]
    pub fn destination_root(&self) -> PathBuf {
        self.destination
            .clone()
            .unwrap_or_else(|| self.derived_destination())
    }

    fn derived_destination(&self) -> PathBuf {
        let name = self
            .source
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned());
        let stem = name
            .split('.')
            .next()
            .filter(|stem| !stem.is_empty())
            .map_or_else(|| name.clone(), str::to_owned);
        self.source
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(stem)
    }

    fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            exclude_metadata: self.exclude_metadata,
            ..WriterConfig::default()
        }
    }

    fn sink_for(&self, kind: EntityKind, destination_root: &Path) -> ParquetSink {
        let mut sink = ParquetSink::new(&self.source, destination_root, kind, self.writer_config());
        sink.add_observer(Arc::new(ProgressObserver::new(kind)));
        sink
    }
}

/// Per-kind accepted-entity counts from a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    counts: Vec<(EntityKind, u64)>,
}

impl ConvertSummary {
    /// Accepted counts, one entry per produced kind.
    #[must_use]
    pub fn counts(&self) -> &[(EntityKind, u64)] {
        &self.counts
    }

    /// The accepted count for `kind`, if it was produced.
    #[must_use]
    pub fn count_for(&self, kind: EntityKind) -> Option<u64> {
        self.counts
            .iter()
            .find(|(entry, _)| *entry == kind)
            .map(|(_, count)| *count)
    }
}

/// Errors surfaced by a conversion run.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// A per-kind decode pass failed.
    #[error("{kind} conversion pass failed")]
    Pass {
        /// Kind whose pass failed.
        kind: EntityKind,
        /// Underlying pass failure.
        #[source]
        source: PassError,
    },
    /// The shared decode pass of a single-pass run failed.
    #[error("conversion pass failed")]
    SinglePass {
        /// Underlying pass failure.
        #[source]
        source: PassError,
    },
    /// A per-kind decode pass panicked.
    #[error("{kind} conversion pass panicked")]
    PassPanicked {
        /// Kind whose pass panicked.
        kind: EntityKind,
    },
}

/// Converts the source with one independent decode pass per selected kind.
///
/// Each pass runs on its own thread and re-reads the source; a failure in
/// one kind does not stop the others, whose outputs remain valid. After all
/// passes finish, the first failure is surfaced and any further failures
/// are logged.
pub fn convert(config: &ConvertConfig) -> Result<ConvertSummary, ConvertError> {
    let destination_root = config.destination_root();
    let results: Vec<(EntityKind, Result<u64, ConvertError>)> = thread::scope(|scope| {
        let handles: Vec<_> = config
            .kinds
            .iter()
            .map(|&kind| {
                let destination_root = destination_root.clone();
                let handle = scope.spawn(move || {
                    debug!("starting {kind} pass over {:?}", config.source);
                    let mut sink = config.sink_for(kind, &destination_root);
                    run_pass(&config.source, config.decoder_threads, &mut sink)?;
                    Ok(sink.accepted())
                });
                (kind, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(kind, handle)| {
                let outcome = match handle.join() {
                    Ok(result) => {
                        result.map_err(|source| ConvertError::Pass { kind, source })
                    }
                    Err(_) => Err(ConvertError::PassPanicked { kind }),
                };
                (kind, outcome)
            })
            .collect()
    });

    let mut counts = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (kind, outcome) in results {
        match outcome {
            Ok(count) => counts.push((kind, count)),
            Err(err) => failures.push(err),
        }
    }
    let mut failures = failures.into_iter();
    if let Some(first) = failures.next() {
        for err in failures {
            error!("further pass failure: {err}");
        }
        return Err(first);
    }
    Ok(ConvertSummary { counts })
}

/// Converts the source with a single decode pass feeding a fan-out
/// coordinator holding one sink per selected kind.
pub fn convert_single_pass(config: &ConvertConfig) -> Result<ConvertSummary, ConvertError> {
    let destination_root = config.destination_root();
    if config.kinds.is_empty() {
        return Ok(ConvertSummary::default());
    }
    let sinks = config
        .kinds
        .iter()
        .map(|&kind| config.sink_for(kind, &destination_root))
        .collect();
    let mut sink = MultiEntitySink::from_sinks(sinks);
    run_pass(&config.source, config.decoder_threads, &mut sink)
        .map_err(|source| ConvertError::SinglePass { source })?;
    Ok(ConvertSummary {
        counts: sink.accepted_counts(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("planet/map.osm.pbf", "planet/map")]
    #[case("map.pbf", "map")]
    #[case("data", "data")]
    fn destination_defaults_to_sibling_named_after_source(
        #[case] source: &str,
        #[case] expected: &str,
    ) {
        let config = ConvertConfig::new(source);
        assert_eq!(config.destination_root(), PathBuf::from(expected));
    }

    #[test]
    fn explicit_destination_wins() {
        let mut config = ConvertConfig::new("map.osm.pbf");
        config.destination = Some(PathBuf::from("out"));
        assert_eq!(config.destination_root(), PathBuf::from("out"));
    }

    #[test]
    fn zero_kinds_does_no_work() {
        // The source is never opened when nothing is selected.
        let mut config = ConvertConfig::new("does-not-exist.osm.pbf");
        config.kinds = Vec::new();
        let summary = convert(&config).expect("empty run succeeds");
        assert!(summary.counts().is_empty());
        let summary = convert_single_pass(&config).expect("empty run succeeds");
        assert!(summary.counts().is_empty());
    }

    #[test]
    fn missing_source_fails_the_pass() {
        let config = ConvertConfig::new("does-not-exist.osm.pbf");
        let result = convert(&config);
        assert!(matches!(result, Err(ConvertError::Pass { .. })));
    }
}
