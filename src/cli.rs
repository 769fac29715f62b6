//! Command-line interface for the converter.

use std::path::PathBuf;

use clap::Parser;
use log::info;
use thiserror::Error;

use crate::entity::EntityKind;
use crate::pipeline::{self, ConvertConfig, ConvertError};

/// Runs the converter with the current process arguments.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let config = cli.into_config()?;
    let destination_root = config.destination_root();
    let summary = pipeline::convert(&config)?;
    for (kind, count) in summary.counts() {
        info!("wrote {count} {kind} entities under {destination_root:?}");
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "osm-parquetizer",
    about = "Convert an OSM PBF extract into per-kind Parquet files",
    version
)]
struct Cli {
    /// The OSM PBF file to be converted.
    #[arg(value_name = "pbf-path")]
    source: PathBuf,
    /// The directory where the Parquet files are stored; defaults to a
    /// sibling directory named after the source file.
    #[arg(value_name = "output-path")]
    destination: Option<PathBuf>,
    /// Number of worker threads for decoding the source.
    #[arg(long, value_name = "n", default_value_t = 1)]
    pbf_threads: usize,
    /// Do not convert the per-entity metadata.
    #[arg(long)]
    exclude_metadata: bool,
    /// Do not convert the nodes.
    #[arg(long)]
    no_nodes: bool,
    /// Do not convert the ways.
    #[arg(long)]
    no_ways: bool,
    /// Do not convert the relations.
    #[arg(long)]
    no_relations: bool,
}

impl Cli {
    fn selected_kinds(&self) -> Vec<EntityKind> {
        let mut kinds = Vec::new();
        if !self.no_nodes {
            kinds.push(EntityKind::Node);
        }
        if !self.no_ways {
            kinds.push(EntityKind::Way);
        }
        if !self.no_relations {
            kinds.push(EntityKind::Relation);
        }
        kinds
    }

    fn into_config(self) -> Result<ConvertConfig, CliError> {
        if !self.source.is_file() {
            return Err(CliError::MissingSourceFile { path: self.source });
        }
        let kinds = self.selected_kinds();
        Ok(ConvertConfig {
            source: self.source,
            destination: self.destination,
            exclude_metadata: self.exclude_metadata,
            decoder_threads: self.pbf_threads,
            kinds,
        })
    }
}

/// Errors emitted by the command-line interface.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// The source path does not point at a file.
    #[error("source path {path:?} does not exist")]
    MissingSourceFile {
        /// The offending path.
        path: PathBuf,
    },
    /// The conversion run failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments parse")
    }

    #[test]
    fn source_is_required() {
        let result = Cli::try_parse_from(["osm-parquetizer"]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_select_every_kind() {
        let cli = parse(&["osm-parquetizer", "map.osm.pbf"]);
        assert_eq!(cli.selected_kinds(), EntityKind::ALL.to_vec());
        assert_eq!(cli.pbf_threads, 1);
        assert!(!cli.exclude_metadata);
        assert!(cli.destination.is_none());
    }

    #[test]
    fn skip_flags_drop_kinds() {
        let cli = parse(&[
            "osm-parquetizer",
            "map.osm.pbf",
            "out",
            "--no-ways",
            "--no-relations",
            "--pbf-threads",
            "4",
        ]);
        assert_eq!(cli.selected_kinds(), vec![EntityKind::Node]);
        assert_eq!(cli.destination, Some(PathBuf::from("out")));
        assert_eq!(cli.pbf_threads, 4);
    }

    #[test]
    fn missing_source_is_rejected_before_the_run() {
        let cli = parse(&["osm-parquetizer", "no-such-file.osm.pbf"]);
        let result = cli.into_config();
        assert!(matches!(result, Err(CliError::MissingSourceFile { .. })));
    }

    #[test]
    fn existing_source_builds_a_config() {
        let file = tempfile::NamedTempFile::new().expect("create temp source");
        let path = file.path().to_string_lossy().into_owned();
        let cli = parse(&["osm-parquetizer", &path, "--exclude-metadata"]);
        let config = cli.into_config().expect("config builds");
        assert!(config.exclude_metadata);
        assert_eq!(config.kinds, EntityKind::ALL.to_vec());
    }
}
