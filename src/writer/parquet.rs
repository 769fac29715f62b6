//! The parquet-backed entity writer.

use std::fs::{File, OpenOptions};
use std::path::Path;

use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::entity::{Entity, EntityKind};

use super::encode::RowBatcher;
use super::{EntityWriter, WriterConfig, WriterError};

/// Rows buffered before a record batch is handed to the arrow writer.
const BATCH_ROWS: usize = 1024;

/// Writes entities of one kind to a parquet file.
///
/// Rows are buffered into record batches; a row group is flushed whenever
/// the writer's in-progress size reaches the configured byte target.
pub struct ParquetEntityWriter {
    kind: EntityKind,
    writer: ArrowWriter<File>,
    batcher: RowBatcher,
    row_group_bytes: usize,
}

impl ParquetEntityWriter {
    /// Opens a writer for `kind` at `destination`.
    ///
    /// The output file is created immediately, so a kind with no matching
    /// entities still yields a schema-only file.
    pub fn create(
        kind: EntityKind,
        destination: &Path,
        config: &WriterConfig,
    ) -> Result<Self, WriterError> {
        let file = if config.overwrite {
            File::create(destination)
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(destination)
        }
        .map_err(|source| WriterError::Create {
            source,
            path: destination.to_path_buf(),
        })?;
        let batcher = RowBatcher::new(kind, config.exclude_metadata);
        let properties = WriterProperties::builder()
            .set_compression(config.compression.into())
            .build();
        let writer = ArrowWriter::try_new(file, batcher.schema(), Some(properties)).map_err(
            |source| WriterError::Open {
                source,
                path: destination.to_path_buf(),
            },
        )?;
        Ok(Self {
            kind,
            writer,
            batcher,
            row_group_bytes: config.row_group_bytes,
        })
    }

    fn flush_rows(&mut self) -> Result<(), WriterError> {
        if self.batcher.is_empty() {
            return Ok(());
        }
        let batch = self.batcher.finish()?;
        self.writer
            .write(&batch)
            .map_err(|source| WriterError::Write {
                source,
                kind: self.kind,
            })?;
        if self.writer.in_progress_size() >= self.row_group_bytes {
            self.writer
                .flush()
                .map_err(|source| WriterError::Write {
                    source,
                    kind: self.kind,
                })?;
        }
        Ok(())
    }
}

impl EntityWriter for ParquetEntityWriter {
    fn write(&mut self, entity: &Entity) -> Result<(), WriterError> {
        self.batcher.append(entity)?;
        if self.batcher.len() >= BATCH_ROWS {
            self.flush_rows()?;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), WriterError> {
        self.flush_rows()?;
        self.writer.close().map_err(|source| WriterError::Close {
            source,
            kind: self.kind,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    use super::*;

    fn read_row_count(path: &Path) -> usize {
        let file = File::open(path).expect("open output file");
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .expect("open parquet reader")
            .build()
            .expect("build parquet reader");
        reader
            .map(|batch| batch.expect("read batch").num_rows())
            .sum()
    }

    #[test]
    fn writes_rows_and_reads_them_back() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("nodes.parquet");
        let config = WriterConfig::default();
        let mut writer: Box<dyn EntityWriter> = Box::new(
            ParquetEntityWriter::create(EntityKind::Node, &path, &config).expect("create writer"),
        );
        for id in 0..3 {
            writer
                .write(&Entity::node(id, 0.5, 1.5))
                .expect("write node");
        }
        writer.close().expect("close writer");
        assert_eq!(read_row_count(&path), 3);
    }

    #[test]
    fn empty_writer_still_produces_a_readable_file() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("relations.parquet");
        let config = WriterConfig::default();
        let writer: Box<dyn EntityWriter> = Box::new(
            ParquetEntityWriter::create(EntityKind::Relation, &path, &config)
                .expect("create writer"),
        );
        writer.close().expect("close writer");
        assert!(path.is_file());
        assert_eq!(read_row_count(&path), 0);
    }

    #[test]
    fn refusing_to_overwrite_is_an_error() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("ways.parquet");
        std::fs::write(&path, b"existing").expect("seed existing file");
        let config = WriterConfig {
            overwrite: false,
            ..WriterConfig::default()
        };
        let result = ParquetEntityWriter::create(EntityKind::Way, &path, &config);
        assert!(matches!(result, Err(WriterError::Create { .. })));
    }

    #[test]
    fn overwrite_replaces_an_existing_file() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("nodes.parquet");
        std::fs::write(&path, b"stale").expect("seed existing file");
        let config = WriterConfig::default();
        let mut writer = ParquetEntityWriter::create(EntityKind::Node, &path, &config)
            .expect("create writer");
        writer.write(&Entity::node(1, 0.0, 0.0)).expect("write node");
        Box::new(writer).close().expect("close writer");
        assert_eq!(read_row_count(&path), 1);
    }
}
