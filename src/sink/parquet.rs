//! The typed columnar sink: one writer, one entity kind.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::decode::SourceMetadata;
use crate::entity::{Entity, EntityKind};
use crate::writer::{
    EntityWriter, ParquetWriterFactory, WriterConfig, WriterError, WriterFactory,
};

use super::{
    EntityFilter, FilterId, ObserverId, Registry, Sink, SinkError, SinkObserver, SinkState,
};

/// A sink that persists entities of exactly one kind to a columnar file.
///
/// Entities of other kinds are silently ignored, which lets a single decode
/// pass feed several sinks. The output target is derived lazily on
/// `initialize` as `<destination-root>/<kind>/<source-file-name>.<kind>.parquet`.
pub struct ParquetSink {
    kind: EntityKind,
    source_name: String,
    destination: PathBuf,
    config: WriterConfig,
    factory: Arc<dyn WriterFactory>,
    filters: Registry<Box<dyn EntityFilter>>,
    observers: Registry<Arc<dyn SinkObserver>>,
    state: SinkState,
    writer: Option<Box<dyn EntityWriter>>,
    accepted: u64,
}

impl ParquetSink {
    /// A sink for `kind` writing under `destination_root`, using the default
    /// parquet writer factory.
    #[must_use]
    pub fn new(
        source: &Path,
        destination_root: &Path,
        kind: EntityKind,
        config: WriterConfig,
    ) -> Self {
        Self::with_factory(
            source,
            destination_root,
            kind,
            config,
            Arc::new(ParquetWriterFactory),
        )
    }

    /// As [`ParquetSink::new`], with an explicit writer factory.
    #[must_use]
    pub fn with_factory(
        source: &Path,
        destination_root: &Path,
        kind: EntityKind,
        config: WriterConfig,
        factory: Arc<dyn WriterFactory>,
    ) -> Self {
        let source_name = source
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned());
        Self {
            kind,
            source_name,
            destination: destination_root.join(kind.as_str()),
            config,
            factory,
            filters: Registry::new(),
            observers: Registry::new(),
            state: SinkState::Uninitialized,
            writer: None,
            accepted: 0,
        }
    }

    /// The kind this sink accepts.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Number of entities written so far.
    #[must_use]
    pub const fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Registers a filter. Register before `initialize`; mutation while a
    /// pass is in flight is outside the contract.
    pub fn add_filter(&mut self, filter: Box<dyn EntityFilter>) -> FilterId {
        FilterId(self.filters.add(filter))
    }

    /// Removes a previously registered filter; returns false if unknown.
    pub fn remove_filter(&mut self, id: FilterId) -> bool {
        self.filters.remove(id.0)
    }

    /// Registers an observer. Register before `initialize`.
    pub fn add_observer(&mut self, observer: Arc<dyn SinkObserver>) -> ObserverId {
        ObserverId(self.observers.add(observer))
    }

    /// Removes a previously registered observer; returns false if unknown.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id.0)
    }

    fn lifecycle_error(&self, operation: &'static str) -> SinkError {
        SinkError::Lifecycle {
            kind: self.kind,
            operation,
            state: self.state,
        }
    }
}

impl Sink for ParquetSink {
    fn initialize(&mut self, _metadata: &SourceMetadata) -> Result<(), SinkError> {
        if self.state != SinkState::Uninitialized {
            return Err(self.lifecycle_error("initialize"));
        }
        fs::create_dir_all(&self.destination).map_err(|source| WriterError::CreateDir {
            source,
            path: self.destination.clone(),
        })?;
        let target = self
            .destination
            .join(format!("{}.{}.parquet", self.source_name, self.kind));
        self.writer = Some(self.factory.open(self.kind, &target, &self.config)?);
        self.state = SinkState::Active;
        for observer in self.observers.iter() {
            observer.started();
        }
        Ok(())
    }

    fn process(&mut self, entity: &Entity) -> Result<(), SinkError> {
        if self.state != SinkState::Active {
            return Err(self.lifecycle_error("process"));
        }
        if entity.kind() != self.kind {
            return Ok(());
        }
        if self.filters.iter().any(|filter| filter.rejects(entity)) {
            return Ok(());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(self.lifecycle_error("process"));
        };
        writer.write(entity)?;
        self.accepted += 1;
        for observer in self.observers.iter() {
            observer.processed(entity);
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), SinkError> {
        if self.state != SinkState::Active {
            return Err(self.lifecycle_error("complete"));
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| self.lifecycle_error("complete"))?;
        writer.close()?;
        self.state = SinkState::Completed;
        for observer in self.observers.iter() {
            observer.ended();
        }
        Ok(())
    }

    fn close(&mut self) {
        // Drops a writer still held after an aborted pass without flushing;
        // a half-written columnar file must not be passed off as complete.
        self.writer = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Default)]
    struct RecordingState {
        written: Mutex<Vec<i64>>,
        closed: AtomicBool,
        fail_open: bool,
        fail_close: bool,
    }

    struct RecordingWriter {
        state: Arc<RecordingState>,
    }

    impl EntityWriter for RecordingWriter {
        fn write(&mut self, entity: &Entity) -> Result<(), WriterError> {
            self.state
                .written
                .lock()
                .expect("writer lock")
                .push(entity.id);
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<(), WriterError> {
            self.state.closed.store(true, Ordering::SeqCst);
            if self.state.fail_close {
                return Err(WriterError::Close {
                    source: ::parquet::errors::ParquetError::General("boom".to_owned()),
                    kind: EntityKind::Node,
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        states: Mutex<Vec<Arc<RecordingState>>>,
        template: RecordingState,
    }

    impl RecordingFactory {
        fn failing_open() -> Self {
            Self {
                template: RecordingState {
                    fail_open: true,
                    ..RecordingState::default()
                },
                ..Self::default()
            }
        }

        fn failing_close() -> Self {
            Self {
                template: RecordingState {
                    fail_close: true,
                    ..RecordingState::default()
                },
                ..Self::default()
            }
        }

        fn single_state(&self) -> Arc<RecordingState> {
            let states = self.states.lock().expect("factory lock");
            assert_eq!(states.len(), 1);
            Arc::clone(&states[0])
        }
    }

    impl WriterFactory for RecordingFactory {
        fn open(
            &self,
            kind: EntityKind,
            destination: &Path,
            _config: &WriterConfig,
        ) -> Result<Box<dyn EntityWriter>, WriterError> {
            if self.template.fail_open {
                return Err(WriterError::Create {
                    source: std::io::Error::other("no space"),
                    path: destination.to_path_buf(),
                });
            }
            assert_eq!(kind, EntityKind::Node);
            let state = Arc::new(RecordingState {
                fail_close: self.template.fail_close,
                ..RecordingState::default()
            });
            self.states.lock().expect("factory lock").push(Arc::clone(&state));
            Ok(Box::new(RecordingWriter { state }))
        }
    }

    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl SinkObserver for RecordingObserver {
        fn started(&self) {
            self.events
                .lock()
                .expect("observer lock")
                .push("started".to_owned());
        }

        fn processed(&self, entity: &Entity) {
            self.events
                .lock()
                .expect("observer lock")
                .push(format!("processed {}", entity.id));
        }

        fn ended(&self) {
            self.events
                .lock()
                .expect("observer lock")
                .push("ended".to_owned());
        }
    }

    struct RejectBelow {
        threshold: i64,
    }

    impl EntityFilter for RejectBelow {
        fn rejects(&self, entity: &Entity) -> bool {
            entity.id < self.threshold
        }
    }

    struct CountingFilter {
        calls: Arc<Mutex<u64>>,
    }

    impl EntityFilter for CountingFilter {
        fn rejects(&self, _entity: &Entity) -> bool {
            *self.calls.lock().expect("filter lock") += 1;
            false
        }
    }

    fn node_sink(factory: Arc<RecordingFactory>, dir: &Path) -> ParquetSink {
        ParquetSink::with_factory(
            Path::new("map.osm.pbf"),
            dir,
            EntityKind::Node,
            WriterConfig::default(),
            factory,
        )
    }

    #[test]
    fn process_before_initialize_is_a_lifecycle_error() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::default());
        let mut sink = node_sink(factory, dir.path());
        let result = sink.process(&Entity::node(1, 0.0, 0.0));
        assert!(matches!(
            result,
            Err(SinkError::Lifecycle {
                operation: "process",
                state: SinkState::Uninitialized,
                ..
            })
        ));
    }

    #[test]
    fn routes_matching_entities_and_ignores_others() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::default());
        let mut sink = node_sink(Arc::clone(&factory), dir.path());
        sink.initialize(&SourceMetadata::default())
            .expect("initialize");
        sink.process(&Entity::node(1, 0.0, 0.0)).expect("process node");
        sink.process(&Entity::way(2, vec![1])).expect("ignore way");
        sink.process(&Entity::node(3, 0.0, 0.0)).expect("process node");
        sink.complete().expect("complete");
        assert_eq!(sink.accepted(), 2);

        let state = factory.single_state();
        assert_eq!(*state.written.lock().expect("writer lock"), vec![1, 3]);
        assert!(state.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn filters_short_circuit_on_first_rejection() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::default());
        let mut sink = node_sink(Arc::clone(&factory), dir.path());
        let later_calls = Arc::new(Mutex::new(0));
        sink.add_filter(Box::new(RejectBelow { threshold: 10 }));
        sink.add_filter(Box::new(CountingFilter {
            calls: Arc::clone(&later_calls),
        }));
        sink.initialize(&SourceMetadata::default())
            .expect("initialize");
        sink.process(&Entity::node(5, 0.0, 0.0)).expect("rejected");
        sink.process(&Entity::node(15, 0.0, 0.0)).expect("accepted");
        sink.complete().expect("complete");

        let state = factory.single_state();
        assert_eq!(*state.written.lock().expect("writer lock"), vec![15]);
        // The second filter only ran for the entity the first one accepted.
        assert_eq!(*later_calls.lock().expect("filter lock"), 1);
    }

    #[test]
    fn removed_filters_no_longer_apply() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::default());
        let mut sink = node_sink(Arc::clone(&factory), dir.path());
        let id = sink.add_filter(Box::new(RejectBelow { threshold: 10 }));
        assert!(sink.remove_filter(id));
        assert!(!sink.remove_filter(id));
        sink.initialize(&SourceMetadata::default())
            .expect("initialize");
        sink.process(&Entity::node(5, 0.0, 0.0)).expect("process");
        assert_eq!(sink.accepted(), 1);
    }

    #[test]
    fn observers_see_started_processed_ended_in_order() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::default());
        let mut sink = node_sink(factory, dir.path());
        let observer = Arc::new(RecordingObserver {
            events: Mutex::new(Vec::new()),
        });
        sink.add_observer(Arc::clone(&observer) as Arc<dyn SinkObserver>);
        sink.initialize(&SourceMetadata::default())
            .expect("initialize");
        sink.process(&Entity::node(1, 0.0, 0.0)).expect("process");
        sink.process(&Entity::way(2, vec![1])).expect("ignore");
        sink.complete().expect("complete");
        assert_eq!(
            *observer.events.lock().expect("observer lock"),
            vec!["started", "processed 1", "ended"]
        );
    }

    #[test]
    fn process_after_complete_is_a_lifecycle_error() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::default());
        let mut sink = node_sink(factory, dir.path());
        sink.initialize(&SourceMetadata::default())
            .expect("initialize");
        sink.complete().expect("complete");
        let result = sink.process(&Entity::node(1, 0.0, 0.0));
        assert!(matches!(
            result,
            Err(SinkError::Lifecycle {
                operation: "process",
                state: SinkState::Completed,
                ..
            })
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::default());
        let mut sink = node_sink(factory, dir.path());
        sink.initialize(&SourceMetadata::default())
            .expect("initialize");
        sink.complete().expect("complete");
        sink.close();
        sink.close();
    }

    #[test]
    fn writer_open_failure_is_fatal_to_initialize() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::failing_open());
        let mut sink = node_sink(factory, dir.path());
        let result = sink.initialize(&SourceMetadata::default());
        assert!(matches!(
            result,
            Err(SinkError::Writer(WriterError::Create { .. }))
        ));
    }

    #[test]
    fn close_failure_surfaces_from_complete() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let factory = Arc::new(RecordingFactory::failing_close());
        let mut sink = node_sink(factory, dir.path());
        sink.initialize(&SourceMetadata::default())
            .expect("initialize");
        let result = sink.complete();
        assert!(matches!(
            result,
            Err(SinkError::Writer(WriterError::Close { .. }))
        ));
    }
}
