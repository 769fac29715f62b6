//! Throttled progress reporting over accepted entities.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::entity::{Entity, EntityKind};

use super::SinkObserver;

/// Entities between progress log lines.
const PROGRESS_INTERVAL: u64 = 100_000;

/// Counts accepted entities of one kind and logs throttled progress plus a
/// final total.
///
/// The counter is atomic, so one instance may be shared by sinks running on
/// different decode-pass threads.
#[derive(Debug)]
pub struct ProgressObserver {
    kind: EntityKind,
    count: AtomicU64,
}

impl ProgressObserver {
    /// An observer for entities of `kind`, starting at zero.
    #[must_use]
    pub const fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            count: AtomicU64::new(0),
        }
    }

    /// Entities counted so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl SinkObserver for ProgressObserver {
    fn processed(&self, _entity: &Entity) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(PROGRESS_INTERVAL) {
            info!("{} entities processed: {count}", self.kind);
        }
    }

    fn ended(&self) {
        info!("total {} entities processed: {}", self.kind, self.count());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn counts_processed_entities() {
        let observer = ProgressObserver::new(EntityKind::Node);
        observer.started();
        for id in 0..5 {
            observer.processed(&Entity::node(id, 0.0, 0.0));
        }
        observer.ended();
        assert_eq!(observer.count(), 5);
    }

    #[test]
    fn shared_observer_counts_across_threads() {
        let observer = Arc::new(ProgressObserver::new(EntityKind::Way));
        thread::scope(|scope| {
            for _ in 0..4 {
                let observer = Arc::clone(&observer);
                scope.spawn(move || {
                    for id in 0..100 {
                        observer.processed(&Entity::way(id, Vec::new()));
                    }
                });
            }
        });
        assert_eq!(observer.count(), 400);
    }
}
