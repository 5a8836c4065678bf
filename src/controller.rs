//! Binds [`WatchManager`] events to [`Worker`] inputs and fans Worker events
//! out to subscribers (`Controller`).
//!
//! Grounded on spec.md §4.7: path translation does not prepend the watched
//! root's basename (`destination = destination_root / relative_path`) —
//! the Open Question resolution recorded in DESIGN.md. Event fan-out
//! through an internal MPSC queue drained on a fixed interval mirrors the
//! "signal/slot with thread-affinity hops" pattern spec.md §9 calls out for
//! replacement, generalized here to any subscriber rather than a specific
//! UI thread.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::copier::CopyEvent;
use crate::snapshot::{Event as SnapshotEvent, SnapshotError};
use crate::transfer::Transfer;
use crate::watch::{WatchEvent, WatchManager};
use crate::worker::{Worker, WorkerEvent};

/// Public event surface, mirroring spec.md §6 verbatim.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    CopyStart { transfer: Transfer },
    Copy { transfer: Transfer, fraction: f64 },
    CopyEnd { transfer: Transfer },
    CopyFailed { transfer: Transfer, error: String },
    CopyCanceled { transfer: Transfer },
    PathAdded { path: PathBuf },
    PathRemoved { path: PathBuf },
    Error { message: String },
}

pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PARALLEL_EVENT_BUDGET: usize = 25;

/// Glue between [`WatchManager`] and [`Worker`], and the crate's single
/// public entry point.
pub struct Controller {
    watch_manager: Arc<WatchManager>,
    worker: Arc<Worker>,
    destination_root: Mutex<PathBuf>,
    drain_interval_ms: Mutex<u64>,
    parallel_event_budget: Mutex<usize>,
    events_tx: Sender<ControllerEvent>,
    events_rx: Mutex<Receiver<ControllerEvent>>,
}

impl Controller {
    pub fn new(
        destination_root: impl Into<PathBuf>,
        stability_threshold_ms: u64,
        min_poll_interval_ms: u64,
        max_poll_interval_ms: u64,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel();
        Arc::new(Self {
            watch_manager: Arc::new(WatchManager::new(min_poll_interval_ms, max_poll_interval_ms)),
            worker: Worker::new(stability_threshold_ms),
            destination_root: Mutex::new(destination_root.into()),
            drain_interval_ms: Mutex::new(DEFAULT_DRAIN_INTERVAL_MS),
            parallel_event_budget: Mutex::new(DEFAULT_PARALLEL_EVENT_BUDGET),
            events_tx,
            events_rx: Mutex::new(events_rx),
        })
    }

    // --- Commands (spec.md §6) -------------------------------------------------

    /// A rejected add emits an Error + PathRemoved pair (spec.md §4.4) so
    /// upstream state tracking the path can reconcile without a separate
    /// failure-path event shape.
    pub fn add_watch(&self, path: impl Into<PathBuf>) -> Result<(), SnapshotError> {
        let path = path.into();
        let result = self.watch_manager.add_path(&path);
        match &result {
            Ok(()) => {
                let _ = self.events_tx.send(ControllerEvent::PathAdded { path });
            }
            Err(err) => {
                let _ = self.events_tx.send(ControllerEvent::Error {
                    message: err.to_string(),
                });
                let _ = self.events_tx.send(ControllerEvent::PathRemoved { path });
            }
        }
        result
    }

    pub fn remove_watch(&self, path: &Path) {
        if self.watch_manager.remove_path(path) {
            let _ = self.events_tx.send(ControllerEvent::PathRemoved {
                path: path.to_path_buf(),
            });
        }
    }

    pub fn list_watches(&self) -> Vec<PathBuf> {
        self.watch_manager.list_paths()
    }

    pub fn set_destination_root(&self, path: impl Into<PathBuf>) {
        *self.destination_root.lock().unwrap() = path.into();
    }

    pub fn get_destination_root(&self) -> PathBuf {
        self.destination_root.lock().unwrap().clone()
    }

    pub fn set_stability_threshold_ms(&self, ms: u64) {
        self.worker.set_threshold(ms);
    }

    pub fn get_stability_threshold_ms(&self) -> u64 {
        self.worker.get_threshold()
    }

    pub fn set_parallel_event_budget(&self, n: usize) {
        *self.parallel_event_budget.lock().unwrap() = n;
    }

    pub fn set_event_drain_interval_ms(&self, ms: u64) {
        *self.drain_interval_ms.lock().unwrap() = ms;
    }

    pub fn retry(&self, transfer: Transfer) {
        self.worker.retry(transfer);
    }

    pub fn worker_tick_interval(&self) -> Duration {
        self.worker.tick_interval()
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(*self.drain_interval_ms.lock().unwrap())
    }

    // --- Drive loop steps --------------------------------------------------

    /// One WatchManager scheduler wake: polls ready snapshots and routes
    /// the resulting change events into `Worker::enqueue`.
    pub fn watch_tick(self: &Arc<Self>) {
        for event in self.watch_manager.tick() {
            match event {
                WatchEvent::Changed { root, event } => self.route_change(&root, event),
                WatchEvent::Error { message, .. } => {
                    let _ = self.events_tx.send(ControllerEvent::Error { message });
                }
            }
        }
    }

    fn route_change(self: &Arc<Self>, root: &Path, event: SnapshotEvent) {
        let destination_root = self.destination_root.lock().unwrap().clone();
        match event {
            SnapshotEvent::Created(rel) | SnapshotEvent::Updated(rel) => {
                let transfer = Transfer::new(root.join(&rel), destination_root.join(&rel));
                self.worker.enqueue(transfer);
            }
            SnapshotEvent::Renamed { new, .. } => {
                let transfer = Transfer::new(root.join(&new), destination_root.join(&new));
                self.worker.enqueue(transfer);
            }
            SnapshotEvent::Removed(_) => {}
        }
    }

    /// One Worker admission-control pass. Copy lifecycle events are routed
    /// into the internal queue for later draining.
    pub fn worker_tick(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        self.worker.tick(move |event| controller.route_worker_event(event));
    }

    fn route_worker_event(&self, event: WorkerEvent) {
        let event = match event {
            WorkerEvent::Copy(CopyEvent::CopyStart(transfer)) => ControllerEvent::CopyStart { transfer },
            WorkerEvent::Copy(CopyEvent::Copy(transfer, fraction)) => ControllerEvent::Copy { transfer, fraction },
            WorkerEvent::Copy(CopyEvent::CopyEnd(transfer)) => ControllerEvent::CopyEnd { transfer },
            WorkerEvent::Copy(CopyEvent::CopyFailed(transfer, error)) => ControllerEvent::CopyFailed {
                transfer,
                error: error.to_string(),
            },
            WorkerEvent::Copy(CopyEvent::CopyCanceled(transfer)) => ControllerEvent::CopyCanceled { transfer },
            WorkerEvent::Error(message) => ControllerEvent::Error { message },
        };
        let _ = self.events_tx.send(event);
    }

    /// Drains up to `parallel_event_budget` queued events. Meant to be
    /// invoked by a timer every `drain_interval_ms`.
    pub fn drain_events(&self) -> Vec<ControllerEvent> {
        let budget = *self.parallel_event_budget.lock().unwrap();
        let rx = self.events_rx.lock().unwrap();
        let mut out = Vec::with_capacity(budget);
        for _ in 0..budget {
            match rx.try_recv() {
                Ok(event) => out.push(event),
                Err(_) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn path_translation_does_not_prepend_watch_root_basename() {
        let source_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let controller = Controller::new(dest_dir.path(), 200, 1, crate::snapshot::MAX_POLL_INTERVAL_MS);
        controller.add_watch(source_dir.path()).unwrap();

        fs::write(source_dir.path().join("a.txt"), b"hello").unwrap();
        controller.watch_tick();
        // force a poll despite the min interval by polling again directly
        // isn't exposed; route_change is exercised through add_watch's
        // initial enumeration plus a direct Created event instead:
        controller.route_change(source_dir.path(), SnapshotEvent::Created(PathBuf::from("a.txt")));

        controller.worker_tick();
        let events = controller.drain_events();
        let copy_start = events.iter().find_map(|e| match e {
            ControllerEvent::CopyStart { transfer } => Some(transfer.clone()),
            _ => None,
        });

        if let Some(transfer) = copy_start {
            assert_eq!(transfer.to, dest_dir.path().join("a.txt"));
        }
    }

    #[test]
    fn removed_event_produces_no_transfer() {
        let source_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let controller = Controller::new(dest_dir.path(), 200, 1, crate::snapshot::MAX_POLL_INTERVAL_MS);
        controller.route_change(source_dir.path(), SnapshotEvent::Removed(PathBuf::from("a.txt")));
        controller.worker_tick();
        assert!(controller.drain_events().is_empty());
    }
}
