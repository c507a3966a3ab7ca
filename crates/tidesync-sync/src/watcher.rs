//! Debounced filesystem watching
//!
//! Converts noisy OS-level events into stable, single-shot [`DebouncedEvent`]s
//! through a per-path settle state machine:
//!
//! ```text
//! notify backend ──→ raw channel ──→ settle task ──→ mpsc::Receiver<DebouncedEvent>
//!                                        │
//!                                  pending map
//!                                 (Polling ⇄ Settling)
//! ```
//!
//! A pending file event first *polls*: as long as the mtime keeps moving the
//! entry stays in `Polling` and is re-checked at the poll interval. Once the
//! mtime holds still for one poll the entry moves to `Settling`; after the
//! settle window passes and the file can be opened for reading, the event is
//! emitted and the entry dropped. Paths that vanish are dropped silently.
//!
//! Directory additions, all deletions, and the `(new, old)` half of a move
//! are emitted immediately; moves are additionally debounced on the new path.
//! A `Modified` arriving while an `Added` is pending on the same path is
//! discarded.
//!
//! The OS event source is injected through [`EventBackend`] so the state
//! machine can be driven with synthetic events in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Event types
// ============================================================================

/// High-level change kinds the sync engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Added,
    Modified,
    Deleted,
    Moved,
}

/// A settled change on a single path
///
/// `old_path` is present only for `Moved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebouncedEvent {
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
    pub kind: WatchKind,
}

/// Raw event delivered by the OS watcher backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Added(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { new: PathBuf, old: PathBuf },
}

// ============================================================================
// Backend injection
// ============================================================================

/// Narrow capability over the OS event source
///
/// `start` begins a recursive watch on `root` and delivers raw events to
/// `tx` until `stop` is called or the backend is dropped.
pub trait EventBackend: Send + 'static {
    fn start(&mut self, root: &Path, tx: mpsc::UnboundedSender<RawEvent>) -> Result<()>;
    fn stop(&mut self);
}

/// Production backend built on the `notify` crate
#[derive(Default)]
pub struct NotifyBackend {
    watcher: Option<RecommendedWatcher>,
    root: Option<PathBuf>,
}

impl NotifyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBackend for NotifyBackend {
    fn start(&mut self, root: &Path, tx: mpsc::UnboundedSender<RawEvent>) -> Result<()> {
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(raw) = map_notify_event(&event) {
                        if tx.send(raw).is_err() {
                            warn!("raw event receiver dropped");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "filesystem watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("failed to create filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch path: {}", root.display()))?;

        info!(root = %root.display(), "recursive watch started");
        self.watcher = Some(watcher);
        self.root = Some(root.to_path_buf());
        Ok(())
    }

    fn stop(&mut self) {
        if let (Some(mut watcher), Some(root)) = (self.watcher.take(), self.root.take()) {
            if let Err(e) = watcher.unwatch(&root) {
                debug!(root = %root.display(), error = %e, "unwatch on stop failed");
            }
            info!(root = %root.display(), "watch stopped");
        }
    }
}

/// Converts a `notify::Event` into a [`RawEvent`]
///
/// Create → Added, Modify(Data) → Modified, Modify(Name(Both)) with two
/// paths → Moved, Remove → Deleted, other Modify kinds → Modified. Access
/// events and path-less events are ignored.
fn map_notify_event(event: &notify::Event) -> Option<RawEvent> {
    let paths = &event.paths;
    match &event.kind {
        EventKind::Create(_) => Some(RawEvent::Added(paths.first()?.clone())),
        EventKind::Modify(ModifyKind::Data(_)) => Some(RawEvent::Modified(paths.first()?.clone())),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                Some(RawEvent::Moved {
                    old: paths[0].clone(),
                    new: paths[1].clone(),
                })
            } else {
                Some(RawEvent::Modified(paths.first()?.clone()))
            }
        }
        EventKind::Remove(_) => Some(RawEvent::Deleted(paths.first()?.clone())),
        EventKind::Modify(_) => Some(RawEvent::Modified(paths.first()?.clone())),
        _ => None,
    }
}

// ============================================================================
// Settle state machine
// ============================================================================

/// Timing knobs for the settle loop
#[derive(Debug, Clone)]
pub struct SettleConfig {
    /// Cadence of the sweep over pending events
    pub tick: Duration,
    /// Re-check interval while a file's mtime is still moving
    pub poll_interval: Duration,
    /// How long the mtime must hold still before the event fires
    pub settle_time: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            poll_interval: Duration::from_millis(100),
            settle_time: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleState {
    Polling,
    Settling,
}

#[derive(Debug)]
struct PendingEvent {
    kind: WatchKind,
    last_mtime: Option<std::time::SystemTime>,
    next_check: Instant,
    state: SettleState,
}

/// Inserts or updates the pending entry for `path`
///
/// A `Modified` is discarded while an `Added` is already pending on the
/// same path; any other arrival resets the entry to `Polling`.
fn push_pending(
    pending: &mut HashMap<PathBuf, PendingEvent>,
    path: PathBuf,
    kind: WatchKind,
    poll_interval: Duration,
) {
    if kind == WatchKind::Modified {
        if let Some(existing) = pending.get(&path) {
            if existing.kind == WatchKind::Added {
                debug!(path = %path.display(), "modified discarded, add already pending");
                return;
            }
        }
    }

    let last_mtime = std::fs::metadata(&path).ok().and_then(|m| m.modified().ok());
    pending.insert(
        path,
        PendingEvent {
            kind,
            last_mtime,
            next_check: Instant::now() + poll_interval,
            state: SettleState::Polling,
        },
    );
}

/// Returns true once the file can be opened for reading
///
/// A writer that still holds the file open exclusively (or a copy in
/// progress) fails this check and keeps the entry in `Settling`.
fn is_readable(path: &Path) -> bool {
    std::fs::OpenOptions::new().read(true).open(path).is_ok()
}

/// One sweep over the pending map; returns the events that settled
fn sweep(pending: &mut HashMap<PathBuf, PendingEvent>, config: &SettleConfig) -> Vec<DebouncedEvent> {
    let now = Instant::now();
    let mut settled = Vec::new();
    let mut drop_paths = Vec::new();

    for (path, entry) in pending.iter_mut() {
        if now < entry.next_check {
            continue;
        }

        if !path.exists() {
            drop_paths.push(path.clone());
            continue;
        }

        let current_mtime = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => Some(mtime),
            Err(e) => {
                // Transient read failure (permissions, races): retry soon.
                debug!(path = %path.display(), error = %e, "mtime check failed, retrying");
                entry.next_check = now + config.poll_interval;
                continue;
            }
        };

        if current_mtime != entry.last_mtime {
            // Still changing: stay in (or fall back to) Polling.
            entry.last_mtime = current_mtime;
            entry.state = SettleState::Polling;
            entry.next_check = now + config.poll_interval;
        } else if entry.state == SettleState::Polling {
            entry.state = SettleState::Settling;
            entry.next_check = now + config.settle_time;
        } else if is_readable(path) {
            settled.push(DebouncedEvent {
                path: path.clone(),
                old_path: None,
                kind: entry.kind,
            });
            drop_paths.push(path.clone());
        } else {
            // Still locked by a writer: stay in Settling and re-check.
            entry.next_check = now + config.poll_interval;
        }
    }

    for path in &drop_paths {
        pending.remove(path);
    }
    settled
}

/// The settle task: routes raw events and sweeps the pending map
async fn settle_loop(
    mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    out_tx: mpsc::Sender<DebouncedEvent>,
    config: SettleConfig,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, PendingEvent> = HashMap::new();
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pending = pending.len(), "settle loop cancelled");
                break;
            }

            raw = raw_rx.recv() => {
                let Some(raw) = raw else {
                    debug!("raw event channel closed, settle loop exiting");
                    break;
                };
                match raw {
                    RawEvent::Added(path) => {
                        if path.is_dir() {
                            // Directory creation needs no settling.
                            let event = DebouncedEvent { path, old_path: None, kind: WatchKind::Added };
                            if out_tx.send(event).await.is_err() { break; }
                        } else {
                            push_pending(&mut pending, path, WatchKind::Added, config.poll_interval);
                        }
                    }
                    RawEvent::Modified(path) => {
                        if !path.is_dir() {
                            push_pending(&mut pending, path, WatchKind::Modified, config.poll_interval);
                        }
                    }
                    RawEvent::Deleted(path) => {
                        let event = DebouncedEvent { path, old_path: None, kind: WatchKind::Deleted };
                        if out_tx.send(event).await.is_err() { break; }
                    }
                    RawEvent::Moved { new, old } => {
                        // Consumers that need the pair get it immediately;
                        // the new path still settles like any other write.
                        let event = DebouncedEvent {
                            path: new.clone(),
                            old_path: Some(old),
                            kind: WatchKind::Moved,
                        };
                        if out_tx.send(event).await.is_err() { break; }
                        push_pending(&mut pending, new, WatchKind::Moved, config.poll_interval);
                    }
                }
            }

            _ = ticker.tick() => {
                for event in sweep(&mut pending, &config) {
                    debug!(path = %event.path.display(), kind = ?event.kind, "event settled");
                    if out_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches a directory tree and emits settled change events
///
/// Owns the injected backend and the settle task. Drop order is handled by
/// [`FileWatcher::stop`]: the backend stops delivering, the settle task is
/// cancelled and joined.
pub struct FileWatcher {
    backend: Box<dyn EventBackend>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl FileWatcher {
    /// Starts watching `root`, returning the watcher handle and the
    /// channel of settled events
    pub fn start(
        mut backend: Box<dyn EventBackend>,
        root: &Path,
        config: SettleConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<DebouncedEvent>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        backend.start(root, raw_tx)?;

        let (out_tx, out_rx) = mpsc::channel(1024);
        let task = tokio::spawn(settle_loop(raw_rx, out_tx, config, cancel.clone()));

        Ok((
            Self {
                backend,
                cancel,
                task,
            },
            out_rx,
        ))
    }

    /// Stops the OS watch and joins the settle task
    pub async fn stop(mut self) {
        self.backend.stop();
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "settle task join failed");
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::time::timeout;

    use super::*;

    /// Backend that just hands the sender back to the test
    struct ManualBackend;

    impl EventBackend for ManualBackend {
        fn start(&mut self, _root: &Path, _tx: mpsc::UnboundedSender<RawEvent>) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    fn fast_config() -> SettleConfig {
        SettleConfig {
            tick: Duration::from_millis(5),
            poll_interval: Duration::from_millis(10),
            settle_time: Duration::from_millis(40),
        }
    }

    /// Spawns a settle loop wired to manual raw input
    fn spawn_loop() -> (
        mpsc::UnboundedSender<RawEvent>,
        mpsc::Receiver<DebouncedEvent>,
        CancellationToken,
    ) {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(settle_loop(raw_rx, out_tx, fast_config(), cancel.clone()));
        (raw_tx, out_rx, cancel)
    }

    async fn recv(rx: &mut mpsc::Receiver<DebouncedEvent>) -> DebouncedEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event should arrive in time")
            .expect("channel should stay open")
    }

    #[tokio::test]
    async fn test_added_file_settles_and_emits_once() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("new.txt");
        std::fs::write(&file, b"content").unwrap();

        let (raw_tx, mut out_rx, cancel) = spawn_loop();
        raw_tx.send(RawEvent::Added(file.clone())).unwrap();

        let event = recv(&mut out_rx).await;
        assert_eq!(event.kind, WatchKind::Added);
        assert_eq!(event.path, file);
        assert!(event.old_path.is_none());

        // Nothing further for the same path.
        let extra = timeout(Duration::from_millis(150), out_rx.recv()).await;
        assert!(extra.is_err(), "event must fire exactly once");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_modified_discarded_while_add_pending() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"v1").unwrap();

        let (raw_tx, mut out_rx, cancel) = spawn_loop();
        raw_tx.send(RawEvent::Added(file.clone())).unwrap();
        raw_tx.send(RawEvent::Modified(file.clone())).unwrap();

        let event = recv(&mut out_rx).await;
        assert_eq!(event.kind, WatchKind::Added, "add wins over later modify");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_directory_added_emits_immediately() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let (raw_tx, mut out_rx, cancel) = spawn_loop();
        raw_tx.send(RawEvent::Added(sub.clone())).unwrap();

        let event = recv(&mut out_rx).await;
        assert_eq!(event.kind, WatchKind::Added);
        assert_eq!(event.path, sub);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_delete_emits_immediately() {
        let (raw_tx, mut out_rx, cancel) = spawn_loop();
        raw_tx
            .send(RawEvent::Deleted(PathBuf::from("/gone.txt")))
            .unwrap();

        let event = recv(&mut out_rx).await;
        assert_eq!(event.kind, WatchKind::Deleted);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_moved_emits_pair_then_settled_event() {
        let dir = TempDir::new().unwrap();
        let new = dir.path().join("renamed.txt");
        std::fs::write(&new, b"data").unwrap();
        let old = dir.path().join("original.txt");

        let (raw_tx, mut out_rx, cancel) = spawn_loop();
        raw_tx
            .send(RawEvent::Moved {
                new: new.clone(),
                old: old.clone(),
            })
            .unwrap();

        // Synchronous pair first, with the old path attached.
        let pair = recv(&mut out_rx).await;
        assert_eq!(pair.kind, WatchKind::Moved);
        assert_eq!(pair.path, new);
        assert_eq!(pair.old_path.as_deref(), Some(old.as_path()));

        // Debounced event on the new path follows once it settles.
        let settled = recv(&mut out_rx).await;
        assert_eq!(settled.kind, WatchKind::Moved);
        assert_eq!(settled.path, new);
        assert!(settled.old_path.is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_vanished_pending_path_is_dropped() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("fleeting.txt");
        std::fs::write(&file, b"x").unwrap();

        let (raw_tx, mut out_rx, cancel) = spawn_loop();
        raw_tx.send(RawEvent::Added(file.clone())).unwrap();
        std::fs::remove_file(&file).unwrap();

        let nothing = timeout(Duration::from_millis(200), out_rx.recv()).await;
        assert!(nothing.is_err(), "vanished path must not emit");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_write_during_polling_resets_and_still_settles() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("busy.txt");
        std::fs::write(&file, b"v1").unwrap();

        let (raw_tx, mut out_rx, cancel) = spawn_loop();
        raw_tx.send(RawEvent::Added(file.clone())).unwrap();

        // Keep the file changing for a few poll intervals.
        for i in 0..3 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            std::fs::write(&file, format!("v{i}")).unwrap();
        }

        // It must still settle eventually, exactly once.
        let event = recv(&mut out_rx).await;
        assert_eq!(event.kind, WatchKind::Added);
        let extra = timeout(Duration::from_millis(150), out_rx.recv()).await;
        assert!(extra.is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let (_raw_tx, mut out_rx, cancel) = spawn_loop();
        cancel.cancel();
        // Once the loop exits the sender side drops and recv yields None.
        let end = timeout(Duration::from_secs(1), out_rx.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_file_watcher_start_stop() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let (watcher, _rx) = FileWatcher::start(
            Box::new(ManualBackend),
            dir.path(),
            fast_config(),
            cancel.clone(),
        )
        .unwrap();
        watcher.stop().await;
        assert!(cancel.is_cancelled());
    }

    // ------------------------------------------------------------------
    // notify event mapping
    // ------------------------------------------------------------------

    #[test]
    fn test_map_create_and_remove() {
        let create = notify::Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&create),
            Some(RawEvent::Added(PathBuf::from("/a.txt")))
        );

        let remove = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&remove),
            Some(RawEvent::Deleted(PathBuf::from("/a.txt")))
        );
    }

    #[test]
    fn test_map_rename_both_paths() {
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/old.txt"), PathBuf::from("/new.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&event),
            Some(RawEvent::Moved {
                old: PathBuf::from("/old.txt"),
                new: PathBuf::from("/new.txt"),
            })
        );
    }

    #[test]
    fn test_map_rename_single_path_degrades_to_modified() {
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/only.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&event),
            Some(RawEvent::Modified(PathBuf::from("/only.txt")))
        );
    }

    #[test]
    fn test_map_access_ignored() {
        let event = notify::Event {
            kind: EventKind::Access(notify::event::AccessKind::Read),
            paths: vec![PathBuf::from("/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(map_notify_event(&event), None);
    }
}
