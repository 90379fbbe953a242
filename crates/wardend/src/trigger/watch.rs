//! Path watcher - blocks until a matching filesystem change under a root
//!
//! The notify callback runs on the backend's own thread and forwards raw
//! events into a channel; filtering by event kind happens on the receiving
//! side so non-matching activity never leaves the source.
//!
//! Like re-running a one-shot `inotifywait`, the watcher only sees changes
//! made after it is re-armed. `rearm` discards everything queued during a
//! cycle and waits for the tree to go quiet, so the remediation engine's own
//! fixes never trigger the next run.

use super::TriggerSource;
use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_common::{EventMask, TriggerError, TriggerEvent, WatchEventKind};

/// Quiet period required before a watcher counts as re-armed
pub const SETTLE_WINDOW: Duration = Duration::from_millis(250);

/// Upper bound on one re-arm, in settle windows
const MAX_SETTLE_WINDOWS: u32 = 8;

pub struct PathWatcher {
    label: String,
    root: PathBuf,
    mask: EventMask,
    settle: Duration,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl PathWatcher {
    pub fn open(
        label: &str,
        root: &Path,
        mask: EventMask,
        recursive: bool,
    ) -> Result<Self, TriggerError> {
        if !root.exists() {
            return Err(TriggerError::Watch {
                path: root.to_path_buf(),
                reason: "path does not exist".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| TriggerError::Watch {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(root, mode).map_err(|e| TriggerError::Watch {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        info!(source = label, "Watching {} for {}", root.display(), mask);

        Ok(Self {
            label: label.to_string(),
            root: root.to_path_buf(),
            mask,
            settle: SETTLE_WINDOW,
            rx,
            _watcher: watcher,
        })
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

#[async_trait]
impl TriggerSource for PathWatcher {
    fn label(&self) -> &str {
        &self.label
    }

    async fn next_event(&mut self) -> Result<TriggerEvent, TriggerError> {
        loop {
            match self.rx.recv().await {
                Some(Ok(event)) => {
                    if let Some(trigger) = classify(&self.root, &self.mask, &event) {
                        return Ok(trigger);
                    }
                    debug!(source = %self.label, kind = ?event.kind, "Ignoring filtered event");
                }
                Some(Err(e)) => warn!(source = %self.label, "Watch error: {}", e),
                None => return Err(TriggerError::Closed(self.label.clone())),
            }
        }
    }

    async fn rearm(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }

        // Late notifications from the cycle can still be in flight
        let deadline = Instant::now() + self.settle * MAX_SETTLE_WINDOWS;
        loop {
            let window = self.settle.min(deadline.saturating_duration_since(Instant::now()));
            if window.is_zero() {
                warn!(source = %self.label, "Tree still busy, re-armed anyway");
                break;
            }
            match tokio::time::timeout(window, self.rx.recv()).await {
                Ok(Some(_)) => dropped += 1,
                // Quiet, or closed (reported by the next `next_event`)
                Ok(None) | Err(_) => break,
            }
        }

        if dropped > 0 {
            debug!(source = %self.label, "Discarded {} events from the last cycle", dropped);
        }
        dropped
    }
}

/// Map a notify event kind onto the inotify-style vocabulary.
pub fn event_kind(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(WatchEventKind::CloseWrite),
        EventKind::Access(AccessKind::Read) | EventKind::Access(AccessKind::Any) => {
            Some(WatchEventKind::Access)
        }
        EventKind::Access(_) => None,
        EventKind::Create(_) => Some(WatchEventKind::Create),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(WatchEventKind::Attrib),
        EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventKind::Move),
        EventKind::Modify(_) => Some(WatchEventKind::Modify),
        EventKind::Remove(_) => Some(WatchEventKind::Delete),
        EventKind::Any | EventKind::Other => None,
    }
}

/// Turn a raw notify event into a trigger event if it passes the mask.
pub fn classify(root: &Path, mask: &EventMask, event: &Event) -> Option<TriggerEvent> {
    let kind = event_kind(&event.kind)?;
    if !mask.contains(kind) {
        return None;
    }

    let name = event
        .paths
        .first()
        .map(|p| {
            p.strip_prefix(root)
                .ok()
                .filter(|rel| !rel.as_os_str().is_empty())
                .unwrap_or(p.as_path())
                .display()
                .to_string()
        })
        .unwrap_or_default();

    Some(TriggerEvent::Path {
        root: root.to_path_buf(),
        kind,
        name,
    })
}
