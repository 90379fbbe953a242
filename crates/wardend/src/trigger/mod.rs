//! Trigger sources
//!
//! A trigger source is an endless sequence of "something may be wrong"
//! events. Path watchers block on filesystem notifications; pollers wake on
//! a fixed interval. Both are opened from a `SourceSpec` so the supervisor can
//! re-open them after a failure.

pub mod poll;
pub mod watch;

pub use poll::Poller;
pub use watch::PathWatcher;

use crate::battery::ConditionBattery;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use warden_common::{EventMask, TriggerError, TriggerEvent};

// ============================================================================
// Trigger Source Trait
// ============================================================================

#[async_trait]
pub trait TriggerSource: Send {
    fn label(&self) -> &str;

    /// Wait for the next event. An error means the source is finished and
    /// must be re-opened before it can produce anything else.
    async fn next_event(&mut self) -> Result<TriggerEvent, TriggerError>;

    /// Re-arm after a cycle: drop whatever arrived while it ran, including
    /// changes made by the remediation itself. Returns how many events were
    /// dropped.
    async fn rearm(&mut self) -> usize {
        0
    }
}

// ============================================================================
// Source Specs
// ============================================================================

/// Static description of one trigger source, built from configuration
#[derive(Clone)]
pub struct SourceSpec {
    pub label: String,
    pub kind: SourceKind,
}

#[derive(Clone)]
pub enum SourceKind {
    PathWatch {
        root: PathBuf,
        mask: EventMask,
        recursive: bool,
    },
    Poll {
        interval: Duration,
        battery: Arc<ConditionBattery>,
    },
}

impl SourceSpec {
    pub fn path_watch(label: &str, root: impl Into<PathBuf>, mask: EventMask) -> Self {
        Self {
            label: label.to_string(),
            kind: SourceKind::PathWatch {
                root: root.into(),
                mask,
                recursive: true,
            },
        }
    }

    pub fn poll(label: &str, interval: Duration, battery: Arc<ConditionBattery>) -> Self {
        Self {
            label: label.to_string(),
            kind: SourceKind::Poll { interval, battery },
        }
    }

    /// Start the underlying facility. Fails fast if a watched path is missing.
    pub fn open(&self) -> Result<Box<dyn TriggerSource>, TriggerError> {
        match &self.kind {
            SourceKind::PathWatch {
                root,
                mask,
                recursive,
            } => Ok(Box::new(PathWatcher::open(
                &self.label,
                root,
                mask.clone(),
                *recursive,
            )?)),
            SourceKind::Poll { interval, .. } => Ok(Box::new(Poller::new(&self.label, *interval))),
        }
    }

    /// Battery gating remediation for poll sources; path watches have none.
    pub fn battery(&self) -> Option<Arc<ConditionBattery>> {
        match &self.kind {
            SourceKind::Poll { battery, .. } => Some(Arc::clone(battery)),
            SourceKind::PathWatch { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            SourceKind::PathWatch { root, mask, .. } => {
                format!("watch {} for {}", root.display(), mask)
            }
            SourceKind::Poll { interval, battery } => format!(
                "poll every {}s with {} checks",
                interval.as_secs_f64(),
                battery.len()
            ),
        }
    }
}

// ============================================================================
// Fake Trigger Source (Testing)
// ============================================================================

/// Source fed by hand through a `FakeTriggerHandle`
pub struct FakeTriggerSource {
    label: String,
    rx: mpsc::UnboundedReceiver<TriggerEvent>,
}

#[derive(Clone)]
pub struct FakeTriggerHandle {
    tx: mpsc::UnboundedSender<TriggerEvent>,
}

impl FakeTriggerSource {
    pub fn new(label: &str) -> (Self, FakeTriggerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                label: label.to_string(),
                rx,
            },
            FakeTriggerHandle { tx },
        )
    }
}

impl FakeTriggerHandle {
    /// Queue an event; returns false once the source is gone
    pub fn fire(&self, event: TriggerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn tick(&self) -> bool {
        self.fire(TriggerEvent::Tick {
            at: chrono::Utc::now(),
        })
    }
}

#[async_trait]
impl TriggerSource for FakeTriggerSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn next_event(&mut self) -> Result<TriggerEvent, TriggerError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| TriggerError::Closed(self.label.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::FakeInventory;

    #[tokio::test]
    async fn test_fake_source_closes_when_handle_dropped() {
        let (mut source, handle) = FakeTriggerSource::new("fake");
        assert!(handle.tick());
        drop(handle);

        assert!(source.next_event().await.unwrap().is_tick());
        assert!(matches!(
            source.next_event().await,
            Err(TriggerError::Closed(label)) if label == "fake"
        ));
    }

    #[tokio::test]
    async fn test_missing_root_fails_fast() {
        let spec = SourceSpec::path_watch(
            "missing",
            "/nonexistent/warden/root",
            EventMask::parse("attrib").unwrap(),
        );
        assert!(matches!(spec.open(), Err(TriggerError::Watch { .. })));
        assert!(spec.battery().is_none());
    }

    #[tokio::test]
    async fn test_poll_spec_carries_battery() {
        let battery = Arc::new(ConditionBattery::new(vec![], Arc::new(FakeInventory::new())));
        let spec = SourceSpec::poll("service-poll", Duration::from_secs(10), battery);
        assert!(spec.battery().is_some());
        assert_eq!(spec.describe(), "poll every 10s with 0 checks");
        assert_eq!(spec.open().unwrap().label(), "service-poll");
    }
}
