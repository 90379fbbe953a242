//! Trigger events and the event-kind filters used by path watchers.
//!
//! Event names follow inotifywait's vocabulary so existing watch lists can be
//! carried over verbatim into the configuration file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of filesystem change reported by the notification facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    Access,
    Modify,
    Attrib,
    CloseWrite,
    Create,
    Delete,
    Move,
}

impl WatchEventKind {
    pub const ALL: [WatchEventKind; 7] = [
        Self::Access,
        Self::Modify,
        Self::Attrib,
        Self::CloseWrite,
        Self::Create,
        Self::Delete,
        Self::Move,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Modify => "modify",
            Self::Attrib => "attrib",
            Self::CloseWrite => "close_write",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Move => "move",
        }
    }
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown event kind '{}'", s.trim()))
    }
}

/// Set of event kinds a path watcher reacts to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMask {
    kinds: Vec<WatchEventKind>,
}

impl EventMask {
    pub fn new(kinds: impl IntoIterator<Item = WatchEventKind>) -> Self {
        let mut mask = Self::default();
        for kind in kinds {
            mask.insert(kind);
        }
        mask
    }

    /// Parse a comma-separated list such as `"attrib,modify"`.
    pub fn parse(list: &str) -> Result<Self, String> {
        let kinds = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(WatchEventKind::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if kinds.is_empty() {
            return Err("event list is empty".to_string());
        }
        Ok(Self::new(kinds))
    }

    pub fn insert(&mut self, kind: WatchEventKind) {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
    }

    pub fn contains(&self, kind: WatchEventKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kinds(&self) -> &[WatchEventKind] {
        &self.kinds
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.kinds.iter().map(|k| k.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// One firing of a trigger source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// A matching change under a watched root
    Path {
        root: PathBuf,
        kind: WatchEventKind,
        name: String,
    },
    /// A poll interval elapsed
    Tick { at: DateTime<Utc> },
}

impl TriggerEvent {
    pub fn is_tick(&self) -> bool {
        matches!(self, Self::Tick { .. })
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { root, kind, name } => {
                write!(f, "{} {} {}", root.display(), kind, name)
            }
            Self::Tick { at } => write!(f, "tick at {}", at.format("%H:%M:%S")),
        }
    }
}
