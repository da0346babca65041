//! Fault kinds, fault slots and traceback formatting
//!
//! A role process that dies with a fault records `{exception_kind, traceback}`
//! in its [`FaultSlot`] before exiting nonzero. Kind names travel as plain
//! strings (in the slot and in crash notifications) and are resolved against
//! the closed [`FaultKind`] registry; names the registry does not know become
//! [`FaultKind::UnknownPropagated`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Bumped whenever a kind is added or renamed
pub const FAULT_REGISTRY_VERSION: u32 = 1;

/// Traceback reported when a crashed process left none
pub const NO_TRACEBACK: &str = "No traceback reported";

/// Closed registry of fault kinds a run can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    ValueError,
    TypeError,
    KeyError,
    IndexError,
    IoError,
    RuntimeError,
    Panic,
    QueueError,
    ConfigError,
    Interrupted,
    UnknownPropagated,
}

impl FaultKind {
    pub const ALL: [FaultKind; 11] = [
        FaultKind::ValueError,
        FaultKind::TypeError,
        FaultKind::KeyError,
        FaultKind::IndexError,
        FaultKind::IoError,
        FaultKind::RuntimeError,
        FaultKind::Panic,
        FaultKind::QueueError,
        FaultKind::ConfigError,
        FaultKind::Interrupted,
        FaultKind::UnknownPropagated,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FaultKind::ValueError => "ValueError",
            FaultKind::TypeError => "TypeError",
            FaultKind::KeyError => "KeyError",
            FaultKind::IndexError => "IndexError",
            FaultKind::IoError => "IoError",
            FaultKind::RuntimeError => "RuntimeError",
            FaultKind::Panic => "Panic",
            FaultKind::QueueError => "QueueError",
            FaultKind::ConfigError => "ConfigError",
            FaultKind::Interrupted => "Interrupted",
            FaultKind::UnknownPropagated => "UnknownPropagatedException",
        }
    }

    /// Exact registry lookup
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Registry lookup that never fails
    pub fn resolve(name: &str) -> Self {
        Self::lookup(name).unwrap_or(FaultKind::UnknownPropagated)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure an engine raises on purpose, carrying the kind name to report
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: String,
    pub message: String,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn of(kind: FaultKind, message: impl Into<String>) -> Self {
        Self::new(kind.name(), message)
    }
}

/// What a crashed process leaves behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub exception_kind: String,
    pub traceback: String,
    /// Registry the writer resolved kinds against; 0 when it did not say
    #[serde(default)]
    pub registry_version: u32,
}

impl FaultRecord {
    pub fn new(exception_kind: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            exception_kind: exception_kind.into(),
            traceback: traceback.into(),
            registry_version: FAULT_REGISTRY_VERSION,
        }
    }
}

/// Write-once file a role process records its fault in
///
/// The supervisor picks the path before launch; the file only comes into
/// existence when the child records a fault. A second `record` fails instead
/// of overwriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultSlot {
    path: PathBuf,
}

impl FaultSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the fault and flush it to disk
    pub fn record(&self, record: &FaultRecord) -> io::Result<()> {
        let body = serde_json::to_vec(record)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(&body)?;
        file.sync_all()
    }

    /// The recorded fault, `None` if nothing (readable) was recorded
    pub fn read(&self) -> Option<FaultRecord> {
        let body = match std::fs::read(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(slot = %self.path.display(), error = %e, "unreadable fault slot");
                return None;
            }
        };

        match serde_json::from_slice(&body) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(slot = %self.path.display(), error = %e, "corrupt fault slot");
                None
            }
        }
    }

    /// Resolved kind and traceback of a crashed process
    pub fn resolve(&self) -> (FaultKind, String) {
        match self.read() {
            Some(record) => {
                let kind = FaultKind::resolve(&record.exception_kind);
                if kind == FaultKind::UnknownPropagated
                    && record.registry_version != FAULT_REGISTRY_VERSION
                {
                    warn!(
                        slot = %self.path.display(),
                        exception_kind = %record.exception_kind,
                        theirs = record.registry_version,
                        ours = FAULT_REGISTRY_VERSION,
                        "fault kind from a different registry version"
                    );
                }
                (kind, record.traceback)
            }
            None => (FaultKind::UnknownPropagated, NO_TRACEBACK.to_string()),
        }
    }
}

/// Indent every continuation line of a traceback with two tabs
pub fn format_exception_dump(traceback: &str) -> String {
    traceback
        .split_inclusive('\n')
        .collect::<Vec<_>>()
        .join("\t\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names_are_unique_and_resolvable() {
        for kind in FaultKind::ALL {
            assert_eq!(FaultKind::lookup(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_kind_falls_back() {
        assert_eq!(FaultKind::resolve("GremlinError"), FaultKind::UnknownPropagated);
        assert_eq!(FaultKind::resolve(""), FaultKind::UnknownPropagated);
        assert_eq!(FaultKind::resolve("__import__('os')"), FaultKind::UnknownPropagated);
        assert_eq!(FaultKind::resolve("ValueError"), FaultKind::ValueError);
    }

    #[test]
    fn test_slot_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FaultSlot::new(dir.path().join("worker-1.fault"));
        assert_eq!(slot.read(), None);

        slot.record(&FaultRecord::new("ValueError", "trace")).unwrap();
        let err = slot.record(&FaultRecord::new("KeyError", "other")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        assert_eq!(slot.resolve(), (FaultKind::ValueError, "trace".to_string()));
    }

    #[test]
    fn test_missing_or_corrupt_slot_resolves_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FaultSlot::new(dir.path().join("missing"));
        assert_eq!(
            missing.resolve(),
            (FaultKind::UnknownPropagated, NO_TRACEBACK.to_string())
        );

        let corrupt_path = dir.path().join("corrupt");
        std::fs::write(&corrupt_path, b"{not json").unwrap();
        assert_eq!(FaultSlot::new(corrupt_path).resolve().0, FaultKind::UnknownPropagated);
    }

    #[test]
    fn test_slot_carries_registry_version() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FaultSlot::new(dir.path().join("worker-2.fault"));
        slot.record(&FaultRecord::new("KeyError", "trace")).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(slot.path()).unwrap()).unwrap();
        assert_eq!(raw["registry_version"], FAULT_REGISTRY_VERSION);
        assert_eq!(slot.read().unwrap().registry_version, FAULT_REGISTRY_VERSION);
    }

    #[test]
    fn test_unversioned_and_newer_records_still_resolve() {
        let dir = tempfile::tempdir().unwrap();

        let bare = dir.path().join("bare");
        std::fs::write(&bare, br#"{"exception_kind":"IndexError","traceback":"t"}"#).unwrap();
        let bare = FaultSlot::new(bare);
        assert_eq!(bare.read().unwrap().registry_version, 0);
        assert_eq!(bare.resolve(), (FaultKind::IndexError, "t".to_string()));

        let newer = dir.path().join("newer");
        let body = serde_json::json!({
            "exception_kind": "TimeoutError",
            "traceback": "t",
            "registry_version": FAULT_REGISTRY_VERSION + 1,
        });
        std::fs::write(&newer, body.to_string()).unwrap();
        assert_eq!(FaultSlot::new(newer).resolve().0, FaultKind::UnknownPropagated);
    }

    #[test]
    fn test_format_exception_dump() {
        assert_eq!(format_exception_dump("one line"), "one line");
        assert_eq!(format_exception_dump("a\nb\nc"), "a\n\t\tb\n\t\tc");
        assert_eq!(format_exception_dump(""), "");
    }

    #[test]
    fn test_fault_display() {
        let fault = Fault::of(FaultKind::ValueError, "bad payload");
        assert_eq!(fault.to_string(), "ValueError: bad payload");
    }
}
