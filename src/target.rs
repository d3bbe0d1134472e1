// src/target.rs

//! Task output targets.
//!
//! A [`Target`] is the handle to where a task's result lives, plus the
//! existence check the scheduler uses to decide whether the task needs
//! to run at all. The kinds:
//!
//! - [`LocalTarget`]: file-backed, with an atomic-write contract
//! - [`MemoryTarget`]: an in-process value slot, never "done"
//! - [`ExternalTarget`]: a pre-existing output produced outside this run
//! - [`NoTarget`]: no output; for side-effect-only tasks
//!
//! A target is owned by the task that produces it and referenced through
//! [`TargetRef`] by the dependents that consume it as input.

use std::any::Any;
use std::fmt;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;
use uuid::Uuid;

use crate::bundle::{self, Bundle};
use crate::errors::TargetError;
use crate::impl_bundle;

/// A task output and its existence check.
pub trait Target: Bundle {
    fn exists(&self) -> bool;
}

/// Shared handle to a target with value equality.
#[derive(Clone)]
pub struct TargetRef(Arc<dyn Target>);

impl TargetRef {
    pub fn new<T: Target>(target: T) -> Self {
        Self(Arc::new(target))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    pub fn as_target(&self) -> &dyn Target {
        self.0.as_ref()
    }

    pub fn downcast_ref<T: Target>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl PartialEq for TargetRef {
    fn eq(&self, other: &Self) -> bool {
        let other: &dyn Bundle = other.0.as_ref();
        self.0.eq_value(other)
    }
}

impl Eq for TargetRef {}

impl Hash for TargetRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_value(state);
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Serialize for TargetRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let target: &dyn Bundle = self.0.as_ref();
        let value = bundle::encode(target).map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TargetRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        bundle::decode_target(&value).map_err(serde::de::Error::custom)
    }
}

/// Never exists; output of side-effect-only tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoTarget;

impl_bundle!(NoTarget);

impl Target for NoTarget {
    fn exists(&self) -> bool {
        false
    }
}

/// File-backed target.
///
/// Exists iff the file is present and `force` is unset; `force` compels
/// re-execution regardless of on-disk state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalTarget {
    path: PathBuf,
    #[serde(default)]
    force: bool,
}

impl_bundle!(LocalTarget);

impl LocalTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            force: false,
        }
    }

    /// A target that always reports missing, forcing re-execution.
    pub fn forced(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            force: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open_read(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    pub fn read_to_string(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }

    /// Begin an atomic write; see [`StagedWrite`].
    ///
    /// Parent directories are created as needed.
    pub fn stage(&self) -> io::Result<StagedWrite> {
        let id = Uuid::new_v4();
        let tmp = path_with_suffix(&self.path, &format!("-TMP-{id}"));
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&tmp)?;
        Ok(StagedWrite {
            file: Some(file),
            tmp,
            dest: self.path.clone(),
            id,
            committed: false,
        })
    }

    /// Write the full contents atomically.
    pub fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let mut staged = self.stage()?;
        staged.write_all(bytes)?;
        staged.commit()
    }
}

impl Target for LocalTarget {
    fn exists(&self) -> bool {
        self.path.exists() && !self.force
    }
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// In-progress atomic write to a [`LocalTarget`].
///
/// Bytes go to a uniquely-named `<path>-TMP-<id>` sibling; [`commit`]
/// renames it into place. A guard dropped without committing renames the
/// temporary to `<path>-FAILED-<id>` instead of deleting it, preserving
/// the partial output for inspection.
///
/// [`commit`]: StagedWrite::commit
#[derive(Debug)]
pub struct StagedWrite {
    file: Option<File>,
    tmp: PathBuf,
    dest: PathBuf,
    id: Uuid,
    committed: bool,
}

impl StagedWrite {
    /// Path of the temporary file, for tasks that hand the write to an
    /// external process.
    pub fn path(&self) -> &Path {
        &self.tmp
    }

    /// Rename the temporary into its final place.
    pub fn commit(mut self) -> io::Result<()> {
        drop(self.file.take());
        fs::rename(&self.tmp, &self.dest)?;
        self.committed = true;
        Ok(())
    }
}

impl Write for StagedWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("staged write already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        if self.tmp.exists() {
            let failed = path_with_suffix(&self.dest, &format!("-FAILED-{}", self.id));
            if let Err(err) = fs::rename(&self.tmp, &failed) {
                warn!(
                    tmp = %self.tmp.display(),
                    error = %err,
                    "could not preserve aborted write"
                );
            }
        }
    }
}

#[derive(Default)]
enum Slot {
    #[default]
    Unset,
    Set(Arc<dyn Any + Send + Sync>),
    Deleted,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Slot::Unset => "unset",
            Slot::Set(_) => "set",
            Slot::Deleted => "deleted",
        };
        f.write_str(state)
    }
}

/// In-memory value slot.
///
/// Never reports existing, so the producing task always runs. The slot
/// starts unset, holds one value once set, and is deleted by cleanup so
/// the value can be released while the rest of the run is still in
/// flight. Structural equality deliberately ignores the slot contents:
/// the slot is runtime state, not task identity.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct MemoryTarget {
    #[serde(skip)]
    slot: Arc<Mutex<Slot>>,
}

impl_bundle!(MemoryTarget);

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a value. Fails if a value is already held.
    pub fn set<V: Any + Send + Sync>(&self, value: V) -> Result<(), TargetError> {
        let mut slot = self.lock();
        match *slot {
            Slot::Unset | Slot::Deleted => {
                *slot = Slot::Set(Arc::new(value));
                Ok(())
            }
            Slot::Set(_) => Err(TargetError::AlreadySet),
        }
    }

    /// Fetch the held value.
    pub fn get<V: Any + Send + Sync>(&self) -> Result<Arc<V>, TargetError> {
        match &*self.lock() {
            Slot::Set(value) => Arc::clone(value)
                .downcast::<V>()
                .map_err(|_| TargetError::WrongType),
            Slot::Unset => Err(TargetError::Unset),
            Slot::Deleted => Err(TargetError::Deleted),
        }
    }

    /// Drop the held value, releasing it.
    pub fn delete(&self) -> Result<(), TargetError> {
        let mut slot = self.lock();
        match *slot {
            Slot::Set(_) => {
                *slot = Slot::Deleted;
                Ok(())
            }
            Slot::Unset => Err(TargetError::Unset),
            Slot::Deleted => Err(TargetError::Deleted),
        }
    }
}

impl fmt::Debug for MemoryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryTarget({:?})", *self.lock())
    }
}

impl PartialEq for MemoryTarget {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for MemoryTarget {}

impl Hash for MemoryTarget {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl Target for MemoryTarget {
    fn exists(&self) -> bool {
        false
    }
}

/// A target produced outside this run.
///
/// A missing underlying target is a configuration error, not a
/// schedulable failure: `exists` asserts, so the problem surfaces while
/// the graph is being built rather than mid-run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalTarget {
    inner: TargetRef,
}

impl_bundle!(ExternalTarget);

impl ExternalTarget {
    pub fn new(inner: TargetRef) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &TargetRef {
        &self.inner
    }
}

impl Target for ExternalTarget {
    fn exists(&self) -> bool {
        assert!(
            self.inner.exists(),
            "external target missing: {:?}",
            self.inner
        );
        true
    }
}
