// src/bundle.rs

//! Structural value identity and tagged serialization.
//!
//! Tasks and targets are plain value types: equality and hashing are
//! derived purely from their field values, which is what lets the graph
//! deduplicate nodes and lets identities travel across a process
//! boundary. [`Bundle`] is the dyn-safe face of that: trait objects can
//! be compared, hashed, and encoded without knowing the concrete type.
//!
//! The wire form is a single-key tagged object,
//! `{ "<fully-qualified type name>": { field: value, ... } }`, nested
//! recursively for bundle-valued fields. Decoding resolves the tag
//! through an explicit registry: call [`register_task`] /
//! [`register_target`] for every concrete type that needs to cross the
//! boundary, then [`decode_task`] / [`decode_target`] reconstruct refs.
//!
//! Implement [`Bundle`] for a concrete type with [`impl_bundle!`]; the
//! type only needs `Debug + PartialEq + Hash + Serialize`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::BundleError;
use crate::target::{Target, TargetRef};
use crate::task::{Task, TaskRef};

/// Alias for the encoded field map; referenced by [`impl_bundle!`].
pub type EncodedValue = Value;

/// Dyn-safe structural value identity.
///
/// Two bundles are equal iff they have the same concrete type and equal
/// fields; the hash incorporates the type tag so distinct types with
/// identical fields do not collide systematically.
pub trait Bundle: fmt::Debug + Send + Sync + 'static {
    /// Fully-qualified type name, used as the serialization tag.
    fn type_tag(&self) -> &'static str;

    /// Downcast support for [`eq_value`](Bundle::eq_value) and
    /// [`TaskRef::downcast_ref`](crate::task::TaskRef::downcast_ref).
    fn as_any(&self) -> &dyn Any;

    /// Structural equality across trait objects.
    fn eq_value(&self, other: &dyn Bundle) -> bool;

    /// Structural hash, consistent with [`eq_value`](Bundle::eq_value).
    fn hash_value(&self, state: &mut dyn Hasher);

    /// Encode the field map (without the outer tag).
    fn encode_fields(&self) -> Result<EncodedValue, BundleError>;
}

/// Helper for [`impl_bundle!`]: equality via downcast.
pub fn bundle_eq<T>(this: &T, other: &dyn Bundle) -> bool
where
    T: Bundle + PartialEq,
{
    other.as_any().downcast_ref::<T>().is_some_and(|o| this == o)
}

/// Helper for [`impl_bundle!`]: hash the type tag, then the fields.
pub fn bundle_hash<T>(this: &T, mut state: &mut dyn Hasher)
where
    T: Bundle + Hash,
{
    this.type_tag().hash(&mut state);
    this.hash(&mut state);
}

/// Helper for [`impl_bundle!`]: field map via the type's `Serialize`.
pub fn encode_fields_of<T: Serialize>(value: &T) -> Result<EncodedValue, BundleError> {
    Ok(serde_json::to_value(value)?)
}

/// Implement [`Bundle`] for a value type.
///
/// The type must be `Debug + PartialEq + Hash + Serialize`.
#[macro_export]
macro_rules! impl_bundle {
    ($ty:ty) => {
        impl $crate::bundle::Bundle for $ty {
            fn type_tag(&self) -> &'static str {
                ::std::any::type_name::<Self>()
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn eq_value(&self, other: &dyn $crate::bundle::Bundle) -> bool {
                $crate::bundle::bundle_eq(self, other)
            }

            fn hash_value(&self, state: &mut dyn ::std::hash::Hasher) {
                $crate::bundle::bundle_hash(self, state)
            }

            fn encode_fields(
                &self,
            ) -> ::std::result::Result<
                $crate::bundle::EncodedValue,
                $crate::errors::BundleError,
            > {
                $crate::bundle::encode_fields_of(self)
            }
        }
    };
}

/// Encode a bundle as its single-key tagged form.
pub fn encode(bundle: &dyn Bundle) -> Result<Value, BundleError> {
    let mut map = Map::with_capacity(1);
    map.insert(bundle.type_tag().to_owned(), bundle.encode_fields()?);
    Ok(Value::Object(map))
}

/// Encode a bundle as a tagged JSON string.
pub fn to_json(bundle: &dyn Bundle) -> Result<String, BundleError> {
    Ok(serde_json::to_string(&encode(bundle)?)?)
}

type TaskDecoder = fn(Value) -> Result<TaskRef, BundleError>;
type TargetDecoder = fn(Value) -> Result<TargetRef, BundleError>;

static TASK_DECODERS: LazyLock<RwLock<HashMap<&'static str, TaskDecoder>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
static TARGET_DECODERS: LazyLock<RwLock<HashMap<&'static str, TargetDecoder>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Register a task type for decoding. Idempotent.
pub fn register_task<T>()
where
    T: Task + DeserializeOwned,
{
    fn decode<T: Task + DeserializeOwned>(fields: Value) -> Result<TaskRef, BundleError> {
        Ok(TaskRef::new(serde_json::from_value::<T>(fields)?))
    }
    write_lock(&TASK_DECODERS).insert(std::any::type_name::<T>(), decode::<T>);
}

/// Register a target type for decoding. Idempotent.
pub fn register_target<T>()
where
    T: Target + DeserializeOwned,
{
    fn decode<T: Target + DeserializeOwned>(fields: Value) -> Result<TargetRef, BundleError> {
        Ok(TargetRef::new(serde_json::from_value::<T>(fields)?))
    }
    write_lock(&TARGET_DECODERS).insert(std::any::type_name::<T>(), decode::<T>);
}

/// Split a tagged value into its type tag and field map.
fn split_tagged(value: &Value) -> Result<(&str, &Value), BundleError> {
    match value {
        Value::Object(map) if map.len() == 1 => {
            let (tag, fields) = map
                .iter()
                .next()
                .ok_or_else(|| BundleError::Malformed("empty object".to_owned()))?;
            Ok((tag.as_str(), fields))
        }
        other => Err(BundleError::Malformed(format!(
            "expected a single-key tagged object, got: {other}"
        ))),
    }
}

/// Decode a tagged value into a task through the registry.
pub fn decode_task(value: &Value) -> Result<TaskRef, BundleError> {
    let (tag, fields) = split_tagged(value)?;
    let decoder = read_lock(&TASK_DECODERS)
        .get(tag)
        .copied()
        .ok_or_else(|| BundleError::UnknownType(tag.to_owned()))?;
    decoder(fields.clone())
}

/// Decode a tagged value into a target through the registry.
pub fn decode_target(value: &Value) -> Result<TargetRef, BundleError> {
    let (tag, fields) = split_tagged(value)?;
    let decoder = read_lock(&TARGET_DECODERS)
        .get(tag)
        .copied()
        .ok_or_else(|| BundleError::UnknownType(tag.to_owned()))?;
    decoder(fields.clone())
}

/// Decode a task from its tagged JSON string form.
pub fn task_from_json(json: &str) -> Result<TaskRef, BundleError> {
    decode_task(&serde_json::from_str(json)?)
}

/// Decode a target from its tagged JSON string form.
pub fn target_from_json(json: &str) -> Result<TargetRef, BundleError> {
    decode_target(&serde_json::from_str(json)?)
}
