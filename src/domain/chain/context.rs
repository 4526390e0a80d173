//! Execution context shared by every link of a run
//!
//! The context is a JSON object store plus an optional cancellation signal.
//! Clones are handles to the same state; only one link mutates it at a time,
//! so the internal locks are held for the duration of a single accessor call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::ChainError;

#[derive(Debug)]
struct ContextState {
    id: Uuid,
    values: Mutex<Map<String, Value>>,
    cancellation: Mutex<Option<ChainError>>,
}

/// Mutable state shared by all links within one run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    state: Arc<ContextState>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::with_values(Map::new())
    }

    /// Create a context seeded with the given values
    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            state: Arc::new(ContextState {
                id: Uuid::new_v4(),
                values: Mutex::new(values),
                cancellation: Mutex::new(None),
            }),
        }
    }

    /// Create a context from a JSON value; non-object values are stored under `value`
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self::with_values(values),
            other => {
                let mut values = Map::new();
                values.insert("value".to_string(), other);
                Self::with_values(values)
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Whether both handles point at the same context
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    /// Get a value deserialized into `T`; `None` when missing or of another shape
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    /// Set a value, returning the previous one
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values().remove(key)
    }

    /// Push a value onto the array stored under `key`
    ///
    /// A missing key starts a new array; a non-array value is wrapped as the
    /// first element.
    pub fn append(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut values = self.values();
        let slot = values
            .entry(key.into())
            .or_insert_with(|| Value::Array(Vec::new()));

        if !slot.is_array() {
            let previous = slot.take();
            *slot = Value::Array(vec![previous]);
        }

        if let Value::Array(items) = slot {
            items.push(value.into());
        }
    }

    /// Run a closure with mutable access to the whole store
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.values())
    }

    /// Copy of the stored values as a JSON object
    pub fn snapshot(&self) -> Value {
        Value::Object(self.values().clone())
    }

    /// Request cancellation of the run using this context
    ///
    /// The engine observes the signal before its next dispatch. The first
    /// request wins; returns `false` when a signal was already set.
    pub fn cancel(&self, signal: impl Into<ChainError>) -> bool {
        let mut cancellation = self.signal();
        if cancellation.is_some() {
            return false;
        }
        *cancellation = Some(signal.into());
        true
    }

    pub fn cancellation(&self) -> Option<ChainError> {
        self.signal().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_some()
    }

    /// Remove the cancellation signal, returning it
    pub fn clear_cancellation(&self) -> Option<ChainError> {
        self.signal().take()
    }

    fn values(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.state
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self) -> MutexGuard<'_, Option<ChainError>> {
        self.state
            .cancellation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
