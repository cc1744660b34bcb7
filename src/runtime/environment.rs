use crate::runtime::value::Value;
use std::collections::HashMap;

/// The persistent variable store backing cross-round local state. The
/// driver brackets every round with `setup` and `commit`.
pub trait ExecutionEnvironment {
    fn has(&self, id: &str) -> bool;

    fn get(&self, id: &str) -> Option<Value>;

    fn get_or(&self, id: &str, default: Value) -> Value {
        self.get(id).unwrap_or(default)
    }

    /// Stores a value, returning true if a previous value was replaced.
    fn put(&mut self, id: &str, value: Value) -> bool;

    fn remove(&mut self, id: &str) -> Option<Value>;

    /// Called just before a round is evaluated.
    fn setup(&mut self) {}

    /// Called just after a round completes, to finalize persisted state.
    /// Not called when the round aborts.
    fn commit(&mut self) {}
}

/// In-memory environment with no commit semantics beyond keeping the map.
#[derive(Clone, Debug, Default)]
pub struct SimpleEnvironment {
    variables: HashMap<String, Value>,
}

impl SimpleEnvironment {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionEnvironment for SimpleEnvironment {
    fn has(&self, id: &str) -> bool {
        self.variables.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<Value> {
        self.variables.get(id).cloned()
    }

    fn put(&mut self, id: &str, value: Value) -> bool {
        self.variables.insert(id.to_string(), value).is_some()
    }

    fn remove(&mut self, id: &str) -> Option<Value> {
        self.variables.remove(id)
    }
}
