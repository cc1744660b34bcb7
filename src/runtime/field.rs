use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::invocable::Invocable;
use crate::runtime::value::{DeviceId, Value, ValueType};
use indexmap::IndexMap;
use std::fmt;

/// An immutable mapping from neighbor identity to value: "this value, as
/// seen by each neighbor, including self". Every field built through
/// [`Field::build`] contains an entry for the local device; fields produced
/// by `filter` or by lifting may lose it.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    entries: IndexMap<DeviceId, Value>,
}

impl Field {
    /// Builds a field guaranteed to hold the local device's entry. Neighbor
    /// entries carrying the local id are ignored in favor of `local_value`.
    pub fn build(
        local: DeviceId,
        local_value: Value,
        neighbors: impl IntoIterator<Item = (DeviceId, Value)>,
    ) -> Self {
        let mut entries = IndexMap::new();
        entries.insert(local, local_value);
        for (id, value) in neighbors {
            if id != local {
                entries.insert(id, value);
            }
        }
        Self { entries }
    }

    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub(crate) fn from_entries(entries: IndexMap<DeviceId, Value>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: DeviceId) -> Option<&Value> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &Value)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry for the evaluating device itself, if present.
    pub fn local_value(&self, ctx: &ExecutionContext) -> Option<&Value> {
        self.entries.get(&ctx.device_id())
    }

    /// The runtime type of the first entry doubles as the field's element
    /// type for operation resolution.
    pub(crate) fn element_type(&self) -> Option<ValueType> {
        self.entries.values().next().map(Value::value_type)
    }

    /// Applies `fun` to every per-identity value; the result has the same
    /// identity set as the input.
    pub fn map(&self, ctx: &mut ExecutionContext, fun: &Invocable) -> RuntimeResult<Field> {
        let mut entries = IndexMap::with_capacity(self.entries.len());
        for (id, value) in &self.entries {
            entries.insert(*id, fun.invoke(ctx, &[value.clone()])?);
        }
        Ok(Field::from_entries(entries))
    }

    /// Restricts the field to identities whose value satisfies `predicate`.
    pub fn filter(
        &self,
        ctx: &mut ExecutionContext,
        predicate: &Invocable,
    ) -> RuntimeResult<Field> {
        let mut entries = IndexMap::new();
        for (id, value) in &self.entries {
            match predicate.invoke(ctx, &[value.clone()])? {
                Value::Bool(true) => {
                    entries.insert(*id, value.clone());
                }
                Value::Bool(false) => {}
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        message: format!(
                            "filter predicate returned {} instead of a bool",
                            other.type_name()
                        ),
                    })
                }
            }
        }
        Ok(Field::from_entries(entries))
    }

    /// Folds all per-identity values into one; returns `default` if the
    /// field is empty. The combination order over identities is
    /// unspecified: the combiner must be associative and commutative for a
    /// deterministic result.
    pub fn reduce(
        &self,
        ctx: &mut ExecutionContext,
        default: Value,
        fun: &Invocable,
    ) -> RuntimeResult<Value> {
        let mut iter = self.entries.values();
        let mut acc = match iter.next() {
            Some(first) => first.clone(),
            None => return Ok(default),
        };
        for value in iter {
            let args = [acc, value.clone()];
            acc = fun.invoke(ctx, &args)?;
        }
        Ok(acc)
    }

    /// The identities present in every given field, in the first field's
    /// order. An empty intersection is a valid outcome, not a fault.
    pub(crate) fn aligned_ids(fields: &[&Field]) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = match fields.first() {
            Some(first) => first.ids().collect(),
            None => Vec::new(),
        };
        ids.retain(|id| fields.iter().all(|field| field.contains(*id)));
        ids
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (id, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}: {value}")?;
        }
        write!(f, "}}")
    }
}
