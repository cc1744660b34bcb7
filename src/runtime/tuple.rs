use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::invocable::Invocable;
use crate::runtime::value::Value;
use std::fmt;

/// An immutable, zero-indexed, ordered sequence of values. Insertion order
/// is significant and duplicates are permitted. Every mutator-shaped
/// operation returns a new tuple; the original is never changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tuple {
    items: Vec<Value>,
}

impl Tuple {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    /// A tuple with `length` copies of `value`.
    pub fn fill(value: Value, length: usize) -> Self {
        Self {
            items: vec![value; length],
        }
    }

    pub fn get(&self, index: i64) -> RuntimeResult<Value> {
        self.check_index(index, self.items.len() as i64)?;
        Ok(self.items[index as usize].clone())
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, element: &Value) -> bool {
        self.items.contains(element)
    }

    /// Index of the first element equal to `element`, or -1 if absent.
    pub fn indexof(&self, element: &Value) -> i64 {
        self.items
            .iter()
            .position(|item| item == element)
            .map(|i| i as i64)
            .unwrap_or(-1)
    }

    pub fn append(&self, element: Value) -> Tuple {
        let mut items = self.items.clone();
        items.push(element);
        Tuple::new(items)
    }

    pub fn prepend(&self, element: Value) -> Tuple {
        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.push(element);
        items.extend(self.items.iter().cloned());
        Tuple::new(items)
    }

    /// Inserts at `index`, shifting elements at and after it. `index` may
    /// equal `size()`.
    pub fn insert(&self, index: i64, element: Value) -> RuntimeResult<Tuple> {
        self.check_index(index, self.items.len() as i64 + 1)?;
        let mut items = self.items.clone();
        items.insert(index as usize, element);
        Ok(Tuple::new(items))
    }

    pub fn set(&self, index: i64, element: Value) -> RuntimeResult<Tuple> {
        self.check_index(index, self.items.len() as i64)?;
        let mut items = self.items.clone();
        items[index as usize] = element;
        Ok(Tuple::new(items))
    }

    /// The first `count` elements. Equivalent to `sub_tuple(0, count)`.
    pub fn sub_tuple_start(&self, count: i64) -> RuntimeResult<Tuple> {
        self.sub_tuple(0, count)
    }

    /// The elements from `start` to the end. Equivalent to
    /// `sub_tuple(start, size())`.
    pub fn sub_tuple_end(&self, start: i64) -> RuntimeResult<Tuple> {
        self.sub_tuple(start, self.items.len() as i64)
    }

    /// Elements in the half-open range `[start, end)`.
    pub fn sub_tuple(&self, start: i64, end: i64) -> RuntimeResult<Tuple> {
        let size = self.items.len() as i64;
        if start < 0 || end < start || end > size {
            return Err(RuntimeError::IndexOutOfBounds {
                index: if start < 0 { start } else { end },
                size: self.items.len(),
            });
        }
        Ok(Tuple::new(
            self.items[start as usize..end as usize].to_vec(),
        ))
    }

    /// Concatenation: the elements of `other` after the elements of `self`.
    pub fn merge_after(&self, other: &Tuple) -> Tuple {
        let mut items = self.items.clone();
        items.extend(other.items.iter().cloned());
        Tuple::new(items)
    }

    /// Set union on element equality; duplicates are collapsed.
    pub fn union(&self, other: &Tuple) -> Tuple {
        let mut items: Vec<Value> = Vec::new();
        for item in self.items.iter().chain(other.items.iter()) {
            if !items.contains(item) {
                items.push(item.clone());
            }
        }
        Tuple::new(items)
    }

    /// Set intersection on element equality; duplicates are collapsed.
    pub fn intersection(&self, other: &Tuple) -> Tuple {
        let mut items: Vec<Value> = Vec::new();
        for item in &self.items {
            if other.contains(item) && !items.contains(item) {
                items.push(item.clone());
            }
        }
        Tuple::new(items)
    }

    /// Set subtraction: the distinct elements of `self` not in `other`.
    pub fn subtract(&self, other: &Tuple) -> Tuple {
        let mut items: Vec<Value> = Vec::new();
        for item in &self.items {
            if !other.contains(item) && !items.contains(item) {
                items.push(item.clone());
            }
        }
        Tuple::new(items)
    }

    /// For every element that is itself a tuple, substitutes its element at
    /// `index`; other elements pass through unchanged.
    /// `[[1,2],3,[4,5],6].unwrap(1) == [2,3,5,6]`.
    pub fn unwrap(&self, index: i64) -> RuntimeResult<Tuple> {
        let mut items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match item {
                Value::Tuple(inner) => items.push(inner.get(index)?),
                other => items.push(other.clone()),
            }
        }
        Ok(Tuple::new(items))
    }

    /// Pairs elements of `t1` and `t2` through `fun`; the unmatched tail of
    /// the longer tuple is carried over unchanged.
    pub fn pair_operation(
        ctx: &mut ExecutionContext,
        t1: &Tuple,
        t2: &Tuple,
        fun: &Invocable,
    ) -> RuntimeResult<Tuple> {
        let (longer, min) = if t1.size() >= t2.size() {
            (t1, t2.size())
        } else {
            (t2, t1.size())
        };
        let mut items = Vec::with_capacity(longer.size());
        for i in 0..longer.size() {
            if i < min {
                let args = [t1.items[i].clone(), t2.items[i].clone()];
                items.push(fun.invoke(ctx, &args)?);
            } else {
                items.push(longer.items[i].clone());
            }
        }
        Ok(Tuple::new(items))
    }

    /// Order-preserving element-wise application of `fun`.
    pub fn map(&self, ctx: &mut ExecutionContext, fun: &Invocable) -> RuntimeResult<Tuple> {
        let mut items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            items.push(fun.invoke(ctx, &[item.clone()])?);
        }
        Ok(Tuple::new(items))
    }

    /// Keeps the elements for which `predicate` returns true.
    pub fn filter(
        &self,
        ctx: &mut ExecutionContext,
        predicate: &Invocable,
    ) -> RuntimeResult<Tuple> {
        let mut items = Vec::new();
        for item in &self.items {
            match predicate.invoke(ctx, &[item.clone()])? {
                Value::Bool(true) => items.push(item.clone()),
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
        Ok(Tuple::new(items))
    }

    /// Left-to-right fold; returns `default` if the tuple is empty.
    pub fn reduce(
        &self,
        ctx: &mut ExecutionContext,
        default: Value,
        fun: &Invocable,
    ) -> RuntimeResult<Value> {
        let mut iter = self.items.iter();
        let mut acc = match iter.next() {
            Some(first) => first.clone(),
            None => return Ok(default),
        };
        for item in iter {
            let args = [acc, item.clone()];
            acc = fun.invoke(ctx, &args)?;
        }
        Ok(acc)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    fn check_index(&self, index: i64, limit: i64) -> RuntimeResult<()> {
        if index < 0 || index >= limit {
            Err(RuntimeError::IndexOutOfBounds {
                index,
                size: self.items.len(),
            })
        } else {
            Ok(())
        }
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Tuple::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, item) in self.items.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        write!(f, "]")
    }
}
