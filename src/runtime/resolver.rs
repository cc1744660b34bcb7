use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::field::Field;
use crate::runtime::invocable::Invocable;
use crate::runtime::tuple::Tuple;
use crate::runtime::value::{Value, ValueType};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

const CACHE_MAX_SIZE: usize = 1000;
const CACHE_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// What an operation accepts at one parameter position. Coercion is
/// defined only between the numeric representations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Any,
    Typed(ValueType),
}

impl ParamType {
    fn assignable_from(self, arg: ValueType) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Typed(expected) => expected == arg,
        }
    }

    fn coercible_from(self, arg: ValueType) -> bool {
        match self {
            ParamType::Any => false,
            ParamType::Typed(expected) => expected.is_numeric() && arg.is_numeric(),
        }
    }

    fn coerce(self, value: &Value) -> Value {
        match (self, value) {
            (ParamType::Typed(ValueType::Int), Value::Float(f)) => Value::Int(*f as i64),
            (ParamType::Typed(ValueType::Float), Value::Int(i)) => Value::Float(*i as f64),
            _ => value.clone(),
        }
    }
}

pub type OperationFn =
    Arc<dyn Fn(&mut ExecutionContext, &Value, &[Value]) -> RuntimeResult<Value> + Send + Sync>;

/// A host operation: a name, a parameter signature used for scoring, and
/// the native function invoked with the target as first operand.
#[derive(Clone)]
pub struct Operation {
    name: String,
    params: Vec<ParamType>,
    func: OperationFn,
}

impl Operation {
    pub fn new<F>(name: &str, params: Vec<ParamType>, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext, &Value, &[Value]) -> RuntimeResult<Value>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            params,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The operation table: (declaring type, name) to overload candidates.
#[derive(Default)]
pub struct OperationRegistry {
    ops: HashMap<(ValueType, String), Vec<Arc<Operation>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_numeric_operations(&mut registry);
        register_bool_operations(&mut registry);
        register_text_operations(&mut registry);
        register_tuple_operations(&mut registry);
        register_field_operations(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, target: ValueType, name: &str, params: Vec<ParamType>, func: F)
    where
        F: Fn(&mut ExecutionContext, &Value, &[Value]) -> RuntimeResult<Value>
            + Send
            + Sync
            + 'static,
    {
        self.ops
            .entry((target, name.to_string()))
            .or_default()
            .push(Arc::new(Operation::new(name, params, func)));
    }

    fn candidates(&self, target: ValueType, name: &str) -> &[Arc<Operation>] {
        self.ops
            .get(&(target, name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

static REGISTRY: Lazy<RwLock<OperationRegistry>> =
    Lazy::new(|| RwLock::new(OperationRegistry::with_builtins()));

/// Adds a host-provided operation to the process-wide registry. Cached
/// resolutions are discarded: a new overload may outscore one already
/// memoized for the same key.
pub fn register_operation<F>(target: ValueType, name: &str, params: Vec<ParamType>, func: F)
where
    F: Fn(&mut ExecutionContext, &Value, &[Value]) -> RuntimeResult<Value>
        + Send
        + Sync
        + 'static,
{
    REGISTRY.write().register(target, name, params, func);
    CACHE.lock().clear();
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    target: ValueType,
    name: String,
    signature: Vec<ValueType>,
}

struct CacheEntry {
    op: Arc<Operation>,
    last_access: Instant,
}

/// Bounded, access-expiring memoization of resolution. The key fully
/// determines the resolved operation for a given registry, so concurrent
/// insert-if-absent population cannot create an incorrect entry.
#[derive(Default)]
struct ResolutionCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ResolutionCache {
    fn get(&mut self, key: &CacheKey) -> Option<Arc<Operation>> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_access) < CACHE_EXPIRY => {
                entry.last_access = now;
                Some(entry.op.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn insert(&mut self, key: CacheKey, op: Arc<Operation>) {
        let now = Instant::now();
        if self.entries.len() >= CACHE_MAX_SIZE {
            self.entries
                .retain(|_, entry| now.duration_since(entry.last_access) < CACHE_EXPIRY);
        }
        if self.entries.len() >= CACHE_MAX_SIZE {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.entry(key).or_insert(CacheEntry {
            op,
            last_access: now,
        });
    }
}

static CACHE: Lazy<Mutex<ResolutionCache>> = Lazy::new(|| Mutex::new(ResolutionCache::default()));

fn signature_string(signature: &[ValueType]) -> String {
    signature
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn no_matching(target: ValueType, name: &str, signature: &[ValueType]) -> RuntimeError {
    RuntimeError::NoMatchingOperation {
        name: name.to_string(),
        target: target.name().to_string(),
        signature: signature_string(signature),
    }
}

/// Resolves `(type, name, signature)` to an operation through the
/// process-wide registry, memoizing the result.
pub fn resolve(
    target: ValueType,
    name: &str,
    signature: &[ValueType],
) -> RuntimeResult<Arc<Operation>> {
    let key = CacheKey {
        target,
        name: name.to_string(),
        signature: signature.to_vec(),
    };
    if let Some(op) = CACHE.lock().get(&key) {
        trace!(target: "fieldcalc::resolver", ty = %target, name, "resolution cache hit");
        return Ok(op);
    }
    let op = resolve_uncached(&REGISTRY.read(), target, name, signature)?;
    CACHE.lock().insert(key, op.clone());
    Ok(op)
}

fn resolve_uncached(
    registry: &OperationRegistry,
    target: ValueType,
    name: &str,
    signature: &[ValueType],
) -> RuntimeResult<Arc<Operation>> {
    let mut best: Option<(usize, Arc<Operation>)> = None;
    for op in registry.candidates(target, name) {
        if op.params.len() != signature.len() {
            continue;
        }
        let mut score = 0usize;
        let mut compatible = true;
        for (param, arg_type) in op.params.iter().zip(signature) {
            if param.assignable_from(*arg_type) {
                score += 1;
            } else if !param.coercible_from(*arg_type) {
                compatible = false;
                break;
            }
        }
        if !compatible {
            continue;
        }
        // Ties are broken arbitrarily and are not stable across resolutions.
        match &best {
            Some((best_score, _)) if *best_score >= score => {}
            _ => best = Some((score, op.clone())),
        }
    }
    trace!(target: "fieldcalc::resolver", ty = %target, name, found = best.is_some(), "resolved");
    best.map(|(_, op)| op)
        .ok_or_else(|| no_matching(target, name, signature))
}

/// The runtime-type signature used for resolution: Field operands count
/// as their element type, since lifting replaces them before invocation.
fn lifted_signature(args: &[Value]) -> Vec<ValueType> {
    args.iter()
        .map(|value| match value {
            Value::Field(field) => field.element_type().unwrap_or(ValueType::Field),
            other => other.value_type(),
        })
        .collect()
}

/// Full dot-dispatch: resolves `name` against the target's runtime value
/// and invokes it, lifting over Field operands where needed. A Field
/// target first tries the Field algebra itself; only when no field-level
/// operation matches is the call resolved against the element type and
/// lifted per identity.
pub fn resolve_and_invoke(
    ctx: &mut ExecutionContext,
    name: &str,
    target: &Value,
    args: &[Value],
) -> RuntimeResult<Value> {
    if let Value::Field(field) = target {
        let raw_signature: Vec<ValueType> = args.iter().map(Value::value_type).collect();
        if let Ok(op) = resolve(ValueType::Field, name, &raw_signature) {
            return invoke_direct(ctx, &op, target, args);
        }
        let element = match field.element_type() {
            Some(element) => element,
            None => return Err(no_matching(ValueType::Field, name, &raw_signature)),
        };
        let op = resolve(element, name, &lifted_signature(args))?;
        return invoke(ctx, &op, target, args);
    }
    let op = resolve(target.value_type(), name, &lifted_signature(args))?;
    invoke(ctx, &op, target, args)
}

/// Invokes a resolved operation, lifting element-wise when the target or
/// any argument is a Field.
pub fn invoke(
    ctx: &mut ExecutionContext,
    op: &Operation,
    target: &Value,
    args: &[Value],
) -> RuntimeResult<Value> {
    let any_field =
        matches!(target, Value::Field(_)) || args.iter().any(|a| matches!(a, Value::Field(_)));
    if any_field {
        invoke_lifted(ctx, op, target, args)
    } else {
        invoke_direct(ctx, op, target, args)
    }
}

fn invoke_direct(
    ctx: &mut ExecutionContext,
    op: &Operation,
    target: &Value,
    args: &[Value],
) -> RuntimeResult<Value> {
    match (op.func)(ctx, target, args) {
        Err(RuntimeError::TypeMismatch { .. }) => {
            // One retry with every numerically-incompatible argument cast
            // to its expected parameter type; a second failure is fatal.
            let coerced: Vec<Value> = op
                .params
                .iter()
                .zip(args)
                .map(|(param, arg)| param.coerce(arg))
                .collect();
            (op.func)(ctx, target, &coerced).map_err(|err| RuntimeError::CoercionFailure {
                name: op.name.clone(),
                message: err.to_string(),
            })
        }
        other => other,
    }
}

fn invoke_lifted(
    ctx: &mut ExecutionContext,
    op: &Operation,
    target: &Value,
    args: &[Value],
) -> RuntimeResult<Value> {
    let mut fields: Vec<&Field> = Vec::new();
    if let Value::Field(field) = target {
        fields.push(field);
    }
    for arg in args {
        if let Value::Field(field) = arg {
            fields.push(field);
        }
    }
    let ids = Field::aligned_ids(&fields);
    trace!(target: "fieldcalc::resolver", name = op.name.as_str(), aligned = ids.len(), "lifting");
    let mut entries = IndexMap::with_capacity(ids.len());
    for id in ids {
        let local_target = match target {
            Value::Field(field) => field.get(id).cloned().unwrap_or(Value::Absent),
            other => other.clone(),
        };
        let local_args: Vec<Value> = args
            .iter()
            .map(|arg| match arg {
                Value::Field(field) => field.get(id).cloned().unwrap_or(Value::Absent),
                other => other.clone(),
            })
            .collect();
        let value = invoke_direct(ctx, op, &local_target, &local_args)?;
        entries.insert(id, value);
    }
    Ok(Value::Field(Field::from_entries(entries)))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Absent)
}

fn expect_int(name: &str, value: &Value) -> RuntimeResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("{name} expects an int, got {}", other.type_name()),
        }),
    }
}

fn expect_float(name: &str, value: &Value) -> RuntimeResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("{name} expects a float, got {}", other.type_name()),
        }),
    }
}

fn expect_bool(name: &str, value: &Value) -> RuntimeResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("{name} expects a bool, got {}", other.type_name()),
        }),
    }
}

fn expect_text<'a>(name: &str, value: &'a Value) -> RuntimeResult<&'a str> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("{name} expects text, got {}", other.type_name()),
        }),
    }
}

fn expect_tuple<'a>(name: &str, value: &'a Value) -> RuntimeResult<&'a Tuple> {
    match value {
        Value::Tuple(t) => Ok(t),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("{name} expects a tuple, got {}", other.type_name()),
        }),
    }
}

fn expect_field<'a>(name: &str, value: &'a Value) -> RuntimeResult<&'a Field> {
    match value {
        Value::Field(f) => Ok(f),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("{name} expects a field, got {}", other.type_name()),
        }),
    }
}

fn expect_invocable(name: &str, value: &Value) -> RuntimeResult<Invocable> {
    Invocable::from_value(value).ok_or_else(|| RuntimeError::TypeMismatch {
        message: format!("{name} expects a callable, got {}", value.type_name()),
    })
}

fn register_numeric_operations(reg: &mut OperationRegistry) {
    use ValueType::{Float, Int};

    reg.register(Int, "add", vec![ParamType::Typed(Int)], |_, target, args| {
        Ok(Value::Int(
            expect_int("add", target)? + expect_int("add", &arg(args, 0))?,
        ))
    });
    reg.register(Int, "add", vec![ParamType::Typed(Float)], |_, target, args| {
        Ok(Value::Float(
            expect_int("add", target)? as f64 + expect_float("add", &arg(args, 0))?,
        ))
    });
    reg.register(Int, "max", vec![ParamType::Typed(Int)], |_, target, args| {
        Ok(Value::Int(
            expect_int("max", target)?.max(expect_int("max", &arg(args, 0))?),
        ))
    });
    reg.register(Int, "min", vec![ParamType::Typed(Int)], |_, target, args| {
        Ok(Value::Int(
            expect_int("min", target)?.min(expect_int("min", &arg(args, 0))?),
        ))
    });
    reg.register(Int, "abs", vec![], |_, target, _| {
        Ok(Value::Int(expect_int("abs", target)?.abs()))
    });

    reg.register(Float, "add", vec![ParamType::Typed(Float)], |_, target, args| {
        Ok(Value::Float(
            expect_float("add", target)? + expect_float("add", &arg(args, 0))?,
        ))
    });
    reg.register(Float, "add", vec![ParamType::Typed(Int)], |_, target, args| {
        Ok(Value::Float(
            expect_float("add", target)? + expect_int("add", &arg(args, 0))? as f64,
        ))
    });
    reg.register(Float, "max", vec![ParamType::Typed(Float)], |_, target, args| {
        Ok(Value::Float(
            expect_float("max", target)?.max(expect_float("max", &arg(args, 0))?),
        ))
    });
    reg.register(Float, "min", vec![ParamType::Typed(Float)], |_, target, args| {
        Ok(Value::Float(
            expect_float("min", target)?.min(expect_float("min", &arg(args, 0))?),
        ))
    });
    reg.register(Float, "abs", vec![], |_, target, _| {
        Ok(Value::Float(expect_float("abs", target)?.abs()))
    });
}

fn register_bool_operations(reg: &mut OperationRegistry) {
    use ValueType::Bool;

    reg.register(Bool, "and", vec![ParamType::Typed(Bool)], |_, target, args| {
        Ok(Value::Bool(
            expect_bool("and", target)? && expect_bool("and", &arg(args, 0))?,
        ))
    });
    reg.register(Bool, "or", vec![ParamType::Typed(Bool)], |_, target, args| {
        Ok(Value::Bool(
            expect_bool("or", target)? || expect_bool("or", &arg(args, 0))?,
        ))
    });
    reg.register(Bool, "not", vec![], |_, target, _| {
        Ok(Value::Bool(!expect_bool("not", target)?))
    });
}

fn register_text_operations(reg: &mut OperationRegistry) {
    use ValueType::Text;

    reg.register(Text, "length", vec![], |_, target, _| {
        Ok(Value::Int(expect_text("length", target)?.len() as i64))
    });
    reg.register(Text, "concat", vec![ParamType::Typed(Text)], |_, target, args| {
        let mut result = expect_text("concat", target)?.to_string();
        result.push_str(expect_text("concat", &arg(args, 0))?);
        Ok(Value::Text(result))
    });
}

fn register_tuple_operations(reg: &mut OperationRegistry) {
    use ValueType::{Callable, Int, Tuple as TupleType};

    reg.register(TupleType, "get", vec![ParamType::Typed(Int)], |_, target, args| {
        expect_tuple("get", target)?.get(expect_int("get", &arg(args, 0))?)
    });
    reg.register(TupleType, "size", vec![], |_, target, _| {
        Ok(Value::Int(expect_tuple("size", target)?.size() as i64))
    });
    reg.register(TupleType, "isEmpty", vec![], |_, target, _| {
        Ok(Value::Bool(expect_tuple("isEmpty", target)?.is_empty()))
    });
    reg.register(TupleType, "contains", vec![ParamType::Any], |_, target, args| {
        Ok(Value::Bool(
            expect_tuple("contains", target)?.contains(&arg(args, 0)),
        ))
    });
    reg.register(TupleType, "indexof", vec![ParamType::Any], |_, target, args| {
        Ok(Value::Int(
            expect_tuple("indexof", target)?.indexof(&arg(args, 0)),
        ))
    });
    reg.register(TupleType, "append", vec![ParamType::Any], |_, target, args| {
        Ok(Value::Tuple(
            expect_tuple("append", target)?.append(arg(args, 0)),
        ))
    });
    reg.register(TupleType, "prepend", vec![ParamType::Any], |_, target, args| {
        Ok(Value::Tuple(
            expect_tuple("prepend", target)?.prepend(arg(args, 0)),
        ))
    });
    reg.register(
        TupleType,
        "insert",
        vec![ParamType::Typed(Int), ParamType::Any],
        |_, target, args| {
            let tuple = expect_tuple("insert", target)?;
            Ok(Value::Tuple(
                tuple.insert(expect_int("insert", &arg(args, 0))?, arg(args, 1))?,
            ))
        },
    );
    reg.register(
        TupleType,
        "set",
        vec![ParamType::Typed(Int), ParamType::Any],
        |_, target, args| {
            let tuple = expect_tuple("set", target)?;
            Ok(Value::Tuple(
                tuple.set(expect_int("set", &arg(args, 0))?, arg(args, 1))?,
            ))
        },
    );
    reg.register(
        TupleType,
        "subTupleStart",
        vec![ParamType::Typed(Int)],
        |_, target, args| {
            let tuple = expect_tuple("subTupleStart", target)?;
            Ok(Value::Tuple(
                tuple.sub_tuple_start(expect_int("subTupleStart", &arg(args, 0))?)?,
            ))
        },
    );
    reg.register(
        TupleType,
        "subTupleEnd",
        vec![ParamType::Typed(Int)],
        |_, target, args| {
            let tuple = expect_tuple("subTupleEnd", target)?;
            Ok(Value::Tuple(
                tuple.sub_tuple_end(expect_int("subTupleEnd", &arg(args, 0))?)?,
            ))
        },
    );
    reg.register(
        TupleType,
        "subTuple",
        vec![ParamType::Typed(Int), ParamType::Typed(Int)],
        |_, target, args| {
            let tuple = expect_tuple("subTuple", target)?;
            Ok(Value::Tuple(tuple.sub_tuple(
                expect_int("subTuple", &arg(args, 0))?,
                expect_int("subTuple", &arg(args, 1))?,
            )?))
        },
    );
    reg.register(
        TupleType,
        "mergeAfter",
        vec![ParamType::Typed(TupleType)],
        |_, target, args| {
            let tuple = expect_tuple("mergeAfter", target)?;
            Ok(Value::Tuple(
                tuple.merge_after(expect_tuple("mergeAfter", &arg(args, 0))?),
            ))
        },
    );
    reg.register(
        TupleType,
        "union",
        vec![ParamType::Typed(TupleType)],
        |_, target, args| {
            let tuple = expect_tuple("union", target)?;
            Ok(Value::Tuple(tuple.union(expect_tuple("union", &arg(args, 0))?)))
        },
    );
    reg.register(
        TupleType,
        "intersection",
        vec![ParamType::Typed(TupleType)],
        |_, target, args| {
            let tuple = expect_tuple("intersection", target)?;
            Ok(Value::Tuple(
                tuple.intersection(expect_tuple("intersection", &arg(args, 0))?),
            ))
        },
    );
    reg.register(
        TupleType,
        "subtract",
        vec![ParamType::Typed(TupleType)],
        |_, target, args| {
            let tuple = expect_tuple("subtract", target)?;
            Ok(Value::Tuple(
                tuple.subtract(expect_tuple("subtract", &arg(args, 0))?),
            ))
        },
    );
    reg.register(TupleType, "unwrap", vec![ParamType::Typed(Int)], |_, target, args| {
        let tuple = expect_tuple("unwrap", target)?;
        Ok(Value::Tuple(tuple.unwrap(expect_int("unwrap", &arg(args, 0))?)?))
    });
    reg.register(
        TupleType,
        "pairOperation",
        vec![ParamType::Typed(TupleType), ParamType::Typed(Callable)],
        |ctx, target, args| {
            let t1 = expect_tuple("pairOperation", target)?;
            let other = arg(args, 0);
            let t2 = expect_tuple("pairOperation", &other)?;
            let fun = expect_invocable("pairOperation", &arg(args, 1))?;
            Ok(Value::Tuple(Tuple::pair_operation(ctx, t1, t2, &fun)?))
        },
    );
    reg.register(TupleType, "map", vec![ParamType::Typed(Callable)], |ctx, target, args| {
        let tuple = expect_tuple("map", target)?;
        let fun = expect_invocable("map", &arg(args, 0))?;
        Ok(Value::Tuple(tuple.map(ctx, &fun)?))
    });
    reg.register(
        TupleType,
        "filter",
        vec![ParamType::Typed(Callable)],
        |ctx, target, args| {
            let tuple = expect_tuple("filter", target)?;
            let fun = expect_invocable("filter", &arg(args, 0))?;
            Ok(Value::Tuple(tuple.filter(ctx, &fun)?))
        },
    );
    reg.register(
        TupleType,
        "reduce",
        vec![ParamType::Any, ParamType::Typed(Callable)],
        |ctx, target, args| {
            let tuple = expect_tuple("reduce", target)?;
            let fun = expect_invocable("reduce", &arg(args, 1))?;
            tuple.reduce(ctx, arg(args, 0), &fun)
        },
    );
}

fn register_field_operations(reg: &mut OperationRegistry) {
    use ValueType::{Callable, Field as FieldType};

    reg.register(FieldType, "map", vec![ParamType::Typed(Callable)], |ctx, target, args| {
        let field = expect_field("map", target)?;
        let fun = expect_invocable("map", &arg(args, 0))?;
        Ok(Value::Field(field.map(ctx, &fun)?))
    });
    reg.register(
        FieldType,
        "filter",
        vec![ParamType::Typed(Callable)],
        |ctx, target, args| {
            let field = expect_field("filter", target)?;
            let fun = expect_invocable("filter", &arg(args, 0))?;
            Ok(Value::Field(field.filter(ctx, &fun)?))
        },
    );
    reg.register(
        FieldType,
        "reduce",
        vec![ParamType::Any, ParamType::Typed(Callable)],
        |ctx, target, args| {
            let field = expect_field("reduce", target)?;
            let fun = expect_invocable("reduce", &arg(args, 1))?;
            field.reduce(ctx, arg(args, 0), &fun)
        },
    );
    reg.register(FieldType, "local", vec![], |ctx, target, _| {
        let field = expect_field("local", target)?;
        Ok(field.local_value(ctx).cloned().unwrap_or(Value::Absent))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::environment::SimpleEnvironment;
    use crate::runtime::interpreter::Node;
    use crate::runtime::value::{Callable, CallableId, DeviceId};

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(DeviceId(0), Box::new(SimpleEnvironment::new()))
    }

    #[test]
    fn exact_type_match_beats_a_coercible_one() {
        let mut ctx = ctx();
        // Int target, Float argument: the (Float) overload is exact on the
        // argument, the (Int) overload only coercible.
        let result =
            resolve_and_invoke(&mut ctx, "add", &Value::Int(1), &[Value::Float(2.5)]).unwrap();
        assert_eq!(result, Value::Float(3.5));
        let result =
            resolve_and_invoke(&mut ctx, "add", &Value::Int(1), &[Value::Int(2)]).unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn numeric_coercion_retries_once_and_succeeds() {
        let mut ctx = ctx();
        let tuple = Value::Tuple(Tuple::new(vec![Value::Int(10), Value::Int(20)]));
        // `get` wants an int index; the float argument resolves through
        // coercibility and is cast on the retry.
        let result = resolve_and_invoke(&mut ctx, "get", &tuple, &[Value::Float(1.0)]).unwrap();
        assert_eq!(result, Value::Int(20));
    }

    #[test]
    fn non_numeric_incompatibility_is_fatal() {
        let mut ctx = ctx();
        let err = resolve_and_invoke(
            &mut ctx,
            "concat",
            &Value::Text("a".into()),
            &[Value::Int(1)],
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::NoMatchingOperation { .. }));
    }

    #[test]
    fn unknown_operation_is_fatal() {
        let mut ctx = ctx();
        let err = resolve_and_invoke(&mut ctx, "nope", &Value::Int(1), &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::NoMatchingOperation { .. }));
    }

    #[test]
    fn second_invocation_failure_reports_coercion_failure() {
        let mut ctx = ctx();
        let op = Operation::new("wants_text", vec![ParamType::Any], |_, _, args| {
            expect_text("wants_text", &args[0]).map(|s| Value::Text(s.to_string()))
        });
        // The int argument is assignable to Any, so nothing is coerced and
        // the retry fails the same way.
        let err = invoke(&mut ctx, &op, &Value::Int(1), &[Value::Int(2)]).unwrap_err();
        assert!(matches!(err, RuntimeError::CoercionFailure { .. }));
    }

    #[test]
    fn lifting_aligns_on_the_identity_intersection() {
        let mut ctx = ctx();
        let f1 = Value::Field(Field::build(
            DeviceId(0),
            Value::Int(1),
            vec![(DeviceId(1), Value::Int(2))],
        ));
        let f2 = Value::Field(Field::build(
            DeviceId(1),
            Value::Int(3),
            vec![(DeviceId(2), Value::Int(4))],
        ));
        let result = resolve_and_invoke(&mut ctx, "add", &f1, &[f2]).unwrap();
        match result {
            Value::Field(field) => {
                assert_eq!(field.len(), 1);
                assert_eq!(field.get(DeviceId(1)), Some(&Value::Int(5)));
            }
            other => panic!("expected a field, got {other}"),
        }
    }

    #[test]
    fn empty_alignment_yields_an_empty_field_not_an_error() {
        let mut ctx = ctx();
        let f1 = Value::Field(Field::build(DeviceId(0), Value::Int(1), vec![]));
        let f2 = Value::Field(Field::build(DeviceId(1), Value::Int(2), vec![]));
        let result = resolve_and_invoke(&mut ctx, "add", &f1, &[f2]).unwrap();
        match result {
            Value::Field(field) => assert!(field.is_empty()),
            other => panic!("expected a field, got {other}"),
        }
    }

    #[test]
    fn scalar_argument_lifts_against_a_field_target() {
        let mut ctx = ctx();
        let field = Value::Field(Field::build(
            DeviceId(0),
            Value::Int(1),
            vec![(DeviceId(1), Value::Int(2))],
        ));
        let result = resolve_and_invoke(&mut ctx, "add", &field, &[Value::Int(10)]).unwrap();
        match result {
            Value::Field(field) => {
                assert_eq!(field.get(DeviceId(0)), Some(&Value::Int(11)));
                assert_eq!(field.get(DeviceId(1)), Some(&Value::Int(12)));
            }
            other => panic!("expected a field, got {other}"),
        }
    }

    #[test]
    fn field_algebra_dispatches_on_the_field_itself() {
        let mut ctx = ctx();
        let field = Value::Field(Field::build(
            DeviceId(0),
            Value::Int(2),
            vec![(DeviceId(1), Value::Int(3))],
        ));
        let sum = Callable::new(
            CallableId(900),
            "sum",
            vec!["a".into(), "b".into()],
            Node::method("add", Node::variable("a"), vec![Node::variable("b")]),
        );
        let result = resolve_and_invoke(
            &mut ctx,
            "reduce",
            &field,
            &[Value::Int(0), Value::Callable(sum)],
        )
        .unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn resolution_is_memoized() {
        let first = resolve(ValueType::Int, "abs", &[]).unwrap();
        let second = resolve(ValueType::Int, "abs", &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn host_registration_extends_the_registry() {
        let mut ctx = ctx();
        register_operation(ValueType::Text, "shout", vec![], |_, target, _| {
            Ok(Value::Text(expect_text("shout", target)?.to_uppercase()))
        });
        let result =
            resolve_and_invoke(&mut ctx, "shout", &Value::Text("hi".into()), &[]).unwrap();
        assert_eq!(result, Value::Text("HI".into()));
    }

    #[test]
    fn registering_an_overload_invalidates_memoized_resolutions() {
        let mut ctx = ctx();
        register_operation(
            ValueType::Int,
            "tagWidth",
            vec![ParamType::Typed(ValueType::Float)],
            |_, _, args| {
                expect_float("tagWidth", &args[0])?;
                Ok(Value::Text("float".into()))
            },
        );
        // Only the coercible overload exists; this memoizes it.
        let result =
            resolve_and_invoke(&mut ctx, "tagWidth", &Value::Int(1), &[Value::Int(2)]).unwrap();
        assert_eq!(result, Value::Text("float".into()));

        // An exact overload registered later must win on the next call,
        // not be shadowed by the stale cache entry.
        register_operation(
            ValueType::Int,
            "tagWidth",
            vec![ParamType::Typed(ValueType::Int)],
            |_, _, args| {
                expect_int("tagWidth", &args[0])?;
                Ok(Value::Text("int".into()))
            },
        );
        let result =
            resolve_and_invoke(&mut ctx, "tagWidth", &Value::Int(1), &[Value::Int(2)]).unwrap();
        assert_eq!(result, Value::Text("int".into()));
    }

    #[test]
    fn cache_eviction_keeps_the_map_bounded() {
        let mut cache = ResolutionCache::default();
        let op = Arc::new(Operation::new("noop", vec![], |_, target, _| {
            Ok(target.clone())
        }));
        for i in 0..(CACHE_MAX_SIZE + 10) {
            cache.insert(
                CacheKey {
                    target: ValueType::Int,
                    name: format!("op{i}"),
                    signature: vec![],
                },
                op.clone(),
            );
        }
        assert!(cache.entries.len() <= CACHE_MAX_SIZE);
    }
}
