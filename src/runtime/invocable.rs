use crate::runtime::context::ExecutionContext;
use crate::runtime::error::RuntimeResult;
use crate::runtime::interpreter;
use crate::runtime::value::{Callable, Value};
use std::fmt;
use std::sync::Arc;

pub type NativeFn =
    Arc<dyn Fn(&mut ExecutionContext, &[Value]) -> RuntimeResult<Value> + Send + Sync>;

/// Something the runtime can call: either an in-language callable whose
/// body is evaluated through the interpreter, or a native host function.
/// Field and Tuple combinators never branch on which kind they received.
#[derive(Clone)]
pub enum Invocable {
    Interpreted(Callable),
    Native(NativeFn),
}

impl Invocable {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&mut ExecutionContext, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Invocable::Native(Arc::new(f))
    }

    pub fn from_value(value: &Value) -> Option<Invocable> {
        match value {
            Value::Callable(callable) => Some(Invocable::Interpreted(callable.clone())),
            _ => None,
        }
    }

    pub fn invoke(&self, ctx: &mut ExecutionContext, args: &[Value]) -> RuntimeResult<Value> {
        match self {
            // Each interpreted application instantiates an independent copy
            // of the body; per-element applications share no state.
            Invocable::Interpreted(callable) => interpreter::apply_isolated(ctx, callable, args),
            Invocable::Native(f) => f(ctx, args),
        }
    }
}

impl fmt::Debug for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocable::Interpreted(callable) => write!(f, "Interpreted({callable})"),
            Invocable::Native(_) => write!(f, "Native(..)"),
        }
    }
}
