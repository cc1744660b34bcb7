//! A round-driven evaluation core for field-calculus programs.
//!
//! A program is an evaluation tree that the driver re-evaluates once per
//! round. The tree itself carries all cross-round state: every node keeps
//! the result of its last successful evaluation, and call sites keep the
//! instantiation of the callable they last applied, so state survives
//! exactly as long as the structure that produced it. Values exchanged
//! with neighbors arrive as [`Field`]s, mappings from device identity to
//! value, and operation dispatch resolves dynamically over runtime types,
//! lifting element-wise over fields.

pub mod runtime;

pub use runtime::context::ExecutionContext;
pub use runtime::environment::{ExecutionEnvironment, SimpleEnvironment};
pub use runtime::error::{RuntimeError, RuntimeResult};
pub use runtime::field::Field;
pub use runtime::interpreter::{Node, NodeKind, Program};
pub use runtime::invocable::Invocable;
pub use runtime::resolver::{register_operation, OperationRegistry, ParamType};
pub use runtime::tuple::Tuple;
pub use runtime::value::{Callable, CallableId, DeviceId, HostObject, Value, ValueType};

#[cfg(test)]
mod tests;
