use crate::runtime::context::ExecutionContext;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::resolver;
use crate::runtime::tuple::Tuple;
use crate::runtime::value::{Callable, Value};
use tracing::debug;

/// One node of an evaluation tree. The tree is the program: the driver
/// owns it across rounds, and each node carries its last successful
/// result as its annotation. Cross-round state (`Rep` history, call-site
/// instantiations) lives in the tree itself, which is what makes repeated
/// rounds self-stabilizing.
#[derive(Clone, Debug)]
pub struct Node {
    kind: NodeKind,
    annotation: Option<Value>,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Constant(Value),
    Variable(String),
    CreateTuple(Vec<Node>),
    /// `target.name(args)` when `name` is set, `target(args)` otherwise.
    /// The slot holds the per-call-site instantiation of an applied
    /// callable, kept across rounds while the callable stays the same.
    Invoke {
        name: Option<String>,
        target: Box<Node>,
        args: Vec<Node>,
        slot: Option<Box<InvokeSlot>>,
    },
    /// `rep (var <- init) { update }`: evolves this node's own previous
    /// annotation, falling back to `init` on the first round.
    Rep {
        var: String,
        init: Box<Node>,
        update: Box<Node>,
    },
    EnvRead {
        id: String,
        default: Option<Value>,
    },
    EnvWrite {
        id: String,
        value: Box<Node>,
    },
}

/// A call site's live instantiation: which callable produced it and the
/// independently-evolving copy of that callable's body.
#[derive(Clone, Debug)]
pub struct InvokeSlot {
    callable: Callable,
    body: Node,
}

impl Node {
    pub fn constant(value: Value) -> Node {
        Node {
            kind: NodeKind::Constant(value),
            annotation: None,
        }
    }

    pub fn variable(name: &str) -> Node {
        Node {
            kind: NodeKind::Variable(name.to_string()),
            annotation: None,
        }
    }

    pub fn create_tuple(items: Vec<Node>) -> Node {
        Node {
            kind: NodeKind::CreateTuple(items),
            annotation: None,
        }
    }

    /// `target(args)`: the target must evaluate to a callable.
    pub fn apply(target: Node, args: Vec<Node>) -> Node {
        Node {
            kind: NodeKind::Invoke {
                name: None,
                target: Box::new(target),
                args,
                slot: None,
            },
            annotation: None,
        }
    }

    /// `target.name(args)`: dot dispatch through the operation resolver,
    /// unless the target turns out to be a callable.
    pub fn method(name: &str, target: Node, args: Vec<Node>) -> Node {
        Node {
            kind: NodeKind::Invoke {
                name: Some(name.to_string()),
                target: Box::new(target),
                args,
                slot: None,
            },
            annotation: None,
        }
    }

    pub fn rep(var: &str, init: Node, update: Node) -> Node {
        Node {
            kind: NodeKind::Rep {
                var: var.to_string(),
                init: Box::new(init),
                update: Box::new(update),
            },
            annotation: None,
        }
    }

    pub fn env_read(id: &str) -> Node {
        Node {
            kind: NodeKind::EnvRead {
                id: id.to_string(),
                default: None,
            },
            annotation: None,
        }
    }

    pub fn env_read_or(id: &str, default: Value) -> Node {
        Node {
            kind: NodeKind::EnvRead {
                id: id.to_string(),
                default: Some(default),
            },
            annotation: None,
        }
    }

    pub fn env_write(id: &str, value: Node) -> Node {
        Node {
            kind: NodeKind::EnvWrite {
                id: id.to_string(),
                value: Box::new(value),
            },
            annotation: None,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The result of the last successful evaluation, if any.
    pub fn annotation(&self) -> Option<&Value> {
        self.annotation.as_ref()
    }

    /// A structurally equal tree with no annotations and no call-site
    /// instantiations. Copies evolve independently of the original.
    pub fn copy(&self) -> Node {
        let kind = match &self.kind {
            NodeKind::Constant(value) => NodeKind::Constant(value.clone()),
            NodeKind::Variable(name) => NodeKind::Variable(name.clone()),
            NodeKind::CreateTuple(items) => {
                NodeKind::CreateTuple(items.iter().map(Node::copy).collect())
            }
            NodeKind::Invoke {
                name, target, args, ..
            } => NodeKind::Invoke {
                name: name.clone(),
                target: Box::new(target.copy()),
                args: args.iter().map(Node::copy).collect(),
                slot: None,
            },
            NodeKind::Rep { var, init, update } => NodeKind::Rep {
                var: var.clone(),
                init: Box::new(init.copy()),
                update: Box::new(update.copy()),
            },
            NodeKind::EnvRead { id, default } => NodeKind::EnvRead {
                id: id.clone(),
                default: default.clone(),
            },
            NodeKind::EnvWrite { id, value } => NodeKind::EnvWrite {
                id: id.clone(),
                value: Box::new(value.copy()),
            },
        };
        Node {
            kind,
            annotation: None,
        }
    }

    /// Post-order evaluation. On success the result is stored as this
    /// node's annotation; on failure the annotation is cleared and the
    /// error propagates, aborting the round.
    pub fn evaluate(&mut self, ctx: &mut ExecutionContext) -> RuntimeResult<Value> {
        let previous = self.annotation.take();
        let result = self.compute(ctx, previous)?;
        self.annotation = Some(result.clone());
        Ok(result)
    }

    fn compute(
        &mut self,
        ctx: &mut ExecutionContext,
        previous: Option<Value>,
    ) -> RuntimeResult<Value> {
        match &mut self.kind {
            NodeKind::Constant(value) => Ok(value.clone()),
            NodeKind::Variable(name) => {
                ctx.lookup(name).ok_or_else(|| RuntimeError::UnknownSymbol {
                    name: name.clone(),
                })
            }
            NodeKind::CreateTuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items.iter_mut() {
                    values.push(item.evaluate(ctx)?);
                }
                Ok(Value::Tuple(Tuple::new(values)))
            }
            NodeKind::Invoke {
                name,
                target,
                args,
                slot,
            } => {
                let target_value = target.evaluate(ctx)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    arg_values.push(arg.evaluate(ctx)?);
                }
                match (&target_value, name) {
                    (Value::Callable(callable), _) => {
                        apply_at_site(ctx, slot, callable, &arg_values)
                    }
                    (Value::Absent, _) => Err(RuntimeError::StructuralViolation {
                        message: "cannot invoke on an absent value".to_string(),
                    }),
                    (_, Some(name)) => {
                        resolver::resolve_and_invoke(ctx, name, &target_value, &arg_values)
                    }
                    (_, None) => Err(RuntimeError::StructuralViolation {
                        message: format!(
                            "cannot apply a value of type {}",
                            target_value.type_name()
                        ),
                    }),
                }
            }
            NodeKind::Rep { var, init, update } => {
                let state = match previous {
                    Some(value) => value,
                    None => init.evaluate(ctx)?,
                };
                ctx.push_frame();
                ctx.bind(var, state);
                let result = update.evaluate(ctx);
                ctx.pop_frame();
                result
            }
            NodeKind::EnvRead { id, default } => match ctx.environment().get(id) {
                Some(value) => Ok(value),
                None => match default {
                    Some(value) => Ok(value.clone()),
                    None => Err(RuntimeError::UnknownSymbol { name: id.clone() }),
                },
            },
            NodeKind::EnvWrite { id, value } => {
                let result = value.evaluate(ctx)?;
                ctx.environment_mut().put(id, result.clone());
                Ok(result)
            }
        }
    }
}

/// Applies a callable at a specific call site. The site keeps the body
/// instantiation of the callable it last applied: while the incoming
/// callable compares equal, that instantiation (and all the cross-round
/// state inside it) is reused; as soon as a different callable arrives,
/// the old instantiation is dropped and a fresh copy of the new body is
/// made, resetting every `rep` below it.
fn apply_at_site(
    ctx: &mut ExecutionContext,
    slot: &mut Option<Box<InvokeSlot>>,
    callable: &Callable,
    args: &[Value],
) -> RuntimeResult<Value> {
    check_arity(callable, args)?;
    let mut site = match slot.take() {
        Some(site) if site.callable == *callable => site,
        _ => Box::new(InvokeSlot {
            callable: callable.clone(),
            body: callable.body().copy(),
        }),
    };
    ctx.push_frame();
    for (name, value) in callable.captured() {
        ctx.bind(name, value.clone());
    }
    for (param, value) in callable.params().iter().zip(args) {
        ctx.bind(param, value.clone());
    }
    let result = site.body.evaluate(ctx);
    ctx.pop_frame();
    *slot = Some(site);
    result
}

/// Applies a callable with no call site at all: a fresh, throwaway copy
/// of the body per application. Used by the Tuple and Field combinators,
/// where per-element applications must not share state.
pub(crate) fn apply_isolated(
    ctx: &mut ExecutionContext,
    callable: &Callable,
    args: &[Value],
) -> RuntimeResult<Value> {
    check_arity(callable, args)?;
    let mut body = callable.body().copy();
    ctx.push_frame();
    for (name, value) in callable.captured() {
        ctx.bind(name, value.clone());
    }
    for (param, value) in callable.params().iter().zip(args) {
        ctx.bind(param, value.clone());
    }
    let result = body.evaluate(ctx);
    ctx.pop_frame();
    result
}

fn check_arity(callable: &Callable, args: &[Value]) -> RuntimeResult<()> {
    if args.len() != callable.arity() {
        return Err(RuntimeError::ArityMismatch {
            name: callable.name().to_string(),
            expected: callable.arity(),
            received: args.len(),
        });
    }
    Ok(())
}

/// A program is an evaluation tree plus the round protocol around it:
/// environment setup, one full evaluation, then commit. Commit is skipped
/// when the round aborts.
pub struct Program {
    root: Node,
}

impl Program {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn run_round(&mut self, ctx: &mut ExecutionContext) -> RuntimeResult<Value> {
        debug!(target: "fieldcalc::interpreter", device = %ctx.device_id(), "round start");
        ctx.environment_mut().setup();
        let result = self.root.evaluate(ctx)?;
        ctx.environment_mut().commit();
        Ok(result)
    }
}
