//! Whole-round scenarios: programs driven through `Program::run_round`
//! across several rounds, exercising state retention, abort semantics,
//! the persistent environment, and field lifting end to end.

use crate::runtime::context::ExecutionContext;
use crate::runtime::environment::{ExecutionEnvironment, SimpleEnvironment};
use crate::runtime::error::RuntimeError;
use crate::runtime::field::Field;
use crate::runtime::interpreter::{Node, Program};
use crate::runtime::value::{Callable, CallableId, DeviceId, Value};

fn ctx() -> ExecutionContext {
    ExecutionContext::new(DeviceId(0), Box::new(SimpleEnvironment::new()))
}

/// `rep (prev <- 0) { prev.add(1) }`
fn counter_body() -> Node {
    Node::rep(
        "prev",
        Node::constant(Value::Int(0)),
        Node::method("add", Node::variable("prev"), vec![Node::constant(Value::Int(1))]),
    )
}

#[test]
fn rounds_accumulate_state_in_the_tree() {
    let mut ctx = ctx();
    let mut program = Program::new(counter_body());
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(1));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(2));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(3));
}

#[test]
fn swapping_the_applied_callable_resets_its_subtree() {
    let mut ctx = ctx();
    // The program applies whatever `f` is bound to; the driver swaps the
    // binding between rounds.
    let mut program = Program::new(Node::apply(Node::variable("f"), vec![]));
    let counter = |id| Callable::new(CallableId(id), "counter", vec![], counter_body());

    ctx.bind("f", Value::Callable(counter(1)));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(1));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(2));

    ctx.bind("f", Value::Callable(counter(2)));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(1));

    // Swapping back does not resurrect the old state either: the site
    // kept only the most recent instantiation.
    ctx.bind("f", Value::Callable(counter(1)));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(1));
}

#[test]
fn an_aborted_round_reports_the_error_and_skips_commit() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Environment that counts commits through a shared counter.
    #[derive(Default)]
    struct CountingEnvironment {
        inner: SimpleEnvironment,
        commits: Arc<AtomicUsize>,
    }

    impl ExecutionEnvironment for CountingEnvironment {
        fn has(&self, id: &str) -> bool {
            self.inner.has(id)
        }
        fn get(&self, id: &str) -> Option<Value> {
            self.inner.get(id)
        }
        fn put(&mut self, id: &str, value: Value) -> bool {
            self.inner.put(id, value)
        }
        fn remove(&mut self, id: &str) -> Option<Value> {
            self.inner.remove(id)
        }
        fn commit(&mut self) {
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
    }

    let commits = Arc::new(AtomicUsize::new(0));
    let mut ctx = ExecutionContext::new(
        DeviceId(0),
        Box::new(CountingEnvironment {
            inner: SimpleEnvironment::new(),
            commits: commits.clone(),
        }),
    );
    let mut good = Program::new(counter_body());
    assert!(good.run_round(&mut ctx).is_ok());
    assert_eq!(commits.load(Ordering::SeqCst), 1);

    let mut bad = Program::new(Node::method(
        "definitelyNotAnOperation",
        Node::constant(Value::Int(1)),
        vec![],
    ));
    let err = bad.run_round(&mut ctx).unwrap_err();
    assert!(matches!(err, RuntimeError::NoMatchingOperation { .. }));
    assert!(bad.root().annotation().is_none());
    assert_eq!(commits.load(Ordering::SeqCst), 1);
}

#[test]
fn environment_state_persists_across_rounds() {
    let mut ctx = ctx();
    // round program: x = env.get("x", 0).add(1); env.put("x", x)
    let mut program = Program::new(Node::env_write(
        "x",
        Node::method(
            "add",
            Node::env_read_or("x", Value::Int(0)),
            vec![Node::constant(Value::Int(1))],
        ),
    ));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(1));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(2));
    assert_eq!(ctx.environment().get("x"), Some(Value::Int(2)));
}

#[test]
fn lexical_scoping_holds_through_nested_application() {
    let mut ctx = ctx();
    // g captures nothing and reads its own parameter `x`; the outer
    // binding of `x` must not leak into it, nor be damaged by the call.
    let double = Callable::new(
        CallableId(10),
        "double",
        vec!["x".into()],
        Node::method("add", Node::variable("x"), vec![Node::variable("x")]),
    );
    ctx.bind("x", Value::Int(1));
    ctx.bind("g", Value::Callable(double));
    let mut program = Program::new(Node::create_tuple(vec![
        Node::apply(Node::variable("g"), vec![Node::constant(Value::Int(5))]),
        Node::variable("x"),
    ]));
    let result = program.run_round(&mut ctx).unwrap();
    assert_eq!(
        result,
        Value::Tuple(vec![Value::Int(10), Value::Int(1)].into_iter().collect())
    );
}

#[test]
fn field_lifting_works_from_inside_a_program() {
    let mut ctx = ctx();
    let f1 = Field::build(
        DeviceId(0),
        Value::Int(1),
        vec![(DeviceId(1), Value::Int(2)), (DeviceId(2), Value::Int(3))],
    );
    let f2 = Field::build(
        DeviceId(0),
        Value::Int(10),
        vec![(DeviceId(2), Value::Int(30))],
    );
    ctx.bind("nbr_a", Value::Field(f1));
    ctx.bind("nbr_b", Value::Field(f2));
    let mut program = Program::new(Node::method(
        "add",
        Node::variable("nbr_a"),
        vec![Node::variable("nbr_b")],
    ));
    match program.run_round(&mut ctx).unwrap() {
        Value::Field(field) => {
            assert_eq!(field.len(), 2);
            assert_eq!(field.get(DeviceId(0)), Some(&Value::Int(11)));
            assert_eq!(field.get(DeviceId(2)), Some(&Value::Int(33)));
            assert!(!field.contains(DeviceId(1)));
        }
        other => panic!("expected a field, got {other}"),
    }
}

#[test]
fn field_reduction_collapses_a_neighbourhood_view() {
    let mut ctx = ctx();
    let field = Field::build(
        DeviceId(0),
        Value::Int(4),
        vec![(DeviceId(1), Value::Int(7)), (DeviceId(2), Value::Int(5))],
    );
    ctx.bind("nbr_v", Value::Field(field));
    let max = Callable::new(
        CallableId(20),
        "max2",
        vec!["a".into(), "b".into()],
        Node::method("max", Node::variable("a"), vec![Node::variable("b")]),
    );
    let mut program = Program::new(Node::method(
        "reduce",
        Node::variable("nbr_v"),
        vec![
            Node::constant(Value::Int(0)),
            Node::constant(Value::Callable(max)),
        ],
    ));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(7));
}

#[test]
fn pair_operation_is_reachable_through_dot_dispatch() {
    let mut ctx = ctx();
    // [1, 2, 3].pairOperation([4, 5], max) == [4, 5, 3]
    let max = Callable::new(
        CallableId(40),
        "max2",
        vec!["a".into(), "b".into()],
        Node::method("max", Node::variable("a"), vec![Node::variable("b")]),
    );
    let mut program = Program::new(Node::method(
        "pairOperation",
        Node::create_tuple(vec![
            Node::constant(Value::Int(1)),
            Node::constant(Value::Int(2)),
            Node::constant(Value::Int(3)),
        ]),
        vec![
            Node::create_tuple(vec![
                Node::constant(Value::Int(4)),
                Node::constant(Value::Int(5)),
            ]),
            Node::constant(Value::Callable(max)),
        ],
    ));
    assert_eq!(
        program.run_round(&mut ctx).unwrap(),
        Value::Tuple(
            vec![Value::Int(4), Value::Int(5), Value::Int(3)]
                .into_iter()
                .collect()
        )
    );
}

#[test]
fn tuple_pipeline_through_dynamic_dispatch() {
    let mut ctx = ctx();
    // [1, 2, 3].append(4).subTupleEnd(1).size()
    let mut program = Program::new(Node::method(
        "size",
        Node::method(
            "subTupleEnd",
            Node::method(
                "append",
                Node::create_tuple(vec![
                    Node::constant(Value::Int(1)),
                    Node::constant(Value::Int(2)),
                    Node::constant(Value::Int(3)),
                ]),
                vec![Node::constant(Value::Int(4))],
            ),
            vec![Node::constant(Value::Int(1))],
        ),
        vec![],
    ));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(3));
}

#[test]
fn a_rep_nested_in_an_applied_callable_survives_rounds() {
    let mut ctx = ctx();
    // The counter lives inside the callable body; the call site keeps the
    // instantiation alive between rounds.
    let stateful = Callable::new(
        CallableId(30),
        "stateful",
        vec!["step".into()],
        Node::rep(
            "acc",
            Node::constant(Value::Int(0)),
            Node::method("add", Node::variable("acc"), vec![Node::variable("step")]),
        ),
    );
    ctx.bind("f", Value::Callable(stateful));
    let mut program = Program::new(Node::apply(
        Node::variable("f"),
        vec![Node::constant(Value::Int(10))],
    ));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(10));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(20));
    assert_eq!(program.run_round(&mut ctx).unwrap(), Value::Int(30));
}
