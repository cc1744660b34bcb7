use crate::runtime::field::Field;
use crate::runtime::interpreter::Node;
use crate::runtime::tuple::Tuple;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identity of one device in the network. Fields are indexed by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A runtime value. Values are immutable: every operation that "modifies"
/// one returns a new value.
#[derive(Clone, Debug)]
pub enum Value {
    Absent,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Tuple(Tuple),
    Field(Field),
    Callable(Callable),
    Host(HostObject),
}

/// The runtime type tag of a [`Value`], used as a dispatch key by the
/// operation resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Absent,
    Bool,
    Int,
    Float,
    Text,
    Tuple,
    Field,
    Callable,
    Host,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Absent => "absent",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Tuple => "tuple",
            ValueType::Field => "field",
            ValueType::Callable => "callable",
            ValueType::Host => "host",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Absent => ValueType::Absent,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Tuple(_) => ValueType::Tuple,
            Value::Field(_) => ValueType::Field,
            Value::Callable(_) => ValueType::Callable,
            Value::Host(_) => ValueType::Host,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

// Equality bridges the two numeric representations: Int(1) == Float(1.0).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Field(a), Value::Field(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => write!(f, "<absent>"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Tuple(v) => write!(f, "{v}"),
            Value::Field(v) => write!(f, "{v}"),
            Value::Callable(v) => write!(f, "{v}"),
            Value::Host(v) => write!(f, "<{}>", v.type_tag),
        }
    }
}

/// Stable identifier of a callable's definition site. Two callables with
/// the same id denote the same definition, independent of when they were
/// allocated; this is what drives cross-round subtree reuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallableId(pub u64);

/// An in-language function value: parameter names, a shared body template,
/// and the lexical bindings captured at its definition site.
#[derive(Clone, Debug)]
pub struct Callable {
    id: CallableId,
    name: String,
    params: Vec<String>,
    body: Arc<Node>,
    captured: Vec<(String, Value)>,
}

impl Callable {
    pub fn new(id: CallableId, name: &str, params: Vec<String>, body: Node) -> Self {
        Self {
            id,
            name: name.to_string(),
            params,
            body: Arc::new(body),
            captured: Vec::new(),
        }
    }

    pub fn with_captured(mut self, captured: Vec<(String, Value)>) -> Self {
        self.captured = captured;
        self
    }

    pub fn id(&self) -> CallableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &Node {
        &self.body
    }

    pub fn captured(&self) -> &[(String, Value)] {
        &self.captured
    }
}

// Same definition site plus the same capture snapshot: the equality that
// decides whether a call site may keep its subtree across rounds.
impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.captured == other.captured
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}/{}", self.name, self.params.len())
    }
}

/// An opaque value produced by a host operation. Equality is allocation
/// identity.
#[derive(Clone)]
pub struct HostObject {
    type_tag: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new<T: Any + Send + Sync>(type_tag: &'static str, value: T) -> Self {
        Self {
            type_tag,
            value: Arc::new(value),
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("type_tag", &self.type_tag)
            .finish()
    }
}
