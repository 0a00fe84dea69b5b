use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use symshape_symbols::SymValue;

use crate::graph::FunctionId;

/// Names of primitives which the graph and symbol engine treat specially.
pub mod prim {
    /// Partial application of a function to leading arguments.
    pub const PARTIAL: &str = "Partial";
    /// Choose between two functions based on a condition.
    pub const SWITCH: &str = "Switch";
    /// Create the forward-and-backward version of a function.
    pub const J: &str = "J";
    pub const TUPLE_GET_ITEM: &str = "TupleGetItem";
    /// Orders side effects. Its output is a monad.
    pub const UPDATE_STATE: &str = "UpdateState";
    /// A fused sub-graph produced by the extender.
    pub const KERNEL_PACKET: &str = "KernelPacket";

    /// Pseudo-primitive for the join of the branches of a conditional.
    pub const CONTROL_FLOW_JOIN: &str = "ControlFlowJoin";
    /// Pseudo-primitive for calling the backward function produced by `J`.
    pub const J_FUNC_CALLER: &str = "JFuncCaller";
    /// Pseudo-primitive for special calls which have no handler.
    pub const SPECIAL_NODE: &str = "_SpecialCNode";
    /// Pseudo-primitive for apply nodes whose callee is not a primitive.
    pub const UNSUPPORTED_NODE: &str = "_UnsupportedCNode";

    /// Attribute of [`KERNEL_PACKET`] that holds the fused function.
    pub const ATTR_FUNC_GRAPH: &str = "func_graph";

    /// Attribute which identifies a forward operator of a differentiated
    /// function.
    pub const ATTR_UNIQUE_ID: &str = "unique_id";
    /// Attribute of a backward operator which holds the
    /// [`ATTR_UNIQUE_ID`] of the forward operator it was generated for.
    pub const ATTR_FORWARD_UNIQUE_ID: &str = "forward_unique_id";
}

/// An operator in a graph, identified by name, with attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct Primitive {
    name: String,
    attrs: FxHashMap<String, Value>,
}

impl Primitive {
    pub fn new(name: &str) -> Primitive {
        Primitive {
            name: name.to_string(),
            attrs: FxHashMap::default(),
        }
    }

    /// Add an attribute and return the updated primitive.
    pub fn with_attr(mut self, name: &str, value: impl Into<Value>) -> Primitive {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn bool_attr(&self, name: &str) -> Option<bool> {
        match self.attr(name)? {
            Value::Bool(x) => Some(*x),
            _ => None,
        }
    }

    pub fn int_attr(&self, name: &str) -> Option<i64> {
        self.attr(name)?.as_int()
    }

    pub fn str_attr(&self, name: &str) -> Option<&str> {
        match self.attr(name)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Return functions referenced by attributes.
    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.attrs.values().filter_map(|v| v.as_function())
    }

    fn map_functions(&self, f: &mut impl FnMut(FunctionId) -> FunctionId) -> Primitive {
        Primitive {
            name: self.name.clone(),
            attrs: self
                .attrs
                .iter()
                .map(|(name, value)| (name.clone(), value.map_functions(f)))
                .collect(),
        }
    }
}

impl From<&str> for Primitive {
    fn from(name: &str) -> Primitive {
        Primitive::new(name)
    }
}

/// Value held by a constant node.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A vector of integers, eg. a shape.
    Ints(Vec<i64>),
    Tuple(Vec<Value>),
    Primitive(Arc<Primitive>),
    Function(FunctionId),
    /// Token which orders side effects.
    Monad,
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Value::Primitive(prim) => Some(prim),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FunctionId> {
        match self {
            Value::Function(id) => Some(*id),
            _ => None,
        }
    }

    /// Return the functions this value refers to.
    pub fn functions(&self) -> Vec<FunctionId> {
        match self {
            Value::Function(id) => vec![*id],
            Value::Primitive(prim) => prim.functions().collect(),
            Value::Tuple(items) => items.iter().flat_map(|item| item.functions()).collect(),
            _ => Vec::new(),
        }
    }

    /// Return a copy of this value with function references replaced.
    pub(crate) fn map_functions(&self, f: &mut impl FnMut(FunctionId) -> FunctionId) -> Value {
        match self {
            Value::Function(id) => Value::Function(f(*id)),
            Value::Primitive(prim) if prim.functions().next().is_some() => {
                Value::Primitive(Arc::new(prim.map_functions(f)))
            }
            Value::Tuple(items) => {
                Value::Tuple(items.iter().map(|item| item.map_functions(f)).collect())
            }
            other => other.clone(),
        }
    }

    /// Convert this value into symbol data.
    ///
    /// Returns `None` for values which cannot be represented as symbol data,
    /// such as functions and primitives.
    pub fn to_sym_value(&self) -> Option<SymValue> {
        match self {
            Value::Bool(x) => Some(SymValue::Bool(*x)),
            Value::Int(x) => Some(SymValue::Int(*x)),
            Value::Float(x) => Some(SymValue::Float(*x)),
            Value::Ints(xs) => Some(SymValue::ints(xs)),
            Value::Tuple(items) => items
                .iter()
                .map(|item| item.to_sym_value())
                .collect::<Option<Vec<_>>>()
                .map(SymValue::List),
            Value::None
            | Value::Str(_)
            | Value::Primitive(_)
            | Value::Function(_)
            | Value::Monad => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(x) => write!(f, "{}", x),
            Value::Int(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(x) => write!(f, "{:?}", x),
            Value::Ints(xs) => write!(f, "{:?}", xs),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Primitive(prim) => write!(f, "{}", prim.name()),
            Value::Function(id) => write!(f, "@{}", id),
            Value::Monad => write!(f, "U"),
        }
    }
}

macro_rules! impl_value_from {
    ($type:ty, $variant:ident) => {
        impl From<$type> for Value {
            fn from(val: $type) -> Value {
                Value::$variant(val)
            }
        }
    };
}

impl_value_from!(bool, Bool);
impl_value_from!(i64, Int);
impl_value_from!(f64, Float);
impl_value_from!(String, Str);
impl_value_from!(Vec<i64>, Ints);
impl_value_from!(FunctionId, Function);

impl From<&str> for Value {
    fn from(val: &str) -> Value {
        Value::Str(val.to_string())
    }
}

impl From<Primitive> for Value {
    fn from(prim: Primitive) -> Value {
        Value::Primitive(prim.into())
    }
}

#[cfg(test)]
mod tests {
    use symshape_symbols::SymValue;

    use super::{Primitive, Value};

    #[test]
    fn test_to_sym_value() {
        assert_eq!(Value::Int(3).to_sym_value(), Some(SymValue::Int(3)));
        assert_eq!(
            Value::Ints(vec![2, 3]).to_sym_value(),
            Some(SymValue::ints(&[2, 3]))
        );
        assert_eq!(
            Value::Tuple(vec![Value::Int(1), Value::Bool(false)]).to_sym_value(),
            Some(SymValue::List(vec![SymValue::Int(1), SymValue::Bool(false)]))
        );
        assert_eq!(Value::from(Primitive::new("Add")).to_sym_value(), None);
    }

    #[test]
    fn test_primitive_attrs() {
        let prim = Primitive::new("ReduceSum")
            .with_attr("keep_dims", true)
            .with_attr("axis", 1i64);
        assert_eq!(prim.name(), "ReduceSum");
        assert_eq!(prim.bool_attr("keep_dims"), Some(true));
        assert_eq!(prim.int_attr("axis"), Some(1));
        assert_eq!(prim.str_attr("axis"), None);
    }
}
