//! Type and shape information attached to graph nodes.

use std::fmt;

use symshape_symbols::{SymValue, SymbolError, SymbolId, SymbolKind, SymbolTable};

use crate::value::Value;

/// The size of a tensor dimension, as known at compile time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dimension {
    Fixed(i64),
    /// A dimension whose size is only known when the graph is run.
    Dynamic,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(size) => write!(f, "{}", size),
            Dimension::Dynamic => write!(f, "?"),
        }
    }
}

/// Construct a `Vec<Dimension>`, using `?` for dynamic dimensions.
///
/// ```
/// use symshape::{dims, Dimension};
///
/// assert_eq!(dims![?, 4], vec![Dimension::Dynamic, Dimension::Fixed(4)]);
/// ```
#[macro_export]
macro_rules! dims {
    (@dim ?) => {
        $crate::Dimension::Dynamic
    };
    (@dim $size:expr) => {
        $crate::Dimension::Fixed($size)
    };
    ($($dim:tt),* $(,)?) => {
        vec![$($crate::dims!(@dim $dim)),*]
    };
}

/// The compile-time ("digital") shape of a node's output.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// A tensor whose rank is known.
    Tensor(Vec<Dimension>),
    /// A tensor whose rank is unknown.
    DynamicRank,
    Tuple(Vec<Shape>),
    /// Values which have no shape, such as functions and monads.
    NoShape,
}

impl Shape {
    /// Shape of a scalar.
    pub fn scalar() -> Shape {
        Shape::Tensor(Vec::new())
    }

    /// Create a tensor shape with all dimensions fixed.
    pub fn fixed(dims: &[i64]) -> Shape {
        Shape::Tensor(dims.iter().copied().map(Dimension::Fixed).collect())
    }

    /// Return true if this shape contains an unknown dimension or rank.
    pub fn is_dynamic(&self) -> bool {
        match self {
            Shape::Tensor(dims) => dims.iter().any(|d| *d == Dimension::Dynamic),
            Shape::DynamicRank => true,
            Shape::Tuple(items) => items.iter().any(|s| s.is_dynamic()),
            Shape::NoShape => false,
        }
    }

    /// Return true if this shape or any tuple element has unknown rank.
    pub fn is_dynamic_rank(&self) -> bool {
        match self {
            Shape::Tensor(_) | Shape::NoShape => false,
            Shape::DynamicRank => true,
            Shape::Tuple(items) => items.iter().any(|s| s.is_dynamic_rank()),
        }
    }

    /// Return the rank of a tensor shape, if known.
    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Tensor(dims) => Some(dims.len()),
            _ => None,
        }
    }

    /// Return the shape as symbol data, if it is fully static.
    pub fn to_sym_value(&self) -> Option<SymValue> {
        match self {
            Shape::Tensor(dims) => dims
                .iter()
                .map(|dim| match dim {
                    Dimension::Fixed(size) => Some(SymValue::Int(*size)),
                    Dimension::Dynamic => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(SymValue::List),
            Shape::DynamicRank => None,
            Shape::Tuple(items) => items
                .iter()
                .map(|item| item.to_sym_value())
                .collect::<Option<Vec<_>>>()
                .map(SymValue::List),
            Shape::NoShape => Some(SymValue::List(Vec::new())),
        }
    }

    /// Create a symbolic shape from this shape.
    ///
    /// Fixed dimensions become literals and dynamic dimensions become
    /// placeholders. A shape with dynamic rank becomes a list of unknown
    /// length.
    pub fn build_symbolic(&self, table: &mut SymbolTable) -> SymbolId {
        match self {
            Shape::Tensor(dims) => {
                let elements = dims
                    .iter()
                    .map(|dim| match dim {
                        Dimension::Fixed(size) => table.int(*size),
                        Dimension::Dynamic => table.unknown(SymbolKind::Int),
                    })
                    .collect();
                table.list(elements)
            }
            Shape::DynamicRank => table.unknown(SymbolKind::List),
            Shape::Tuple(items) => {
                let elements = items.iter().map(|item| item.build_symbolic(table)).collect();
                table.list(elements)
            }
            Shape::NoShape => table.list(Vec::new()),
        }
    }

    /// Update a symbolic shape, previously created by
    /// [`build_symbolic`](Shape::build_symbolic), from this shape.
    ///
    /// Shapes with known rank are updated dimension by dimension, so a
    /// dynamic dimension in `self` resets the corresponding symbol to
    /// unknown.
    pub fn update_symbolic(&self, table: &mut SymbolTable, id: SymbolId) -> Result<(), SymbolError> {
        let Some(elements) = table.elements(id).map(|e| e.to_vec()) else {
            return table.update(id, self.to_sym_value().as_ref());
        };
        match self {
            Shape::Tensor(dims) if dims.len() == elements.len() => {
                for (dim, element) in dims.iter().zip(elements) {
                    let size = match dim {
                        Dimension::Fixed(size) => Some(SymValue::Int(*size)),
                        Dimension::Dynamic => None,
                    };
                    table.update(element, size.as_ref())?;
                }
                Ok(())
            }
            Shape::Tuple(items) if items.len() == elements.len() => {
                for (item, element) in items.iter().zip(elements) {
                    item.update_symbolic(table, element)?;
                }
                Ok(())
            }
            _ => table.update(id, self.to_sym_value().as_ref()),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Tensor(dims) => {
                write!(f, "[")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", dim)?;
                }
                write!(f, "]")
            }
            Shape::DynamicRank => write!(f, "[..]"),
            Shape::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Shape::NoShape => write!(f, "NoShape"),
        }
    }
}

/// Element type of a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    Float32,
    Float16,
    Int32,
    Int64,
    Bool,
    Tuple,
    Function,
    Monad,
    None,
}

impl DataType {
    fn is_int(self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float16)
    }
}

/// Type, shape and value information for the output of a node.
///
/// In addition to the compile-time information, an abstract value has slots
/// for a symbolic shape and value. These are filled in by a
/// [`SymbolEngine`](crate::SymbolEngine) and refer to symbols in its table.
#[derive(Clone, Debug, PartialEq)]
pub struct AbstractValue {
    shape: Shape,
    dtype: DataType,
    value: Option<Value>,

    /// Abstracts of the elements of a tuple.
    elements: Vec<AbstractValue>,

    symbolic_shape: Option<SymbolId>,
    symbolic_value: Option<SymbolId>,
}

impl AbstractValue {
    fn new(shape: Shape, dtype: DataType) -> AbstractValue {
        AbstractValue {
            shape,
            dtype,
            value: None,
            elements: Vec::new(),
            symbolic_shape: None,
            symbolic_value: None,
        }
    }

    /// Create the abstract of a tensor whose value is not known.
    pub fn tensor(dtype: DataType, dims: Vec<Dimension>) -> AbstractValue {
        AbstractValue::new(Shape::Tensor(dims), dtype)
    }

    /// Create the abstract of a tensor whose rank is not known.
    pub fn dynamic_rank(dtype: DataType) -> AbstractValue {
        AbstractValue::new(Shape::DynamicRank, dtype)
    }

    /// Create the abstract of a scalar whose value is not known.
    pub fn scalar(dtype: DataType) -> AbstractValue {
        AbstractValue::new(Shape::scalar(), dtype)
    }

    pub fn tuple(elements: Vec<AbstractValue>) -> AbstractValue {
        let shape = Shape::Tuple(elements.iter().map(|e| e.shape.clone()).collect());
        AbstractValue {
            elements,
            ..AbstractValue::new(shape, DataType::Tuple)
        }
    }

    pub fn function() -> AbstractValue {
        AbstractValue::new(Shape::NoShape, DataType::Function)
    }

    /// Create the abstract of a side-effect ordering token.
    pub fn monad() -> AbstractValue {
        AbstractValue::new(Shape::NoShape, DataType::Monad)
    }

    /// Create the abstract of a known value.
    pub fn from_value(value: &Value) -> AbstractValue {
        let abs = match value {
            Value::None | Value::Str(_) => AbstractValue::new(Shape::NoShape, DataType::None),
            Value::Bool(_) => AbstractValue::scalar(DataType::Bool),
            Value::Int(_) => AbstractValue::scalar(DataType::Int64),
            Value::Float(_) => AbstractValue::scalar(DataType::Float32),
            Value::Ints(xs) => AbstractValue::new(Shape::fixed(&[xs.len() as i64]), DataType::Int64),
            Value::Tuple(items) => {
                AbstractValue::tuple(items.iter().map(AbstractValue::from_value).collect())
            }
            Value::Primitive(_) | Value::Function(_) => AbstractValue::function(),
            Value::Monad => AbstractValue::monad(),
        };
        abs.with_value(value.clone())
    }

    /// Set the known value and return the updated abstract.
    pub fn with_value(mut self, value: Value) -> AbstractValue {
        self.value = Some(value);
        self
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn elements(&self) -> &[AbstractValue] {
        &self.elements
    }

    pub fn is_monad(&self) -> bool {
        self.dtype == DataType::Monad
    }

    pub fn symbolic_shape(&self) -> Option<SymbolId> {
        self.symbolic_shape
    }

    pub fn symbolic_value(&self) -> Option<SymbolId> {
        self.symbolic_value
    }

    pub fn set_symbolic_shape(&mut self, id: Option<SymbolId>) {
        self.symbolic_shape = id;
    }

    pub fn set_symbolic_value(&mut self, id: Option<SymbolId>) {
        self.symbolic_value = id;
    }

    /// Detach symbolic annotations.
    pub fn clear_symbols(&mut self) {
        self.symbolic_shape = None;
        self.symbolic_value = None;
    }

    /// Return a copy of this abstract without symbolic annotations.
    pub fn without_symbols(&self) -> AbstractValue {
        let mut abs = self.clone();
        abs.clear_symbols();
        abs
    }

    /// Return the kind of symbol which represents this abstract's value.
    pub fn value_kind(&self) -> SymbolKind {
        match (&self.shape, self.dtype) {
            (Shape::Tensor(dims), DataType::Bool) if dims.is_empty() => SymbolKind::Bool,
            (Shape::Tensor(dims), dtype) if dims.is_empty() && dtype.is_int() => SymbolKind::Int,
            (Shape::Tensor(dims), dtype) if dims.is_empty() && dtype.is_float() => {
                SymbolKind::Float
            }
            _ => SymbolKind::List,
        }
    }

    /// Create a symbolic value from this abstract.
    ///
    /// Known values become literals. Unknown scalars become placeholders and
    /// integer vectors of known length become lists of placeholders. Other
    /// values become a placeholder without data.
    pub fn build_symbolic_value(&self, table: &mut SymbolTable) -> SymbolId {
        if let Some(value) = self.value.as_ref().and_then(|v| v.to_sym_value()) {
            return table.literal(&value);
        }
        if self.dtype == DataType::Tuple && !self.elements.is_empty() {
            let elements = self
                .elements
                .iter()
                .map(|e| e.build_symbolic_value(table))
                .collect();
            return table.list(elements);
        }
        match &self.shape {
            Shape::Tensor(dims) if dims.len() == 1 && self.dtype.is_int() => match dims[0] {
                Dimension::Fixed(len) => {
                    let elements = (0..len.max(0))
                        .map(|_| table.unknown(SymbolKind::Int))
                        .collect();
                    table.list(elements)
                }
                Dimension::Dynamic => table.unknown(SymbolKind::List),
            },
            _ => table.unknown(self.value_kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use symshape_symbols::{SymValue, SymbolKind, SymbolTable};
    use symshape_testing::TestCases;

    use super::{AbstractValue, DataType, Dimension, Shape};
    use crate::value::Value;

    #[test]
    fn test_dims_macro() {
        let empty: Vec<Dimension> = dims![];
        assert!(empty.is_empty());
        assert_eq!(dims![2, ?], vec![Dimension::Fixed(2), Dimension::Dynamic]);
    }

    #[test]
    fn test_shape_is_dynamic() {
        #[derive(Debug)]
        struct Case {
            shape: Shape,
            dynamic: bool,
            dynamic_rank: bool,
        }

        let cases = [
            Case {
                shape: Shape::Tensor(dims![2, 3]),
                dynamic: false,
                dynamic_rank: false,
            },
            Case {
                shape: Shape::Tensor(dims![?, 3]),
                dynamic: true,
                dynamic_rank: false,
            },
            Case {
                shape: Shape::DynamicRank,
                dynamic: true,
                dynamic_rank: true,
            },
            Case {
                shape: Shape::Tuple(vec![Shape::scalar(), Shape::DynamicRank]),
                dynamic: true,
                dynamic_rank: true,
            },
            Case {
                shape: Shape::NoShape,
                dynamic: false,
                dynamic_rank: false,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.shape.is_dynamic(), case.dynamic);
            assert_eq!(case.shape.is_dynamic_rank(), case.dynamic_rank);
        });
    }

    #[test]
    fn test_build_symbolic_shape() {
        let mut table = SymbolTable::new();
        let shape = Shape::Tensor(dims![?, 4]).build_symbolic(&mut table);
        assert_eq!(table.raw_string(shape), "[s0, 4]");
        assert!(!table.has_data(shape));

        let rank = Shape::DynamicRank.build_symbolic(&mut table);
        assert!(table.elements(rank).is_none());

        let tuple = Shape::Tuple(vec![Shape::fixed(&[2]), Shape::scalar()]).build_symbolic(&mut table);
        assert_eq!(
            table.value(tuple),
            Some(SymValue::List(vec![SymValue::ints(&[2]), SymValue::ints(&[])]))
        );
    }

    #[test]
    fn test_update_symbolic_shape() {
        let mut table = SymbolTable::new();
        let shape = Shape::Tensor(dims![?, 4]).build_symbolic(&mut table);

        Shape::fixed(&[7, 4]).update_symbolic(&mut table, shape).unwrap();
        assert_eq!(table.value(shape), Some(SymValue::ints(&[7, 4])));

        Shape::fixed(&[9, 4]).update_symbolic(&mut table, shape).unwrap();
        assert_eq!(table.value(shape), Some(SymValue::ints(&[9, 4])));

        // The fixed dimension is a literal.
        assert!(Shape::fixed(&[9, 5]).update_symbolic(&mut table, shape).is_err());
    }

    #[test]
    fn test_build_symbolic_value() {
        let mut table = SymbolTable::new();

        let known = AbstractValue::from_value(&Value::Ints(vec![2, -1]));
        let id = known.build_symbolic_value(&mut table);
        assert!(table.is_literal(id));
        assert_eq!(table.value(id), Some(SymValue::ints(&[2, -1])));

        let scalar = AbstractValue::scalar(DataType::Int64).build_symbolic_value(&mut table);
        assert_eq!(table.kind(scalar), SymbolKind::Int);
        assert!(!table.has_data(scalar));

        let vector = AbstractValue::tensor(DataType::Int64, dims![3]).build_symbolic_value(&mut table);
        assert_eq!(table.elements(vector).map(|e| e.len()), Some(3));

        let cond = AbstractValue::scalar(DataType::Bool).build_symbolic_value(&mut table);
        assert_eq!(table.kind(cond), SymbolKind::Bool);

        let floats = AbstractValue::tensor(DataType::Float32, dims![3]).build_symbolic_value(&mut table);
        assert_eq!(table.kind(floats), SymbolKind::List);
        assert!(table.elements(floats).is_none());
    }
}
