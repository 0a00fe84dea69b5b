use std::fmt;
use std::num::NonZero;

use thiserror::Error;

/// Handle to a symbol in a [`SymbolTable`](crate::SymbolTable).
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SymbolId(NonZero<u32>);

impl SymbolId {
    /// Return the underlying u32 value of the ID.
    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    /// Return the underlying ID value as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    /// Construct an ID from an index into the symbol table.
    ///
    /// Panics if the index does not fit in a u32.
    pub(crate) fn from_index(index: usize) -> SymbolId {
        assert!(index < u32::MAX as usize, "symbol table is full");

        // IDs are stored as `index + 1` so that `Option<SymbolId>` is the same
        // size as `SymbolId`.
        SymbolId(NonZero::<u32>::MIN.saturating_add(index as u32))
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_u32().fmt(f)
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolId({})", self.as_u32())
    }
}

/// The type of value a symbol represents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Int,
    Bool,
    Float,
    /// An ordered list of symbols, eg. a shape or a tuple of shapes.
    List,
}

/// Concrete data held by a resolved symbol.
#[derive(Clone, Debug, PartialEq)]
pub enum SymValue {
    Int(i64),
    Bool(bool),
    Float(f64),
    List(Vec<SymValue>),
}

impl SymValue {
    pub fn kind(&self) -> SymbolKind {
        match self {
            Self::Int(_) => SymbolKind::Int,
            Self::Bool(_) => SymbolKind::Bool,
            Self::Float(_) => SymbolKind::Float,
            Self::List(_) => SymbolKind::List,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SymValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert a list of integers into a `Vec`.
    pub fn to_ints(&self) -> Option<Vec<i64>> {
        self.as_list()?.iter().map(|item| item.as_int()).collect()
    }

    /// Create a list of integers.
    pub fn ints(values: &[i64]) -> SymValue {
        SymValue::List(values.iter().copied().map(SymValue::Int).collect())
    }
}

impl fmt::Display for SymValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(x) => write!(f, "{}", x),
            Self::Bool(x) => write!(f, "{}", x),
            Self::Float(x) => write!(f, "{}", x),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Errors when updating the data of a symbol.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SymbolError {
    /// A literal was updated with a value different from the one it was
    /// created with.
    #[error("literal {symbol} cannot change from {current} to {new}")]
    LiteralMismatch {
        symbol: String,
        current: String,
        new: String,
    },

    /// The value has a different kind than the symbol.
    #[error("symbol {symbol} expects a value of kind {expected:?}")]
    KindMismatch { symbol: String, expected: SymbolKind },

    /// A list with known length was updated with a list of different length.
    #[error("list {symbol} has {expected} elements but the value has {actual}")]
    RankMismatch {
        symbol: String,
        expected: usize,
        actual: usize,
    },

    /// An operation output was assigned twice in one evaluation cycle.
    #[error("symbol {0} has already been assigned")]
    AlreadyAssigned(String),
}

#[cfg(test)]
mod tests {
    use super::{SymValue, SymbolId, SymbolKind};

    #[test]
    fn test_symbol_id() {
        let id = SymbolId::from_index(5);
        assert_eq!(id.as_u32(), 5);
        assert_eq!(id.as_usize(), 5);
        assert_eq!(format!("{:?}", id), "SymbolId(5)");
        assert_eq!(
            std::mem::size_of::<Option<SymbolId>>(),
            std::mem::size_of::<SymbolId>()
        );
    }

    #[test]
    fn test_sym_value() {
        let shape = SymValue::ints(&[2, 3]);
        assert_eq!(shape.kind(), SymbolKind::List);
        assert_eq!(shape.to_ints(), Some(vec![2, 3]));
        assert_eq!(shape.to_string(), "[2, 3]");

        let nested = SymValue::List(vec![shape, SymValue::Bool(true)]);
        assert_eq!(nested.to_ints(), None);
        assert_eq!(nested.to_string(), "[[2, 3], true]");
    }
}
