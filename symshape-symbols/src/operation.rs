use std::fmt;

use thiserror::Error;

use crate::sym_expr::SymExpr;
use crate::symbol::{SymValue, SymbolId, SymbolKind};
use crate::table::SymbolTable;

/// Errors when evaluating an [`Operation`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    /// The number of inputs is not what the operation expects.
    #[error("expected {expected} inputs but got {actual}")]
    IncorrectInputCount { expected: usize, actual: usize },

    /// An input has the wrong kind or an invalid value.
    #[error("input {index} is invalid: {reason}")]
    InvalidValue { index: usize, reason: &'static str },

    /// Input shapes cannot be combined, eg. broadcasting `3` with `4`.
    #[error("incompatible shapes: {0}")]
    IncompatibleShapes(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,
}

/// A deferred computation whose output is a symbol.
///
/// Operations are recorded in a [`SymbolTable`] when a builder emits them and
/// are evaluated, in the order they were emitted, each time concrete input
/// values become available.
pub trait Operation: fmt::Debug {
    /// Name used when displaying the operation, eg. `ScalarMul`.
    fn name(&self) -> &str;

    /// Kind of the output symbol.
    fn output_kind(&self) -> SymbolKind;

    /// Compute the output from the values of the inputs.
    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError>;

    /// Return true if the two inputs of this operation may be swapped without
    /// changing the result.
    fn is_commutative(&self) -> bool {
        false
    }

    /// Try to express the output using existing symbols, instead of recording
    /// the operation.
    ///
    /// For example `x * 1` can return `x`.
    fn simplify(&self, _table: &mut SymbolTable, _inputs: &[SymbolId]) -> Option<SymbolId> {
        None
    }

    /// Return the output as an integer expression of the inputs.
    fn to_expr(&self, _inputs: &[SymExpr]) -> Option<SymExpr> {
        None
    }
}

/// Check the input count of an operation.
pub(crate) fn expect_inputs<const N: usize>(
    inputs: &[SymValue],
) -> Result<&[SymValue; N], EvalError> {
    inputs.try_into().map_err(|_| EvalError::IncorrectInputCount {
        expected: N,
        actual: inputs.len(),
    })
}

pub(crate) fn int_input(inputs: &[SymValue], index: usize) -> Result<i64, EvalError> {
    inputs[index].as_int().ok_or(EvalError::InvalidValue {
        index,
        reason: "expected an integer",
    })
}

pub(crate) fn ints_input(inputs: &[SymValue], index: usize) -> Result<Vec<i64>, EvalError> {
    inputs[index].to_ints().ok_or(EvalError::InvalidValue {
        index,
        reason: "expected a list of integers",
    })
}
