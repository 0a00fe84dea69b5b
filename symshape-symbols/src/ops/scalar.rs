use crate::operation::{expect_inputs, int_input, EvalError, Operation};
use crate::sym_expr::{floor_div, SymExpr};
use crate::symbol::{SymValue, SymbolId, SymbolKind};
use crate::table::SymbolTable;

/// Return the other input if one input of a binary operation is the literal
/// `identity`.
fn skip_identity(
    table: &SymbolTable,
    inputs: &[SymbolId],
    identity: i64,
    commutative: bool,
) -> Option<SymbolId> {
    let &[lhs, rhs] = inputs else {
        return None;
    };
    let is_identity = |id| table.is_literal(id) && table.int_value(id) == Some(identity);
    if is_identity(rhs) {
        Some(lhs)
    } else if commutative && is_identity(lhs) {
        Some(rhs)
    } else {
        None
    }
}

macro_rules! scalar_binary_op {
    ($(#[$meta:meta])* $op:ident, commutative=$commutative:literal, identity=$identity:expr, |$x:ident, $y:ident| $eval:expr, |$a:ident, $b:ident| $expr:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $op;

        impl Operation for $op {
            fn name(&self) -> &str {
                stringify!($op)
            }

            fn output_kind(&self) -> SymbolKind {
                SymbolKind::Int
            }

            fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
                expect_inputs::<2>(inputs)?;
                let $x = int_input(inputs, 0)?;
                let $y = int_input(inputs, 1)?;
                $eval.map(SymValue::Int)
            }

            fn is_commutative(&self) -> bool {
                $commutative
            }

            fn simplify(&self, table: &mut SymbolTable, inputs: &[SymbolId]) -> Option<SymbolId> {
                let identity: Option<i64> = $identity;
                identity.and_then(|identity| skip_identity(table, inputs, identity, $commutative))
            }

            fn to_expr(&self, inputs: &[SymExpr]) -> Option<SymExpr> {
                let [$a, $b] = inputs else {
                    return None;
                };
                Some($expr)
            }
        }
    };
}

scalar_binary_op!(
    /// Integer addition.
    ScalarAdd,
    commutative = true,
    identity = Some(0),
    |x, y| Ok::<_, EvalError>(x.saturating_add(y)),
    |a, b| a.clone() + b.clone()
);

scalar_binary_op!(
    /// Integer subtraction.
    ScalarSub,
    commutative = false,
    identity = Some(0),
    |x, y| Ok::<_, EvalError>(x.saturating_sub(y)),
    |a, b| a.clone() - b.clone()
);

scalar_binary_op!(
    /// Integer multiplication.
    ScalarMul,
    commutative = true,
    identity = Some(1),
    |x, y| Ok::<_, EvalError>(x.saturating_mul(y)),
    |a, b| a.clone() * b.clone()
);

scalar_binary_op!(
    /// Integer division, rounding towards negative infinity.
    ScalarFloorDiv,
    commutative = false,
    identity = Some(1),
    |x, y| floor_div(x, y),
    |a, b| a.clone() / b.clone()
);

scalar_binary_op!(
    ScalarMax,
    commutative = true,
    identity = None,
    |x, y| Ok::<_, EvalError>(x.max(y)),
    |a, b| a.max(b)
);

scalar_binary_op!(
    ScalarMin,
    commutative = true,
    identity = None,
    |x, y| Ok::<_, EvalError>(x.min(y)),
    |a, b| a.min(b)
);

/// Broadcast two dimension sizes.
///
/// The sizes must be equal, or one of them must be 1.
#[derive(Debug)]
pub struct BroadcastDim;

impl Operation for BroadcastDim {
    fn name(&self) -> &str {
        "BroadcastDim"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::Int
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        expect_inputs::<2>(inputs)?;
        let a = int_input(inputs, 0)?;
        let b = int_input(inputs, 1)?;
        match (a, b) {
            (a, b) if a == b => Ok(SymValue::Int(a)),
            (1, b) => Ok(SymValue::Int(b)),
            (a, 1) => Ok(SymValue::Int(a)),
            (a, b) => Err(EvalError::IncompatibleShapes(format!(
                "cannot broadcast {} with {}",
                a, b
            ))),
        }
    }

    fn is_commutative(&self) -> bool {
        true
    }

    fn simplify(&self, table: &mut SymbolTable, inputs: &[SymbolId]) -> Option<SymbolId> {
        if let Some(other) = skip_identity(table, inputs, 1, true) {
            return Some(other);
        }
        let &[a, b] = inputs else {
            return None;
        };
        if table.equals(a, b) {
            return Some(a);
        }
        // A fixed size other than 1 determines the result, if execution
        // succeeds.
        [a, b]
            .into_iter()
            .find(|&id| table.is_literal(id) && table.int_value(id).is_some_and(|v| v != 1))
    }

    fn to_expr(&self, inputs: &[SymExpr]) -> Option<SymExpr> {
        let [a, b] = inputs else {
            return None;
        };
        Some(a.broadcast(b))
    }
}

/// Choose one of two symbols based on a boolean condition.
///
/// This joins the results of the two branches of a conditional.
#[derive(Debug)]
pub struct Select {
    kind: SymbolKind,
}

impl Select {
    /// Create a select which produces a symbol of a given kind.
    pub fn new(kind: SymbolKind) -> Select {
        Select { kind }
    }
}

impl Operation for Select {
    fn name(&self) -> &str {
        "Select"
    }

    fn output_kind(&self) -> SymbolKind {
        self.kind
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        let [cond, on_true, on_false] = expect_inputs::<3>(inputs)?;
        match cond {
            SymValue::Bool(true) => Ok(on_true.clone()),
            SymValue::Bool(false) => Ok(on_false.clone()),
            _ => Err(EvalError::InvalidValue {
                index: 0,
                reason: "expected a bool condition",
            }),
        }
    }

    fn simplify(&self, table: &mut SymbolTable, inputs: &[SymbolId]) -> Option<SymbolId> {
        let &[cond, on_true, on_false] = inputs else {
            return None;
        };
        if table.equals(on_true, on_false) {
            return Some(on_true);
        }
        if table.is_literal(cond) {
            return table
                .bool_value(cond)
                .map(|cond| if cond { on_true } else { on_false });
        }
        None
    }
}
