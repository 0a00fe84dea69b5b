use smallvec::{smallvec, SmallVec};
use symshape_symbols::ops::{
    BroadcastDim, BroadcastShape, ReduceShape, ScalarAdd, ScalarFloorDiv, ScalarMax, ScalarMin,
    ScalarMul, ScalarSub,
};
use symshape_symbols::{SymValue, SymbolId, SymbolKind, SymbolTable};

use super::resolve_axis;
use crate::op_registry::{BuildContext, BuildError, DependOn, OperationBuilder};
use crate::value::Primitive;

/// Integer arithmetic which can be applied to symbols.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    Max,
    Min,
}

impl ArithOp {
    fn emit(self, table: &mut SymbolTable, a: SymbolId, b: SymbolId) -> SymbolId {
        let inputs = [a, b];
        match self {
            ArithOp::Add => table.emit(ScalarAdd, &inputs),
            ArithOp::Sub => table.emit(ScalarSub, &inputs),
            ArithOp::Mul => table.emit(ScalarMul, &inputs),
            ArithOp::FloorDiv => table.emit(ScalarFloorDiv, &inputs),
            ArithOp::Max => table.emit(ScalarMax, &inputs),
            ArithOp::Min => table.emit(ScalarMin, &inputs),
        }
    }

    /// Apply the operation to two integers, or elementwise to two lists of
    /// integers with the same length.
    fn apply(self, table: &mut SymbolTable, a: SymbolId, b: SymbolId) -> Option<SymbolId> {
        match (table.kind(a), table.kind(b)) {
            (SymbolKind::Int, SymbolKind::Int) => Some(self.emit(table, a, b)),
            (SymbolKind::List, SymbolKind::List) => {
                let a = table.elements(a)?.to_vec();
                let b = table.elements(b)?.to_vec();
                if a.len() != b.len() {
                    return None;
                }
                let items = std::iter::zip(a, b)
                    .map(|(x, y)| self.apply(table, x, y))
                    .collect::<Option<Vec<_>>>()?;
                Some(table.list(items))
            }
            _ => None,
        }
    }
}

/// Arithmetic on scalars, eg. `ScalarMul`.
#[derive(Debug)]
pub struct ScalarBinary(pub ArithOp);

impl OperationBuilder for ScalarBinary {
    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        Ok(ctx.symbols().list(Vec::new()))
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let a = ctx.input_value(0)?;
        let b = ctx.input_value(1)?;
        Ok(self.0.emit(ctx.symbols(), a, b))
    }
}

/// Binary operator whose inputs are broadcast against each other.
#[derive(Debug)]
pub struct BinaryElementwise {
    value_op: Option<ArithOp>,
}

impl BinaryElementwise {
    /// Create a builder which can also compute the value of integer inputs.
    pub fn with_value(op: ArithOp) -> BinaryElementwise {
        BinaryElementwise { value_op: Some(op) }
    }

    /// Create a builder which only computes the output shape.
    pub fn shape_only() -> BinaryElementwise {
        BinaryElementwise { value_op: None }
    }
}

impl OperationBuilder for BinaryElementwise {
    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let a = ctx.input_shape(0)?;
        let b = ctx.input_shape(1)?;
        let table = ctx.symbols();

        let (Some(a_dims), Some(b_dims)) = (
            table.elements(a).map(|e| e.to_vec()),
            table.elements(b).map(|e| e.to_vec()),
        ) else {
            return Ok(table.emit(BroadcastShape, &[a, b]));
        };

        // Broadcast right-aligned dims. Missing leading dims act as 1.
        let rank = a_dims.len().max(b_dims.len());
        let mut a_iter = a_dims.into_iter().rev();
        let mut b_iter = b_dims.into_iter().rev();
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            let dim = match (a_iter.next(), b_iter.next()) {
                (Some(x), Some(y)) => table.emit(BroadcastDim, &[x, y]),
                (Some(x), None) | (None, Some(x)) => x,
                (None, None) => break,
            };
            dims.push(dim);
        }
        dims.reverse();
        Ok(table.list(dims))
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let name = ctx.prim().name();
        let Some(op) = self.value_op else {
            return Err(BuildError::Unsupported(format!("value of {}", name)));
        };
        let a = ctx.input_value(0)?;
        let b = ctx.input_value(1)?;
        op.apply(ctx.symbols(), a, b)
            .ok_or(BuildError::Unsupported(format!("value of {} for these inputs", name)))
    }
}

/// How the value of a [`UnaryElementwise`] is derived from its input.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryValue {
    /// Only the shape is inferred.
    Unsupported,
    Identity,
    Negate,
}

/// Operator whose output has the shape of its input.
#[derive(Debug)]
pub struct UnaryElementwise(pub UnaryValue);

fn negate(table: &mut SymbolTable, id: SymbolId) -> Option<SymbolId> {
    match table.kind(id) {
        SymbolKind::Int => {
            let zero = table.int(0);
            Some(table.emit(ScalarSub, &[zero, id]))
        }
        SymbolKind::List => {
            let items = table.elements(id)?.to_vec();
            let items = items
                .into_iter()
                .map(|item| negate(table, item))
                .collect::<Option<Vec<_>>>()?;
            Some(table.list(items))
        }
        _ => None,
    }
}

impl OperationBuilder for UnaryElementwise {
    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        ctx.input_shape(0)
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let name = ctx.prim().name();
        match self.0 {
            UnaryValue::Unsupported => Err(BuildError::Unsupported(format!("value of {}", name))),
            UnaryValue::Identity => ctx.input_value(0),
            UnaryValue::Negate => {
                let input = ctx.input_value(0)?;
                negate(ctx.symbols(), input)
                    .ok_or(BuildError::Unsupported(format!("value of {} for this input", name)))
            }
        }
    }
}

/// Reductions such as `ReduceSum`.
///
/// Inputs are `(data, axes, keep_dims?, skip_mode?)`. The flags default to
/// the `keep_dims` and `skip_mode` attributes if the inputs are absent.
#[derive(Debug)]
pub struct Reduce;

impl Reduce {
    fn flag(ctx: &mut BuildContext, index: usize, name: &str) -> Result<bool, BuildError> {
        if index >= ctx.num_inputs() {
            return Ok(ctx.prim().bool_attr(name).unwrap_or(false));
        }
        ctx.input_bool(index)?.ok_or(BuildError::InvalidInput {
            index,
            reason: "flag must be a constant",
        })
    }
}

impl OperationBuilder for Reduce {
    fn depends(&self, _prim: &Primitive, depend_value: bool) -> SmallVec<[DependOn; 4]> {
        if depend_value {
            smallvec![DependOn::Value; 4]
        } else {
            smallvec![DependOn::Shape, DependOn::Value, DependOn::Value, DependOn::Value]
        }
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let keep_dims = Self::flag(ctx, 2, "keep_dims")?;
        let skip_mode = Self::flag(ctx, 3, "skip_mode")?;
        let shape = ctx.input_shape(0)?;
        let axes = ctx.input_value(1)?;
        let table = ctx.symbols();

        let dims = table.elements(shape).map(|e| e.to_vec());
        let axes_value = if table.is_literal(axes) {
            table.value(axes)
        } else {
            None
        };
        let (Some(dims), Some(axes_value)) = (dims, axes_value) else {
            return Ok(table.emit(
                ReduceShape {
                    keep_dims,
                    skip_mode,
                },
                &[shape, axes],
            ));
        };

        let axes: Vec<i64> = match axes_value {
            SymValue::Int(axis) => vec![axis],
            other => other.to_ints().ok_or(BuildError::InvalidInput {
                index: 1,
                reason: "axes must be integers",
            })?,
        };
        if axes.is_empty() && skip_mode {
            return Ok(shape);
        }

        let mut reduced = vec![axes.is_empty(); dims.len()];
        for axis in axes {
            reduced[resolve_axis(axis, dims.len(), 1)?] = true;
        }
        let mut out = Vec::with_capacity(dims.len());
        for (dim, reduced) in dims.into_iter().zip(reduced) {
            match (reduced, keep_dims) {
                (false, _) => out.push(dim),
                (true, true) => out.push(table.int(1)),
                (true, false) => {}
            }
        }
        Ok(table.list(out))
    }
}
