use smallvec::{smallvec, SmallVec};
use symshape_symbols::ops::{
    ListConcat, ListGetItem, ListLen, ListProduct, ReshapeShape, ScalarAdd, ScalarFloorDiv,
    ScalarMul,
};
use symshape_symbols::{SymbolId, SymbolKind};

use super::{known_elements, resolve_axis};
use crate::op_registry::{BuildContext, BuildError, DependOn, OperationBuilder};
use crate::value::Primitive;

/// Returns the shape of its input as a 1D tensor.
#[derive(Debug)]
pub struct Shape;

impl OperationBuilder for Shape {
    fn depends(&self, _prim: &Primitive, _depend_value: bool) -> SmallVec<[DependOn; 4]> {
        smallvec![DependOn::Shape]
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let shape = ctx.input_shape(0)?;
        let table = ctx.symbols();
        let rank = match table.elements(shape).map(|e| e.len()) {
            Some(rank) => table.int(rank as i64),
            None => table.emit(ListLen, &[shape]),
        };
        Ok(table.list(vec![rank]))
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        ctx.input_shape(0)
    }
}

#[derive(Debug)]
pub struct Reshape;

impl OperationBuilder for Reshape {
    fn depends(&self, _prim: &Primitive, depend_value: bool) -> SmallVec<[DependOn; 4]> {
        if depend_value {
            smallvec![DependOn::Value, DependOn::Value]
        } else {
            smallvec![DependOn::Shape, DependOn::Value]
        }
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let input = ctx.input_shape(0)?;
        let target = ctx.input_value(1)?;
        let table = ctx.symbols();

        let Some(sizes) = table.elements(target).map(|e| e.to_vec()) else {
            return Ok(table.emit(ReshapeShape, &[input, target]));
        };

        // A `-1` in the target is filled in from the element count. Other
        // sizes must be known to be non-negative to use them directly.
        let is_fill = |id| table.is_literal(id) && table.int_value(id) == Some(-1);
        let fill: Vec<usize> = (0..sizes.len()).filter(|&i| is_fill(sizes[i])).collect();
        let all_sizes = sizes.iter().all(|&id| {
            is_fill(id) || table.bounds(id).is_some_and(|(min, _)| min >= 0)
        });

        match fill.as_slice() {
            [] if all_sizes => Ok(target),
            &[fill_index] if all_sizes => {
                let numel = table.emit(ListProduct, &[input]);
                let mut known = table.int(1);
                for (i, &size) in sizes.iter().enumerate() {
                    if i != fill_index {
                        known = table.emit(ScalarMul, &[known, size]);
                    }
                }
                let mut dims = sizes;
                dims[fill_index] = table.emit(ScalarFloorDiv, &[numel, known]);
                Ok(table.list(dims))
            }
            _ => Ok(table.emit(ReshapeShape, &[input, target])),
        }
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        ctx.input_value(0)
    }
}

/// Extracts an item from a tuple or a 1D tensor.
#[derive(Debug)]
pub struct TupleGetItem;

impl OperationBuilder for TupleGetItem {
    fn depends(&self, _prim: &Primitive, depend_value: bool) -> SmallVec<[DependOn; 4]> {
        if depend_value {
            smallvec![DependOn::Value, DependOn::Value]
        } else {
            smallvec![DependOn::Shape, DependOn::Value]
        }
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let shape = ctx.input_shape(0)?;
        let index = ctx.input_value(1)?;
        Ok(ctx.emit(ListGetItem::new(SymbolKind::List), &[shape, index]))
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let kind = ctx.output().value_kind();
        let value = ctx.input_value(0)?;
        let index = ctx.input_value(1)?;
        Ok(ctx.emit(ListGetItem::new(kind), &[value, index]))
    }
}

#[derive(Debug)]
pub struct MakeTuple;

impl OperationBuilder for MakeTuple {
    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let shapes = ctx.input_shapes()?;
        Ok(ctx.symbols().list(shapes))
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let values = ctx.input_values()?;
        Ok(ctx.symbols().list(values))
    }
}

/// Concatenates tensors along the axis given by the `axis` attribute.
#[derive(Debug)]
pub struct Concat;

impl OperationBuilder for Concat {
    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let axis = ctx.prim().int_attr("axis").unwrap_or(0);
        let shapes = ctx.input_shapes()?;
        let table = ctx.symbols();

        let first = *shapes.first().ok_or(BuildError::MissingInput(0))?;
        let mut dims = known_elements(table, first, 0)?;
        let axis = resolve_axis(axis, dims.len(), 0)?;
        for (index, &shape) in shapes.iter().enumerate().skip(1) {
            let other = known_elements(table, shape, index)?;
            if other.len() != dims.len() {
                return Err(BuildError::InvalidInput {
                    index,
                    reason: "inputs have different ranks",
                });
            }
            dims[axis] = table.emit(ScalarAdd, &[dims[axis], other[axis]]);
        }
        Ok(table.list(dims))
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let values = ctx.input_values()?;
        Ok(ctx.emit(ListConcat, &values))
    }
}

/// Passes through its first input. Later inputs only order side effects.
///
/// This is used for `Depend` and `Load`.
#[derive(Debug)]
pub struct Depend;

impl OperationBuilder for Depend {
    fn depends(&self, _prim: &Primitive, depend_value: bool) -> SmallVec<[DependOn; 4]> {
        if depend_value {
            smallvec![DependOn::Value]
        } else {
            smallvec![DependOn::Shape]
        }
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        ctx.input_shape(0)
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        ctx.input_value(0)
    }
}

/// Orders side effects. None of its inputs are needed to build symbols.
#[derive(Debug)]
pub struct UpdateState;

impl OperationBuilder for UpdateState {
    fn depends(&self, _prim: &Primitive, _depend_value: bool) -> SmallVec<[DependOn; 4]> {
        smallvec![DependOn::Nothing]
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        Ok(ctx.symbols().list(Vec::new()))
    }
}
