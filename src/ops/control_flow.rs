use smallvec::{smallvec, SmallVec};
use symshape_symbols::ops::Select;
use symshape_symbols::{SymbolId, SymbolKind, SymbolTable};

use crate::op_registry::{BuildContext, BuildError, DependOn, OperationBuilder};
use crate::value::Primitive;

/// Joins the outputs of the two branches of a conditional.
///
/// Inputs are `(cond, true_output, false_output)`. Parts of the outputs which
/// are equal in both branches are kept, other parts are selected by `cond`.
#[derive(Debug)]
pub struct ControlFlowJoin;

impl ControlFlowJoin {
    fn join(
        table: &mut SymbolTable,
        cond: SymbolId,
        on_true: SymbolId,
        on_false: SymbolId,
    ) -> Result<SymbolId, BuildError> {
        if table.equals(on_true, on_false) {
            return Ok(on_true);
        }
        let kind = table.kind(on_true);
        if kind != table.kind(on_false) {
            return Err(BuildError::InvalidInput {
                index: 2,
                reason: "branches produce different kinds of values",
            });
        }
        if kind == SymbolKind::List {
            if let (Some(a), Some(b)) = (table.elements(on_true), table.elements(on_false)) {
                if a.len() == b.len() {
                    let pairs: Vec<_> = std::iter::zip(a.to_vec(), b.to_vec()).collect();
                    let mut items = Vec::with_capacity(pairs.len());
                    for (a, b) in pairs {
                        items.push(Self::join(table, cond, a, b)?);
                    }
                    return Ok(table.list(items));
                }
            }
        }
        Ok(table.emit(Select::new(kind), &[cond, on_true, on_false]))
    }
}

impl OperationBuilder for ControlFlowJoin {
    fn depends(&self, _prim: &Primitive, depend_value: bool) -> SmallVec<[DependOn; 4]> {
        if depend_value {
            smallvec![DependOn::Value; 3]
        } else {
            smallvec![DependOn::Value, DependOn::Shape, DependOn::Shape]
        }
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let cond = ctx.input_value(0)?;
        let on_true = ctx.input_shape(1)?;
        let on_false = ctx.input_shape(2)?;
        Self::join(ctx.symbols(), cond, on_true, on_false)
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let cond = ctx.input_value(0)?;
        let on_true = ctx.input_value(1)?;
        let on_false = ctx.input_value(2)?;
        Self::join(ctx.symbols(), cond, on_true, on_false)
    }
}

/// Calls the forward function produced by a `J` transform.
///
/// The output is a tuple of the forward output and the backward function.
/// Only the shapes of the arguments are known, so the shape is the list of
/// argument shapes.
#[derive(Debug)]
pub struct JFuncCaller;

impl OperationBuilder for JFuncCaller {
    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let shapes = ctx.input_shapes()?;
        Ok(ctx.symbols().list(shapes))
    }
}

#[cfg(test)]
mod tests {
    use symshape_symbols::{SymValue, SymbolTable};

    use super::{ControlFlowJoin, JFuncCaller};
    use crate::abstract_value::{AbstractValue, DataType};
    use crate::dims;
    use crate::op_registry::{BuildContext, BuildError, OperationBuilder};
    use crate::value::{Primitive, Value};

    #[test]
    fn test_join_shapes() {
        let prim = Primitive::new("ControlFlowJoin");
        let output = AbstractValue::tensor(DataType::Float32, dims![2, ?]);
        let mut inputs = [
            AbstractValue::scalar(DataType::Bool),
            AbstractValue::tensor(DataType::Float32, dims![2, 3]),
            AbstractValue::tensor(DataType::Float32, dims![2, ?]),
        ];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);
        let shape = ControlFlowJoin.build_shape(&mut ctx).unwrap();

        let dims = table.elements(shape).unwrap().to_vec();
        assert_eq!(table.int_value(dims[0]), Some(2));
        assert!(!table.is_literal(dims[1]));

        let cond = inputs[0].symbolic_value().unwrap();
        let on_false = inputs[2].symbolic_shape().unwrap();
        let size = table.elements(on_false).unwrap()[1];
        table.update(cond, Some(&SymValue::Bool(false))).unwrap();
        table.update(size, Some(&SymValue::Int(7))).unwrap();
        table.run_operations();
        assert_eq!(table.value(shape), Some(SymValue::ints(&[2, 7])));
    }

    #[test]
    fn test_join_known_condition() {
        let prim = Primitive::new("ControlFlowJoin");
        let output = AbstractValue::scalar(DataType::Int64);
        let mut inputs = [
            AbstractValue::from_value(&Value::Bool(true)),
            AbstractValue::from_value(&Value::Int(4)),
            AbstractValue::scalar(DataType::Int64),
        ];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);
        let value = ControlFlowJoin.build_value(&mut ctx).unwrap();
        assert_eq!(table.int_value(value), Some(4));
    }

    #[test]
    fn test_join_mismatched_kinds() {
        let prim = Primitive::new("ControlFlowJoin");
        let output = AbstractValue::scalar(DataType::Int64);
        let mut inputs = [
            AbstractValue::scalar(DataType::Bool),
            AbstractValue::scalar(DataType::Int64),
            AbstractValue::tensor(DataType::Int64, dims![?]),
        ];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);
        assert!(matches!(
            ControlFlowJoin.build_value(&mut ctx),
            Err(BuildError::InvalidInput { index: 2, .. })
        ));
    }

    #[test]
    fn test_j_func_caller_shape() {
        let prim = Primitive::new("JFuncCaller");
        let output = AbstractValue::tuple(Vec::new());
        let mut inputs = [
            AbstractValue::tensor(DataType::Float32, dims![?, 2]),
            AbstractValue::scalar(DataType::Float32),
        ];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);
        let shape = JFuncCaller.build_shape(&mut ctx).unwrap();
        assert_eq!(table.raw_string(shape), "[[s0, 2], []]");
    }
}
