use smallvec::{smallvec, SmallVec};
use symshape_symbols::ops::{BroadcastGradientArgs, BroadcastShape, ListGetItem, ListLen};
use symshape_symbols::{SymbolId, SymbolKind};

use crate::op_registry::{BuildContext, BuildError, DependOn, OperationBuilder};
use crate::value::Primitive;

/// Shape function computed by a [`ShapeCalc`] node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShapeFunctor {
    /// Reduction axes for the gradients of a broadcasting binary operator.
    BroadcastGradientArgs,

    /// Output shape of a broadcasting binary operator.
    BroadcastShape,
}

impl ShapeFunctor {
    fn from_name(name: &str) -> Option<ShapeFunctor> {
        match name {
            "BroadcastGradientArgs" => Some(ShapeFunctor::BroadcastGradientArgs),
            "BroadcastShape" => Some(ShapeFunctor::BroadcastShape),
            _ => None,
        }
    }
}

/// Operator which computes a shape-derived value from the values of its
/// inputs, which are usually shapes.
///
/// The function is fixed when the builder is created, or otherwise read from
/// the node's `functor` attribute.
#[derive(Debug)]
pub struct ShapeCalc {
    functor: Option<ShapeFunctor>,
}

impl ShapeCalc {
    pub fn from_attrs() -> ShapeCalc {
        ShapeCalc { functor: None }
    }

    pub fn with_functor(functor: ShapeFunctor) -> ShapeCalc {
        ShapeCalc {
            functor: Some(functor),
        }
    }

    fn functor(&self, prim: &Primitive) -> Result<ShapeFunctor, BuildError> {
        if let Some(functor) = self.functor {
            return Ok(functor);
        }
        let name = prim.str_attr("functor").unwrap_or_default();
        ShapeFunctor::from_name(name)
            .ok_or_else(|| BuildError::Unsupported(format!("shape functor \"{}\"", name)))
    }
}

impl OperationBuilder for ShapeCalc {
    fn depends(&self, _prim: &Primitive, _depend_value: bool) -> SmallVec<[DependOn; 4]> {
        smallvec![DependOn::Value, DependOn::Value]
    }

    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let functor = self.functor(ctx.prim())?;
        let value = match ctx.output().symbolic_value() {
            Some(value) => value,
            None => self.build_value(ctx)?,
        };
        let table = ctx.symbols();
        match functor {
            ShapeFunctor::BroadcastGradientArgs => {
                let mut shapes = Vec::with_capacity(2);
                for i in 0..2 {
                    let index = table.int(i);
                    let axes = table.emit(ListGetItem::new(SymbolKind::List), &[value, index]);
                    let len = table.emit(ListLen, &[axes]);
                    shapes.push(table.list(vec![len]));
                }
                Ok(table.list(shapes))
            }
            ShapeFunctor::BroadcastShape => {
                let rank = table.emit(ListLen, &[value]);
                Ok(table.list(vec![rank]))
            }
        }
    }

    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        let functor = self.functor(ctx.prim())?;
        let a = ctx.input_value(0)?;
        let b = ctx.input_value(1)?;
        Ok(match functor {
            ShapeFunctor::BroadcastGradientArgs => ctx.emit(BroadcastGradientArgs, &[a, b]),
            ShapeFunctor::BroadcastShape => ctx.emit(BroadcastShape, &[a, b]),
        })
    }
}

#[cfg(test)]
mod tests {
    use symshape_symbols::{SymValue, SymbolTable};

    use super::{ShapeCalc, ShapeFunctor};
    use crate::abstract_value::{AbstractValue, DataType};
    use crate::dims;
    use crate::op_registry::{BuildContext, BuildError, OperationBuilder};
    use crate::value::{Primitive, Value};

    fn shape_of(len: i64) -> AbstractValue {
        AbstractValue::tensor(DataType::Int64, dims![len])
    }

    #[test]
    fn test_broadcast_gradient_args() {
        let prim = Primitive::new("ShapeCalc").with_attr("functor", "BroadcastGradientArgs");
        let output = AbstractValue::tuple(vec![
            AbstractValue::tensor(DataType::Int64, dims![?]),
            AbstractValue::tensor(DataType::Int64, dims![?]),
        ]);
        let mut inputs = [
            shape_of(2),
            AbstractValue::from_value(&Value::Ints(vec![5])),
        ];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);
        let value = ShapeCalc::from_attrs().build_value(&mut ctx).unwrap();
        let shape = ShapeCalc::from_attrs().build_shape(&mut ctx).unwrap();

        let a = inputs[0].symbolic_value().unwrap();
        table.update(a, Some(&SymValue::ints(&[3, 5]))).unwrap();
        table.run_operations();

        let expected = SymValue::List(vec![SymValue::ints(&[]), SymValue::ints(&[0])]);
        assert_eq!(table.value(value), Some(expected));
        let expected_shape = SymValue::List(vec![SymValue::ints(&[0]), SymValue::ints(&[1])]);
        assert_eq!(table.value(shape), Some(expected_shape));
    }

    #[test]
    fn test_fixed_functor() {
        let prim = Primitive::new("BroadcastShape");
        let output = AbstractValue::tensor(DataType::Int64, dims![?]);
        let mut inputs = [
            AbstractValue::from_value(&Value::Ints(vec![4, 1])),
            AbstractValue::from_value(&Value::Ints(vec![3])),
        ];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);
        let value = ShapeCalc::with_functor(ShapeFunctor::BroadcastShape)
            .build_value(&mut ctx)
            .unwrap();
        assert_eq!(table.value(value), Some(SymValue::ints(&[4, 3])));
    }

    #[test]
    fn test_unknown_functor() {
        let prim = Primitive::new("ShapeCalc").with_attr("functor", "Transpose");
        let output = AbstractValue::tensor(DataType::Int64, dims![?]);
        let mut inputs = [shape_of(2), shape_of(2)];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);
        assert_eq!(
            ShapeCalc::from_attrs().build_value(&mut ctx),
            Err(BuildError::Unsupported("shape functor \"Transpose\"".into()))
        );
    }
}
