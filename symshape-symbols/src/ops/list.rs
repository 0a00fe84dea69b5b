use crate::operation::{expect_inputs, int_input, ints_input, EvalError, Operation};
use crate::symbol::{SymValue, SymbolId, SymbolKind};
use crate::table::SymbolTable;

/// Product of a list of integers, eg. the number of elements in a shape.
#[derive(Debug)]
pub struct ListProduct;

impl Operation for ListProduct {
    fn name(&self) -> &str {
        "ListProduct"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::Int
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        expect_inputs::<1>(inputs)?;
        let values = ints_input(inputs, 0)?;
        Ok(SymValue::Int(
            values.into_iter().fold(1i64, |acc, x| acc.saturating_mul(x)),
        ))
    }

    fn simplify(&self, table: &mut SymbolTable, inputs: &[SymbolId]) -> Option<SymbolId> {
        match table.elements(*inputs.first()?)? {
            [single] => Some(*single),
            _ => None,
        }
    }
}

/// Length of a list, eg. the rank of a shape.
#[derive(Debug)]
pub struct ListLen;

impl Operation for ListLen {
    fn name(&self) -> &str {
        "ListLen"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::Int
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        let [list] = expect_inputs::<1>(inputs)?;
        let items = list.as_list().ok_or(EvalError::InvalidValue {
            index: 0,
            reason: "expected a list",
        })?;
        Ok(SymValue::Int(items.len() as i64))
    }

    fn simplify(&self, table: &mut SymbolTable, inputs: &[SymbolId]) -> Option<SymbolId> {
        let len = table.elements(*inputs.first()?)?.len();
        Some(table.int(len as i64))
    }
}

/// Extract an item from a list. Negative indices count from the end.
#[derive(Debug)]
pub struct ListGetItem {
    kind: SymbolKind,
}

impl ListGetItem {
    /// Create an operation which extracts an item of a given kind.
    pub fn new(kind: SymbolKind) -> ListGetItem {
        ListGetItem { kind }
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 {
        index + len as i64
    } else {
        index
    };
    (index >= 0 && (index as usize) < len).then_some(index as usize)
}

impl Operation for ListGetItem {
    fn name(&self) -> &str {
        "ListGetItem"
    }

    fn output_kind(&self) -> SymbolKind {
        self.kind
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        let [list, _] = expect_inputs::<2>(inputs)?;
        let index = int_input(inputs, 1)?;
        let items = list.as_list().ok_or(EvalError::InvalidValue {
            index: 0,
            reason: "expected a list",
        })?;
        resolve_index(index, items.len())
            .map(|i| items[i].clone())
            .ok_or(EvalError::InvalidValue {
                index: 1,
                reason: "index out of range",
            })
    }

    fn simplify(&self, table: &mut SymbolTable, inputs: &[SymbolId]) -> Option<SymbolId> {
        let &[list, index] = inputs else {
            return None;
        };
        let index = table.int_value(index).filter(|_| table.is_literal(index))?;
        let elements = table.elements(list)?;
        resolve_index(index, elements.len()).map(|i| elements[i])
    }
}

/// Concatenate lists.
#[derive(Debug)]
pub struct ListConcat;

impl Operation for ListConcat {
    fn name(&self) -> &str {
        "ListConcat"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::List
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        let mut items = Vec::new();
        for (index, input) in inputs.iter().enumerate() {
            let list = input.as_list().ok_or(EvalError::InvalidValue {
                index,
                reason: "expected a list",
            })?;
            items.extend_from_slice(list);
        }
        Ok(SymValue::List(items))
    }

    fn simplify(&self, table: &mut SymbolTable, inputs: &[SymbolId]) -> Option<SymbolId> {
        let mut elements = Vec::new();
        for &input in inputs {
            elements.extend_from_slice(table.elements(input)?);
        }
        Some(table.list(elements))
    }
}

#[cfg(test)]
mod tests {
    use super::{ListConcat, ListGetItem, ListLen, ListProduct};
    use crate::operation::{EvalError, Operation};
    use crate::{SymValue, SymbolKind, SymbolTable};

    #[test]
    fn test_list_product() {
        assert_eq!(
            ListProduct.eval(&[SymValue::ints(&[2, 3, 4])]),
            Ok(SymValue::Int(24))
        );
        assert_eq!(ListProduct.eval(&[SymValue::ints(&[])]), Ok(SymValue::Int(1)));
    }

    #[test]
    fn test_list_get_item() {
        let op = ListGetItem::new(SymbolKind::Int);
        let list = SymValue::ints(&[5, 6, 7]);
        assert_eq!(
            op.eval(&[list.clone(), SymValue::Int(-1)]),
            Ok(SymValue::Int(7))
        );
        assert!(matches!(
            op.eval(&[list, SymValue::Int(3)]),
            Err(EvalError::InvalidValue { index: 1, .. })
        ));
    }

    #[test]
    fn test_simplify_known_length() {
        let mut table = SymbolTable::new();
        let dim = table.unknown(SymbolKind::Int);
        let two = table.int(2);
        let shape = table.list(vec![dim, two]);
        let index = table.int(0);

        let len = table.emit(ListLen, &[shape]);
        assert_eq!(table.int_value(len), Some(2));

        let item = table.emit(ListGetItem::new(SymbolKind::Int), &[shape, index]);
        assert_eq!(item, dim);

        let opaque = table.unknown(SymbolKind::List);
        let concat = table.emit(ListConcat, &[shape, opaque]);
        assert!(table.elements(concat).is_none());
        assert_eq!(table.num_operations(), 1);

        table
            .update(opaque, Some(&SymValue::ints(&[8])))
            .unwrap();
        table.update(dim, Some(&SymValue::Int(1))).unwrap();
        table.run_operations();
        assert_eq!(table.value(concat), Some(SymValue::ints(&[1, 2, 8])));
    }
}
