use std::fmt::Write;
use std::rc::Rc;

use log::debug;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::operation::Operation;
use crate::sym_expr::SymExpr;
use crate::symbol::{SymValue, SymbolError, SymbolId, SymbolKind};

struct SymbolEntry {
    kind: SymbolKind,

    /// Element symbols of a list whose length is known. The data of such a
    /// list is the data of its elements.
    elements: Option<Vec<SymbolId>>,

    /// Data of a scalar, or of a list with unknown length.
    data: Option<SymValue>,

    /// True if the symbol was created from known data. Literals never change.
    literal: bool,

    /// Index of the operation which produces this symbol.
    operation: Option<usize>,
}

struct OperationEntry {
    op: Rc<dyn Operation>,
    inputs: SmallVec<[SymbolId; 4]>,
    output: SymbolId,
}

/// Arena which owns symbols and the operations that compute them.
///
/// Symbols are referred to by [`SymbolId`] handles. A symbol is either a
/// *literal*, created from known data, or a *placeholder* whose data is
/// supplied later, either by [`update`](SymbolTable::update) (for graph
/// inputs) or by evaluating the operation that produces it (see
/// [`run_operations`](SymbolTable::run_operations)).
#[derive(Default)]
pub struct SymbolTable {
    symbols: Vec<SymbolEntry>,
    operations: Vec<OperationEntry>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Return the number of symbols in the table.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn push(&mut self, entry: SymbolEntry) -> SymbolId {
        let id = SymbolId::from_index(self.symbols.len());
        self.symbols.push(entry);
        id
    }

    fn entry(&self, id: SymbolId) -> &SymbolEntry {
        &self.symbols[id.as_usize()]
    }

    /// Create a literal integer.
    pub fn int(&mut self, value: i64) -> SymbolId {
        self.literal(&SymValue::Int(value))
    }

    /// Create a literal list of integers.
    pub fn ints(&mut self, values: &[i64]) -> SymbolId {
        self.literal(&SymValue::ints(values))
    }

    /// Create a literal from known data.
    pub fn literal(&mut self, value: &SymValue) -> SymbolId {
        match value {
            SymValue::List(items) => {
                let elements = items.iter().map(|item| self.literal(item)).collect();
                self.list(elements)
            }
            scalar => self.push(SymbolEntry {
                kind: scalar.kind(),
                elements: None,
                data: Some(scalar.clone()),
                literal: true,
                operation: None,
            }),
        }
    }

    /// Create a placeholder of a given kind.
    ///
    /// A list placeholder has unknown length.
    pub fn unknown(&mut self, kind: SymbolKind) -> SymbolId {
        self.push(SymbolEntry {
            kind,
            elements: None,
            data: None,
            literal: false,
            operation: None,
        })
    }

    /// Create a list from element symbols.
    ///
    /// The list is a literal if all of its elements are.
    pub fn list(&mut self, elements: Vec<SymbolId>) -> SymbolId {
        let literal = elements.iter().all(|&id| self.is_literal(id));
        self.push(SymbolEntry {
            kind: SymbolKind::List,
            elements: Some(elements),
            data: None,
            literal,
            operation: None,
        })
    }

    pub fn kind(&self, id: SymbolId) -> SymbolKind {
        self.entry(id).kind
    }

    pub fn is_literal(&self, id: SymbolId) -> bool {
        self.entry(id).literal
    }

    /// Return the elements of a list with known length.
    pub fn elements(&self, id: SymbolId) -> Option<&[SymbolId]> {
        self.entry(id).elements.as_deref()
    }

    /// Return true if the symbol's value is fully known.
    pub fn has_data(&self, id: SymbolId) -> bool {
        let entry = self.entry(id);
        match &entry.elements {
            Some(elements) => elements.iter().all(|&id| self.has_data(id)),
            None => entry.data.is_some(),
        }
    }

    /// Return the current value of a symbol, if it is fully known.
    pub fn value(&self, id: SymbolId) -> Option<SymValue> {
        let entry = self.entry(id);
        match &entry.elements {
            Some(elements) => elements
                .iter()
                .map(|&id| self.value(id))
                .collect::<Option<Vec<_>>>()
                .map(SymValue::List),
            None => entry.data.clone(),
        }
    }

    pub fn int_value(&self, id: SymbolId) -> Option<i64> {
        self.entry(id).data.as_ref().and_then(|v| v.as_int())
    }

    pub fn bool_value(&self, id: SymbolId) -> Option<bool> {
        self.entry(id).data.as_ref().and_then(|v| v.as_bool())
    }

    /// Return the operation which produces a symbol and its inputs.
    pub fn operation(&self, id: SymbolId) -> Option<(&dyn Operation, &[SymbolId])> {
        let index = self.entry(id).operation?;
        let entry = &self.operations[index];
        Some((entry.op.as_ref(), &entry.inputs))
    }

    /// Return the textual form of a symbol.
    ///
    /// Known values print as their data, lists with known length as
    /// `[a, b, ...]` and unknown scalars as `s<N>` (integers), `b<N>` (bools)
    /// or `f<N>` (floats). Lists of unknown length print as `l<N>`.
    pub fn raw_string(&self, id: SymbolId) -> String {
        let entry = self.entry(id);
        if let Some(elements) = &entry.elements {
            let items: Vec<_> = elements.iter().map(|&id| self.raw_string(id)).collect();
            return format!("[{}]", items.join(", "));
        }
        if let Some(data) = &entry.data {
            return data.to_string();
        }
        self.name(id)
    }

    /// Return the name of a symbol, ignoring its data.
    fn name(&self, id: SymbolId) -> String {
        let prefix = match self.kind(id) {
            SymbolKind::Int => 's',
            SymbolKind::Bool => 'b',
            SymbolKind::Float => 'f',
            SymbolKind::List => 'l',
        };
        format!("{}{}", prefix, id)
    }

    /// Return a string which describes how an unknown symbol is computed, eg.
    /// `ScalarMul(s3, 2)`.
    ///
    /// Symbols with known values, lists and symbols named in `known` are
    /// printed using their [raw string](Self::raw_string).
    pub fn expr_string(&self, id: SymbolId, known: &FxHashMap<String, String>) -> String {
        let raw = self.raw_string(id);
        if self.kind(id) == SymbolKind::List || self.has_data(id) || known.contains_key(&raw) {
            return raw;
        }
        let Some((op, inputs)) = self.operation(id) else {
            return raw;
        };
        let args: Vec<_> = inputs
            .iter()
            .map(|&input| self.expr_string(input, known))
            .collect();
        format!("{}({})", op.name(), args.join(", "))
    }

    /// Update the data of a symbol from a concrete value.
    ///
    /// Placeholders are overwritten. Lists with known length are updated
    /// element-wise. Literals accept only their own value; passing `None`
    /// (unknown) leaves them unchanged.
    pub fn update(&mut self, id: SymbolId, value: Option<&SymValue>) -> Result<(), SymbolError> {
        let entry = self.entry(id);
        if let Some(elements) = entry.elements.clone() {
            return match value {
                None => elements
                    .into_iter()
                    .try_for_each(|element| self.update(element, None)),
                Some(SymValue::List(items)) if items.len() == elements.len() => elements
                    .into_iter()
                    .zip(items)
                    .try_for_each(|(element, item)| self.update(element, Some(item))),
                Some(SymValue::List(items)) => Err(SymbolError::RankMismatch {
                    symbol: self.raw_string(id),
                    expected: elements.len(),
                    actual: items.len(),
                }),
                Some(_) => Err(SymbolError::KindMismatch {
                    symbol: self.raw_string(id),
                    expected: SymbolKind::List,
                }),
            };
        }

        if entry.literal {
            return match value {
                None => Ok(()),
                Some(new) if entry.data.as_ref() == Some(new) => Ok(()),
                Some(new) => Err(SymbolError::LiteralMismatch {
                    symbol: self.name(id),
                    current: self.raw_string(id),
                    new: new.to_string(),
                }),
            };
        }

        if let Some(new) = value {
            if new.kind() != entry.kind {
                return Err(SymbolError::KindMismatch {
                    symbol: self.raw_string(id),
                    expected: entry.kind,
                });
            }
        }
        self.symbols[id.as_usize()].data = value.cloned();
        Ok(())
    }

    /// Set the data of an operation output. Each output can be assigned once
    /// per evaluation cycle.
    fn assign(&mut self, id: SymbolId, value: SymValue) -> Result<(), SymbolError> {
        let entry = &self.symbols[id.as_usize()];
        if entry.data.is_some() {
            return Err(SymbolError::AlreadyAssigned(self.raw_string(id)));
        }
        if value.kind() != entry.kind {
            return Err(SymbolError::KindMismatch {
                symbol: self.raw_string(id),
                expected: entry.kind,
            });
        }
        self.symbols[id.as_usize()].data = Some(value);
        Ok(())
    }

    /// Return a symbol for the output of `op` applied to `inputs`.
    ///
    /// If all inputs are literals the operation is evaluated immediately and
    /// a literal is returned. Otherwise, if the operation can be simplified to
    /// an existing symbol, that symbol is returned. Otherwise the operation is
    /// recorded and its output is a new placeholder.
    pub fn emit<Op: Operation + 'static>(&mut self, op: Op, inputs: &[SymbolId]) -> SymbolId {
        self.emit_shared(Rc::new(op), inputs)
    }

    fn emit_shared(&mut self, op: Rc<dyn Operation>, inputs: &[SymbolId]) -> SymbolId {
        if inputs.iter().all(|&id| self.is_literal(id)) {
            let values: Option<Vec<_>> = inputs.iter().map(|&id| self.value(id)).collect();
            if let Some(values) = values {
                match op.eval(&values) {
                    Ok(value) => return self.literal(&value),
                    Err(err) => debug!("Failed to fold {} on literals: {}", op.name(), err),
                }
            }
        }

        if let Some(id) = op.simplify(self, inputs) {
            return id;
        }

        let output = self.push(SymbolEntry {
            kind: op.output_kind(),
            elements: None,
            data: None,
            literal: false,
            operation: Some(self.operations.len()),
        });
        self.operations.push(OperationEntry {
            op,
            inputs: inputs.into(),
            output,
        });
        output
    }

    /// Return a symbol computed like `id`, but with the symbols that are keys
    /// of `map` replaced by their values.
    ///
    /// Lists are rebuilt from substituted elements and operations whose
    /// inputs change are emitted again. Symbols which depend on no key of
    /// `map` are returned unchanged.
    pub fn substitute(&mut self, id: SymbolId, map: &FxHashMap<SymbolId, SymbolId>) -> SymbolId {
        let mut done = map.clone();
        self.substitute_inner(id, &mut done)
    }

    fn substitute_inner(
        &mut self,
        id: SymbolId,
        done: &mut FxHashMap<SymbolId, SymbolId>,
    ) -> SymbolId {
        if let Some(&new) = done.get(&id) {
            return new;
        }
        let elements = self.entry(id).elements.clone();
        let operation = self.entry(id).operation;

        let new = if let Some(elements) = elements {
            let new_elements: Vec<_> = elements
                .iter()
                .map(|&element| self.substitute_inner(element, done))
                .collect();
            if new_elements == elements {
                id
            } else {
                self.list(new_elements)
            }
        } else if let Some(index) = operation {
            let op = Rc::clone(&self.operations[index].op);
            let inputs = self.operations[index].inputs.clone();
            let new_inputs: SmallVec<[SymbolId; 4]> = inputs
                .iter()
                .map(|&input| self.substitute_inner(input, done))
                .collect();
            if new_inputs == inputs {
                id
            } else {
                self.emit_shared(op, &new_inputs)
            }
        } else {
            id
        };
        done.insert(id, new);
        new
    }

    /// Return the number of recorded operations.
    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    /// Clear the outputs of all recorded operations, so that they can be
    /// recomputed from new inputs.
    pub fn reset_operations(&mut self) {
        for op in &self.operations {
            self.symbols[op.output.as_usize()].data = None;
        }
    }

    /// Evaluate recorded operations in the order they were emitted.
    ///
    /// Operations whose inputs are not all known are skipped, leaving their
    /// outputs unresolved. Returns the number of operations evaluated.
    pub fn run_operations(&mut self) -> usize {
        let mut evaluated = 0;
        for index in 0..self.operations.len() {
            let output = self.operations[index].output;
            if self.entry(output).data.is_some() {
                continue;
            }
            let inputs: Option<Vec<_>> = self.operations[index]
                .inputs
                .iter()
                .map(|&id| self.value(id))
                .collect();
            let Some(inputs) = inputs else {
                continue;
            };

            let result = self.operations[index].op.eval(&inputs);
            match result.map_err(|err| err.to_string()).and_then(|value| {
                self.assign(output, value).map_err(|err| err.to_string())
            }) {
                Ok(()) => evaluated += 1,
                Err(err) => debug!(
                    "Failed to evaluate {} for {}: {}",
                    self.operations[index].op.name(),
                    self.name(output),
                    err
                ),
            }
        }
        evaluated
    }

    /// Return true if two symbols are known to have equal values.
    ///
    /// This returns true if the symbols are the same, have equal known
    /// values, are lists with equal elements, are produced by the same
    /// operation from equal inputs, or are integer expressions which simplify
    /// to the same form.
    pub fn equals(&self, a: SymbolId, b: SymbolId) -> bool {
        if a == b {
            return true;
        }
        if self.kind(a) != self.kind(b) {
            return false;
        }
        if let (Some(a_val), Some(b_val)) = (self.value(a), self.value(b)) {
            return a_val == b_val;
        }
        if let (Some(a_elems), Some(b_elems)) = (self.elements(a), self.elements(b)) {
            return a_elems.len() == b_elems.len()
                && a_elems
                    .iter()
                    .zip(b_elems)
                    .all(|(&x, &y)| self.equals(x, y));
        }
        if let (Some((a_op, a_inputs)), Some((b_op, b_inputs))) =
            (self.operation(a), self.operation(b))
        {
            if a_op.name() == b_op.name() && a_inputs.len() == b_inputs.len() {
                let same_order = a_inputs
                    .iter()
                    .zip(b_inputs)
                    .all(|(&x, &y)| self.equals(x, y));
                let swapped = a_op.is_commutative()
                    && a_inputs.len() == 2
                    && self.equals(a_inputs[0], b_inputs[1])
                    && self.equals(a_inputs[1], b_inputs[0]);
                if same_order || swapped {
                    return true;
                }
            }
        }
        match (self.to_expr(a), self.to_expr(b)) {
            (Some(a_expr), Some(b_expr)) => a_expr.simplify() == b_expr.simplify(),
            _ => false,
        }
    }

    /// Return the integer expression for a symbol.
    ///
    /// Returns `None` if the symbol is not an integer.
    pub fn to_expr(&self, id: SymbolId) -> Option<SymExpr> {
        let entry = self.entry(id);
        if entry.kind != SymbolKind::Int {
            return None;
        }
        if let Some(value) = self.int_value(id) {
            return Some(SymExpr::Value(value));
        }
        let Some((op, inputs)) = self.operation(id) else {
            // Unknown inputs are dimension sizes.
            return Some(SymExpr::pos_var(&self.raw_string(id)));
        };
        let inputs: Option<Vec<_>> = inputs.iter().map(|&input| self.to_expr(input)).collect();
        inputs
            .and_then(|inputs| op.to_expr(&inputs))
            .or_else(|| Some(SymExpr::var(&self.raw_string(id))))
    }

    /// Return the inclusive range of values an integer symbol may have.
    pub fn bounds(&self, id: SymbolId) -> Option<(i64, i64)> {
        self.to_expr(id).map(|expr| expr.simplify().range())
    }

    /// Return a textual listing of recorded operations, one per line.
    pub fn dump_operations(&self) -> String {
        let mut out = String::new();
        for op in &self.operations {
            let inputs: Vec<_> = op.inputs.iter().map(|&id| self.raw_string(id)).collect();
            let _ = writeln!(
                out,
                "  {} = {}({})",
                self.name(op.output),
                op.op.name(),
                inputs.join(", ")
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashMap;

    use super::SymbolTable;
    use crate::ops::{BroadcastDim, ScalarAdd, ScalarMul, ScalarSub, Select};
    use crate::{SymValue, SymbolError, SymbolKind};

    #[test]
    fn test_literals() {
        let mut table = SymbolTable::new();
        let shape = table.ints(&[2, 3]);

        assert!(table.is_literal(shape));
        assert!(table.has_data(shape));
        assert_eq!(table.value(shape), Some(SymValue::ints(&[2, 3])));
        assert_eq!(table.raw_string(shape), "[2, 3]");
    }

    #[test]
    fn test_placeholders() {
        let mut table = SymbolTable::new();
        let dim = table.unknown(SymbolKind::Int);
        let four = table.int(4);
        let shape = table.list(vec![dim, four]);

        assert!(!table.is_literal(shape));
        assert!(!table.has_data(shape));
        assert_eq!(table.value(shape), None);
        assert_eq!(table.raw_string(shape), format!("[s{}, 4]", dim));

        table.update(shape, Some(&SymValue::ints(&[7, 4]))).unwrap();
        assert_eq!(table.value(shape), Some(SymValue::ints(&[7, 4])));
        assert_eq!(table.raw_string(shape), "[7, 4]");

        // Clearing the list clears placeholders but keeps literals.
        table.update(shape, None).unwrap();
        assert_eq!(table.int_value(dim), None);
        assert_eq!(table.int_value(four), Some(4));
    }

    #[test]
    fn test_update_literal() {
        let mut table = SymbolTable::new();
        let four = table.int(4);

        assert_eq!(table.update(four, Some(&SymValue::Int(4))), Ok(()));
        assert_eq!(table.update(four, None), Ok(()));
        assert!(matches!(
            table.update(four, Some(&SymValue::Int(5))),
            Err(SymbolError::LiteralMismatch { .. })
        ));
        assert_eq!(table.int_value(four), Some(4));
    }

    #[test]
    fn test_update_errors() {
        let mut table = SymbolTable::new();
        let dim = table.unknown(SymbolKind::Int);
        let shape = table.list(vec![dim]);

        assert!(matches!(
            table.update(dim, Some(&SymValue::Bool(true))),
            Err(SymbolError::KindMismatch { .. })
        ));
        assert!(matches!(
            table.update(shape, Some(&SymValue::ints(&[1, 2]))),
            Err(SymbolError::RankMismatch {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_emit_folds_literals() {
        let mut table = SymbolTable::new();
        let a = table.int(3);
        let b = table.int(4);

        let sum = table.emit(ScalarAdd, &[a, b]);

        assert!(table.is_literal(sum));
        assert_eq!(table.int_value(sum), Some(7));
        assert_eq!(table.num_operations(), 0);
    }

    #[test]
    fn test_emit_simplifies() {
        let mut table = SymbolTable::new();
        let x = table.unknown(SymbolKind::Int);
        let one = table.int(1);

        assert_eq!(table.emit(ScalarMul, &[x, one]), x);
        assert_eq!(table.emit(BroadcastDim, &[one, x]), x);
        assert_eq!(table.num_operations(), 0);
    }

    #[test]
    fn test_run_operations() {
        let mut table = SymbolTable::new();
        let x = table.unknown(SymbolKind::Int);
        let two = table.int(2);
        let doubled = table.emit(ScalarMul, &[x, two]);
        let plus_x = table.emit(ScalarAdd, &[doubled, x]);
        assert_eq!(table.num_operations(), 2);

        // Nothing to compute until the input is known.
        assert_eq!(table.run_operations(), 0);
        assert_eq!(table.int_value(plus_x), None);

        table.update(x, Some(&SymValue::Int(5))).unwrap();
        assert_eq!(table.run_operations(), 2);
        assert_eq!(table.int_value(doubled), Some(10));
        assert_eq!(table.int_value(plus_x), Some(15));

        // Outputs are single-assignment until reset.
        table.update(x, Some(&SymValue::Int(6))).unwrap();
        assert_eq!(table.run_operations(), 0);
        assert_eq!(table.int_value(plus_x), Some(15));

        table.reset_operations();
        assert_eq!(table.run_operations(), 2);
        assert_eq!(table.int_value(plus_x), Some(18));
    }

    #[test]
    fn test_equals() {
        let mut table = SymbolTable::new();
        let x = table.unknown(SymbolKind::Int);
        let y = table.unknown(SymbolKind::Int);
        let two = table.int(2);
        let also_two = table.int(2);

        assert!(table.equals(x, x));
        assert!(!table.equals(x, y));
        assert!(table.equals(two, also_two));

        // Same operation, with commutative inputs swapped.
        let a = table.emit(ScalarMul, &[x, y]);
        let b = table.emit(ScalarMul, &[y, x]);
        assert!(table.equals(a, b));

        // Algebraically equal expressions.
        let x_plus_2 = table.emit(ScalarAdd, &[x, two]);
        let back_to_x = table.emit(ScalarSub, &[x_plus_2, also_two]);
        assert!(table.equals(back_to_x, x));
        assert!(!table.equals(back_to_x, y));

        let list_a = table.list(vec![x, two]);
        let list_b = table.list(vec![x, also_two]);
        let list_c = table.list(vec![y, two]);
        assert!(table.equals(list_a, list_b));
        assert!(!table.equals(list_a, list_c));
    }

    #[test]
    fn test_bounds() {
        let mut table = SymbolTable::new();
        let x = table.unknown(SymbolKind::Int);
        let three = table.int(3);
        let sum = table.emit(ScalarAdd, &[x, three]);

        assert_eq!(table.bounds(sum), Some((3, i64::MAX)));
        assert_eq!(table.bounds(three), Some((3, 3)));
    }

    #[test]
    fn test_select() {
        let mut table = SymbolTable::new();
        let cond = table.unknown(SymbolKind::Bool);
        let two = table.int(2);
        let also_two = table.int(2);
        let dim = table.unknown(SymbolKind::Int);

        // Equal branches fold to a branch.
        let same = table.emit(Select::new(SymbolKind::Int), &[cond, two, also_two]);
        assert_eq!(table.int_value(same), Some(2));

        let joined = table.emit(Select::new(SymbolKind::Int), &[cond, two, dim]);
        assert!(!table.has_data(joined));

        table.update(cond, Some(&SymValue::Bool(false))).unwrap();
        table.update(dim, Some(&SymValue::Int(5))).unwrap();
        table.run_operations();
        assert_eq!(table.int_value(joined), Some(5));
    }

    #[test]
    fn test_substitute() {
        let mut table = SymbolTable::new();
        let x = table.unknown(SymbolKind::Int);
        let two = table.int(2);
        let doubled = table.emit(ScalarMul, &[x, two]);
        let shape = table.list(vec![doubled, two]);
        let y = table.unknown(SymbolKind::Int);

        let mut map = FxHashMap::default();
        map.insert(x, y);
        let new_shape = table.substitute(shape, &map);
        assert_ne!(new_shape, shape);
        assert_eq!(table.num_operations(), 2);

        // Symbols which do not depend on `x` are shared.
        let other = table.unknown(SymbolKind::Int);
        assert_eq!(table.substitute(other, &map), other);
        assert_eq!(table.substitute(two, &map), two);

        table.update(x, Some(&SymValue::Int(3))).unwrap();
        table.update(y, Some(&SymValue::Int(5))).unwrap();
        table.run_operations();
        assert_eq!(table.value(shape), Some(SymValue::ints(&[6, 2])));
        assert_eq!(table.value(new_shape), Some(SymValue::ints(&[10, 2])));

        // Substituting a literal folds the operation.
        let mut map = FxHashMap::default();
        map.insert(x, two);
        let folded = table.substitute(doubled, &map);
        assert!(table.is_literal(folded));
        assert_eq!(table.int_value(folded), Some(4));
    }

    #[test]
    fn test_expr_string() {
        let mut table = SymbolTable::new();
        let x = table.unknown(SymbolKind::Int);
        let two = table.int(2);
        let doubled = table.emit(ScalarMul, &[x, two]);

        let known = FxHashMap::default();
        assert_eq!(
            table.expr_string(doubled, &known),
            format!("ScalarMul(s{}, 2)", x)
        );
        assert_eq!(
            table.dump_operations(),
            format!("  s{} = ScalarMul(s{}, 2)\n", doubled, x)
        );
    }
}
