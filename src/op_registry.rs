use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use symshape_symbols::{Operation, SymbolId, SymbolTable};
use thiserror::Error;

use crate::abstract_value::AbstractValue;
use crate::value::Primitive;

/// What an operator needs to know about one of its inputs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DependOn {
    Shape,
    Value,
    Nothing,
}

/// Error returned when a symbolic shape or value cannot be built.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BuildError {
    /// The operator has no builder for the requested symbol.
    #[error("{0} does not support symbolic inference")]
    Unsupported(String),
    #[error("missing input {0}")]
    MissingInput(usize),
    #[error("input {index} is invalid: {reason}")]
    InvalidInput { index: usize, reason: &'static str },
}

/// Inputs and output of a node whose symbols are being built.
///
/// Symbols of inputs are built on demand from their abstracts. The engine
/// copies symbols created this way back to the input nodes.
pub struct BuildContext<'a> {
    prim: &'a Primitive,
    inputs: &'a mut [AbstractValue],
    output: &'a AbstractValue,
    symbols: &'a mut SymbolTable,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        prim: &'a Primitive,
        inputs: &'a mut [AbstractValue],
        output: &'a AbstractValue,
        symbols: &'a mut SymbolTable,
    ) -> BuildContext<'a> {
        BuildContext {
            prim,
            inputs,
            output,
            symbols,
        }
    }

    pub fn prim(&self) -> &'a Primitive {
        self.prim
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, index: usize) -> Result<&AbstractValue, BuildError> {
        self.inputs.get(index).ok_or(BuildError::MissingInput(index))
    }

    /// Return the abstract of the node being built.
    pub fn output(&self) -> &'a AbstractValue {
        self.output
    }

    pub fn symbols(&mut self) -> &mut SymbolTable {
        self.symbols
    }

    /// Return the symbolic shape of an input, building it if needed.
    pub fn input_shape(&mut self, index: usize) -> Result<SymbolId, BuildError> {
        let input = self
            .inputs
            .get_mut(index)
            .ok_or(BuildError::MissingInput(index))?;
        if let Some(id) = input.symbolic_shape() {
            return Ok(id);
        }
        let id = input.shape().build_symbolic(self.symbols);
        input.set_symbolic_shape(Some(id));
        Ok(id)
    }

    /// Return the symbolic value of an input, building it if needed.
    pub fn input_value(&mut self, index: usize) -> Result<SymbolId, BuildError> {
        let input = self
            .inputs
            .get_mut(index)
            .ok_or(BuildError::MissingInput(index))?;
        if let Some(id) = input.symbolic_value() {
            return Ok(id);
        }
        let id = input.build_symbolic_value(self.symbols);
        input.set_symbolic_value(Some(id));
        Ok(id)
    }

    /// Return the symbolic shapes of all inputs.
    pub fn input_shapes(&mut self) -> Result<Vec<SymbolId>, BuildError> {
        (0..self.num_inputs()).map(|i| self.input_shape(i)).collect()
    }

    /// Return the symbolic values of all inputs.
    pub fn input_values(&mut self) -> Result<Vec<SymbolId>, BuildError> {
        (0..self.num_inputs()).map(|i| self.input_value(i)).collect()
    }

    /// Return the value of an input, if it is a known integer.
    pub fn input_int(&mut self, index: usize) -> Result<Option<i64>, BuildError> {
        let id = self.input_value(index)?;
        Ok(self.symbols.int_value(id).filter(|_| self.symbols.is_literal(id)))
    }

    /// Return the value of an input, if it is a known boolean.
    pub fn input_bool(&mut self, index: usize) -> Result<Option<bool>, BuildError> {
        let id = self.input_value(index)?;
        Ok(self.symbols.bool_value(id).filter(|_| self.symbols.is_literal(id)))
    }

    /// Return the symbol for `op` applied to `inputs`.
    pub fn emit<Op: Operation + 'static>(&mut self, op: Op, inputs: &[SymbolId]) -> SymbolId {
        self.symbols.emit(op, inputs)
    }

    /// Return the abstracts of the inputs, with any symbols built so far.
    pub fn into_inputs(self) -> &'a mut [AbstractValue] {
        self.inputs
    }
}

/// Builds symbolic shapes and values for one kind of operator.
pub trait OperationBuilder {
    /// Return what this operator needs to know about each input to build its
    /// shape, or its value if `depend_value` is true.
    ///
    /// An empty list means every input is needed in the same way as the
    /// output. Inputs past the end of a non-empty list are not needed.
    fn depends(&self, _prim: &Primitive, _depend_value: bool) -> SmallVec<[DependOn; 4]> {
        SmallVec::new()
    }

    /// Build the symbolic shape of the operator's output.
    fn build_shape(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        Err(BuildError::Unsupported(format!("shape of {}", ctx.prim().name())))
    }

    /// Build the symbolic value of the operator's output.
    fn build_value(&self, ctx: &mut BuildContext) -> Result<SymbolId, BuildError> {
        Err(BuildError::Unsupported(format!("value of {}", ctx.prim().name())))
    }
}

/// Registry of [`OperationBuilder`]s, keyed by operator name.
///
/// New registries have no operators registered. To create a registry with all
/// built-in operators pre-registered, use [`OpRegistry::with_all_ops`].
#[derive(Default)]
pub struct OpRegistry {
    builders: FxHashMap<String, Box<dyn OperationBuilder>>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry::default()
    }

    /// Create a new registry with all built-in operators registered.
    pub fn with_all_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();
        crate::ops::register_all(&mut reg);
        reg
    }

    /// Register the builder for an operator, replacing any existing one.
    pub fn register<B: OperationBuilder + 'static>(&mut self, name: &str, builder: B) {
        self.builders.insert(name.to_string(), Box::new(builder));
    }

    /// Remove the builder for an operator.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.builders.remove(name).is_some()
    }

    /// Return the builder for an operator.
    pub fn get_builder(&self, name: &str) -> Option<&dyn OperationBuilder> {
        self.builders.get(name).map(|b| b.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use symshape_symbols::SymbolTable;

    use super::{BuildContext, BuildError, OpRegistry, OperationBuilder};
    use crate::abstract_value::{AbstractValue, DataType};
    use crate::dims;
    use crate::value::{Primitive, Value};

    struct NoSymbols;

    impl OperationBuilder for NoSymbols {}

    #[test]
    fn test_registry() {
        let mut reg = OpRegistry::new();
        assert!(reg.is_empty());
        reg.register("Custom", NoSymbols);
        assert!(reg.contains("Custom"));
        assert!(reg.get_builder("Other").is_none());

        let builder = reg.get_builder("Custom").unwrap();
        assert!(builder.depends(&Primitive::new("Custom"), false).is_empty());

        let prim = Primitive::new("Custom");
        let output = AbstractValue::scalar(DataType::Int64);
        let mut table = SymbolTable::new();
        let mut no_inputs: [AbstractValue; 0] = [];
        let mut ctx = BuildContext::new(&prim, &mut no_inputs, &output, &mut table);
        assert_eq!(
            builder.build_shape(&mut ctx),
            Err(BuildError::Unsupported("shape of Custom".into()))
        );

        assert!(reg.unregister("Custom"));
        assert!(!reg.unregister("Custom"));
        assert!(OpRegistry::with_all_ops().contains("Reshape"));
    }

    #[test]
    fn test_context_builds_input_symbols() {
        let prim = Primitive::new("Custom");
        let output = AbstractValue::scalar(DataType::Int64);
        let mut inputs = [
            AbstractValue::tensor(DataType::Float32, dims![?, 3]),
            AbstractValue::from_value(&Value::Int(2)),
        ];
        let mut table = SymbolTable::new();
        let mut ctx = BuildContext::new(&prim, &mut inputs, &output, &mut table);

        let shape = ctx.input_shape(0).unwrap();
        assert_eq!(ctx.input_shape(0), Ok(shape));
        assert_eq!(ctx.input_int(1), Ok(Some(2)));
        assert_eq!(ctx.input_value(2), Err(BuildError::MissingInput(2)));

        let inputs = ctx.into_inputs();
        assert_eq!(inputs[0].symbolic_shape(), Some(shape));
        assert!(inputs[0].symbolic_value().is_none());
        assert!(inputs[1].symbolic_value().is_some());
    }
}
