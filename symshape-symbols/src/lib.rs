//! Symbols and symbolic operations for shape inference.
//!
//! # Symbols
//!
//! When a graph has inputs with dynamic dimensions, the shapes of values in
//! the graph, and the values of shape computations, are not known until the
//! graph is run. They are represented instead by *symbols*. A symbol is an
//! integer, boolean, float or list whose data is either known (a *literal*)
//! or will be supplied later (a *placeholder*). Symbols live in a
//! [`SymbolTable`] and are referred to by [`SymbolId`] handles.
//!
//! For example, a graph input with shape `[batch, 4]` has the symbolic shape
//! `[s0, 4]`, where `s0` is a placeholder and `4` is a literal.
//!
//! # Operations
//!
//! Computations on symbols are recorded as [`Operation`]s. For example
//! reshaping the input above to `[batch * 2, 2]` records a `ScalarMul`
//! operation with inputs `s0` and `2`, whose output `s1` is used in the
//! output shape `[s1, 2]`. When the graph is run with concrete inputs, the
//! placeholders for the inputs are [updated](SymbolTable::update) and the
//! recorded operations are [evaluated](SymbolTable::run_operations) in order
//! to resolve the shapes of every value.
//!
//! Operations whose inputs are all literals are folded when they are
//! emitted, so fully static computations never reach the operation list.
//!
//! # Comparing symbols
//!
//! [`SymbolTable::equals`] determines whether two symbols are known to have
//! the same value, and [`SymbolTable::bounds`] determines the range of values
//! an integer symbol may have. Both use the [`SymExpr`] form of integer
//! symbols.

mod operation;
pub mod ops;
mod sym_expr;
mod symbol;
mod table;

pub use operation::{EvalError, Operation};
pub use sym_expr::{floor_div, SymExpr, Var};
pub use symbol::{SymValue, SymbolError, SymbolId, SymbolKind};
pub use table::SymbolTable;
