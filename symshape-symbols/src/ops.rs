//! Built-in symbolic operations.
//!
//! Scalar operations implement the arithmetic used by shape computations.
//! List and shape operations are used when a list's length is not known at
//! build time, so it cannot be decomposed into element symbols.

mod list;
mod scalar;
mod shape;

pub use list::{ListConcat, ListGetItem, ListLen, ListProduct};
pub use scalar::{
    BroadcastDim, ScalarAdd, ScalarFloorDiv, ScalarMax, ScalarMin, ScalarMul, ScalarSub, Select,
};
pub use shape::{
    broadcast_shapes, reduce_shape, reshape_shape, BroadcastGradientArgs, BroadcastShape,
    ReduceShape, ReshapeShape,
};
