//! Operations on whole shapes whose rank may be unknown until inference.

use crate::operation::{expect_inputs, ints_input, EvalError, Operation};
use crate::symbol::{SymValue, SymbolKind};

/// Pad `shape` on the left with ones to `rank`.
fn pad_left(shape: &[i64], rank: usize) -> Vec<i64> {
    let mut padded = vec![1; rank.saturating_sub(shape.len())];
    padded.extend_from_slice(shape);
    padded
}

/// Compute the shape resulting from broadcasting two shapes.
pub fn broadcast_shapes(a: &[i64], b: &[i64]) -> Result<Vec<i64>, EvalError> {
    let rank = a.len().max(b.len());
    let a = pad_left(a, rank);
    let b = pad_left(b, rank);
    a.iter()
        .zip(&b)
        .map(|(&x, &y)| match (x, y) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            _ => Err(EvalError::IncompatibleShapes(format!(
                "cannot broadcast {:?} with {:?}",
                a, b
            ))),
        })
        .collect()
}

/// Output shape of an elementwise binary operator.
#[derive(Debug)]
pub struct BroadcastShape;

impl Operation for BroadcastShape {
    fn name(&self) -> &str {
        "BroadcastShape"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::List
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        expect_inputs::<2>(inputs)?;
        let a = ints_input(inputs, 0)?;
        let b = ints_input(inputs, 1)?;
        Ok(SymValue::ints(&broadcast_shapes(&a, &b)?))
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

/// Axes along which the gradients of a broadcasting binary operator must be
/// summed.
///
/// Takes the shapes of the two operands and returns a list of two lists:
/// the reduction axes for the gradient of each operand.
#[derive(Debug)]
pub struct BroadcastGradientArgs;

impl Operation for BroadcastGradientArgs {
    fn name(&self) -> &str {
        "BroadcastGradientArgs"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::List
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        expect_inputs::<2>(inputs)?;
        let a = ints_input(inputs, 0)?;
        let b = ints_input(inputs, 1)?;
        let rank = a.len().max(b.len());
        let a = pad_left(&a, rank);
        let b = pad_left(&b, rank);

        let mut a_axes = Vec::new();
        let mut b_axes = Vec::new();
        for axis in 0..rank {
            match (a[axis], b[axis]) {
                (x, y) if x == y => {}
                (1, _) => a_axes.push(axis as i64),
                (_, 1) => b_axes.push(axis as i64),
                (x, y) => {
                    return Err(EvalError::IncompatibleShapes(format!(
                        "dimension {} has sizes {} and {}",
                        axis, x, y
                    )))
                }
            }
        }
        Ok(SymValue::List(vec![
            SymValue::ints(&a_axes),
            SymValue::ints(&b_axes),
        ]))
    }
}

/// Resolve a possibly negative axis.
fn resolve_axis(axis: i64, rank: usize) -> Result<usize, EvalError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved as usize >= rank {
        return Err(EvalError::InvalidValue {
            index: 1,
            reason: "axis out of range",
        });
    }
    Ok(resolved as usize)
}

/// Compute the shape produced by reducing `shape` along `axes`.
pub fn reduce_shape(
    shape: &[i64],
    axes: &[i64],
    keep_dims: bool,
    skip_mode: bool,
) -> Result<Vec<i64>, EvalError> {
    if axes.is_empty() && skip_mode {
        return Ok(shape.to_vec());
    }
    let mut reduced = vec![axes.is_empty(); shape.len()];
    for &axis in axes {
        reduced[resolve_axis(axis, shape.len())?] = true;
    }
    Ok(shape
        .iter()
        .zip(reduced)
        .filter_map(|(&size, reduced)| match (reduced, keep_dims) {
            (false, _) => Some(size),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect())
}

/// Output shape of a reduction whose axes are only known at inference time.
///
/// Inputs are the input shape and the axes, as a scalar or list.
#[derive(Debug)]
pub struct ReduceShape {
    pub keep_dims: bool,

    /// If true, reducing over an empty list of axes is a no-op instead of a
    /// reduction over all axes.
    pub skip_mode: bool,
}

impl Operation for ReduceShape {
    fn name(&self) -> &str {
        "ReduceShape"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::List
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        let [_, axes] = expect_inputs::<2>(inputs)?;
        let shape = ints_input(inputs, 0)?;
        let axes = match axes {
            SymValue::Int(axis) => vec![*axis],
            _ => ints_input(inputs, 1)?,
        };
        Ok(SymValue::ints(&reduce_shape(
            &shape,
            &axes,
            self.keep_dims,
            self.skip_mode,
        )?))
    }
}

/// Resolve a reshape target against the input shape.
///
/// A `-1` in the target is replaced by the size which preserves the element
/// count. At most one `-1` is allowed.
pub fn reshape_shape(input: &[i64], target: &[i64]) -> Result<Vec<i64>, EvalError> {
    let mut fill_index = None;
    let mut known_product = 1i64;
    for (i, &size) in target.iter().enumerate() {
        if size == -1 {
            if fill_index.is_some() {
                return Err(EvalError::InvalidValue {
                    index: 1,
                    reason: "multiple -1 sizes in reshape target",
                });
            }
            fill_index = Some(i);
        } else {
            known_product = known_product.saturating_mul(size);
        }
    }

    let mut output = target.to_vec();
    if let Some(index) = fill_index {
        if known_product == 0 {
            return Err(EvalError::DivisionByZero);
        }
        let numel = input.iter().fold(1i64, |acc, &x| acc.saturating_mul(x));
        if numel % known_product != 0 {
            return Err(EvalError::InvalidValue {
                index: 1,
                reason: "reshape target does not divide the element count",
            });
        }
        output[index] = numel / known_product;
    }
    Ok(output)
}

/// Output shape of a reshape whose target is a list of unknown length.
#[derive(Debug)]
pub struct ReshapeShape;

impl Operation for ReshapeShape {
    fn name(&self) -> &str {
        "ReshapeShape"
    }

    fn output_kind(&self) -> SymbolKind {
        SymbolKind::List
    }

    fn eval(&self, inputs: &[SymValue]) -> Result<SymValue, EvalError> {
        expect_inputs::<2>(inputs)?;
        let input = ints_input(inputs, 0)?;
        let target = ints_input(inputs, 1)?;
        Ok(SymValue::ints(&reshape_shape(&input, &target)?))
    }
}

#[cfg(test)]
mod tests {
    use symshape_testing::TestCases;

    use super::{broadcast_shapes, reduce_shape, reshape_shape, BroadcastGradientArgs};
    use crate::operation::{EvalError, Operation};
    use crate::SymValue;

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[3, 1], &[4]), Ok(vec![3, 4]));
        assert_eq!(broadcast_shapes(&[], &[2, 2]), Ok(vec![2, 2]));
        assert!(broadcast_shapes(&[3], &[4]).is_err());
    }

    #[test]
    fn test_broadcast_gradient_args() {
        let result = BroadcastGradientArgs
            .eval(&[SymValue::ints(&[2, 1, 4]), SymValue::ints(&[3, 4])])
            .unwrap();
        assert_eq!(
            result,
            SymValue::List(vec![SymValue::ints(&[1]), SymValue::ints(&[0])])
        );
    }

    #[test]
    fn test_reduce_shape() {
        #[derive(Debug)]
        struct Case {
            axes: Vec<i64>,
            keep_dims: bool,
            skip_mode: bool,
            expected: Vec<i64>,
        }

        let cases = [
            Case {
                axes: vec![1],
                keep_dims: false,
                skip_mode: false,
                expected: vec![2, 4],
            },
            Case {
                axes: vec![-1],
                keep_dims: true,
                skip_mode: false,
                expected: vec![2, 3, 1],
            },
            Case {
                axes: vec![],
                keep_dims: false,
                skip_mode: false,
                expected: vec![],
            },
            Case {
                axes: vec![],
                keep_dims: false,
                skip_mode: true,
                expected: vec![2, 3, 4],
            },
        ];

        cases.test_each(|case| {
            let result = reduce_shape(&[2, 3, 4], &case.axes, case.keep_dims, case.skip_mode);
            assert_eq!(result.as_ref(), Ok(&case.expected));
        });
    }

    #[test]
    fn test_reshape_shape() {
        assert_eq!(reshape_shape(&[6, 4], &[-1, 2]), Ok(vec![12, 2]));
        assert_eq!(reshape_shape(&[6, 4], &[3, 8]), Ok(vec![3, 8]));
        assert!(matches!(
            reshape_shape(&[6, 4], &[-1, -1]),
            Err(EvalError::InvalidValue { .. })
        ));
        assert_eq!(
            reshape_shape(&[6, 4], &[-1, 5]),
            Err(EvalError::InvalidValue {
                index: 1,
                reason: "reshape target does not divide the element count",
            })
        );
    }
}
