//! Algebraic view of integer symbols.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use crate::operation::EvalError;

/// A named unknown in an expression.
///
/// Two variables are equal if they have the same name.
#[derive(Clone, Debug, PartialEq)]
pub struct Var {
    pub name: String,

    // True if the value is assumed to be >= 0.
    pub positive: bool,
}

/// Integer expression over named variables.
///
/// Expressions are used to compare integer symbols that were produced by
/// different chains of operations and to derive static bounds for them.
#[derive(Clone)]
pub enum SymExpr {
    /// A known value.
    Value(i64),
    /// An unknown value.
    Var(Arc<Var>),
    Add(Arc<SymExpr>, Arc<SymExpr>),
    Sub(Arc<SymExpr>, Arc<SymExpr>),
    Mul(Arc<SymExpr>, Arc<SymExpr>),
    /// Flooring division.
    Div(Arc<SymExpr>, Arc<SymExpr>),
    Max(Arc<SymExpr>, Arc<SymExpr>),
    Min(Arc<SymExpr>, Arc<SymExpr>),
    /// Broadcast of two dimension sizes.
    ///
    /// This behaves like `Max`, except it implies that both values are either
    /// equal or 1.
    Broadcast(Arc<SymExpr>, Arc<SymExpr>),
    Neg(Arc<SymExpr>),
}

/// Associative and commutative operators, which are simplified by
/// flattening nested terms.
#[derive(Copy, Clone, PartialEq)]
enum Assoc {
    Add,
    Mul,
    Max,
    Min,
    Broadcast,
}

impl Assoc {
    fn operands<'a>(&self, expr: &'a SymExpr) -> Option<(&'a Arc<SymExpr>, &'a Arc<SymExpr>)> {
        match (self, expr) {
            (Assoc::Add, SymExpr::Add(lhs, rhs))
            | (Assoc::Mul, SymExpr::Mul(lhs, rhs))
            | (Assoc::Max, SymExpr::Max(lhs, rhs))
            | (Assoc::Min, SymExpr::Min(lhs, rhs))
            | (Assoc::Broadcast, SymExpr::Broadcast(lhs, rhs)) => Some((lhs, rhs)),
            _ => None,
        }
    }

    fn combine(&self, lhs: SymExpr, rhs: SymExpr) -> SymExpr {
        match self {
            Assoc::Add => lhs + rhs,
            Assoc::Mul => lhs * rhs,
            Assoc::Max => lhs.max(&rhs),
            Assoc::Min => lhs.min(&rhs),
            Assoc::Broadcast => lhs.broadcast(&rhs),
        }
    }

    /// Fold two known values. Returns `None` if they cannot be combined.
    fn fold(&self, x: i64, y: i64) -> Option<i64> {
        match self {
            Assoc::Add => Some(x.saturating_add(y)),
            Assoc::Mul => Some(x.saturating_mul(y)),
            Assoc::Max => Some(x.max(y)),
            Assoc::Min => Some(x.min(y)),
            Assoc::Broadcast => match (x, y) {
                (1, y) => Some(y),
                (x, 1) => Some(x),
                (x, y) if x == y => Some(x),
                _ => None,
            },
        }
    }

    /// Value which can be dropped from a list of terms.
    fn identity(&self) -> Option<i64> {
        match self {
            Assoc::Add => Some(0),
            Assoc::Mul | Assoc::Broadcast => Some(1),
            Assoc::Max | Assoc::Min => None,
        }
    }

    fn is_idempotent(&self) -> bool {
        matches!(self, Assoc::Max | Assoc::Min | Assoc::Broadcast)
    }
}

impl SymExpr {
    /// Create a named variable, with no assumptions about the value.
    pub fn var(name: &str) -> Self {
        SymExpr::Var(
            Var {
                name: name.to_string(),
                positive: false,
            }
            .into(),
        )
    }

    /// Create a named variable representing a value `>= 0`.
    pub fn pos_var(name: &str) -> Self {
        SymExpr::Var(
            Var {
                name: name.to_string(),
                positive: true,
            }
            .into(),
        )
    }

    pub fn max(&self, other: &SymExpr) -> SymExpr {
        Self::Max(self.clone().into(), other.clone().into())
    }

    pub fn min(&self, other: &SymExpr) -> SymExpr {
        Self::Min(self.clone().into(), other.clone().into())
    }

    pub fn broadcast(&self, other: &SymExpr) -> SymExpr {
        Self::Broadcast(self.clone().into(), other.clone().into())
    }

    /// Return the known value of this expression, if it has one.
    pub fn value(&self) -> Option<i64> {
        match self {
            Self::Value(x) => Some(*x),
            _ => None,
        }
    }

    /// Return the inclusive range of values this expression may have.
    pub fn range(&self) -> (i64, i64) {
        match self {
            Self::Value(x) => (*x, *x),
            Self::Var(var) => {
                if var.positive {
                    (0, i64::MAX)
                } else {
                    (i64::MIN, i64::MAX)
                }
            }
            Self::Neg(x) => {
                let (min, max) = x.range();
                (max.saturating_neg(), min.saturating_neg())
            }
            Self::Add(lhs, rhs) => {
                let (lhs_min, lhs_max) = lhs.range();
                let (rhs_min, rhs_max) = rhs.range();
                (lhs_min.saturating_add(rhs_min), lhs_max.saturating_add(rhs_max))
            }
            Self::Sub(lhs, rhs) => {
                let (lhs_min, lhs_max) = lhs.range();
                let (rhs_min, rhs_max) = rhs.range();
                (lhs_min.saturating_sub(rhs_max), lhs_max.saturating_sub(rhs_min))
            }
            Self::Mul(lhs, rhs) => {
                let (lhs_min, lhs_max) = lhs.range();
                let (rhs_min, rhs_max) = rhs.range();
                let corners = [
                    lhs_min.saturating_mul(rhs_min),
                    lhs_min.saturating_mul(rhs_max),
                    lhs_max.saturating_mul(rhs_min),
                    lhs_max.saturating_mul(rhs_max),
                ];
                min_max(&corners)
            }
            Self::Div(lhs, rhs) => {
                let (lhs_min, lhs_max) = lhs.range();
                let (rhs_min, rhs_max) = rhs.range();
                if rhs_min <= 0 {
                    return (i64::MIN, i64::MAX);
                }
                let corners: Vec<i64> = [
                    (lhs_min, rhs_min),
                    (lhs_min, rhs_max),
                    (lhs_max, rhs_min),
                    (lhs_max, rhs_max),
                ]
                .into_iter()
                .filter_map(|(x, y)| floor_div(x, y).ok())
                .collect();
                min_max(&corners)
            }
            Self::Max(lhs, rhs) | Self::Broadcast(lhs, rhs) => {
                let (lhs_min, lhs_max) = lhs.range();
                let (rhs_min, rhs_max) = rhs.range();
                (lhs_min.max(rhs_min), lhs_max.max(rhs_max))
            }
            Self::Min(lhs, rhs) => {
                let (lhs_min, lhs_max) = lhs.range();
                let (rhs_min, rhs_max) = rhs.range();
                (lhs_min.min(rhs_min), lhs_max.min(rhs_max))
            }
        }
    }

    /// Return true if the value of this expression is known to be >= 0.
    pub fn is_positive(&self) -> bool {
        self.range().0 >= 0
    }

    /// Simplify an expression.
    ///
    /// Nested sums, products, minimums, maximums and broadcasts are flattened,
    /// known values are folded together and identities are removed (eg.
    /// `(x + 2) + (3 - x)` becomes `5`).
    pub fn simplify(&self) -> SymExpr {
        match self {
            Self::Value(_) | Self::Var(_) => self.clone(),
            Self::Neg(x) => match x.simplify() {
                Self::Value(v) => Self::Value(v.saturating_neg()),
                Self::Neg(y) => (*y).clone(),
                y => -y,
            },
            Self::Sub(lhs, rhs) => (lhs.as_ref().clone() + -rhs.as_ref().clone()).simplify(),
            Self::Div(lhs, rhs) => {
                let (lhs, rhs) = remove_common_factors(lhs.simplify(), rhs.simplify());
                match (lhs, rhs) {
                    (lhs, Self::Value(1)) => lhs,
                    (Self::Value(x), Self::Value(y)) => match floor_div(x, y) {
                        Ok(quotient) => Self::Value(quotient),
                        Err(_) => Self::Value(x) / Self::Value(y),
                    },
                    // x / a / b => x / (a * b) for positive a, b.
                    (Self::Div(x, a), b) if a.is_positive() && b.is_positive() => {
                        Self::Div(x, (a.as_ref().clone() * b).simplify().into())
                    }
                    (lhs, rhs) => lhs / rhs,
                }
            }
            Self::Add(..) => self.simplify_assoc(Assoc::Add),
            Self::Mul(..) => self.simplify_assoc(Assoc::Mul),
            Self::Max(..) => self.simplify_assoc(Assoc::Max),
            Self::Min(..) => self.simplify_assoc(Assoc::Min),
            Self::Broadcast(..) => self.simplify_assoc(Assoc::Broadcast),
        }
    }

    fn simplify_assoc(&self, op: Assoc) -> SymExpr {
        fn collect(op: Assoc, expr: &SymExpr, terms: &mut Vec<SymExpr>) {
            if let Some((lhs, rhs)) = op.operands(expr) {
                collect(op, lhs, terms);
                collect(op, rhs, terms);
                return;
            }
            let simplified = expr.simplify();
            if op.operands(&simplified).is_some() {
                collect(op, &simplified, terms);
            } else {
                terms.push(simplified);
            }
        }

        let mut terms = Vec::new();
        collect(op, self, &mut terms);

        // Fold known values into a single leading term.
        let mut known: Option<i64> = None;
        let mut unknown = Vec::with_capacity(terms.len());
        for term in terms {
            match (term.value(), known) {
                (Some(x), None) => known = Some(x),
                (Some(x), Some(acc)) => match op.fold(acc, x) {
                    Some(folded) => known = Some(folded),
                    None => unknown.push(term),
                },
                (None, _) => unknown.push(term),
            }
        }

        if op == Assoc::Mul && known == Some(0) {
            return Self::Value(0);
        }
        if known.is_some() && known == op.identity() && !unknown.is_empty() {
            known = None;
        }
        if op == Assoc::Broadcast {
            // A known size other than 1 determines the result.
            if let Some(size) = known {
                if size != 1 {
                    return Self::Value(size);
                }
            }
        }

        unknown.sort_by(cmp_by_name);
        if op == Assoc::Add {
            cancel_opposite_terms(&mut unknown);
        }
        if op.is_idempotent() {
            unknown.dedup();
        }

        known
            .map(Self::Value)
            .into_iter()
            .chain(unknown)
            .reduce(|acc, term| op.combine(acc, term))
            .unwrap_or_else(|| Self::Value(op.identity().unwrap_or(0)))
    }

    /// Return the precedence of the operator.
    ///
    /// This is used to add parentheses when formatting an expression tree.
    fn precedence(&self) -> u8 {
        match self {
            Self::Value(_) | Self::Var(_) | Self::Max(..) | Self::Min(..) | Self::Broadcast(..) => {
                4
            }
            Self::Div(..) => 3,
            Self::Mul(..) => 2,
            Self::Add(..) => 1,
            Self::Sub(..) | Self::Neg(_) => 0,
        }
    }

    /// Return the variable name of a variable or negated variable.
    fn name(&self) -> Option<&str> {
        match self {
            SymExpr::Var(var) => Some(&var.name),
            SymExpr::Neg(x) => x.name(),
            _ => None,
        }
    }

    fn is_negation_of(&self, other: &SymExpr) -> bool {
        match (self, other) {
            (x, SymExpr::Neg(y)) if *x == **y => true,
            (SymExpr::Neg(x), y) if **x == *y => true,
            _ => false,
        }
    }
}

fn min_max(values: &[i64]) -> (i64, i64) {
    let min = values.iter().copied().min().unwrap_or(i64::MIN);
    let max = values.iter().copied().max().unwrap_or(i64::MAX);
    (min, max)
}

/// Integer division rounding towards negative infinity.
pub fn floor_div(lhs: i64, rhs: i64) -> Result<i64, EvalError> {
    if rhs == 0 {
        return Err(EvalError::DivisionByZero);
    }
    let quotient = lhs.checked_div(rhs).ok_or(EvalError::Overflow)?;
    if (lhs % rhs != 0) && ((lhs < 0) != (rhs < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

/// Order terms so that occurrences of the same variable are adjacent.
fn cmp_by_name(a: &SymExpr, b: &SymExpr) -> Ordering {
    match (a.name(), b.name()) {
        (Some(a_name), Some(b_name)) => a_name.cmp(b_name),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Remove pairs of terms which sum to zero.
fn cancel_opposite_terms(terms: &mut Vec<SymExpr>) {
    let mut i = 0;
    while i < terms.len() {
        let opposite = (i + 1..terms.len()).find(|&j| terms[i].is_negation_of(&terms[j]));
        if let Some(j) = opposite {
            terms.remove(j);
            terms.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Remove factors that appear on both sides of a division.
fn remove_common_factors(lhs: SymExpr, rhs: SymExpr) -> (SymExpr, SymExpr) {
    fn factors(expr: SymExpr, out: &mut Vec<SymExpr>) {
        if let SymExpr::Mul(lhs, rhs) = expr {
            factors(Arc::unwrap_or_clone(lhs), out);
            factors(Arc::unwrap_or_clone(rhs), out);
        } else {
            out.push(expr);
        }
    }

    let mut lhs_factors = Vec::new();
    factors(lhs, &mut lhs_factors);
    let mut rhs_factors = Vec::new();
    factors(rhs, &mut rhs_factors);

    lhs_factors.retain(|factor| {
        // Only cancel factors which cannot be zero.
        if factor.value() == Some(0) {
            return true;
        }
        match rhs_factors.iter().position(|f| f == factor) {
            Some(pos) => {
                rhs_factors.remove(pos);
                false
            }
            None => true,
        }
    });

    let product = |factors: Vec<SymExpr>| {
        factors
            .into_iter()
            .reduce(|acc, x| acc * x)
            .unwrap_or(SymExpr::Value(1))
    };
    (product(lhs_factors), product(rhs_factors))
}

impl PartialEq for SymExpr {
    fn eq(&self, other: &SymExpr) -> bool {
        let commutative_eq = |a: &SymExpr, b: &SymExpr, c: &SymExpr, d: &SymExpr| {
            (a == c && b == d) || (a == d && b == c)
        };

        match (self, other) {
            (Self::Value(x), Self::Value(y)) => x == y,
            (Self::Var(x), Self::Var(y)) => x.name == y.name,
            (Self::Neg(x), Self::Neg(y)) => x == y,
            (Self::Add(a, b), Self::Add(c, d))
            | (Self::Mul(a, b), Self::Mul(c, d))
            | (Self::Max(a, b), Self::Max(c, d))
            | (Self::Min(a, b), Self::Min(c, d))
            | (Self::Broadcast(a, b), Self::Broadcast(c, d)) => commutative_eq(a, b, c, d),
            (Self::Sub(a, b), Self::Sub(c, d)) | (Self::Div(a, b), Self::Div(c, d)) => {
                a == c && b == d
            }
            _ => false,
        }
    }
}

impl Add<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: SymExpr) -> Self {
        Self::Add(self.into(), rhs.into())
    }
}

impl Sub<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: SymExpr) -> Self {
        Self::Sub(self.into(), rhs.into())
    }
}

impl Mul<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: SymExpr) -> Self {
        Self::Mul(self.into(), rhs.into())
    }
}

impl Div<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn div(self, rhs: SymExpr) -> Self {
        Self::Div(self.into(), rhs.into())
    }
}

impl Neg for SymExpr {
    type Output = SymExpr;

    fn neg(self) -> Self {
        Self::Neg(self.into())
    }
}

/// Create a variable with the given name which is assumed to be `>= 0`.
impl<'a> From<&'a str> for SymExpr {
    fn from(name: &'a str) -> Self {
        SymExpr::pos_var(name)
    }
}

impl From<i64> for SymExpr {
    fn from(val: i64) -> Self {
        SymExpr::Value(val)
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let add_parens = |f: &mut fmt::Formatter<'_>, expr: &SymExpr| {
            if expr.precedence() < self.precedence() {
                write!(f, "({})", expr)
            } else {
                write!(f, "{}", expr)
            }
        };
        let write_binop = |f: &mut fmt::Formatter<'_>, op, lhs, rhs| {
            add_parens(f, lhs)?;
            write!(f, " {op} ")?;
            add_parens(f, rhs)
        };
        match self {
            Self::Value(val) => write!(f, "{}", val),
            Self::Var(var) => write!(f, "{}", var.name),
            // nb. No space between "-" and expression to make formatting
            // distinct from subtraction.
            Self::Neg(expr) => write!(f, "-{}", expr),
            Self::Add(lhs, rhs) => write_binop(f, '+', lhs, rhs),
            Self::Sub(lhs, rhs) => write_binop(f, '-', lhs, rhs),
            Self::Mul(lhs, rhs) => write_binop(f, '*', lhs, rhs),
            Self::Div(lhs, rhs) => write_binop(f, '/', lhs, rhs),
            Self::Max(lhs, rhs) => write!(f, "max({}, {})", lhs, rhs),
            Self::Min(lhs, rhs) => write!(f, "min({}, {})", lhs, rhs),
            Self::Broadcast(lhs, rhs) => write!(f, "broadcast({}, {})", lhs, rhs),
        }
    }
}

impl fmt::Debug for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymExpr({})", self)
    }
}

#[cfg(test)]
mod tests {
    use symshape_testing::TestCases;

    use super::{floor_div, SymExpr};
    use crate::operation::EvalError;

    fn x() -> SymExpr {
        SymExpr::from("x")
    }

    fn y() -> SymExpr {
        SymExpr::from("y")
    }

    #[test]
    fn test_simplify() {
        #[derive(Debug)]
        struct Case {
            expr: SymExpr,
            expected: SymExpr,
        }

        let cases = [
            Case {
                expr: x() + SymExpr::Value(0),
                expected: x(),
            },
            Case {
                expr: (x() + SymExpr::Value(2)) + (SymExpr::Value(3) - x()),
                expected: SymExpr::Value(5),
            },
            Case {
                expr: (x() * SymExpr::Value(2)) * (y() * SymExpr::Value(3)),
                expected: SymExpr::Value(6) * x() * y(),
            },
            Case {
                expr: x() * SymExpr::Value(1),
                expected: x(),
            },
            Case {
                expr: x() * SymExpr::Value(0),
                expected: SymExpr::Value(0),
            },
            Case {
                expr: x() - x(),
                expected: SymExpr::Value(0),
            },
            Case {
                expr: (x() * y()) / y(),
                expected: x(),
            },
            Case {
                expr: SymExpr::Value(7) / SymExpr::Value(2),
                expected: SymExpr::Value(3),
            },
            Case {
                expr: x() / SymExpr::Value(2) / SymExpr::Value(3),
                expected: x() / SymExpr::Value(6),
            },
            Case {
                expr: x().max(&y()).max(&x()),
                expected: x().max(&y()),
            },
            Case {
                expr: x().min(&SymExpr::Value(3)).min(&SymExpr::Value(5)),
                expected: SymExpr::Value(3).min(&x()),
            },
            Case {
                expr: x().broadcast(&SymExpr::Value(1)),
                expected: x(),
            },
            Case {
                expr: x().broadcast(&SymExpr::Value(4)),
                expected: SymExpr::Value(4),
            },
            Case {
                expr: x().broadcast(&x()),
                expected: x(),
            },
            Case {
                expr: -(-x()),
                expected: x(),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.expr.simplify(), case.expected);
        });
    }

    #[test]
    fn test_commutative_eq() {
        assert_eq!(x() + y(), y() + x());
        assert_eq!(x().max(&y()), y().max(&x()));
        assert_ne!(x() - y(), y() - x());
        assert_ne!(x() / y(), y() / x());
    }

    #[test]
    fn test_range() {
        #[derive(Debug)]
        struct Case {
            expr: SymExpr,
            expected: (i64, i64),
        }

        let cases = [
            Case {
                expr: SymExpr::Value(3),
                expected: (3, 3),
            },
            Case {
                expr: x(),
                expected: (0, i64::MAX),
            },
            Case {
                expr: SymExpr::var("z"),
                expected: (i64::MIN, i64::MAX),
            },
            Case {
                expr: x().min(&SymExpr::Value(8)),
                expected: (0, 8),
            },
            Case {
                expr: x().min(&SymExpr::Value(8)) * SymExpr::Value(2) + SymExpr::Value(1),
                expected: (1, 17),
            },
            Case {
                expr: -x(),
                expected: (-i64::MAX, 0),
            },
            Case {
                expr: x().min(&SymExpr::Value(9)) / SymExpr::Value(2),
                expected: (0, 4),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.expr.range(), case.expected);
        });
    }

    #[test]
    fn test_floor_div() {
        assert_eq!(floor_div(7, 2), Ok(3));
        assert_eq!(floor_div(-7, 2), Ok(-4));
        assert_eq!(floor_div(7, -2), Ok(-4));
        assert_eq!(floor_div(-8, 2), Ok(-4));
        assert_eq!(floor_div(i64::MIN, 1), Ok(i64::MIN));
        assert_eq!(floor_div(i64::MIN, -1), Err(EvalError::Overflow));
        assert_eq!(floor_div(3, 0), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_display() {
        let expr = (x() + SymExpr::Value(1)) * y() / SymExpr::Value(2);
        assert_eq!(expr.to_string(), "((x + 1) * y) / 2");
        assert_eq!(x().max(&-y()).to_string(), "max(x, -y)");
    }
}
