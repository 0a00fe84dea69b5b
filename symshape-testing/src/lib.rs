//! Internal testing utilities for the symshape crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Table-driven tests.
///
/// Define a `Case` struct holding the inputs and expected outputs of one
/// test, build a collection of cases and pass the shared test body to
/// `test_each`:
///
/// ```
/// use symshape_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     dims: Vec<i64>,
///     expected: i64,
/// }
///
/// let cases = [
///     Case { dims: vec![2, 3], expected: 6 },
///     Case { dims: vec![], expected: 1 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.dims.iter().product::<i64>(), case.expected);
/// });
/// ```
///
/// Every case is run even if an earlier one fails. Failing cases are
/// collected and reported together using their `Debug` representation.
///
/// The test body runs under [`std::panic::catch_unwind`], so cases and
/// anything the closure captures must be unwind safe. Values with interior
/// mutability (eg. a `Cell` counting builder invocations) should be created
/// inside the closure rather than captured.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Run `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Run `test` with a clone of each case.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Run `test` with each case by value.
    ///
    /// The case is formatted before the test runs so that it can be reported
    /// if the test fails.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Panic with a summary of `failures` if there are any.
fn report_failures<T: Debug>(failures: &[T]) {
    assert!(
        failures.is_empty(),
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        report_failures(&failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Clone + Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| {
                let case = case.clone();
                std::panic::catch_unwind(move || test(case)).is_err()
            })
            .collect();
        report_failures(&failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<String> = self
            .into_iter()
            .filter_map(|case| {
                let desc = format!("{:?}", case);
                std::panic::catch_unwind(move || test(case))
                    .is_err()
                    .then_some(desc)
            })
            .collect();
        report_failures(&failures);
    }
}

#[cfg(test)]
mod tests {
    use super::TestCases;

    #[derive(Clone, Debug)]
    struct Case {
        dim: i64,
    }

    fn cases() -> [Case; 2] {
        [Case { dim: 1 }, Case { dim: 2 }]
    }

    #[test]
    fn test_all_cases_pass() {
        cases().test_each(|case| assert!(case.dim > 0));
        cases().test_each_clone(|case| assert!(case.dim > 0));
        cases().test_each_value(|case| assert!(case.dim > 0));
    }

    #[test]
    #[should_panic(expected = "1 test cases failed")]
    fn test_each_reports_failures() {
        cases().test_each(|case| assert_eq!(case.dim, 1));
    }

    #[test]
    #[should_panic(expected = "2 test cases failed")]
    fn test_each_clone_reports_failures() {
        cases().test_each_clone(|case| assert!(case.dim > 2));
    }

    #[test]
    #[should_panic(expected = "2 test cases failed")]
    fn test_each_value_reports_failures() {
        cases().test_each_value(|case| assert!(case.dim < 0));
    }
}
