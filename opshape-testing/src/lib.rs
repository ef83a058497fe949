//! Testing utilities for the opshape crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Table-driven test runner.
///
/// Each operator test in opshape declares a `Case` struct describing the
/// inputs and expected outputs of one inference or batching scenario, builds
/// an array of cases and passes a checking closure to one of the methods
/// below. Every case is run even if an earlier one panics, and the final
/// assertion lists the debug form of all failing cases.
///
/// ```
/// use opshape_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     axis: i64,
///     ndim: i64,
///     expected: i64,
/// }
///
/// let cases = [
///     Case { axis: -1, ndim: 3, expected: 2 },
///     Case { axis: 0, ndim: 3, expected: 0 },
/// ];
///
/// cases.test_each(|case| {
///     let resolved = if case.axis < 0 { case.axis + case.ndim } else { case.axis };
///     assert_eq!(resolved, case.expected);
/// });
/// ```
///
/// Cases and captured values must be unwind safe. Fields that are not can
/// usually be replaced by a description from which the value is built inside
/// the closure.
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
    /// The debug representation of each case is captured before the call.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Debug descriptions of cases which panicked.
#[derive(Default)]
struct Failures(Vec<String>);

impl Failures {
    fn record(&mut self, passed: bool, describe: impl FnOnce() -> String) {
        if !passed {
            self.0.push(describe());
        }
    }

    fn finish(self) {
        assert!(
            self.0.is_empty(),
            "{} test cases failed: {:?}",
            self.0.len(),
            self.0
        );
    }
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let passed = std::panic::catch_unwind(|| test(&case)).is_ok();
            failures.record(passed, || format!("{:?}", case));
        }
        failures.finish();
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Clone + Debug + UnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let value = case.clone();
            let test = &test;
            let passed = std::panic::catch_unwind(move || test(value)).is_ok();
            failures.record(passed, || format!("{:?}", case));
        }
        failures.finish();
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let test = &test;
            let description = format!("{:?}", case);
            let passed = std::panic::catch_unwind(move || test(case)).is_ok();
            failures.record(passed, || description);
        }
        failures.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::TestCases;

    #[derive(Clone, Debug)]
    struct Case {
        dims: Vec<usize>,
    }

    fn cases() -> [Case; 2] {
        [Case { dims: vec![2, 3] }, Case { dims: vec![4] }]
    }

    #[test]
    fn test_all_cases_pass() {
        cases().test_each(|case| assert!(!case.dims.is_empty()));
        cases().test_each_clone(|case| assert!(!case.dims.is_empty()));
        cases().test_each_value(|case| assert!(!case.dims.is_empty()));
    }

    #[test]
    #[should_panic(expected = "1 test cases failed")]
    fn test_each_reports_failures() {
        cases().test_each(|case| assert_eq!(case.dims.len(), 2));
    }

    #[test]
    #[should_panic(expected = "2 test cases failed")]
    fn test_each_clone_reports_failures() {
        cases().test_each_clone(|case| {
            _ = case.dims;
            panic!("bad shape");
        })
    }

    #[test]
    #[should_panic(expected = "[4]")]
    fn test_each_value_reports_case_debug() {
        cases().test_each_value(|case| assert_eq!(case.dims.len(), 2));
    }
}
