//! Shared test utilities for refbase.

pub mod fixtures;
pub mod logging;

/// Table-driven test case.
#[derive(Debug, Clone)]
pub struct TestCase<I, E> {
    pub name: &'static str,
    pub input: I,
    pub expected: E,
}

impl<I, E> TestCase<I, E> {
    pub fn new(name: &'static str, input: I, expected: E) -> Self {
        Self {
            name,
            input,
            expected,
        }
    }
}

/// Run a table of cases through `check`, failing on the first mismatch
/// with the case name and input in the message.
pub fn run_table_tests<I, E, F>(cases: Vec<TestCase<I, E>>, check: F)
where
    I: std::fmt::Debug + Clone,
    E: std::fmt::Debug + PartialEq,
    F: Fn(I) -> E,
{
    for case in cases {
        let actual = check(case.input.clone());
        assert_eq!(
            actual, case.expected,
            "case '{}' failed for input {:?}",
            case.name, case.input
        );
    }
}
