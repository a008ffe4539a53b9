//! Predicates deciding whether a loader is dispatched

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a predicate knows about a loader when the registry dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderStatus {
    /// Keys waiting for dispatch
    pub dispatch_depth: usize,
    /// Time since the loader last dispatched
    pub time_since_last_dispatch: Duration,
}

type PredicateFn = dyn Fn(&str, &LoaderStatus) -> bool + Send + Sync;

/// Decides per loader whether `dispatch_all` dispatches it now
#[derive(Clone)]
pub struct DispatchPredicate {
    test: Arc<PredicateFn>,
}

impl DispatchPredicate {
    pub fn new<F>(test: F) -> Self
    where
        F: Fn(&str, &LoaderStatus) -> bool + Send + Sync + 'static,
    {
        Self {
            test: Arc::new(test),
        }
    }

    pub fn always() -> Self {
        Self::new(|_, _| true)
    }

    pub fn never() -> Self {
        Self::new(|_, _| false)
    }

    /// More than `depth` keys are waiting
    pub fn depth_greater_than(depth: usize) -> Self {
        Self::new(move |_, status| status.dispatch_depth > depth)
    }

    /// The last dispatch is more than `duration` ago
    pub fn longer_than(duration: Duration) -> Self {
        Self::new(move |_, status| status.time_since_last_dispatch > duration)
    }

    pub fn and(self, other: DispatchPredicate) -> Self {
        Self::new(move |name, status| self.test(name, status) && other.test(name, status))
    }

    pub fn or(self, other: DispatchPredicate) -> Self {
        Self::new(move |name, status| self.test(name, status) || other.test(name, status))
    }

    pub fn negate(self) -> Self {
        Self::new(move |name, status| !self.test(name, status))
    }

    pub fn test(&self, name: &str, status: &LoaderStatus) -> bool {
        (self.test)(name, status)
    }
}

impl Default for DispatchPredicate {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Debug for DispatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPredicate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn status(depth: usize, millis: u64) -> LoaderStatus {
        LoaderStatus {
            dispatch_depth: depth,
            time_since_last_dispatch: Duration::from_millis(millis),
        }
    }

    #[rstest]
    #[case(0, 0, false)]
    #[case(3, 0, false)]
    #[case(4, 0, true)]
    #[case(0, 51, true)]
    fn test_depth_or_age(#[case] depth: usize, #[case] millis: u64, #[case] expected: bool) {
        let predicate = DispatchPredicate::depth_greater_than(3)
            .or(DispatchPredicate::longer_than(Duration::from_millis(50)));
        assert_eq!(predicate.test("users", &status(depth, millis)), expected);
    }

    #[test]
    fn test_combinators() {
        let s = status(1, 0);
        assert!(DispatchPredicate::always().test("a", &s));
        assert!(!DispatchPredicate::never().test("a", &s));
        assert!(DispatchPredicate::never().negate().test("a", &s));
        assert!(!DispatchPredicate::always()
            .and(DispatchPredicate::never())
            .test("a", &s));
        assert!(DispatchPredicate::default().test("a", &s));
    }

    #[test]
    fn test_name_aware_predicate() {
        let only_users = DispatchPredicate::new(|name, _| name == "users");
        assert!(only_users.test("users", &status(0, 0)));
        assert!(!only_users.test("posts", &status(0, 0)));
    }
}
