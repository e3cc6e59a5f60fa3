//! Test module: an ordered registry of named test sets.

use crate::bounded::Action;
use crate::classify::Tally;
use crate::report::{Reporter, SetSummary};
use crate::runner::{CaseRunner, run_verifier};
use crate::set::{RunOptions, TestSet};
use crate::worker::WorkerTarget;
use crate::{EngineError, Verdict};
use tracing::{info, warn};

/// Object-safe view of a [`TestSet`], so sets with different prototype and
/// settings types can live in one module.
pub trait Suite {
    /// Set description.
    fn description(&self) -> &str;

    /// Number of cases.
    fn len(&self) -> usize;

    /// No cases registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Case descriptions in declaration order.
    fn case_descriptions(&self) -> Vec<String>;

    /// Run every case; see [`TestSet::run_all`].
    fn run_all(
        &mut self,
        name: &str,
        runner: &mut dyn CaseRunner,
        options: RunOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<Tally, EngineError>;

    /// Recalibrate; see [`TestSet::reload`].
    fn reload(&mut self) -> Result<(), EngineError>;

    /// Snapshot for reports.
    fn summary(&self, name: &str) -> SetSummary;

    /// Stack budget in MiB.
    fn stack_mib(&self) -> usize;

    /// Action of case `index`.
    fn action(&self, index: usize) -> Option<Action>;

    /// Verifier of case `index`.
    fn verify_case(&self, index: usize) -> Option<Verdict>;
}

impl<P, S> Suite for TestSet<P, S>
where
    P: Send + Sync + 'static,
    S: 'static,
{
    fn description(&self) -> &str {
        TestSet::description(self)
    }

    fn len(&self) -> usize {
        TestSet::len(self)
    }

    fn case_descriptions(&self) -> Vec<String> {
        (0..TestSet::len(self))
            .filter_map(|i| self.case(i).map(|c| c.description().to_string()))
            .collect()
    }

    fn run_all(
        &mut self,
        name: &str,
        runner: &mut dyn CaseRunner,
        options: RunOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<Tally, EngineError> {
        TestSet::run_all(self, name, runner, options, reporter)
    }

    fn reload(&mut self) -> Result<(), EngineError> {
        TestSet::reload(self)
    }

    fn summary(&self, name: &str) -> SetSummary {
        TestSet::summary(self, name)
    }

    fn stack_mib(&self) -> usize {
        TestSet::stack_mib(self)
    }

    fn action(&self, index: usize) -> Option<Action> {
        TestSet::action(self, index)
    }

    fn verify_case(&self, index: usize) -> Option<Verdict> {
        TestSet::verify_case(self, index)
    }
}

type Scorer = Box<dyn Fn(&[SetSummary]) -> f64>;

/// Named test sets in registration order, plus an optional scoring rule.
#[derive(Default)]
pub struct TestModule {
    sets: Vec<(String, Box<dyn Suite>)>,
    scorer: Option<Scorer>,
}

impl TestModule {
    /// Empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `set` under `name`. A set already registered under that name
    /// is replaced in place.
    pub fn add(&mut self, name: impl Into<String>, set: impl Suite + 'static) -> &mut Self {
        let name = name.into();
        let set: Box<dyn Suite> = Box::new(set);
        match self.sets.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => {
                warn!(set = %name, "replacing previously registered test set");
                entry.1 = set;
            }
            None => self.sets.push((name, set)),
        }
        self
    }

    /// Register a set, builder style.
    pub fn with_set(mut self, name: impl Into<String>, set: impl Suite + 'static) -> Self {
        self.add(name, set);
        self
    }

    /// Replace the default score (`1.0`) with `scorer` over the set summaries.
    pub fn with_scorer<F>(mut self, scorer: F) -> Self
    where
        F: Fn(&[SetSummary]) -> f64 + 'static,
    {
        self.scorer = Some(Box::new(scorer));
        self
    }

    /// Set registered under `name`.
    pub fn get(&self, name: &str) -> Option<&dyn Suite> {
        self.sets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_ref())
    }

    fn require(&self, name: &str) -> Result<&dyn Suite, EngineError> {
        self.get(name)
            .ok_or_else(|| EngineError::UnknownSet(name.to_string()))
    }

    /// Registered names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(|(n, _)| n.as_str())
    }

    /// Number of sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// No sets registered.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Run every set whose name passes `filter`, in registration order.
    ///
    /// Stops at the first fatal error. Returns the combined totals.
    pub fn run_all(
        &mut self,
        filter: &dyn Fn(&str) -> bool,
        runner: &mut dyn CaseRunner,
        options: RunOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<Tally, EngineError> {
        let mut total = Tally::default();
        for (name, set) in &mut self.sets {
            if !filter(name) {
                continue;
            }
            let tally = set.run_all(name, runner, options, reporter)?;
            total.absorb(&tally);
        }
        info!(
            passed = total.passed,
            failed = total.failed,
            timed_out = total.timed_out,
            "test module finished"
        );
        Ok(total)
    }

    /// Recalibrate every set.
    pub fn reload(&mut self) -> Result<(), EngineError> {
        for (_, set) in &mut self.sets {
            set.reload()?;
        }
        Ok(())
    }

    /// Snapshots of every set.
    pub fn summaries(&self) -> Vec<SetSummary> {
        self.sets.iter().map(|(n, s)| s.summary(n)).collect()
    }

    /// Module score: `1.0` unless a scorer was installed.
    pub fn score(&self) -> f64 {
        match &self.scorer {
            Some(scorer) => scorer(&self.summaries()),
            None => 1.0,
        }
    }
}

impl WorkerTarget for TestModule {
    fn set_count(&self) -> usize {
        self.len()
    }

    fn action(&self, set: &str, index: usize) -> Result<Action, EngineError> {
        self.require(set)?
            .action(index)
            .ok_or_else(|| EngineError::UnknownCase {
                set: set.to_string(),
                index,
            })
    }

    fn verify(&self, set: &str, index: usize) -> Result<Verdict, EngineError> {
        let suite = self.require(set)?;
        run_verifier(|| suite.verify_case(index))?.ok_or_else(|| EngineError::UnknownCase {
            set: set.to_string(),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullReporter;
    use crate::runner::ThreadRunner;
    use crate::{Fault, FaultKind, ResultCode, SpeedFactor, TestCase};

    struct Fixed(ResultCode);

    impl TestCase<()> for Fixed {
        fn time_limit(&self) -> f64 {
            1.0
        }

        fn description(&self) -> &str {
            "fixed verdict"
        }

        fn perform(&self, _: &()) -> Result<(), Fault> {
            Ok(())
        }

        fn verify(&self, _: &()) -> Verdict {
            Verdict::new(self.0, "fixed")
        }
    }

    struct Typed;

    impl TestCase<String, usize> for Typed {
        fn time_limit(&self) -> f64 {
            1.0
        }

        fn expected_fault(&self) -> Option<FaultKind> {
            Some(FaultKind::NotFound)
        }

        fn description(&self) -> &str {
            "looks up a missing key"
        }

        fn perform(&self, prototype: &String) -> Result<(), Fault> {
            Err(Fault::new(FaultKind::NotFound, format!("{prototype} not found")))
        }

        fn verify(&self, _: &usize) -> Verdict {
            Verdict::success("unreachable")
        }
    }

    fn module() -> TestModule {
        let plain = TestSet::builder("plain", ())
            .speed_factor(SpeedFactor::UNIT)
            .build()
            .unwrap()
            .with_case(Fixed(ResultCode::Success))
            .with_case(Fixed(ResultCode::WrongResult));
        let typed = TestSet::builder("typed", "key".to_string())
            .settings(3usize)
            .speed_factor(SpeedFactor::UNIT)
            .build()
            .unwrap()
            .with_case(Typed);
        TestModule::new().with_set("plain", plain).with_set("typed", typed)
    }

    #[test]
    fn test_run_all_combines_sets() {
        let mut module = module();
        let tally = module
            .run_all(&|_| true, &mut ThreadRunner, RunOptions::default(), &mut NullReporter)
            .unwrap();
        assert_eq!(tally.passed, 2);
        assert_eq!(tally.failed, 1);
        assert_eq!(module.names().collect::<Vec<_>>(), ["plain", "typed"]);
    }

    #[test]
    fn test_filter_skips_sets() {
        let mut module = module();
        let tally = module
            .run_all(
                &|name| name == "typed",
                &mut ThreadRunner,
                RunOptions::default(),
                &mut NullReporter,
            )
            .unwrap();
        assert_eq!(tally.total(), 1);
        let plain = &module.summaries()[0];
        assert_eq!(plain.cases[0].outcome.code, ResultCode::NotPerformed);
    }

    #[test]
    fn test_score_defaults_to_one() {
        assert_eq!(module().score(), 1.0);

        let mut module = module().with_scorer(|sets| {
            let passed: usize = sets.iter().map(|s| s.tally.passed).sum();
            passed as f64 / 10.0
        });
        module
            .run_all(&|_| true, &mut ThreadRunner, RunOptions::default(), &mut NullReporter)
            .unwrap();
        assert!((module.score() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_add_replaces_same_name() {
        let mut module = module();
        let empty = TestSet::builder("empty", ())
            .speed_factor(SpeedFactor::UNIT)
            .build()
            .unwrap();
        module.add("plain", empty);
        assert_eq!(module.len(), 2);
        assert!(module.get("plain").unwrap().is_empty());
    }

    #[test]
    fn test_worker_target_lookups() {
        let module = module();
        assert!(matches!(
            module.action("missing", 0),
            Err(EngineError::UnknownSet(_))
        ));
        assert!(matches!(
            module.action("plain", 9),
            Err(EngineError::UnknownCase { index: 9, .. })
        ));

        let fault = (module.action("typed", 0).unwrap())().unwrap_err();
        assert_eq!(fault.kind, FaultKind::NotFound);
        assert_eq!(fault.message, "key not found");

        let verdict = module.verify("plain", 1).unwrap();
        assert_eq!(verdict.code, ResultCode::WrongResult);
    }
}
