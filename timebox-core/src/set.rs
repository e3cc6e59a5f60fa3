//! Test set orchestration.
//!
//! A [`TestSet`] owns a calibrated speed factor, the prototype under test, the
//! verifier settings, a stack budget and an ordered list of cases. Running it
//! converts each declared limit to seconds, hands the action to a
//! [`CaseRunner`], classifies the raw outcome and accumulates a [`Tally`].

use crate::bounded::{Action, DEFAULT_STACK_MIB, RunRequest};
use crate::calibrate::{Workload, calculate_speed_factor};
use crate::classify::{Tally, classify};
use crate::report::{CaseSummary, Reporter, SetSummary};
use crate::runner::{CaseJob, CaseRunner};
use crate::{CaseOutcome, EngineError, SpeedFactor, TestCase, Verdict};
use std::sync::Arc;
use tracing::{debug, info};

/// Switches for one run of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Enforce deadlines and capture every fault
    pub check_time_limit: bool,
    /// Report full messages instead of short tags
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            check_time_limit: true,
            verbose: true,
        }
    }
}

struct Slot<P, S> {
    case: Arc<dyn TestCase<P, S>>,
    outcome: CaseOutcome,
}

/// An ordered collection of cases sharing a prototype and settings.
pub struct TestSet<P, S = ()> {
    description: String,
    prototype: Arc<P>,
    settings: S,
    workload: Option<Workload>,
    speed_factor: SpeedFactor,
    stack_mib: usize,
    cases: Vec<Slot<P, S>>,
    tally: Tally,
}

/// Builder for [`TestSet`]; calibration happens in [`build`](Self::build).
pub struct TestSetBuilder<P, S = ()> {
    description: String,
    prototype: P,
    settings: S,
    workload: Option<Workload>,
    speed_factor: Option<SpeedFactor>,
    stack_mib: usize,
}

impl<P> TestSetBuilder<P, ()> {
    fn new(description: impl Into<String>, prototype: P) -> Self {
        Self {
            description: description.into(),
            prototype,
            settings: (),
            workload: None,
            speed_factor: None,
            stack_mib: DEFAULT_STACK_MIB,
        }
    }
}

impl<P, S> TestSetBuilder<P, S>
where
    P: Send + Sync + 'static,
    S: 'static,
{
    /// Settings handed to every verifier.
    pub fn settings<S2: 'static>(self, settings: S2) -> TestSetBuilder<P, S2> {
        TestSetBuilder {
            description: self.description,
            prototype: self.prototype,
            settings,
            workload: self.workload,
            speed_factor: self.speed_factor,
            stack_mib: self.stack_mib,
        }
    }

    /// Stack budget for action threads, in MiB.
    pub fn stack_size_mib(mut self, mib: usize) -> Self {
        self.stack_mib = mib.max(1);
        self
    }

    /// Calibrate with `workload` instead of the Fibonacci reference.
    pub fn calibrate_with<F>(mut self, workload: F) -> Self
    where
        F: Fn() -> Result<(), crate::Fault> + Send + Sync + 'static,
    {
        self.workload = Some(Arc::new(workload));
        self
    }

    /// Skip calibration and use a fixed factor.
    ///
    /// [`TestSet::reload`] still recalibrates.
    pub fn speed_factor(mut self, factor: SpeedFactor) -> Self {
        self.speed_factor = Some(factor);
        self
    }

    /// Calibrate (unless a factor was given) and create the empty set.
    pub fn build(self) -> Result<TestSet<P, S>, EngineError> {
        let speed_factor = match self.speed_factor {
            Some(factor) => factor,
            None => calculate_speed_factor(self.workload.as_ref())?,
        };
        Ok(TestSet {
            description: self.description,
            prototype: Arc::new(self.prototype),
            settings: self.settings,
            workload: self.workload,
            speed_factor,
            stack_mib: self.stack_mib,
            cases: Vec::new(),
            tally: Tally::default(),
        })
    }
}

impl<P> TestSet<P, ()>
where
    P: Send + Sync + 'static,
{
    /// Start building a set around `prototype`.
    pub fn builder(description: impl Into<String>, prototype: P) -> TestSetBuilder<P, ()> {
        TestSetBuilder::new(description, prototype)
    }
}

impl<P, S> TestSet<P, S>
where
    P: Send + Sync + 'static,
    S: 'static,
{
    /// Append a case.
    pub fn add_case(&mut self, case: impl TestCase<P, S>) -> &mut Self {
        self.cases.push(Slot {
            case: Arc::new(case),
            outcome: CaseOutcome::default(),
        });
        self
    }

    /// Append a case, builder style.
    pub fn with_case(mut self, case: impl TestCase<P, S>) -> Self {
        self.add_case(case);
        self
    }

    /// Set description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current seconds-per-unit factor.
    pub fn speed_factor(&self) -> SpeedFactor {
        self.speed_factor
    }

    /// Stack budget in MiB.
    pub fn stack_mib(&self) -> usize {
        self.stack_mib
    }

    /// The prototype under test.
    pub fn prototype(&self) -> &P {
        &self.prototype
    }

    /// Verifier settings.
    pub fn settings(&self) -> &S {
        &self.settings
    }

    /// Number of cases.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// No cases registered.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Totals of the last run.
    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Case at `index`.
    pub fn case(&self, index: usize) -> Option<&dyn TestCase<P, S>> {
        self.cases.get(index).map(|slot| slot.case.as_ref())
    }

    /// Outcome of case `index` from the last run.
    pub fn outcome(&self, index: usize) -> Option<&CaseOutcome> {
        self.cases.get(index).map(|slot| &slot.outcome)
    }

    /// Outcomes of the last run, in declaration order.
    pub fn outcomes(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.cases.iter().map(|slot| &slot.outcome)
    }

    /// Recompute the speed factor on this machine.
    ///
    /// Must be called after restoring a set built elsewhere.
    pub fn reload(&mut self) -> Result<(), EngineError> {
        self.speed_factor = calculate_speed_factor(self.workload.as_ref())?;
        info!(
            set = %self.description,
            seconds_per_unit = self.speed_factor.seconds_per_unit(),
            "recalibrated after reload"
        );
        Ok(())
    }

    /// The action of case `index`, ready to run on another thread.
    pub fn action(&self, index: usize) -> Option<Action> {
        let case = Arc::clone(&self.cases.get(index)?.case);
        let prototype = Arc::clone(&self.prototype);
        Some(Box::new(move || case.perform(&prototype)))
    }

    /// Run the verifier of case `index`.
    pub fn verify_case(&self, index: usize) -> Option<Verdict> {
        self.case(index).map(|case| case.verify(&self.settings))
    }

    /// Run every case in order.
    ///
    /// `name` identifies the set to runners that rebuild it in another
    /// process. Outcomes and totals from any previous run are discarded first.
    pub fn run_all(
        &mut self,
        name: &str,
        runner: &mut dyn CaseRunner,
        options: RunOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<Tally, EngineError> {
        self.tally = Tally::default();
        for slot in &mut self.cases {
            slot.outcome = CaseOutcome::default();
        }

        info!(set = name, cases = self.cases.len(), "running test set");
        reporter.set_started(&self.description);

        for index in 0..self.cases.len() {
            let outcome = self.run_case(name, index, runner, options)?;
            debug!(set = name, index, code = ?outcome.code, "case classified");
            self.tally.record(outcome.code);
            reporter.case_finished(index, &outcome, options.verbose);
            self.cases[index].outcome = outcome;
        }

        reporter.set_finished(&self.description, &self.tally, self.cases.len());
        Ok(self.tally)
    }

    fn run_case(
        &self,
        name: &str,
        index: usize,
        runner: &mut dyn CaseRunner,
        options: RunOptions,
    ) -> Result<CaseOutcome, EngineError> {
        let case = Arc::clone(&self.cases[index].case);
        let time_limit = case.time_limit();
        if !(time_limit > 0.0) {
            return Err(EngineError::InvalidTimeLimit(time_limit));
        }

        let request = RunRequest {
            time_limit_secs: self.speed_factor.to_seconds(time_limit),
            enforce_limit: options.check_time_limit,
            expected: case.expected_fault(),
            stack_mib: self.stack_mib,
        };
        let action: Action = {
            let case = Arc::clone(&case);
            let prototype = Arc::clone(&self.prototype);
            Box::new(move || case.perform(&prototype))
        };

        let raw = match runner.perform(CaseJob {
            set: name,
            index,
            request: &request,
            action,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                runner.release();
                return Err(e);
            }
        };

        let verdict = classify(&raw.completion, request.expected.as_ref(), time_limit, || {
            runner.verify(name, index, &|| case.verify(&self.settings))
        });
        runner.release();
        let verdict = verdict?;

        Ok(CaseOutcome {
            timeout: raw.timed_out(),
            fault: raw.fault().cloned(),
            performance_time: self.speed_factor.to_units(raw.elapsed),
            code: verdict.code,
            message: verdict.message,
        })
    }

    /// Snapshot for reports.
    pub fn summary(&self, name: &str) -> SetSummary {
        SetSummary {
            name: name.to_string(),
            description: self.description.clone(),
            speed_factor: self.speed_factor,
            tally: self.tally,
            cases: self
                .cases
                .iter()
                .enumerate()
                .map(|(index, slot)| CaseSummary {
                    index,
                    description: slot.case.description().to_string(),
                    time_limit: slot.case.time_limit(),
                    expected_fault: slot.case.expected_fault(),
                    outcome: slot.outcome.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullReporter;
    use crate::runner::ThreadRunner;
    use crate::{Fault, FaultKind, Recorder, ResultCode};
    use std::time::Duration;

    struct Counter {
        bump: i64,
    }

    struct Sum {
        limit: f64,
        expect: i64,
        seen: Recorder<i64>,
    }

    impl Sum {
        fn new(expect: i64) -> Self {
            Self {
                limit: 1.0,
                expect,
                seen: Recorder::new(),
            }
        }
    }

    impl TestCase<Counter> for Sum {
        fn time_limit(&self) -> f64 {
            self.limit
        }

        fn description(&self) -> &str {
            "sum"
        }

        fn perform(&self, prototype: &Counter) -> Result<(), Fault> {
            self.seen.record(prototype.bump + 1);
            Ok(())
        }

        fn verify(&self, _: &()) -> Verdict {
            match self.seen.take() {
                Some(v) if v == self.expect => Verdict::success("OK"),
                _ => Verdict::wrong_result("mismatch"),
            }
        }
    }

    struct Slow;

    impl TestCase<Counter> for Slow {
        fn time_limit(&self) -> f64 {
            1.0
        }

        fn description(&self) -> &str {
            "sleeps past the deadline"
        }

        fn perform(&self, _: &Counter) -> Result<(), Fault> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(())
        }

        fn verify(&self, _: &()) -> Verdict {
            Verdict::success("OK")
        }
    }

    struct Divides;

    impl TestCase<Counter> for Divides {
        fn time_limit(&self) -> f64 {
            1.0
        }

        fn expected_fault(&self) -> Option<FaultKind> {
            Some(FaultKind::DivideByZero)
        }

        fn description(&self) -> &str {
            "divides by zero"
        }

        fn perform(&self, _: &Counter) -> Result<(), Fault> {
            Err(Fault::new(FaultKind::DivideByZero, "attempt to divide by zero"))
        }

        fn verify(&self, _: &()) -> Verdict {
            Verdict::success("unreachable")
        }
    }

    struct Slowish;

    impl TestCase<Counter> for Slowish {
        fn time_limit(&self) -> f64 {
            1.0
        }

        fn description(&self) -> &str {
            "slow but right"
        }

        fn perform(&self, _: &Counter) -> Result<(), Fault> {
            Ok(())
        }

        fn verify(&self, _: &()) -> Verdict {
            Verdict::low_efficiency("took the long way")
        }
    }

    struct BadVerifier(ResultCode, &'static str);

    impl TestCase<Counter> for BadVerifier {
        fn time_limit(&self) -> f64 {
            1.0
        }

        fn description(&self) -> &str {
            "returns a forbidden verdict"
        }

        fn perform(&self, _: &Counter) -> Result<(), Fault> {
            Ok(())
        }

        fn verify(&self, _: &()) -> Verdict {
            Verdict::new(self.0, self.1)
        }
    }

    fn counter_set(seconds_per_unit: f64) -> TestSet<Counter> {
        TestSet::builder("counter set", Counter { bump: 41 })
            .speed_factor(SpeedFactor::new(seconds_per_unit).unwrap())
            .build()
            .unwrap()
    }

    fn run(set: &mut TestSet<Counter>) -> Result<Tally, EngineError> {
        set.run_all("counter", &mut ThreadRunner, RunOptions::default(), &mut NullReporter)
    }

    #[test]
    fn test_verifier_verdicts_are_tallied() {
        let mut set = counter_set(1.0)
            .with_case(Sum::new(42))
            .with_case(Sum::new(7))
            .with_case(Slowish);
        let tally = run(&mut set).unwrap();

        assert_eq!(tally.passed, 2);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.low_efficiency, 1);
        assert_eq!(set.outcome(0).unwrap().code, ResultCode::Success);
        assert_eq!(
            set.outcomes().map(|o| o.code).collect::<Vec<_>>(),
            [ResultCode::Success, ResultCode::WrongResult, ResultCode::LowEfficiency]
        );
        let wrong = set.outcome(1).unwrap();
        assert_eq!(wrong.code, ResultCode::WrongResult);
        assert_eq!(wrong.message, "mismatch");
    }

    #[test]
    fn test_timeout_marks_outcome_and_counts() {
        // 1 unit = 100 ms, action sleeps 400 ms.
        let mut set = counter_set(0.1).with_case(Slow);
        let tally = run(&mut set).unwrap();

        let outcome = set.outcome(0).unwrap();
        assert!(outcome.timeout);
        assert_eq!(outcome.code, ResultCode::Timeout);
        assert!(outcome.performance_time >= 0.99, "{}", outcome.performance_time);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.timed_out, 1);
    }

    #[test]
    fn test_expected_fault_counts_as_passed() {
        let mut set = counter_set(1.0).with_case(Divides);
        let tally = run(&mut set).unwrap();

        let outcome = set.outcome(0).unwrap();
        assert_eq!(outcome.code, ResultCode::ExpectedExceptionThrown);
        assert_eq!(outcome.fault.as_ref().unwrap().kind, FaultKind::DivideByZero);
        assert_eq!(tally.passed, 1);
    }

    #[test]
    fn test_forbidden_verdict_aborts_run() {
        let mut set = counter_set(1.0).with_case(BadVerifier(ResultCode::Timeout, "nope"));
        assert!(matches!(
            run(&mut set),
            Err(EngineError::InvalidResultCode(ResultCode::Timeout))
        ));

        let mut set = counter_set(1.0).with_case(BadVerifier(ResultCode::Success, "  "));
        assert!(matches!(run(&mut set), Err(EngineError::BlankMessage)));
    }

    #[test]
    fn test_non_positive_limit_aborts_run() {
        let mut set = counter_set(1.0).with_case(Sum {
            limit: 0.0,
            ..Sum::new(42)
        });
        assert!(matches!(run(&mut set), Err(EngineError::InvalidTimeLimit(_))));
    }

    #[test]
    fn test_builder_keeps_prototype_and_settings() {
        let set = TestSet::builder("typed", Counter { bump: 9 })
            .settings("tolerance".to_string())
            .stack_size_mib(8)
            .speed_factor(SpeedFactor::UNIT)
            .build()
            .unwrap();
        assert_eq!(set.prototype().bump, 9);
        assert_eq!(set.settings(), "tolerance");
        assert_eq!(set.stack_mib(), 8);
        assert!(set.is_empty());
        assert_eq!(set.outcomes().count(), 0);
    }

    #[test]
    fn test_rerun_resets_totals() {
        let mut set = counter_set(1.0).with_case(Sum::new(42)).with_case(Divides);
        let first = run(&mut set).unwrap();
        let second = run(&mut set).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.total(), 2);
    }

    #[test]
    fn test_summary_lists_cases() {
        let mut set = counter_set(1.0).with_case(Sum::new(42)).with_case(Divides);
        run(&mut set).unwrap();

        let summary = set.summary("counter");
        assert_eq!(summary.name, "counter");
        assert_eq!(summary.cases.len(), 2);
        assert_eq!(summary.cases[1].expected_fault, Some(FaultKind::DivideByZero));
        assert_eq!(summary.tally.passed, 2);
    }

    #[test]
    fn test_reload_recalibrates_with_stored_workload() {
        let mut set = TestSet::builder("reload", Counter { bump: 0 })
            .speed_factor(SpeedFactor::UNIT)
            .calibrate_with(|| -> Result<(), Fault> {
                std::thread::sleep(Duration::from_millis(5));
                Ok(())
            })
            .build()
            .unwrap();
        assert_eq!(set.speed_factor(), SpeedFactor::UNIT);

        set.reload().unwrap();
        let factor = set.speed_factor().seconds_per_unit();
        assert!(factor >= 0.005 && factor < 0.5, "{factor}");
    }
}
