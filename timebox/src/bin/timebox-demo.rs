//! Demonstration harness.
//!
//! Four sets exercise every result code. `recursion-tight` overflows its
//! 1 MiB stack on purpose, which aborts whatever process runs it; only run it
//! with process isolation.

use std::hint::black_box;
use std::thread;
use std::time::Duration;
use timebox::prelude::*;

/// The system under test: a few integer routines, one of them buggy.
struct Calculator;

impl Calculator {
    fn fib(&self, n: u32) -> i64 {
        if n < 2 {
            n as i64
        } else {
            self.fib(n - 1) + self.fib(n - 2)
        }
    }

    fn fib_checked(&self, n: i64) -> Result<i64, Fault> {
        if n < 0 {
            return Err(Fault::new(
                FaultKind::InvalidArgument,
                format!("fibonacci of negative number {n}"),
            ));
        }
        Ok(self.fib(n as u32))
    }

    /// Returns the power and the number of multiplications used.
    fn power(&self, base: i64, exp: u32) -> (i64, u32) {
        let mut result = 1;
        for _ in 0..exp {
            result *= base;
        }
        (result, exp)
    }

    fn mean(&self, values: &[i64]) -> i64 {
        values.iter().sum::<i64>() / (values.len() as i64 + 1)
    }

    fn checked_div(&self, a: i64, b: i64) -> Result<i64, Fault> {
        a.checked_div(b)
            .ok_or_else(|| Fault::new(FaultKind::DivideByZero, "attempt to divide by zero"))
    }
}

#[derive(Debug, Clone, Copy)]
struct Observed {
    value: i64,
    steps: u32,
}

impl Observed {
    fn value(value: i64) -> Self {
        Self { value, steps: 0 }
    }
}

struct ArithmeticCase {
    description: &'static str,
    time_limit: f64,
    expected: Option<FaultKind>,
    run: fn(&Calculator) -> Result<Observed, Fault>,
    judge: fn(Observed) -> Verdict,
    seen: Recorder<Observed>,
}

impl ArithmeticCase {
    fn new(
        description: &'static str,
        run: fn(&Calculator) -> Result<Observed, Fault>,
        judge: fn(Observed) -> Verdict,
    ) -> Self {
        Self {
            description,
            time_limit: 1000.0,
            expected: None,
            run,
            judge,
            seen: Recorder::new(),
        }
    }

    fn expecting(mut self, kind: FaultKind) -> Self {
        self.expected = Some(kind);
        self
    }
}

impl TestCase<Calculator> for ArithmeticCase {
    fn time_limit(&self) -> f64 {
        self.time_limit
    }

    fn expected_fault(&self) -> Option<FaultKind> {
        self.expected.clone()
    }

    fn description(&self) -> &str {
        self.description
    }

    fn perform(&self, calculator: &Calculator) -> Result<(), Fault> {
        self.seen.record((self.run)(calculator)?);
        Ok(())
    }

    fn verify(&self, _: &()) -> Verdict {
        match self.seen.take() {
            Some(observed) => (self.judge)(observed),
            None => Verdict::wrong_result("no result recorded"),
        }
    }
}

fn expect_value(expected: i64, observed: Observed) -> Verdict {
    if observed.value == expected {
        Verdict::success("OK")
    } else {
        Verdict::wrong_result("mismatch")
    }
}

fn unreachable_verdict(_: Observed) -> Verdict {
    Verdict::wrong_result("action was expected to fail")
}

fn arithmetic_cases() -> Vec<ArithmeticCase> {
    vec![
        ArithmeticCase::new(
            "fibonacci(20)",
            |c| Ok(Observed::value(c.fib(20))),
            |o| expect_value(6765, o),
        ),
        ArithmeticCase::new(
            "3^20 by repeated multiplication",
            |c| {
                let (value, steps) = c.power(3, 20);
                Ok(Observed { value, steps })
            },
            |o| match o.value {
                3_486_784_401 if o.steps > 5 => {
                    Verdict::low_efficiency(format!("OK, but {} multiplications", o.steps))
                }
                3_486_784_401 => Verdict::success("OK"),
                _ => Verdict::wrong_result("mismatch"),
            },
        ),
        ArithmeticCase::new(
            "mean of [2, 4, 9]",
            |c| Ok(Observed::value(c.mean(&[2, 4, 9]))),
            |o| expect_value(5, o),
        ),
        ArithmeticCase::new(
            "checked division by zero",
            |c| c.checked_div(1, 0).map(Observed::value),
            unreachable_verdict,
        )
        .expecting(FaultKind::DivideByZero),
        ArithmeticCase::new(
            "raw integer division by zero",
            |_| Ok(Observed::value(1 / black_box(0i64))),
            unreachable_verdict,
        )
        .expecting(FaultKind::DivideByZero),
        ArithmeticCase::new(
            "division that cannot fail",
            |c| c.checked_div(6, 3).map(Observed::value),
            unreachable_verdict,
        )
        .expecting(FaultKind::DivideByZero),
        ArithmeticCase::new(
            "expects overflow, divides by zero",
            |c| c.checked_div(1, 0).map(Observed::value),
            unreachable_verdict,
        )
        .expecting(FaultKind::Overflow),
        ArithmeticCase::new(
            "fibonacci of a negative number",
            |c| c.fib_checked(-1).map(Observed::value),
            |o| expect_value(0, o),
        ),
    ]
}

struct Stall;

impl TestCase<Calculator> for Stall {
    fn time_limit(&self) -> f64 {
        50.0
    }

    fn description(&self) -> &str {
        "loop that never returns"
    }

    fn perform(&self, _: &Calculator) -> Result<(), Fault> {
        loop {
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn verify(&self, _: &()) -> Verdict {
        Verdict::wrong_result("cannot have finished")
    }
}

/// Recurses `depth` frames; each passes its own buffer down, so every frame
/// stays on the stack.
fn nest(depth: u64, parent: &[u8; 64]) -> u64 {
    let frame = black_box([parent[0].wrapping_add(1); 64]);
    if depth == 0 {
        0
    } else {
        nest(depth - 1, &frame) + 1
    }
}

struct Recursion {
    depth: u64,
    seen: Recorder<u64>,
}

impl Recursion {
    fn new(depth: u64) -> Self {
        Self {
            depth,
            seen: Recorder::new(),
        }
    }
}

impl TestCase<(), u64> for Recursion {
    fn time_limit(&self) -> f64 {
        2000.0
    }

    fn description(&self) -> &str {
        "deep recursion"
    }

    fn perform(&self, _: &()) -> Result<(), Fault> {
        self.seen.record(nest(self.depth, &[0; 64]));
        Ok(())
    }

    fn verify(&self, minimum_depth: &u64) -> Verdict {
        match self.seen.take() {
            Some(depth) if depth >= *minimum_depth => Verdict::success("OK"),
            _ => Verdict::wrong_result("recursion cut short"),
        }
    }
}

fn calibration_workload() -> Result<(), Fault> {
    black_box(Calculator.fib(black_box(27)));
    Ok(())
}

fn build_module() -> Result<TestModule, EngineError> {
    let mut arithmetic = TestSet::builder("Arithmetic", Calculator)
        .calibrate_with(calibration_workload)
        .build()?;
    for case in arithmetic_cases() {
        arithmetic.add_case(case);
    }

    let stalls = TestSet::builder("Stalls", Calculator)
        .calibrate_with(calibration_workload)
        .build()?
        .with_case(Stall)
        .with_case(ArithmeticCase::new(
            "fibonacci(10)",
            |c| Ok(Observed::value(c.fib(10))),
            |o| expect_value(55, o),
        ));

    let recursion = TestSet::builder("Recursion with a 64 MiB stack", ())
        .settings(100_000u64)
        .stack_size_mib(64)
        .calibrate_with(calibration_workload)
        .build()?
        .with_case(Recursion::new(100_000));

    let tight = TestSet::builder("Recursion with a 1 MiB stack", ())
        .settings(10_000_000u64)
        .calibrate_with(calibration_workload)
        .build()?
        .with_case(Recursion::new(10_000_000));

    Ok(TestModule::new()
        .with_set("arithmetic", arithmetic)
        .with_set("stalls", stalls)
        .with_set("recursion", recursion)
        .with_set("recursion-tight", tight)
        .with_scorer(|sets| {
            let passed: usize = sets.iter().map(|s| s.tally.passed).sum();
            let total: usize = sets.iter().map(|s| s.cases.len()).sum();
            if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64
            }
        }))
}

fn main() {
    if let Err(e) = timebox::run(build_module) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
