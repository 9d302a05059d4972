//! Runs an ordered step catalog against a bench, stopping at the first failure.

pub mod context;
pub mod report;

pub use context::{OnlineReport, TestContext};
pub use report::{ExceptionInfo, RunReport, TestResult, TIME_FORMAT};

use crate::{Error, Result, RESULT_TARGET};
use report::ReportBuilder;
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_STEP_DELAY: Duration = Duration::from_secs(1);

pub type PerformFn<B> = fn(&mut B, &mut TestContext, &AtomicBool) -> Result<Value>;
pub type CheckFn<B> = fn(&mut B, &Value, &mut TestContext, &mut OnlineReport) -> Result<bool>;

pub struct StepDef<B> {
    pub name: &'static str,
    pub perform: PerformFn<B>,
    /// Falls back to [`default_check`].
    pub check: Option<CheckFn<B>>,
}

impl<B> StepDef<B> {
    pub const fn new(name: &'static str, perform: PerformFn<B>) -> Self {
        Self {
            name,
            perform,
            check: None,
        }
    }

    pub const fn checked(name: &'static str, perform: PerformFn<B>, check: CheckFn<B>) -> Self {
        Self {
            name,
            perform,
            check: Some(check),
        }
    }
}

/// Truthiness of a step value.
pub fn default_check(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Ordered steps of one product variant.
pub struct Catalog<B> {
    pub variant: &'static str,
    pub steps: Vec<StepDef<B>>,
}

impl<B> Catalog<B> {
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|step| step.name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.iter().any(|step| step.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMark {
    Running,
    Passed,
    Failed,
    Skipped,
}

impl StepMark {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepMark::Running => "running",
            StepMark::Passed => "passed",
            StepMark::Failed => "failed",
            StepMark::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepMark {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(StepMark::Running),
            "passed" => Ok(StepMark::Passed),
            "failed" => Ok(StepMark::Failed),
            "skipped" => Ok(StepMark::Skipped),
            other => Err(Error::InvalidArgs(format!("unknown step mark '{other}'"))),
        }
    }
}

/// Operator-facing surface. Every method has a no-op default.
pub trait Hooks: Send + Sync {
    fn set_status(&self, _text: &str) {}
    fn mark_step(&self, _step: &str, _mark: StepMark) {}
    fn report_sensor(&self, _name: &str, _ok: bool) {}
    /// Yes/no question to the operator. Declines by default.
    fn ask_operator(&self, _title: &str, _question: &str) -> bool {
        false
    }
}

pub struct NullHooks;

impl Hooks for NullHooks {}

/// What the sequencer needs from the bench beyond the steps themselves.
pub trait Bench {
    /// Signals background work tied to the run (the boot task) to stop.
    fn stop_background(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Running(usize),
    Aborted,
    Completed,
}

pub struct Sequencer<B> {
    catalog: Catalog<B>,
    hooks: Arc<dyn Hooks>,
    cancel: Arc<AtomicBool>,
    step_delay: Duration,
    state: SequencerState,
}

enum Halt {
    Failed,
    Exception(String),
}

impl<B: Bench> Sequencer<B> {
    pub fn new(catalog: Catalog<B>, hooks: Arc<dyn Hooks>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            catalog,
            hooks,
            cancel,
            step_delay: DEFAULT_STEP_DELAY,
            state: SequencerState::Idle,
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn catalog(&self) -> &Catalog<B> {
        &self.catalog
    }

    /// Runs every step not in `skip`. The report is sealed on completion, on the first
    /// failed check and on the first error or panic.
    pub fn run(
        &mut self,
        bench: &mut B,
        skip: &HashSet<String>,
        context: &mut TestContext,
        online: &mut OnlineReport,
    ) -> RunReport {
        let mut report = ReportBuilder::start();
        let mut pass = true;

        for index in 0..self.catalog.steps.len() {
            let step = &self.catalog.steps[index];
            let name = step.name;
            if skip.contains(name) {
                info!("Skipping test {name}");
                self.hooks.mark_step(name, StepMark::Skipped);
                continue;
            }
            self.state = SequencerState::Running(index);
            info!("Performing test {name}");
            self.hooks.set_status(&format!("Performing test {name}"));
            self.hooks.mark_step(name, StepMark::Running);

            let perform = step.perform;
            let check = step.check;
            match self.run_step(bench, name, perform, check, context, online) {
                Ok((value, true)) => {
                    report.push(name, value, true);
                    info!("{name} passed");
                    self.hooks.mark_step(name, StepMark::Passed);
                    if !self.step_delay.is_zero() {
                        std::thread::sleep(self.step_delay);
                    }
                }
                Ok((value, false)) => {
                    report.push(name, value, false);
                    self.halt(bench, name, Halt::Failed);
                    pass = false;
                    break;
                }
                Err(trace) => {
                    report.exception(name, trace.clone());
                    self.halt(bench, name, Halt::Exception(trace));
                    pass = false;
                    break;
                }
            }
        }

        if pass {
            self.state = SequencerState::Completed;
            bench.stop_background();
        }
        let report = report.seal(pass);
        self.hooks.set_status(if report.pass {
            "Test success !"
        } else {
            "Test failed !"
        });
        report
    }

    fn run_step(
        &self,
        bench: &mut B,
        name: &str,
        perform: PerformFn<B>,
        check: Option<CheckFn<B>>,
        context: &mut TestContext,
        online: &mut OnlineReport,
    ) -> std::result::Result<(Value, bool), String> {
        let cancel = Arc::clone(&self.cancel);
        let value = guarded(|| perform(bench, context, &cancel))?;
        debug!("{name} result : {value}");

        if self.cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled(format!("Exit requested during test {name} !")).to_string());
        }

        let success = match check {
            Some(check) => guarded(|| check(bench, &value, context, online))?,
            None => default_check(&value),
        };
        Ok((value, success))
    }

    fn halt(&mut self, bench: &mut B, name: &str, why: Halt) {
        self.state = SequencerState::Aborted;
        bench.stop_background();
        self.hooks.mark_step(name, StepMark::Failed);
        match why {
            Halt::Failed => error!("Test aborted : {name} failed !"),
            Halt::Exception(trace) => error!("Test aborted : {name} raised {trace}"),
        }
    }
}

/// The single place run outcomes are logged.
pub fn log_result(pass: bool) {
    if pass {
        info!(target: RESULT_TARGET, pass, "Test success !");
    } else {
        error!(target: RESULT_TARGET, pass, "Test failed !");
    }
}

fn guarded<T>(op: impl FnOnce() -> Result<T>) -> std::result::Result<T, String> {
    match catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:?}: {err}")),
        Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown payload".to_string()
    }
}
