use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

pub const TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S:%6f";

fn timestamp<S: Serializer>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format(TIME_FORMAT))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub value: Value,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    pub test: String,
    pub trace: String,
}

/// Outcome of one run, `{start_time, end_time, pass, <STEP>: {...}, exception}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(serialize_with = "timestamp")]
    pub start_time: DateTime<Local>,
    #[serde(serialize_with = "timestamp")]
    pub end_time: DateTime<Local>,
    pub pass: bool,
    #[serde(flatten)]
    pub results: IndexMap<String, TestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
}

impl RunReport {
    pub fn start_stamp(&self) -> String {
        self.start_time.format(TIME_FORMAT).to_string()
    }

    pub fn result(&self, step: &str) -> Option<&TestResult> {
        self.results.get(step)
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Open report, filled while a run is in progress.
#[derive(Debug)]
pub(crate) struct ReportBuilder {
    start_time: DateTime<Local>,
    results: IndexMap<String, TestResult>,
    exception: Option<ExceptionInfo>,
}

impl ReportBuilder {
    pub fn start() -> Self {
        Self {
            start_time: Local::now(),
            results: IndexMap::new(),
            exception: None,
        }
    }

    pub fn push(&mut self, step: &str, value: Value, success: bool) {
        self.results
            .insert(step.to_string(), TestResult { value, success });
    }

    pub fn exception(&mut self, test: &str, trace: String) {
        self.exception = Some(ExceptionInfo {
            test: test.to_string(),
            trace,
        });
    }

    pub fn seal(self, pass: bool) -> RunReport {
        RunReport {
            start_time: self.start_time,
            end_time: Local::now(),
            pass: pass && self.exception.is_none(),
            results: self.results,
            exception: self.exception,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_serialises_flat() {
        let mut builder = ReportBuilder::start();
        builder.push("POWER_SUPPLY", json!({ "5V": 5.0 }), true);
        let report = builder.seal(true);
        let doc = report.to_json().unwrap();
        assert_eq!(doc["pass"], true);
        assert_eq!(doc["POWER_SUPPLY"]["success"], true);
        assert!(doc.get("exception").is_none());
        assert!(doc["end_time"].as_str().unwrap() >= doc["start_time"].as_str().unwrap());
    }

    #[test]
    fn exception_forces_failure() {
        let mut builder = ReportBuilder::start();
        builder.exception("READ_ID", "io error".into());
        let report = builder.seal(true);
        assert!(!report.pass);
        assert_eq!(report.to_json().unwrap()["exception"]["test"], "READ_ID");
    }

    #[test]
    fn timestamps_use_microseconds() {
        let report = ReportBuilder::start().seal(true);
        let stamp = report.start_stamp();
        assert_eq!(stamp.rsplit(':').next().map(str::len), Some(6));
    }
}
