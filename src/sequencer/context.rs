use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Values shared between the steps of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestContext {
    values: IndexMap<String, Value>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Document submitted to the recording server, `{"pods": [{...}]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineReport {
    pod: Map<String, Value>,
}

impl Default for OnlineReport {
    fn default() -> Self {
        let mut pod = Map::new();
        for section in ["SOM", "TPM", "CAMERA"] {
            pod.insert(section.to_string(), Value::Object(Map::new()));
        }
        Self { pod }
    }
}

impl OnlineReport {
    /// Sets a top-level field of the pod.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.pod.insert(key.to_string(), value.into());
    }

    /// Sets a field inside one of the pod sections (`SOM`, `TPM`, `CAMERA`).
    pub fn set_in(&mut self, section: &str, key: &str, value: impl Into<Value>) {
        let entry = self
            .pod
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Some(map) = entry.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
    }

    pub fn pod(&self) -> &Map<String, Value> {
        &self.pod
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "pods": [Value::Object(self.pod.clone())] })
    }
}
