use super::{RecorderError, Sink};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Appends each record to one file, followed by `",\n"`.
pub struct LocalFileSink {
    path: Option<PathBuf>,
    pretty: bool,
}

impl LocalFileSink {
    /// With `None` every write fails, so nothing counts as recorded.
    pub fn new(path: Option<PathBuf>, pretty: bool) -> Self {
        Self { path, pretty }
    }

    /// Records into `<folder>/<YYYYmmdd_HHMMSS>.json`, creating the folder.
    pub fn automatic(folder: &Path, pretty: bool) -> Result<Self, RecorderError> {
        std::fs::create_dir_all(folder)?;
        let name = chrono::Local::now().format("%Y%m%d_%H%M%S.json").to_string();
        Ok(Self::new(Some(folder.join(name)), pretty))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Sink for LocalFileSink {
    fn write(&mut self, record: &Value) -> Result<(), RecorderError> {
        let Some(path) = self.path.as_ref() else {
            return Err(RecorderError::Transport("no local record file configured".into()));
        };
        let text = if self.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(text.as_bytes())?;
        file.write_all(b",\n")?;
        Ok(())
    }
}

/// Posts records as JSON to the recording server.
pub struct HttpSink {
    url: Option<String>,
    token: String,
    client: reqwest::blocking::Client,
}

impl HttpSink {
    pub fn new(url: Option<String>, token: String, timeout: Duration) -> Result<Self, RecorderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RecorderError::Transport(err.to_string()))?;
        Ok(Self { url, token, client })
    }
}

impl Sink for HttpSink {
    fn write(&mut self, record: &Value) -> Result<(), RecorderError> {
        let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) else {
            return Err(RecorderError::Transport("no recording server configured".into()));
        };
        let response = self
            .client
            .post(url)
            .header("XApiKey", &self.token)
            .json(record)
            .send()
            .map_err(|err| RecorderError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| RecorderError::Transport(err.to_string()))?;
        let reply = classify_response(status, &body)?;
        debug!("recording server replied {reply}");
        Ok(())
    }
}

/// A delivery succeeds only on a 2xx status with a JSON body.
pub fn classify_response(status: u16, body: &str) -> Result<Value, RecorderError> {
    let reply: Value = serde_json::from_str(body).map_err(|_| RecorderError::InvalidContent {
        status,
        body: body.to_string(),
    })?;
    if !(200..300).contains(&status) {
        return Err(RecorderError::Status {
            status,
            body: body.to_string(),
        });
    }
    Ok(reply)
}
