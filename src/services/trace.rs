use crate::errors::ToolError;
use crate::services::logger::Logger;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Records what each invocation was given and what it produced. Sinks must
/// swallow their own failures.
pub trait TraceSink: Send + Sync {
    fn add_input(&self, input: &Value) -> usize;
    fn add_output(&self, index: usize, output: Result<&str, &ToolError>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceOutput {
    Pending,
    Text(String),
    Error { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub input: Value,
    pub output: TraceOutput,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl TraceSink for MemoryTraceSink {
    fn add_input(&self, input: &Value) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        entries.push(TraceEntry {
            input: input.clone(),
            output: TraceOutput::Pending,
        });
        entries.len() - 1
    }

    fn add_output(&self, index: usize, output: Result<&str, &ToolError>) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if let Some(entry) = entries.get_mut(index) {
            entry.output = match output {
                Ok(text) => TraceOutput::Text(text.to_string()),
                Err(err) => TraceOutput::Error {
                    kind: serde_json::to_value(err.kind)
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_default(),
                    message: err.message.clone(),
                },
            };
        }
    }
}

/// Drops everything; for long-running servers with no trace file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn add_input(&self, _input: &Value) -> usize {
        0
    }

    fn add_output(&self, _index: usize, _output: Result<&str, &ToolError>) {}
}

/// Appends one JSON line per input and per output to a file.
#[derive(Debug, Clone)]
pub struct AuditTraceSink {
    logger: Logger,
    tool: String,
    file_path: PathBuf,
    state: Arc<Mutex<usize>>,
}

impl AuditTraceSink {
    pub fn new(logger: Logger, tool: &str, file_path: PathBuf) -> Self {
        Self {
            logger: logger.child("trace"),
            tool: tool.to_string(),
            file_path,
            state: Arc::new(Mutex::new(0)),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.file_path
    }

    fn append(&self, entry: &Value) {
        let payload = format!("{}\n", entry);
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(err) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .and_then(|mut file| {
                use std::io::Write;
                file.write_all(payload.as_bytes())
            })
        {
            self.logger.warn(
                "Trace write failed",
                Some(&json!({"error": err.to_string(), "path": self.file_path})),
            );
        }
    }
}

impl TraceSink for AuditTraceSink {
    fn add_input(&self, input: &Value) -> usize {
        let mut next = self.state.lock().unwrap_or_else(|err| err.into_inner());
        let index = *next;
        *next += 1;
        self.append(&json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "tool": self.tool,
            "index": index,
            "input": input,
        }));
        index
    }

    fn add_output(&self, index: usize, output: Result<&str, &ToolError>) {
        let _guard = self.state.lock().unwrap_or_else(|err| err.into_inner());
        let body = match output {
            Ok(text) => json!({"status": "ok", "output": text}),
            Err(err) => json!({"status": "error", "error": err}),
        };
        let mut entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "tool": self.tool,
            "index": index,
        });
        if let (Some(target), Some(extra)) = (entry.as_object_mut(), body.as_object()) {
            target.extend(extra.clone());
        }
        self.append(&entry);
    }
}
