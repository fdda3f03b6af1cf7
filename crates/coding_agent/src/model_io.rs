//! Structured per-phase model-IO log.
//!
//! Emission is best-effort: logger failures are reported through `tracing`
//! and never reach the turn.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::TelemetryError;
use crate::provider::ContractVersions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelIoPhase {
    ModelRequest,
    ModelResponse,
    ToolStart,
    ToolResult,
    StreamFallback,
    SessionSummaryUpdate,
    TurnEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelIoEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    pub trace_id: String,
    pub phase: ModelIoPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<usize>,
    pub contract: ContractVersions,
    pub payload: Value,
}

pub trait ModelIoLogger: Send + Sync {
    fn log(&self, event: &ModelIoEvent) -> Result<(), TelemetryError>;
}

/// Turn-scoped emitter that stamps trace id and contract versions on each event.
pub struct ModelIoSink<'a> {
    logger: Option<&'a dyn ModelIoLogger>,
    trace_id: &'a str,
    contract: &'a ContractVersions,
}

impl<'a> ModelIoSink<'a> {
    pub fn new(
        logger: Option<&'a dyn ModelIoLogger>,
        trace_id: &'a str,
        contract: &'a ContractVersions,
    ) -> Self {
        Self {
            logger,
            trace_id,
            contract,
        }
    }

    /// A sink that drops every event.
    pub fn disabled(trace_id: &'a str, contract: &'a ContractVersions) -> Self {
        Self::new(None, trace_id, contract)
    }

    pub fn emit(&self, phase: ModelIoPhase, round: Option<usize>, payload: Value) {
        let Some(logger) = self.logger else {
            return;
        };

        let event = ModelIoEvent {
            ts: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            trace_id: self.trace_id.to_string(),
            phase,
            round,
            contract: self.contract.clone(),
            payload,
        };

        if let Err(error) = logger.log(&event) {
            tracing::debug!(trace_id = %self.trace_id, ?phase, %error, "model-io log event dropped");
        }
    }
}

/// Appends one JSON event per line to a file.
pub struct JsonlModelIoLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlModelIoLogger {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelIoLogger for JsonlModelIoLogger {
    fn log(&self, event: &ModelIoEvent) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = lock_unpoisoned(&self.file);
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
