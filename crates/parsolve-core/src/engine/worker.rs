//! Wire protocol between the isolated-process backend and its child processes.
//!
//! The parent writes exactly one JSON request line to the child's stdin and reads one
//! JSON reply line from its stdout. Floats survive the trip bit-for-bit. Anything the
//! child wants to log goes to stderr.

use super::error::TaskTransportError;
use super::progress::{Progress, ProgressReporter};
use super::task::TaskPayload;
use super::workspace::{Workspace, WorkspaceError};
use crate::core::problem::ProblemSpec;
use crate::core::solver::result::SolveResult;
use crate::core::solver::settings::{SolveOverrides, SolverSettings};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, instrument};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed worker message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol version mismatch: worker speaks {expected}, request uses {found}")]
    ProtocolMismatch { expected: u32, found: u32 },

    #[error("No request received on stdin")]
    EmptyRequest,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerRequest {
    pub protocol: u32,
    pub index: usize,
    pub spec: ProblemSpec,
    pub settings: SolverSettings,
    pub overrides: SolveOverrides,
}

#[derive(Serialize)]
struct OutgoingRequest<'a> {
    protocol: u32,
    index: usize,
    spec: &'a ProblemSpec,
    settings: &'a SolverSettings,
    overrides: &'a SolveOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum WorkerReply {
    Solved {
        index: usize,
        result: SolveResult,
        /// Progress messages produced while solving, relayed by the parent in order.
        messages: Vec<String>,
    },
    Failed {
        index: usize,
        error: WorkspaceError,
    },
}

impl WorkerReply {
    pub fn index(&self) -> usize {
        match self {
            Self::Solved { index, .. } | Self::Failed { index, .. } => *index,
        }
    }
}

/// Serializes a payload into one request line, or explains why it cannot travel.
pub(crate) fn encode_request(
    index: usize,
    payload: &TaskPayload,
) -> Result<String, TaskTransportError> {
    let barrier = |reason: String| TaskTransportError {
        index,
        task: payload.kind(),
        reason,
    };
    if let Some(reason) = payload.transport_barrier() {
        return Err(barrier(reason));
    }
    let TaskPayload::Solve {
        spec,
        settings,
        overrides,
    } = payload
    else {
        return Err(barrier("only solve payloads can be encoded".to_string()));
    };
    let request = OutgoingRequest {
        protocol: PROTOCOL_VERSION,
        index,
        spec,
        settings,
        overrides,
    };
    serde_json::to_string(&request).map_err(|e| barrier(format!("serialization failed: {e}")))
}

/// Constructs and solves the requested problem inside this process.
#[instrument(level = "debug", skip_all, fields(task = request.index))]
pub fn handle(request: WorkerRequest) -> WorkerReply {
    let WorkerRequest {
        index,
        spec,
        settings,
        overrides,
        ..
    } = request;

    let messages = Mutex::new(Vec::new());
    let reporter = ProgressReporter::with_callback(Box::new(|event| {
        if let Progress::Message(text) = event {
            messages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text);
        }
    }));

    let outcome = Workspace::construct(spec, settings)
        .map_err(WorkspaceError::from)
        .and_then(|mut workspace| workspace.solve_with(&overrides, &reporter));
    drop(reporter);

    match outcome {
        Ok(result) => {
            debug!(status = %result.status, "Worker solve finished");
            WorkerReply::Solved {
                index,
                result,
                messages: messages.into_inner().unwrap_or_else(PoisonError::into_inner),
            }
        }
        Err(error) => WorkerReply::Failed { index, error },
    }
}

/// Reads one request, handles it, and writes one reply line.
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W) -> Result<(), WorkerError> {
    let mut request_line = None;
    for line in input.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            request_line = Some(line);
            break;
        }
    }
    let line = request_line.ok_or(WorkerError::EmptyRequest)?;

    let request: WorkerRequest = serde_json::from_str(&line)?;
    if request.protocol != PROTOCOL_VERSION {
        return Err(WorkerError::ProtocolMismatch {
            expected: PROTOCOL_VERSION,
            found: request.protocol,
        });
    }

    let reply = handle(request);
    serde_json::to_writer(&mut output, &reply)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}
