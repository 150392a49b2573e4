//! Background run worker
//!
//! Runs sequences on a dedicated thread so the caller (CLI loop, signal
//! handling, a future UI) stays responsive while a long delay is waited
//! out. Requests arrive over an mpsc channel and each produces exactly one
//! response.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use tracing::{debug, error};

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::executor::Engine;
use crate::report::RunReport;
use crate::sequence::Sequence;

/// Unique identifier for each run request/response pair.
pub type RunId = u64;

/// A request to run one sequence.
#[derive(Debug)]
pub struct RunRequest {
    pub id: RunId,
    /// Name shown in the summary line (usually the task file)
    pub label: String,
    pub sequence: Sequence,
    pub cancel: CancelToken,
}

/// The result of one run request.
#[derive(Debug)]
pub struct RunResponse {
    pub id: RunId,
    pub label: String,
    pub result: Result<RunReport, EngineError>,
}

impl RunResponse {
    /// Operator-facing one-liner for this response
    pub fn summary(&self) -> String {
        match &self.result {
            Ok(report) => report.summary(&self.label),
            Err(e) => format!("Error executing {}: {}", self.label, e),
        }
    }
}

/// Spawns the worker thread.
///
/// The thread handles requests in arrival order and exits when the request
/// channel closes or the response receiver is dropped. It never shuts the
/// engine down; that stays with the owner.
pub fn spawn_run_worker(
    engine: Arc<Engine>,
    request_rx: Receiver<RunRequest>,
    response_tx: Sender<RunResponse>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        debug!("Run worker started");
        while let Ok(request) = request_rx.recv() {
            debug!(
                "Run {} ({}): {} step(s)",
                request.id,
                request.label,
                request.sequence.len()
            );
            let result = engine.execute_cancellable(&request.sequence, &request.cancel);

            let response = RunResponse {
                id: request.id,
                label: request.label,
                result,
            };
            if response_tx.send(response).is_err() {
                error!("Failed to send run response. Receiver probably dropped.");
                break;
            }
        }
        debug!("Run worker shut down");
    })
}
