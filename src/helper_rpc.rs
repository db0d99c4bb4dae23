//! Helper program RPC
//!
//! Helper programs answer through a single response file on the controller,
//! so a call is a trigger, execute and retrieve cycle which must never overlap
//! with another cycle on the same controller. Cycles are serialised by a lock
//! shared by every client of an endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::encoder::{self, HelperProgram, Request};
use crate::error::ProtocolError;
use crate::parser::{self, ParsedResult};
use crate::transport::Transport;
use crate::Result;

/// Lock guarding the response file of one controller
pub type ResponseFileLock = Arc<Mutex<()>>;

fn registry() -> &'static StdMutex<HashMap<String, ResponseFileLock>> {
    static LOCKS: OnceLock<StdMutex<HashMap<String, ResponseFileLock>>> = OnceLock::new();
    LOCKS.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// Response file lock for `endpoint`, shared process-wide
pub fn response_file_lock(endpoint: &str) -> ResponseFileLock {
    let mut locks = registry().lock().unwrap_or_else(PoisonError::into_inner);
    locks
        .entry(endpoint.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Owns the response file lock for the duration of a cycle.
///
/// Dropping an unfinished cycle means the trigger may have reached the
/// controller and the helper may still be writing, so the lock is handed to a
/// background task and released only after `settle`.
struct CycleGuard {
    guard: Option<OwnedMutexGuard<()>>,
    program: &'static str,
    settle: Duration,
    finished: bool,
}

impl CycleGuard {
    fn new(guard: OwnedMutexGuard<()>, program: &'static str, settle: Duration) -> Self {
        Self {
            guard: Some(guard),
            program,
            settle,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(guard) = self.guard.take() else {
            return;
        };
        warn!(
            "Call of helper program {} abandoned after trigger, response file stays locked for {:?}",
            self.program, self.settle
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let settle = self.settle;
                handle.spawn(async move {
                    tokio::time::sleep(settle).await;
                    drop(guard);
                });
            }
            Err(_) => drop(guard),
        }
    }
}

/// Client for the helper programs of one controller
pub struct HelperRpc {
    transport: Arc<dyn Transport>,
    lock: ResponseFileLock,
    response_file: String,
    settle: Duration,
}

impl HelperRpc {
    /// `settle` is how long an abandoned cycle keeps the response file locked
    pub fn new(transport: Arc<dyn Transport>, response_file: impl Into<String>, settle: Duration) -> Self {
        let lock = response_file_lock(transport.endpoint());
        Self {
            transport,
            lock,
            response_file: response_file.into(),
            settle,
        }
    }

    pub fn response_file(&self) -> &str {
        &self.response_file
    }

    /// Run `program` with `args` and return the document it wrote
    ///
    /// A helper-reported failure is returned as a resource error carrying
    /// the helper's reason.
    pub async fn call(&self, program: &HelperProgram, args: &[(&str, &str)]) -> Result<ParsedResult> {
        let trigger = encoder::helper_trigger(program, args)?;
        let retrieve = encoder::helper_result(&self.response_file, program)?;

        let guard = self.lock.clone().lock_owned().await;
        debug!("Acquired response file of {}", self.transport.endpoint());

        let cycle = CycleGuard::new(guard, program.name, self.settle);
        let outcome = self.run_cycle(program, &trigger, &retrieve).await;
        cycle.finish();
        outcome?.into_success()
    }

    async fn run_cycle(&self, program: &HelperProgram, trigger: &Request, retrieve: &Request) -> Result<ParsedResult> {
        info!("Running helper program {}", program.name);
        let response = self.transport.execute(trigger).await?;
        let started = parser::parse(&trigger.shape, &response)?;
        if !started.success {
            let reason = started.reason.unwrap_or_default();
            warn!("Helper program {} did not start: {}", program.name, reason);
            return Err(ProtocolError::TriggerFailed {
                program: program.name.to_string(),
                reason,
            }
            .into());
        }

        let document = self.transport.execute(retrieve).await?;
        let result = parser::parse(&retrieve.shape, &document)?;
        debug!(
            "Helper program {} finished (success: {})",
            program.name, result.success
        );
        Ok(result)
    }
}
