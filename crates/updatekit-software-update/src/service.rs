//! The bundled update state machine
//!
//! ```text
//! INACTIVE ─start─▶ TRANSFERRING ─set_transferred─▶ TRANSFERRED ─verify─▶ VERIFYING
//!                                                        │                    │
//!                                                        └──────apply─────────┤
//!                                                                             ▼
//!                         FINISHED ◀── APPLYING ◀──────apply────────────── VERIFIED
//! ```
//!
//! Any state other than INACTIVE, APPLYING and FINISHED can be aborted, and
//! every failure ends in FINISHED with a result and note. `reset` returns to
//! INACTIVE.
//!
//! # Locking
//!
//! Request handlers hold the service mutex for their whole body; `verify`
//! and `apply` only hold it long enough to enqueue work, and the work item
//! re-acquires it. The status record sits behind its own [`Borrowable`] so
//! [`get_status`](BundledUpdateService::get_status) never waits on a running
//! verification. Lock order is service mutex, then status; the backend lock
//! is never held while taking either. `abort` reads the status before taking
//! the service mutex so it can refuse a running apply without waiting on it.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use updatekit_errors::{Result, UpdateError};
use updatekit_sync::{Borrowable, Work, WorkQueue};

use crate::backend::BundledUpdateBackend;
use crate::bundle::UpdateBundleAccessor;
use crate::config::ServiceConfig;
use crate::proto::USER_MANIFEST_TARGET_NAME;

/// Progress value meaning "done", in hundredths of a percent.
pub const PROGRESS_COMPLETE: u32 = 10_000;

/// Update state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateState {
    /// No update in progress
    #[default]
    Inactive,
    /// Bundle transfer enabled
    Transferring,
    /// Bundle staged
    Transferred,
    /// Verification queued or running
    Verifying,
    /// Bundle verified
    Verified,
    /// Targets being applied
    Applying,
    /// Update ended; see the result
    Finished,
    /// Abort in progress
    Aborting,
}

impl UpdateState {
    /// Upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateState::Inactive => "INACTIVE",
            UpdateState::Transferring => "TRANSFERRING",
            UpdateState::Transferred => "TRANSFERRED",
            UpdateState::Verifying => "VERIFYING",
            UpdateState::Verified => "VERIFIED",
            UpdateState::Applying => "APPLYING",
            UpdateState::Finished => "FINISHED",
            UpdateState::Aborting => "ABORTING",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateResult {
    /// Applied
    Success,
    /// Backend or internal failure
    UnknownError,
    /// Aborted by request
    Aborted,
    /// Transfer could not be set up
    TransferFailed,
    /// Verification failed
    VerifyFailed,
    /// Applying failed
    ApplyFailed,
}

/// Status record returned by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundledUpdateStatus {
    /// Current state
    pub state: UpdateState,
    /// Id of the enabled transfer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<u32>,
    /// Name given to `start`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_filename: Option<String>,
    /// Progress through the current state, in hundredths of a percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state_progress_hundredth_percent: Option<u32>,
    /// Outcome, once finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UpdateResult>,
    /// Human-readable detail of a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

type Job = fn(&ServiceInner, &mut ServiceCore);

struct ServiceCore {
    bundle: UpdateBundleAccessor,
    bundle_open: bool,
    work_enqueued: bool,
}

struct ServiceInner {
    config: ServiceConfig,
    core: Mutex<ServiceCore>,
    status: Borrowable<BundledUpdateStatus>,
    backend: Arc<Mutex<dyn BundledUpdateBackend>>,
    work_queue: Arc<dyn WorkQueue>,
}

/// Drives a bundle from transfer through verification to apply.
#[derive(Clone)]
pub struct BundledUpdateService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for BundledUpdateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundledUpdateService")
            .field("config", &self.inner.config)
            .field("status", &self.get_status())
            .finish_non_exhaustive()
    }
}

impl BundledUpdateService {
    /// Create an inactive service. `backend` should be the same backend the
    /// accessor was built with.
    pub fn new(
        bundle: UpdateBundleAccessor,
        backend: Arc<Mutex<dyn BundledUpdateBackend>>,
        work_queue: Arc<dyn WorkQueue>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config,
                core: Mutex::new(ServiceCore {
                    bundle,
                    bundle_open: false,
                    work_enqueued: false,
                }),
                status: Borrowable::new(BundledUpdateStatus::default()),
                backend,
                work_queue,
            }),
        }
    }

    /// Snapshot of the status record.
    pub fn get_status(&self) -> BundledUpdateStatus {
        self.inner.snapshot()
    }

    /// Run `f` against the bundle accessor, e.g. to read a verified payload.
    pub fn with_bundle<R>(&self, f: impl FnOnce(&UpdateBundleAccessor) -> R) -> R {
        let core = self.inner.core.lock();
        f(&core.bundle)
    }

    /// Begin an update: enable the transfer channel and move to
    /// TRANSFERRING.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless INACTIVE, `InvalidArgument` for an
    /// overlong filename, or the backend error (the update then finishes).
    pub fn start(&self, bundle_filename: Option<&str>) -> Result<BundledUpdateStatus> {
        let mut core = self.inner.core.lock();
        let state = self.inner.state();
        if state != UpdateState::Inactive {
            warn!(%state, "start() rejected");
            return Err(UpdateError::failed_precondition(format!(
                "start() is only valid from INACTIVE, not {state}"
            )));
        }
        if let Some(name) = bundle_filename
            && name.len() > self.inner.config.max_bundle_filename_len
        {
            return Err(UpdateError::invalid_argument(format!(
                "bundle filename is {} bytes, limit {}",
                name.len(),
                self.inner.config.max_bundle_filename_len
            )));
        }

        let started = self.inner.backend.lock().before_update_start();
        if let Err(e) = started {
            self.inner.fail(&mut core, UpdateResult::UnknownError, &format!("before_update_start: {e}"));
            return Err(e);
        }
        let enabled = self
            .inner
            .backend
            .lock()
            .enable_bundle_transfer_handler(bundle_filename);
        let transfer_id = match enabled {
            Ok(id) => id,
            Err(e) => {
                self.inner.fail(&mut core, UpdateResult::TransferFailed, &format!("enable transfer: {e}"));
                return Err(e);
            }
        };

        let mut status = self.inner.status.acquire();
        *status = BundledUpdateStatus {
            state: UpdateState::Transferring,
            transfer_id: Some(transfer_id),
            bundle_filename: bundle_filename.map(str::to_string),
            ..BundledUpdateStatus::default()
        };
        info!(transfer_id, bundle = ?bundle_filename, "Update started");
        Ok(status.clone())
    }

    /// Signal that the bundle transfer completed.
    ///
    /// Tolerated without effect from INACTIVE, TRANSFERRED, ABORTING and
    /// FINISHED (a completion can race an abort).
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` once verification or apply has begun.
    pub fn set_transferred(&self) -> Result<BundledUpdateStatus> {
        let core = self.inner.core.lock();
        let state = self.inner.state();
        match state {
            UpdateState::Verifying | UpdateState::Verified | UpdateState::Applying => {
                warn!(%state, "set_transferred() rejected");
                Err(UpdateError::failed_precondition(format!(
                    "set_transferred() is not valid in {state}"
                )))
            }
            _ => {
                self.inner.transfer_succeeded(&core);
                Ok(self.inner.snapshot())
            }
        }
    }

    /// Transfer completion hook for the transfer channel. Never fails;
    /// out-of-state notifications are logged and ignored.
    pub fn notify_transfer_succeeded(&self) {
        let core = self.inner.core.lock();
        self.inner.transfer_succeeded(&core);
    }

    /// Queue verification of the staged bundle.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless TRANSFERRED (re-entry while verifying or
    /// verified returns the status), or the queue error.
    pub fn verify(&self) -> Result<BundledUpdateStatus> {
        let mut core = self.inner.core.lock();
        let state = self.inner.state();
        match state {
            UpdateState::Verifying | UpdateState::Verified => {
                info!(%state, "verify() already requested");
                return Ok(self.inner.snapshot());
            }
            UpdateState::Transferred => {}
            _ => {
                warn!(%state, "verify() rejected");
                return Err(UpdateError::failed_precondition(format!(
                    "verify() is only valid from TRANSFERRED, not {state}"
                )));
            }
        }
        if core.work_enqueued {
            return Ok(self.inner.snapshot());
        }
        {
            let mut status = self.inner.status.acquire();
            status.state = UpdateState::Verifying;
            status.current_state_progress_hundredth_percent = None;
        }
        self.enqueue(&mut core, UpdateResult::VerifyFailed, |inner, core| {
            inner.verify_locked(core);
        })
    }

    /// Queue verification (if needed) followed by apply.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless TRANSFERRED or VERIFIED (re-entry while
    /// applying returns the status), or the queue error.
    pub fn apply(&self) -> Result<BundledUpdateStatus> {
        let mut core = self.inner.core.lock();
        let state = self.inner.state();
        match state {
            UpdateState::Applying => {
                info!("apply() already in progress");
                return Ok(self.inner.snapshot());
            }
            UpdateState::Transferred | UpdateState::Verified => {}
            _ => {
                warn!(%state, "apply() rejected");
                return Err(UpdateError::failed_precondition(format!(
                    "apply() is only valid from TRANSFERRED or VERIFIED, not {state}"
                )));
            }
        }
        if core.work_enqueued {
            return Ok(self.inner.snapshot());
        }
        if state == UpdateState::Transferred {
            self.inner.status.acquire().state = UpdateState::Verifying;
        }
        self.enqueue(&mut core, UpdateResult::ApplyFailed, |inner, core| {
            inner.verify_locked(core);
            inner.apply_locked(core);
        })
    }

    /// Abort the update.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` from INACTIVE, FINISHED or APPLYING.
    pub fn abort(&self) -> Result<BundledUpdateStatus> {
        // Apply holds the core lock for its whole run; check the status first
        // so an abort during APPLYING is refused instead of queued behind it.
        if self.inner.state() == UpdateState::Applying {
            return Err(abort_while_applying());
        }
        let mut core = self.inner.core.lock();
        let state = self.inner.state();
        match state {
            UpdateState::Applying => return Err(abort_while_applying()),
            UpdateState::Inactive | UpdateState::Finished => {
                return Err(UpdateError::failed_precondition(format!(
                    "nothing to abort in {state}"
                )));
            }
            _ => {}
        }
        self.inner.status.acquire().state = UpdateState::Aborting;
        self.inner.fail(&mut core, UpdateResult::Aborted, "update aborted by request");
        Ok(self.inner.snapshot())
    }

    /// Clear a finished update and return to INACTIVE.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless FINISHED (INACTIVE is a no-op) or while
    /// queued work has not run yet.
    pub fn reset(&self) -> Result<BundledUpdateStatus> {
        let mut core = self.inner.core.lock();
        let state = self.inner.state();
        if state == UpdateState::Inactive {
            return Ok(self.inner.snapshot());
        }
        if state != UpdateState::Finished {
            warn!(%state, "reset() rejected");
            return Err(UpdateError::failed_precondition(format!(
                "reset() is only valid from FINISHED, not {state}"
            )));
        }
        if core.work_enqueued {
            return Err(UpdateError::failed_precondition("queued update work has not run yet"));
        }
        self.inner.close_bundle(&mut core);
        let mut status = self.inner.status.acquire();
        *status = BundledUpdateStatus::default();
        info!("Update service reset");
        Ok(status.clone())
    }

    fn enqueue(&self, core: &mut ServiceCore, failure: UpdateResult, job: Job) -> Result<BundledUpdateStatus> {
        let weak: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        let work: Work = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut core = inner.core.lock();
                core.work_enqueued = false;
                job(&inner, &mut core);
            }
        });
        core.work_enqueued = true;
        if let Err(e) = self.inner.work_queue.push_work(work) {
            core.work_enqueued = false;
            self.inner.fail(core, failure, &format!("unable to queue work: {e}"));
            return Err(e);
        }
        Ok(self.inner.snapshot())
    }
}

impl ServiceInner {
    fn state(&self) -> UpdateState {
        self.status.acquire().state
    }

    fn snapshot(&self) -> BundledUpdateStatus {
        self.status.acquire().clone()
    }

    fn set_progress(&self, progress: u32) {
        self.status.acquire().current_state_progress_hundredth_percent = Some(progress);
    }

    fn close_bundle(&self, core: &mut ServiceCore) {
        if core.bundle_open {
            if let Err(e) = core.bundle.close() {
                warn!(error = %e, "Failed to close update bundle");
            }
            core.bundle_open = false;
        }
    }

    /// Record a failure and finish the update, unless it already finished.
    fn fail(&self, core: &mut ServiceCore, result: UpdateResult, note: &str) {
        let state = self.state();
        if state == UpdateState::Finished {
            warn!(?result, note, "Update already finished; ignoring failure");
            return;
        }
        error!(?result, %state, note, "Update failed");
        let aborted = self.backend.lock().before_update_abort();
        if let Err(e) = aborted {
            warn!(error = %e, "before_update_abort failed");
        }
        self.finish(core, result, Some(note));
    }

    fn finish(&self, core: &mut ServiceCore, result: UpdateResult, note: Option<&str>) {
        self.backend.lock().disable_bundle_transfer_handler();
        self.close_bundle(core);
        let mut status = self.status.acquire();
        status.state = UpdateState::Finished;
        status.result = Some(result);
        status.note = note.map(|n| truncate_note(n, self.config.max_note_len));
    }

    fn transfer_succeeded(&self, _core: &ServiceCore) {
        let state = {
            let mut status = self.status.acquire();
            let state = status.state;
            if state == UpdateState::Transferring {
                status.state = UpdateState::Transferred;
            }
            state
        };
        if state == UpdateState::Transferring {
            self.backend.lock().disable_bundle_transfer_handler();
            info!("Bundle transfer complete");
        } else {
            warn!(%state, "Transfer completion ignored");
        }
    }

    fn verify_locked(&self, core: &mut ServiceCore) {
        let state = self.state();
        if state == UpdateState::Verified {
            return;
        }
        if state != UpdateState::Verifying {
            self.fail(core, UpdateResult::VerifyFailed, &format!("verification run in {state}"));
            return;
        }
        self.set_progress(0);
        self.close_bundle(core);

        let before = self.backend.lock().before_bundle_verify();
        if let Err(e) = before {
            self.fail(core, UpdateResult::VerifyFailed, &format!("before_bundle_verify: {e}"));
            return;
        }
        if let Err(e) = core.bundle.open_and_verify() {
            self.fail(core, UpdateResult::VerifyFailed, &format!("bundle verification: {e}"));
            return;
        }
        core.bundle_open = true;

        let after = self.backend.lock().after_bundle_verified();
        if let Err(e) = after {
            self.fail(core, UpdateResult::VerifyFailed, &format!("after_bundle_verified: {e}"));
            return;
        }

        let mut status = self.status.acquire();
        status.state = UpdateState::Verified;
        status.current_state_progress_hundredth_percent = Some(PROGRESS_COMPLETE);
        info!("Bundle verified");
    }

    fn apply_locked(&self, core: &mut ServiceCore) {
        let state = self.state();
        if state != UpdateState::Verified {
            self.fail(core, UpdateResult::ApplyFailed, &format!("apply run in {state}"));
            return;
        }
        {
            let mut status = self.status.acquire();
            status.state = UpdateState::Applying;
            status.current_state_progress_hundredth_percent = Some(0);
        }

        let before = self.backend.lock().before_apply();
        if let Err(e) = before {
            self.fail(core, UpdateResult::ApplyFailed, &format!("before_apply: {e}"));
            return;
        }
        let manifest = match core.bundle.get_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                self.fail(core, UpdateResult::ApplyFailed, &format!("manifest: {e}"));
                return;
            }
        };
        let total = match core.bundle.get_total_payload_size() {
            Ok(total) => total,
            Err(e) => {
                self.fail(core, UpdateResult::ApplyFailed, &format!("payload size: {e}"));
                return;
            }
        };

        let mut applied: u64 = 0;
        for target in manifest.target_files() {
            let name = target.file_name.as_str();
            if name == USER_MANIFEST_TARGET_NAME {
                continue;
            }
            match core.bundle.is_personalized_out(name) {
                Ok(true) => {
                    info!(target = name, "Target personalized out; device already has it");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    self.fail(core, UpdateResult::ApplyFailed, &format!("target {name}: {e}"));
                    return;
                }
            }
            let mut payload = match core.bundle.get_target_payload(name) {
                Ok(payload) => payload,
                Err(e) => {
                    self.fail(core, UpdateResult::ApplyFailed, &format!("target {name}: {e}"));
                    return;
                }
            };
            let (offset, size) = (payload.start(), payload.interval_size());
            let outcome = self.backend.lock().apply_target_file(name, &mut payload, offset);
            if let Err(e) = outcome {
                self.fail(core, UpdateResult::ApplyFailed, &format!("apply {name}: {e}"));
                return;
            }
            applied += size as u64;
            if total > 0 {
                let progress = (applied.saturating_mul(u64::from(PROGRESS_COMPLETE)) / total)
                    .min(u64::from(PROGRESS_COMPLETE));
                self.set_progress(u32::try_from(progress).unwrap_or(PROGRESS_COMPLETE));
            }
            info!(target = name, bytes = size, "Target applied");
        }

        if let Err(e) = core.bundle.persist_manifest() {
            self.fail(core, UpdateResult::ApplyFailed, &format!("persist manifest: {e}"));
            return;
        }
        self.set_progress(PROGRESS_COMPLETE);

        let rebooted = self.backend.lock().apply_reboot();
        match rebooted {
            Ok(()) => {
                info!(version = manifest.version(), "Update applied");
                self.finish(core, UpdateResult::Success, None);
            }
            Err(e) => self.fail(core, UpdateResult::ApplyFailed, &format!("apply_reboot: {e}")),
        }
    }
}

fn abort_while_applying() -> UpdateError {
    warn!("abort() rejected while applying");
    UpdateError::failed_precondition("an update cannot be aborted while applying")
}

fn truncate_note(note: &str, max_len: usize) -> String {
    let mut end = note.len().min(max_len);
    while !note.is_char_boundary(end) {
        end -= 1;
    }
    note.get(..end).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_note_respects_char_boundaries() {
        assert_eq!(truncate_note("abcdef", 4), "abcd");
        assert_eq!(truncate_note("ab", 4), "ab");
        assert_eq!(truncate_note("aé", 2), "a");
    }

    #[test]
    fn test_status_json_shape() -> std::result::Result<(), serde_json::Error> {
        let status = BundledUpdateStatus {
            state: UpdateState::Finished,
            result: Some(UpdateResult::VerifyFailed),
            ..BundledUpdateStatus::default()
        };
        let json = serde_json::to_string(&status)?;
        assert_eq!(json, r#"{"state":"FINISHED","result":"VERIFY_FAILED"}"#);
        let back: BundledUpdateStatus = serde_json::from_str(&json)?;
        assert_eq!(back, status);
        Ok(())
    }

    #[test]
    fn test_state_display() {
        assert_eq!(UpdateState::Transferred.to_string(), "TRANSFERRED");
    }
}
