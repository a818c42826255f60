//! Playback job scheduler: simulated now-playing progress per conversation.
//!
//! Each active job owns one tokio task that advances a simulated clock on a
//! fixed tick and edits the status message in place. The registry holds at
//! most one job per conversation; inserting a job cancels its predecessor in
//! the same critical section.

pub mod render;


pub use render::{format_clock, render_finished, render_status};

use melodia_core::{
    config::PlaybackConfig,
    message::MessageHandle,
    records::RequestStatus,
    traits::{Ledger, Transport},
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A play request ready to be tracked.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub conversation_id: String,
    pub query: String,
    /// The status message the job edits.
    pub target: MessageHandle,
    /// Ledger record to close when the job ends.
    pub request_id: Option<i64>,
}

/// One active simulated playback. Owned by its tick task.
#[derive(Debug)]
pub struct ConversationJob {
    pub job_id: u64,
    pub conversation_id: String,
    pub query: String,
    pub elapsed_seconds: u64,
    pub duration_seconds: u64,
    pub target: MessageHandle,
    pub request_id: Option<i64>,
}

/// Read-only view of an active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub conversation_id: String,
    pub query: String,
    pub elapsed_seconds: u64,
    pub duration_seconds: u64,
}

struct JobEntry {
    job_id: u64,
    query: String,
    cancel: CancellationToken,
    /// Mirror of the task's clock for snapshots; only the task writes it.
    elapsed: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Finished,
    Cancelled,
    EditFailed,
}

/// Registry and driver of per-conversation playback jobs.
pub struct PlaybackScheduler {
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn Ledger>,
    config: PlaybackConfig,
    jobs: Mutex<HashMap<String, JobEntry>>,
    next_job_id: AtomicU64,
}

impl PlaybackScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        ledger: Arc<dyn Ledger>,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            transport,
            ledger,
            config,
            jobs: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulated track length for new jobs.
    pub fn duration_secs(&self) -> u64 {
        self.config.duration_secs
    }

    /// Register a job and start its tick task, superseding any job already
    /// running for the same conversation. Returns the new job id.
    pub fn start(self: &Arc<Self>, new: NewJob) -> u64 {
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let elapsed = Arc::new(AtomicU64::new(0));

        let previous = self.jobs().insert(
            new.conversation_id.clone(),
            JobEntry {
                job_id,
                query: new.query.clone(),
                cancel: cancel.clone(),
                elapsed: Arc::clone(&elapsed),
            },
        );
        if let Some(prev) = previous {
            prev.cancel.cancel();
            info!(
                "playback: job {} ({}) superseded in {}",
                prev.job_id, prev.query, new.conversation_id
            );
        }

        let job = ConversationJob {
            job_id,
            conversation_id: new.conversation_id,
            query: new.query,
            elapsed_seconds: 0,
            duration_seconds: self.config.duration_secs,
            target: new.target,
            request_id: new.request_id,
        };
        info!(
            "playback: job {job_id} started in {} ({})",
            job.conversation_id, job.query
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_job(job, cancel, elapsed).await;
        });
        job_id
    }

    /// Cancel every active job (session closed).
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<JobEntry> = self.jobs().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.cancel.cancel();
        }
        if !drained.is_empty() {
            info!("playback: cancelled {} active job(s)", drained.len());
        }
        drained.len()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.jobs().contains_key(conversation_id)
    }

    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .jobs()
            .iter()
            .map(|(conversation_id, entry)| JobSnapshot {
                conversation_id: conversation_id.clone(),
                query: entry.query.clone(),
                elapsed_seconds: entry.elapsed.load(Ordering::Relaxed),
                duration_seconds: self.config.duration_secs,
            })
            .collect();
        jobs.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        jobs
    }

    /// Remove the registry entry only if it still belongs to `job_id`.
    fn remove_if_current(&self, conversation_id: &str, job_id: u64) -> bool {
        let mut jobs = self.jobs();
        match jobs.get(conversation_id) {
            Some(entry) if entry.job_id == job_id => {
                jobs.remove(conversation_id);
                true
            }
            _ => false,
        }
    }

    async fn run_job(
        &self,
        mut job: ConversationJob,
        cancel: CancellationToken,
        elapsed: Arc<AtomicU64>,
    ) {
        let period = self.config.tick_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break JobOutcome::Cancelled,
                _ = ticker.tick() => {}
            }
            // The token is authoritative: nothing is edited once it is set.
            if cancel.is_cancelled() {
                break JobOutcome::Cancelled;
            }

            job.elapsed_seconds += self.config.tick_increment_secs;
            elapsed.store(job.elapsed_seconds, Ordering::Relaxed);
            if job.elapsed_seconds > job.duration_seconds {
                break JobOutcome::Finished;
            }

            let text = render_status(&job.query, job.elapsed_seconds, job.duration_seconds);
            if let Err(e) = self.transport.edit_message(&job.target, &text).await {
                warn!("playback: job {} edit failed, stopping: {e}", job.job_id);
                cancel.cancel();
                break JobOutcome::EditFailed;
            }
            debug!(
                "playback: job {} at {}/{}",
                job.job_id,
                format_clock(job.elapsed_seconds),
                format_clock(job.duration_seconds)
            );
        };

        self.finish(job, outcome).await;
    }

    async fn finish(&self, job: ConversationJob, outcome: JobOutcome) {
        let was_current = self.remove_if_current(&job.conversation_id, job.job_id);
        // A job superseded right as it finished must not announce completion.
        let outcome = match outcome {
            JobOutcome::Finished if !was_current => JobOutcome::Cancelled,
            other => other,
        };

        let status = match outcome {
            JobOutcome::Finished => {
                info!("playback: job {} finished ({})", job.job_id, job.query);
                if let Err(e) = self
                    .transport
                    .send_message(&job.conversation_id, &render_finished(&job.query))
                    .await
                {
                    warn!("playback: completion message for job {} failed: {e}", job.job_id);
                }
                RequestStatus::Completed
            }
            JobOutcome::Cancelled => {
                debug!("playback: job {} cancelled", job.job_id);
                RequestStatus::Failed
            }
            JobOutcome::EditFailed => RequestStatus::Failed,
        };

        if let Some(id) = job.request_id {
            if let Err(e) = self.ledger.update_song_request_status(id, status).await {
                warn!("playback: failed to mark request {id} {}: {e}", status.as_str());
            }
        }
    }
}
