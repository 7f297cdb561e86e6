use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use anyhow::Result;
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::activity::ActivityWindow;
use crate::config::TranscodeConfig;
use crate::job::{EncodingJob, JobSnapshot, JobState};
use crate::scan::CandidateScanner;
use crate::selection::select_candidate;
use crate::skip::SkipSet;
use crate::transcoder::Transcoder;

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// The activity window just closed
    WentToSleep,
    /// Outside the window or forced asleep
    Sleeping,
    /// Stop scheduled; no new admissions
    Draining,
    /// A job was started; the next cycle runs without waiting
    Admitted,
    /// Slots full or nothing left to encode
    Idle,
}

/// Terminal job counts since boot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct SlotPool {
    target: usize,
    // Admissions between slot check and job insertion
    reserved: usize,
    jobs: HashMap<Uuid, Arc<EncodingJob>>,
}

/// Holds a free slot while a candidate is being picked.
struct SlotReservation<'a> {
    slots: &'a Mutex<SlotPool>,
    settled: bool,
}

impl SlotReservation<'_> {
    /// Turn the reservation into an in-flight job, unless the target shrank
    /// below the current job count in the meantime.
    fn commit(mut self, job: Arc<EncodingJob>) -> bool {
        self.settled = true;
        let mut slots = self.slots.lock();
        slots.reserved -= 1;
        if slots.jobs.len() >= slots.target {
            return false;
        }
        slots.jobs.insert(job.id(), job);
        true
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.slots.lock().reserved -= 1;
        }
    }
}

/// Job slot pool and the poll loop that keeps it filled.
pub struct Orchestrator {
    config: Arc<TranscodeConfig>,
    transcoder: Arc<dyn Transcoder>,
    activity: ActivityWindow,
    scanner: CandidateScanner,
    skip: SkipSet,
    slots: Mutex<SlotPool>,
    stop_scheduled: AtomicBool,
    shutdown: CancellationToken,
    // Woken on job removal and operator commands
    changed: Notify,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl Orchestrator {
    pub fn new(config: TranscodeConfig, transcoder: Arc<dyn Transcoder>) -> Result<Arc<Self>> {
        let activity = ActivityWindow::from_config(&config)?;
        let scanner = CandidateScanner::from_config(&config);
        let target = config.task_count.max(1);

        Ok(Arc::new(Self {
            config: Arc::new(config),
            transcoder,
            activity,
            scanner,
            skip: SkipSet::new(),
            slots: Mutex::new(SlotPool { target, reserved: 0, jobs: HashMap::new() }),
            stop_scheduled: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            changed: Notify::new(),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }))
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    pub fn activity(&self) -> &ActivityWindow {
        &self.activity
    }

    pub fn skip_set(&self) -> &SkipSet {
        &self.skip
    }

    /// In-flight jobs
    pub fn count_tasks(&self) -> usize {
        self.slots.lock().jobs.len()
    }

    pub fn target_task_count(&self) -> usize {
        self.slots.lock().target
    }

    /// Set the concurrency target, floored at 1. Running jobs are never
    /// stopped by a lower target; they just aren't replaced.
    pub fn set_target_task_count(&self, target: usize) -> usize {
        let target = target.max(1);
        self.slots.lock().target = target;
        self.changed.notify_waiters();
        target
    }

    pub fn increment_task_count(&self) -> usize {
        let target = {
            let mut slots = self.slots.lock();
            slots.target += 1;
            slots.target
        };
        self.changed.notify_waiters();
        target
    }

    pub fn decrement_task_count(&self) -> usize {
        let target = {
            let mut slots = self.slots.lock();
            slots.target = slots.target.saturating_sub(1).max(1);
            slots.target
        };
        self.changed.notify_waiters();
        target
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let jobs: Vec<Arc<EncodingJob>> = self.slots.lock().jobs.values().cloned().collect();
        let mut snapshots: Vec<JobSnapshot> = jobs.iter().map(|j| j.snapshot()).collect();
        snapshots.sort_by(|a, b| a.input.cmp(&b.input));
        snapshots
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    pub fn schedule_stop(&self, scheduled: bool) {
        self.stop_scheduled.store(scheduled, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub fn is_stop_scheduled(&self) -> bool {
        self.stop_scheduled.load(Ordering::SeqCst)
    }

    /// Stop the poll loop right away
    pub fn quit(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Operator override of the activity window (`None` restores the schedule)
    pub fn force_activity(&self, forced: Option<bool>) {
        self.activity.set_forced_state(forced);
        self.changed.notify_waiters();
    }

    fn reserve_slot(&self) -> Option<SlotReservation<'_>> {
        let mut slots = self.slots.lock();
        if slots.jobs.len() + slots.reserved >= slots.target {
            return None;
        }
        slots.reserved += 1;
        Some(SlotReservation { slots: &self.slots, settled: false })
    }

    /// Start one new job if a slot is free and a candidate passes selection.
    /// Returns whether a job was started.
    pub async fn add_new_if_needed(self: &Arc<Self>) -> bool {
        let Some(reservation) = self.reserve_slot() else {
            return false;
        };

        let scanner = self.scanner.clone();
        let candidates = match tokio::task::spawn_blocking(move || scanner.list_candidates()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Candidate scan failed: {}", e);
                return false;
            }
        };

        let picked = self
            .skip
            .pick_path(candidates, move |candidate| async move {
                select_candidate(self.transcoder.as_ref(), &self.config, &candidate).await
            })
            .await;

        let Some((candidate, selection)) = picked else {
            return false;
        };

        let job = Arc::new(EncodingJob::new(self.config.clone(), candidate.path.clone(), selection));
        if !reservation.commit(job.clone()) {
            // Target lowered while probing; offer the file again later
            debug!("No slot left for {}, releasing it", candidate.path.display());
            self.skip.release(&candidate.path);
            return false;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let state = job.run(this.transcoder.as_ref(), &this.shutdown).await;
            match state {
                JobState::Done => this.succeeded.fetch_add(1, Ordering::SeqCst),
                _ => this.failed.fetch_add(1, Ordering::SeqCst),
            };
            this.remove(&job);
        });
        true
    }

    /// Drop a job from the in-flight set, interrupting it if still encoding
    pub fn remove(&self, job: &EncodingJob) {
        job.interrupt_if_needed();
        let removed = self.slots.lock().jobs.remove(&job.id()).is_some();
        if removed {
            debug!("Job {}: Released slot ({} in flight)", job.id(), self.count_tasks());
            self.changed.notify_waiters();
        }
    }

    /// Cancel every running transcode
    pub fn interrupt_all(&self) -> usize {
        let jobs: Vec<Arc<EncodingJob>> = self.slots.lock().jobs.values().cloned().collect();
        jobs.iter().filter(|job| job.interrupt_if_needed()).count()
    }

    /// Resolve once no job is in flight
    pub async fn wait_for_jobs(&self) {
        loop {
            let notified = self.changed.notified();
            if self.count_tasks() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// One poll cycle: activity checks, then at most one admission
    pub async fn frame(self: &Arc<Self>) -> Frame {
        if self.activity.disable_if_needed() {
            return Frame::WentToSleep;
        }
        self.activity.activate_if_needed();

        if !self.activity.should_work() {
            return Frame::Sleeping;
        }
        if self.is_stop_scheduled() {
            return Frame::Draining;
        }
        if self.add_new_if_needed().await {
            Frame::Admitted
        } else {
            Frame::Idle
        }
    }

    /// Poll until quit, or until a scheduled stop finds no job in flight.
    pub async fn run(self: Arc<Self>) {
        let mut previous: Option<Frame> = None;

        loop {
            if self.shutdown.is_cancelled() {
                info!("Exiting now...");
                break;
            }
            if self.is_stop_scheduled() && self.count_tasks() == 0 {
                info!("✅ Scheduled stop reached, no job in flight");
                break;
            }

            let frame = self.frame().await;
            if previous != Some(frame) {
                self.log_frame(frame);
            }
            previous = Some(frame);

            if frame != Frame::Admitted {
                self.idle_wait().await;
            }
        }

        let stats = self.stats();
        info!(
            "Poll loop stopped: {} succeeded, {} failed, {} still in flight",
            stats.succeeded,
            stats.failed,
            self.count_tasks()
        );
    }

    fn log_frame(&self, frame: Frame) {
        match frame {
            Frame::Idle => info!(
                "🟢 Ready to encode future files put in {} ({}/{} slots busy)",
                self.config.working_dir.display(),
                self.count_tasks(),
                self.target_task_count()
            ),
            Frame::Sleeping => match self.activity.bounds() {
                Some(bounds) if self.activity.state().forced.is_none() => {
                    info!("Waiting {} for start...", bounds.start)
                }
                _ => info!("Sleeping until woken up"),
            },
            Frame::Draining => info!(
                "⏸️  Stop scheduled, waiting for {} running job(s)",
                self.count_tasks()
            ),
            Frame::Admitted | Frame::WentToSleep => {}
        }
    }

    async fn idle_wait(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.wait_time()) => {}
            _ = self.changed.notified() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}
