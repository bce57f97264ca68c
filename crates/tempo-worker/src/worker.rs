use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use tempo_core::POLL_INTERVAL_SECS;
use tempo_store::{StoreError, TaskStore};

use crate::cancel::CancelSignal;
use crate::error::{Result, WorkerError};
use crate::settings::TaskSettings;

/// Future returned by a task's work function.
pub type WorkFuture = BoxFuture<'static, anyhow::Result<()>>;

/// The unit of work a task executes once per eligible window. Returning an
/// error marks the run as failed; the schedule advances either way.
pub type WorkFn = Arc<dyn Fn() -> WorkFuture + Send + Sync>;

/// Drives one logical task: persists its settings, then polls the shared
/// store, claims, runs, and reschedules until stopped or superseded.
///
/// Workers holding the same task id — in this process or any other sharing
/// the store — coordinate purely through the record's conditional ticket
/// update, so constructing several of them is safe (if wasteful: each one
/// polls).
pub struct TaskWorker {
    task_id: String,
    work: WorkFn,
    store: Arc<dyn TaskStore>,
    cancel: Arc<CancelSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskWorker {
    pub fn new<F>(task_id: impl Into<String>, store: Arc<dyn TaskStore>, work: F) -> Self
    where
        F: Fn() -> WorkFuture + Send + Sync + 'static,
    {
        Self {
            task_id: task_id.into(),
            work: Arc::new(work),
            store,
            cancel: Arc::new(CancelSignal::new()),
            handle: Mutex::new(None),
        }
    }

    /// Validate `settings`, persist the task record, and spawn the control
    /// loop.
    ///
    /// Returns once the record is durable; the loop runs in the background
    /// with no supervisor. A new record starts at `now + initialDelayDuration`
    /// with no ticket; redefining an existing task overwrites only its
    /// settings, leaving schedule and any in-flight claim untouched.
    ///
    /// Everything that can fail here fails to the caller; once this returns
    /// `Ok`, failures are only ever logged.
    #[instrument(skip(self, settings), fields(task_id = %self.task_id))]
    pub async fn start(&self, settings: Value) -> Result<()> {
        let parsed = TaskSettings::from_value(&settings)?;

        let first_run = Utc::now() + parsed.initial_delay.unwrap_or_else(chrono::Duration::zero);
        self.store
            .upsert_settings(&self.task_id, &settings.to_string(), first_run)
            .await
            .map_err(|source| WorkerError::Persistence {
                id: self.task_id.clone(),
                source,
            })?;

        let control = ControlLoop {
            task_id: self.task_id.clone(),
            work: Arc::clone(&self.work),
            store: Arc::clone(&self.store),
            cancel: Arc::clone(&self.cancel),
        };
        let handle = tokio::spawn(async move {
            // Top-level handler: the loop has no supervisor, so whatever
            // escapes it is logged here and nowhere else.
            if let Err(e) = control.run().await {
                warn!(error = %e, "task worker loop stopped on unexpected store error");
            }
        });
        *self.handle.lock().unwrap() = Some(handle);

        info!("task worker started");
        Ok(())
    }

    /// Fire the cancel signal. Idempotent.
    ///
    /// An in-progress poll-interval sleep resolves promptly and the loop
    /// exits at its next cancellation check without polling again. Does not
    /// wait for the loop to quiesce — an in-flight run is allowed to finish.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the spawned control loop to finish, if one is running.
    pub async fn join(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            // JoinError only means the work function panicked; the loop is
            // gone either way.
            let _ = handle.await;
        }
    }
}

/// What one poll-and-maybe-run step concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// Not due yet, a sibling holds the ticket, or the store was unreachable.
    NotReady,
    /// The work function was invoked (successfully or not) and the task was
    /// rescheduled.
    Ran,
    /// The stored settings are no longer readable by this worker; a newer
    /// definition has taken over and this loop should end.
    Aborted,
}

/// The state carried by the spawned loop, detached from the `TaskWorker`
/// handle so `stop`/`join` remain callable while it runs.
struct ControlLoop {
    task_id: String,
    work: WorkFn,
    store: Arc<dyn TaskStore>,
    cancel: Arc<CancelSignal>,
}

impl ControlLoop {
    /// Poll → decide → (run | sleep) until cancelled or superseded.
    ///
    /// Iterations are strictly sequential: a new poll never begins before
    /// the previous step — including any run it performed — has settled.
    async fn run(self) -> std::result::Result<(), StoreError> {
        info!(task_id = %self.task_id, "control loop started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.step().await? {
                StepOutcome::Aborted => break,
                StepOutcome::NotReady | StepOutcome::Ran => {}
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
        info!(task_id = %self.task_id, "control loop stopped");
        Ok(())
    }

    /// One poll-and-maybe-run step.
    ///
    /// Only a failed release escapes as an error; every other failure mode
    /// maps to a [`StepOutcome`] so transient trouble never kills the loop.
    async fn step(&self) -> std::result::Result<StepOutcome, StoreError> {
        let now = Utc::now();

        let record = match self.store.find_claimable(&self.task_id, now).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(StepOutcome::NotReady),
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "store read failed; retrying next poll");
                return Ok(StepOutcome::NotReady);
            }
        };

        let settings = match TaskSettings::parse(&record.settings_json) {
            Ok(settings) => settings,
            Err(e) => {
                info!(
                    task_id = %self.task_id,
                    error = %e,
                    "stored settings are no longer readable; assuming the task was superseded"
                );
                return Ok(StepOutcome::Aborted);
            }
        };

        // Claim before running: the read above raced every sibling worker,
        // and only the conditional update decides who actually executes.
        let ticket = Uuid::new_v4().to_string();
        match self.store.claim(&self.task_id, &ticket, now).await {
            Ok(true) => {}
            Ok(false) => return Ok(StepOutcome::NotReady), // lost the race
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "claim failed at the store; retrying next poll");
                return Ok(StepOutcome::NotReady);
            }
        }

        if let Err(e) = (self.work)().await {
            // A failed run still advances the schedule.
            warn!(task_id = %self.task_id, error = %e, "task run failed");
        }

        // Cadence counts from the end of the run, and clearing the ticket
        // plus rescheduling is a single update.
        let next_run = Utc::now() + settings.cadence;
        self.store.release(&self.task_id, next_run).await?;

        Ok(StepOutcome::Ran)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use futures_util::FutureExt;
    use serde_json::json;

    use tempo_store::{format_ts, TaskRecord};

    use super::*;

    /// Scriptable store double for exercising each step outcome in
    /// isolation.
    #[derive(Default)]
    struct StubStore {
        claimable: Mutex<Option<TaskRecord>>,
        fail_reads: AtomicBool,
        deny_claims: AtomicBool,
        fail_release: AtomicBool,
        claims: AtomicUsize,
        released_to: Mutex<Option<DateTime<Utc>>>,
    }

    impl StubStore {
        fn with_claimable(settings_json: &str) -> Self {
            let store = Self::default();
            *store.claimable.lock().unwrap() = Some(TaskRecord {
                id: "t1".into(),
                settings_json: settings_json.into(),
                next_run_start_at: format_ts(Utc::now() - ChronoDuration::hours(1)),
                current_run_ticket: None,
            });
            store
        }
    }

    #[async_trait]
    impl TaskStore for StubStore {
        async fn upsert_settings(
            &self,
            _id: &str,
            _settings_json: &str,
            _initial_next_run: DateTime<Utc>,
        ) -> tempo_store::Result<()> {
            Ok(())
        }

        async fn find_claimable(
            &self,
            _id: &str,
            _now: DateTime<Utc>,
        ) -> tempo_store::Result<Option<TaskRecord>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected outage".into()));
            }
            Ok(self.claimable.lock().unwrap().clone())
        }

        async fn claim(
            &self,
            _id: &str,
            _ticket: &str,
            _now: DateTime<Utc>,
        ) -> tempo_store::Result<bool> {
            if self.deny_claims.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.claims.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn release(
            &self,
            _id: &str,
            next_run_start_at: DateTime<Utc>,
        ) -> tempo_store::Result<()> {
            if self.fail_release.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected outage".into()));
            }
            *self.released_to.lock().unwrap() = Some(next_run_start_at);
            Ok(())
        }

        async fn fetch(&self, _id: &str) -> tempo_store::Result<Option<TaskRecord>> {
            Ok(None)
        }

        async fn list(&self) -> tempo_store::Result<Vec<TaskRecord>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _id: &str) -> tempo_store::Result<bool> {
            Ok(false)
        }
    }

    const VALID_SETTINGS: &str = r#"{"version":"V1","cadence":"PT30M"}"#;

    fn control_loop(store: Arc<StubStore>, runs: Arc<AtomicUsize>) -> ControlLoop {
        let work: WorkFn = Arc::new(move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });
        ControlLoop {
            task_id: "t1".into(),
            work,
            store,
            cancel: Arc::new(CancelSignal::new()),
        }
    }

    #[tokio::test]
    async fn step_is_not_ready_without_a_claimable_row() {
        let store = Arc::new(StubStore::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let control = control_loop(Arc::clone(&store), Arc::clone(&runs));

        assert_eq!(control.step().await.unwrap(), StepOutcome::NotReady);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn step_treats_store_outage_as_not_ready() {
        let store = Arc::new(StubStore::with_claimable(VALID_SETTINGS));
        store.fail_reads.store(true, Ordering::SeqCst);
        let runs = Arc::new(AtomicUsize::new(0));
        let control = control_loop(Arc::clone(&store), Arc::clone(&runs));

        assert_eq!(control.step().await.unwrap(), StepOutcome::NotReady);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn step_aborts_on_unreadable_settings() {
        let store = Arc::new(StubStore::with_claimable(
            r#"{"version":"V7","cadence":"PT1M"}"#,
        ));
        let runs = Arc::new(AtomicUsize::new(0));
        let control = control_loop(Arc::clone(&store), Arc::clone(&runs));

        assert_eq!(control.step().await.unwrap(), StepOutcome::Aborted);
        // A superseded worker must neither claim nor run.
        assert_eq!(store.claims.load(Ordering::SeqCst), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn step_claims_runs_and_reschedules() {
        let store = Arc::new(StubStore::with_claimable(VALID_SETTINGS));
        let runs = Arc::new(AtomicUsize::new(0));
        let control = control_loop(Arc::clone(&store), Arc::clone(&runs));

        let before = Utc::now();
        assert_eq!(control.step().await.unwrap(), StepOutcome::Ran);

        assert_eq!(store.claims.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let next = store.released_to.lock().unwrap().unwrap();
        assert!(next >= before + ChronoDuration::minutes(30));
    }

    #[tokio::test]
    async fn step_yields_when_the_claim_race_is_lost() {
        let store = Arc::new(StubStore::with_claimable(VALID_SETTINGS));
        store.deny_claims.store(true, Ordering::SeqCst);
        let runs = Arc::new(AtomicUsize::new(0));
        let control = control_loop(Arc::clone(&store), Arc::clone(&runs));

        assert_eq!(control.step().await.unwrap(), StepOutcome::NotReady);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(store.released_to.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_work_still_counts_as_ran_and_reschedules() {
        let store = Arc::new(StubStore::with_claimable(VALID_SETTINGS));
        let work: WorkFn =
            Arc::new(|| async { Err(anyhow::anyhow!("downstream exploded")) }.boxed());
        let control = ControlLoop {
            task_id: "t1".into(),
            work,
            store: Arc::clone(&store) as Arc<dyn TaskStore>,
            cancel: Arc::new(CancelSignal::new()),
        };

        assert_eq!(control.step().await.unwrap(), StepOutcome::Ran);
        assert!(store.released_to.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn release_failure_escapes_the_step() {
        let store = Arc::new(StubStore::with_claimable(VALID_SETTINGS));
        store.fail_release.store(true, Ordering::SeqCst);
        let runs = Arc::new(AtomicUsize::new(0));
        let control = control_loop(Arc::clone(&store), Arc::clone(&runs));

        assert!(control.step().await.is_err());
        // The run itself happened; only the reschedule failed.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_rejects_invalid_settings_without_spawning() {
        let store = Arc::new(StubStore::default());
        let worker = TaskWorker::new("t1", store, || async { Ok(()) }.boxed());

        let err = worker
            .start(json!({"version": "V1", "cadence": "PT0S"}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidSettings(_)));
        assert!(worker.handle.lock().unwrap().is_none());
    }
}
