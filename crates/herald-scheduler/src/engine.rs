//! The scheduler engine: a one-second tick loop over the registered jobs,
//! with a watch-channel shutdown, a budget gate, and per-job run state.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{error, info, warn};

use herald_core::types::{AgentId, ChatId, EventKind, Role, ThreadKey, TopicId, TopicKey};
use herald_engine::{AgentRunner, ChatRun};

use crate::error::{Result, SchedulerError};
use crate::schedule::next_fire;
use crate::store::CronStore;
use crate::types::{is_silent, CronJob, JobPhase, OutputRing};

/// Outbound seam: the transport delivers cron output to the chat.
pub trait CronDelivery: Send + Sync {
    fn deliver(&self, chat: ChatId, topic: TopicId, text: String);
}

struct JobState {
    phase: JobPhase,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
    ring: Arc<Mutex<OutputRing>>,
}

impl JobState {
    fn new() -> Self {
        Self {
            phase: JobPhase::Idle,
            next_run: None,
            last_run: None,
            last_error: None,
            ring: Arc::new(Mutex::new(OutputRing::default())),
        }
    }
}

/// Public job snapshot for `/cron list` and `/cron show`.
#[derive(Debug, Clone)]
pub struct JobView {
    pub job: CronJob,
    pub phase: JobPhase,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct CronScheduler {
    runner: Arc<AgentRunner>,
    store: CronStore,
    jobs: Mutex<Vec<CronJob>>,
    states: DashMap<String, JobState>,
    delivery: Arc<dyn CronDelivery>,
    /// Jobs are skipped once the daily budget reaches this percentage
    /// (0 disables the gate).
    gate_pct: f64,
}

impl CronScheduler {
    pub fn new(
        runner: Arc<AgentRunner>,
        store: CronStore,
        delivery: Arc<dyn CronDelivery>,
        gate_pct: f64,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            runner,
            store,
            jobs: Mutex::new(Vec::new()),
            states: DashMap::new(),
            delivery,
            gate_pct,
        });
        scheduler.reload();
        scheduler
    }

    /// Re-read `cron.json` and reconcile: new jobs get scheduled, removed
    /// jobs lose their state, surviving jobs keep their ring and history.
    pub fn reload(&self) -> usize {
        let jobs = self.store.load();
        let now = Utc::now();

        let keep: std::collections::HashSet<String> =
            jobs.iter().map(|j| j.id.clone()).collect();
        self.states.retain(|id, _| keep.contains(id));

        for job in &jobs {
            let mut state = self.states.entry(job.id.clone()).or_insert_with(JobState::new);
            if job.enabled {
                match next_fire(&job.cron, &job.timezone, now) {
                    Ok(next) => {
                        state.next_run = Some(next);
                        if state.phase == JobPhase::Idle {
                            state.phase = JobPhase::Scheduled;
                        }
                    }
                    Err(e) => {
                        error!(job = %job.id, "cannot schedule: {e}");
                        state.next_run = None;
                        state.phase = JobPhase::Failed;
                        state.last_error = Some(e.to_string());
                    }
                }
            } else {
                state.next_run = None;
                state.phase = JobPhase::Idle;
            }
        }

        let count = jobs.len();
        *self.jobs.lock().unwrap() = jobs;
        info!(jobs = count, "cron jobs loaded");
        count
    }

    /// Tick loop. Polls every second until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("cron scheduler started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<CronJob> = {
            let jobs = self.jobs.lock().unwrap();
            jobs.iter()
                .filter(|job| {
                    job.enabled
                        && self
                            .states
                            .get(&job.id)
                            .and_then(|s| s.next_run)
                            .is_some_and(|next| next <= now)
                })
                .cloned()
                .collect()
        };

        for job in due {
            // Advance the schedule before dispatch so a slow run cannot
            // double-fire.
            if let Some(mut state) = self.states.get_mut(&job.id) {
                state.next_run = next_fire(&job.cron, &job.timezone, now).ok();
            }
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                scheduler.fire(job).await;
            });
        }
    }

    /// Fire one job immediately (`/cron run <id>`).
    pub async fn run_now(self: &Arc<Self>, id: &str) -> Result<()> {
        let job = self
            .job(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        Arc::clone(self).fire(job).await;
        Ok(())
    }

    async fn fire(self: Arc<Self>, job: CronJob) {
        self.set_phase(&job.id, JobPhase::Running);

        // Budget gate: skip silently, no agent call, no user-visible output.
        if self.gate_pct > 0.0 {
            let pct = self.runner.usage().budget_pct();
            if pct >= self.gate_pct {
                info!(job = %job.id, pct = format!("{pct:.0}"), gate = self.gate_pct,
                    "cron job skipped: budget gate");
                if let Some(mut state) = self.states.get_mut(&job.id) {
                    state.phase = if state.next_run.is_some() {
                        JobPhase::Scheduled
                    } else {
                        JobPhase::Idle
                    };
                }
                return;
            }
        }

        let Some(chat) = job.chat_id.or_else(|| self.runner.settings().cron_chat()) else {
            warn!(job = %job.id, "cron job has no chat and no cron chat is configured");
            self.finish(&job.id, Some("no chat configured".to_string()));
            return;
        };
        let chat = ChatId(chat);
        let topic = job
            .topic_id
            .as_deref()
            .map(TopicId::from)
            .unwrap_or_else(TopicId::root);

        // Forward live chunks into the job's bounded ring.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        if let Some(state) = self.states.get(&job.id) {
            let ring = Arc::clone(&state.ring);
            let scheduler = Arc::clone(&self);
            let job_id = job.id.clone();
            tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    scheduler.set_phase(&job_id, JobPhase::Logging);
                    ring.lock().unwrap().push(chunk);
                }
            });
        }

        let agent = self
            .runner
            .effective_agent(job.agent.as_deref(), &TopicKey::new(chat, topic.clone()));
        let key = ThreadKey::new(chat, topic.clone(), AgentId::new(&agent));
        self.runner
            .memory()
            .capture(&key, Role::User, EventKind::Cron, &job.prompt);

        let run = ChatRun {
            agent: job.agent.clone(),
            model: job.model.clone(),
            source: "cron".to_string(),
            cwd: job.cwd.clone(),
            chunks: Some(tx),
            ..ChatRun::new(chat, topic.clone(), job.prompt.clone())
        };

        match self.runner.run_chat(run).await {
            Ok(outcome) => {
                self.runner
                    .memory()
                    .capture(&key, Role::Assistant, EventKind::Cron, &outcome.text);
                if is_silent(&outcome.text) {
                    info!(job = %job.id, "cron response carries a silent token, not delivered");
                } else {
                    self.delivery.deliver(chat, topic, outcome.text);
                }
                self.finish(&job.id, None);
            }
            Err(e) => {
                error!(job = %job.id, "cron job failed: {e}");
                self.finish(&job.id, Some(e.to_string()));
            }
        }
    }

    // -- job management (slash command surface) -----------------------------

    pub fn views(&self) -> Vec<JobView> {
        let jobs = self.jobs.lock().unwrap().clone();
        jobs.into_iter()
            .map(|job| {
                let state = self.states.get(&job.id);
                JobView {
                    phase: state.as_ref().map(|s| s.phase).unwrap_or(JobPhase::Idle),
                    next_run: state.as_ref().and_then(|s| s.next_run),
                    last_run: state.as_ref().and_then(|s| s.last_run),
                    last_error: state.as_ref().and_then(|s| s.last_error.clone()),
                    job,
                }
            })
            .collect()
    }

    pub fn job(&self, id: &str) -> Option<CronJob> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    /// Captured live output for `/cron logs <id>`.
    pub fn logs(&self, id: &str) -> Option<String> {
        self.states.get(id).map(|s| {
            let ring = s.ring.lock().unwrap();
            if ring.is_empty() {
                "(no output captured)".to_string()
            } else {
                ring.contents()
            }
        })
    }

    /// Point a job at a chat/topic and persist.
    pub fn assign(&self, id: &str, chat: ChatId, topic: &TopicId) -> Result<()> {
        self.mutate(id, |job| {
            job.chat_id = Some(chat.0);
            job.topic_id = Some(topic.as_str().to_string());
        })
    }

    pub fn unassign(&self, id: &str) -> Result<()> {
        self.mutate(id, |job| {
            job.chat_id = None;
            job.topic_id = None;
        })
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut CronJob)) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        f(job);
        self.store.spawn_save(jobs.clone());
        Ok(())
    }

    fn set_phase(&self, id: &str, phase: JobPhase) {
        if let Some(mut state) = self.states.get_mut(id) {
            state.phase = phase;
        }
    }

    fn finish(&self, id: &str, error: Option<String>) {
        if let Some(mut state) = self.states.get_mut(id) {
            state.last_run = Some(Utc::now());
            match error {
                Some(e) => {
                    state.phase = JobPhase::Failed;
                    state.last_error = Some(e);
                }
                None => {
                    state.phase = if state.next_run.is_some() {
                        JobPhase::Scheduled
                    } else {
                        JobPhase::Idle
                    };
                    state.last_error = None;
                }
            }
        }
    }
}
