//! Background task manager: accepts work, returns a handle immediately,
//! chains tasks that share a thread key, keeps a typing indicator alive
//! while running, and retains finished summaries for `/status` until a TTL
//! reaps them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use herald_core::types::{ChatId, ThreadKey, TopicId, TopicKey};

use crate::queue::WorkQueue;
use crate::runner::{AgentRunner, ChatRun, RunOutcome};
use crate::Result;

/// Characters of the prompt kept on the task entry.
const PROMPT_HEAD_CHARS: usize = 80;
/// Typing indicator refresh cadence (Telegram expires it after ~5 s).
const TYPING_REFRESH: Duration = Duration::from_secs(4);

/// Egress-side typing indicator, implemented by the transport.
pub trait TypingNotifier: Send + Sync {
    fn typing(&self, chat: ChatId, topic: &TopicId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub id: String,
    pub chat: ChatId,
    pub topic: TopicId,
    pub prompt_head: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub struct TaskManager {
    runner: Arc<AgentRunner>,
    queue: WorkQueue,
    tasks: Arc<DashMap<String, TaskEntry>>,
    typing: Arc<dyn TypingNotifier>,
    retain: Duration,
}

impl TaskManager {
    pub fn new(runner: Arc<AgentRunner>, typing: Arc<dyn TypingNotifier>, retain: Duration) -> Self {
        Self {
            runner,
            queue: WorkQueue::new(),
            tasks: Arc::new(DashMap::new()),
            typing,
            retain,
        }
    }

    /// Accept work and return its task id immediately. Tasks on the same
    /// thread key chain FIFO; others run concurrently. `on_done` receives
    /// the outcome (the transport turns it into a reply).
    pub fn spawn(
        &self,
        run: ChatRun,
        on_done: Box<dyn FnOnce(Result<RunOutcome>) + Send>,
    ) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let topic_key = TopicKey::new(run.chat, run.topic.clone());
        let agent = self.runner.effective_agent(run.agent.as_deref(), &topic_key);
        let thread_key = ThreadKey::new(
            run.chat,
            run.topic.clone(),
            herald_core::types::AgentId::new(&agent),
        );

        self.tasks.insert(
            id.clone(),
            TaskEntry {
                id: id.clone(),
                chat: run.chat,
                topic: run.topic.clone(),
                prompt_head: run.prompt.chars().take(PROMPT_HEAD_CHARS).collect(),
                status: TaskStatus::Running,
                started_at: Utc::now(),
                finished_at: None,
                error: None,
            },
        );

        let runner = Arc::clone(&self.runner);
        let tasks = Arc::clone(&self.tasks);
        let typing = Arc::clone(&self.typing);
        let retain = self.retain;
        let task_id = id.clone();

        self.queue.enqueue(&thread_key.to_string(), async move {
            let chat = run.chat;
            let topic = run.topic.clone();
            let ticker = tokio::spawn({
                let typing = Arc::clone(&typing);
                let topic = topic.clone();
                async move {
                    loop {
                        typing.typing(chat, &topic);
                        tokio::time::sleep(TYPING_REFRESH).await;
                    }
                }
            });

            let result = runner.run_chat(run).await;
            ticker.abort();

            if let Some(mut entry) = tasks.get_mut(&task_id) {
                entry.finished_at = Some(Utc::now());
                match &result {
                    Ok(_) => entry.status = TaskStatus::Completed,
                    Err(e) => {
                        entry.status = TaskStatus::Failed;
                        entry.error = Some(e.to_string());
                        warn!(task = %task_id, "background task failed: {e}");
                    }
                }
            }

            // Reap the summary once it has aged out.
            let reap_tasks = Arc::clone(&tasks);
            let reap_id = task_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(retain).await;
                reap_tasks.remove(&reap_id);
            });

            on_done(result);
        });

        id
    }

    /// Snapshot of tracked tasks, newest first.
    pub fn entries(&self) -> Vec<TaskEntry> {
        let mut entries: Vec<TaskEntry> = self.tasks.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        entries
    }

    /// Wait for in-flight tasks on shutdown.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.queue.drain(timeout).await
    }
}
