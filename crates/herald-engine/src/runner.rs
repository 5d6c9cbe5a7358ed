//! The agent runner: prompt assembly, subprocess invocation, session and
//! rotation lifecycle, stale-session recovery, and two-phase token
//! accounting. Both ingress and cron dispatch end up here.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use herald_agents::adapter::{
    AdapterRegistry, AgentAdapter, CommandRequest, ParsedOutput, ENV_PROMPT, ENV_SESSION_ID,
};
use herald_agents::exec::{CommandExecutor, ExecRequest};
use herald_core::types::{AgentId, ChatId, EventKind, ThreadKey, TopicId, TopicKey};
use herald_memory::types::RetrievalRequest;
use herald_memory::MemoryService;
use herald_usage::{TrackEvent, UsageTracker};

use crate::error::{EngineError, Result};
use crate::rcache::RetrievalCache;
use crate::settings::SettingsStore;
use crate::threads::ThreadStore;

/// Prompts with fewer non-whitespace characters than this skip retrieval.
const RETRIEVAL_MIN_CHARS: usize = 15;

/// Emitted on new/rotated threads and refreshed every
/// `file_instructions_every` turns.
const REPLY_STYLE_INSTRUCTIONS: &str = "When you generate an image or a file the user should receive, \
save it under the attachments directory and put its absolute path on a line of its own. \
Reply in plain Markdown without HTML.";

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub default_agent: String,
    pub timeout_ms: u64,
    pub max_buffer: usize,
    pub rotation_turns: u32,
    pub max_context_chars: usize,
    pub file_instructions_every: u32,
    pub retrieval_limit: usize,
}

/// A media file referenced from the prompt by path.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: EventKind,
    pub path: String,
}

/// One full-pipeline invocation.
#[derive(Debug, Clone)]
pub struct ChatRun {
    pub chat: ChatId,
    pub topic: TopicId,
    pub prompt: String,
    /// Explicit agent override; wins over per-topic override and default.
    pub agent: Option<String>,
    pub model: Option<String>,
    /// Accounting source label ("chat", "cron", "task").
    pub source: String,
    pub cwd: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Live output chunks (cron job logs).
    pub chunks: Option<mpsc::UnboundedSender<String>>,
}

impl ChatRun {
    pub fn new(chat: ChatId, topic: TopicId, prompt: impl Into<String>) -> Self {
        Self {
            chat,
            topic,
            prompt: prompt.into(),
            agent: None,
            model: None,
            source: "chat".to_string(),
            cwd: None,
            attachments: Vec::new(),
            chunks: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub text: String,
    pub agent: AgentId,
    pub session_id: Option<String>,
    pub rotated: bool,
}

pub struct AgentRunner {
    registry: AdapterRegistry,
    executor: Arc<dyn CommandExecutor>,
    threads: Arc<ThreadStore>,
    settings: Arc<SettingsStore>,
    memory: Arc<MemoryService>,
    usage: Arc<UsageTracker>,
    cfg: RunnerConfig,
    turns: DashMap<String, u32>,
    context_size: DashMap<String, usize>,
    rcache: RetrievalCache,
}

impl AgentRunner {
    pub fn new(
        registry: AdapterRegistry,
        executor: Arc<dyn CommandExecutor>,
        threads: Arc<ThreadStore>,
        settings: Arc<SettingsStore>,
        memory: Arc<MemoryService>,
        usage: Arc<UsageTracker>,
        cfg: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            threads,
            settings,
            memory,
            usage,
            cfg,
            turns: DashMap::new(),
            context_size: DashMap::new(),
            rcache: RetrievalCache::new(),
        }
    }

    pub fn threads(&self) -> &Arc<ThreadStore> {
        &self.threads
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn memory(&self) -> &Arc<MemoryService> {
        &self.memory
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn default_agent(&self) -> &str {
        &self.cfg.default_agent
    }

    /// The agent a run on this topic would use right now.
    pub fn effective_agent(&self, explicit: Option<&str>, topic: &TopicKey) -> String {
        self.settings
            .effective_agent(explicit, topic, &self.cfg.default_agent)
    }

    pub fn turn_count(&self, key: &ThreadKey) -> u32 {
        self.turns.get(&key.to_string()).map(|v| *v).unwrap_or(0)
    }

    pub fn context_chars(&self, key: &ThreadKey) -> usize {
        self.context_size
            .get(&key.to_string())
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// User-issued `/reset`: clear the session, turn counter, and context
    /// estimate. Does not interrupt an in-flight run.
    pub fn reset(&self, chat: ChatId, topic: &TopicId) -> AgentId {
        let topic_key = TopicKey::new(chat, topic.clone());
        let agent = AgentId::new(&self.effective_agent(None, &topic_key));
        let key = ThreadKey::new(chat, topic.clone(), agent.clone());
        let key_str = key.to_string();
        self.threads.clear(&key);
        self.turns.remove(&key_str);
        self.context_size.remove(&key_str);
        info!(thread = %key_str, "thread reset by user");
        agent
    }

    /// One-shot invocation: no session continuity, no bootstrap, no memory.
    /// Still crosses token accounting.
    pub async fn run_once(
        &self,
        agent: Option<&str>,
        prompt: &str,
        model: Option<&str>,
        cwd: Option<&str>,
        source: &str,
    ) -> Result<String> {
        let agent_id = agent.unwrap_or(&self.cfg.default_agent).to_string();
        let adapter = self
            .registry
            .get(&agent_id)
            .ok_or_else(|| EngineError::UnknownAgent(agent_id.clone()))?;

        let est_input = (prompt.chars().count() / 4) as i64;
        self.track(ChatId(0), est_input, 0, source, &agent_id, None);

        let run = ChatRun {
            model: model.map(str::to_string),
            cwd: cwd.map(str::to_string),
            ..ChatRun::new(ChatId(0), TopicId::root(), prompt)
        };
        let (raw, parsed) = self.invoke(&adapter, prompt, None, &run).await?;
        let text = extract_text(&raw, &parsed);
        self.track_completion(ChatId(0), est_input, &parsed, &text, source, &agent_id);
        Ok(text)
    }

    /// The full chat pipeline.
    pub async fn run_chat(&self, run: ChatRun) -> Result<RunOutcome> {
        // Budget is a soft gate for conversational sources; cron applies its
        // own gate before dispatch.
        if run.source != "cron" && self.usage.is_budget_exhausted() {
            return Err(EngineError::BudgetExhausted);
        }

        // 1. Effective agent: explicit > per-topic override > default.
        let topic_key = TopicKey::new(run.chat, run.topic.clone());
        let agent_id = self.effective_agent(run.agent.as_deref(), &topic_key);
        let adapter = self
            .registry
            .get(&agent_id)
            .ok_or_else(|| EngineError::UnknownAgent(agent_id.clone()))?;

        // 2. Session resolution.
        let resolved =
            self.threads
                .resolve(run.chat, run.topic.clone(), AgentId::new(&agent_id));
        let key = resolved.key.clone();
        let key_str = key.to_string();
        let mut session = resolved.session_id;
        if resolved.migrated {
            self.threads.flush();
        }

        // 3. Turn counter reflects runs attempted, not runs that succeeded.
        let mut turn = {
            let mut entry = self.turns.entry(key_str.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        // 4. Rotation decision. Only meaningful with a session in play.
        let mut rotated = false;
        if session.is_some() {
            let ctx = self.context_size.get(&key_str).map(|v| *v);
            if let Some(reason) = rotation_reason(&self.cfg, turn, ctx) {
                info!(thread = %key_str, turn, reason, "rotating thread");
                self.rotate(&key, &key_str);
                session = None;
                rotated = true;
                turn = 1;
            }
        }

        // 5–7. Prompt assembly.
        let mut prompt = self.assemble_prompt(&key, &run, &agent_id, session.is_none(), rotated, turn);

        // 9. Phase-1 accounting: estimate what the agent will see, including
        // the context it resumes with.
        let accumulated = self.context_size.get(&key_str).map(|v| *v).unwrap_or(0);
        let est_input = ((prompt.chars().count() + accumulated) / 4) as i64;
        self.track(run.chat, est_input, 0, &run.source, &agent_id, None);

        // 10–11. Execute and parse.
        let (mut raw, mut parsed) = self
            .invoke(&adapter, &prompt, session.as_deref(), &run)
            .await?;

        // 12. Stale-session recovery: exactly one retry as a fresh thread.
        if session.is_some() && adapter.is_stale_session_output(&raw, &parsed) {
            warn!(thread = %key_str, "stale session reported by agent, retrying fresh");
            self.rotate(&key, &key_str);
            session = None;
            rotated = true;
            turn = 1;
            prompt = self.assemble_prompt(&key, &run, &agent_id, true, true, turn);
            let retry = self.invoke(&adapter, &prompt, None, &run).await?;
            raw = retry.0;
            parsed = retry.1;
        }

        // 13. Session-id fallback through the adapter's listing capability.
        let mut new_session = parsed.session_id.clone();
        if new_session.is_none() {
            if let Some(list_cmd) = adapter.list_sessions_command() {
                new_session = self.list_latest_session(&adapter, list_cmd, &run).await;
            }
        }

        // 14. Persist the session mapping (async, fail-soft).
        if let Some(sid) = &new_session {
            if session.as_deref() != Some(sid.as_str()) {
                self.threads.set(&key, sid);
            }
        }

        // 15. Phase-2 accounting + context growth.
        let text = extract_text(&raw, &parsed);
        self.track_completion(run.chat, est_input, &parsed, &text, &run.source, &agent_id);
        let grown = prompt.chars().count() + text.chars().count();
        *self.context_size.entry(key_str).or_insert(0) += grown;

        Ok(RunOutcome {
            text,
            agent: AgentId::new(&agent_id),
            session_id: new_session.or(session),
            rotated,
        })
    }

    // -----------------------------------------------------------------------
    // Pipeline pieces
    // -----------------------------------------------------------------------

    fn rotate(&self, key: &ThreadKey, key_str: &str) {
        self.threads.clear(key);
        self.context_size.remove(key_str);
        self.turns.insert(key_str.to_string(), 1);
    }

    /// `[bootstrap?] ⏎⏎ [stamped prompt] ⏎⏎ [retrieval?]` plus style
    /// instructions and attachment references.
    fn assemble_prompt(
        &self,
        key: &ThreadKey,
        run: &ChatRun,
        agent_id: &str,
        include_bootstrap: bool,
        compact: bool,
        turn: u32,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        if include_bootstrap {
            let bootstrap = self.memory.bootstrap(key, compact);
            if !bootstrap.is_empty() {
                parts.push(bootstrap);
            }
        }

        parts.push(format!(
            "[{}] {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M UTC"),
            run.prompt
        ));

        if let Some(fragment) = self.retrieval_fragment(run, agent_id) {
            if !fragment.is_empty() {
                parts.push(fragment);
            }
        }

        let mut prompt = parts.join("\n\n");

        let refresh = self.cfg.file_instructions_every > 0
            && turn % self.cfg.file_instructions_every == 0;
        if include_bootstrap || refresh {
            prompt.push_str("\n\n");
            prompt.push_str(REPLY_STYLE_INSTRUCTIONS);
        }

        for att in &run.attachments {
            prompt.push_str(&format!("\n\n[Attached {}: {}]", att.kind, att.path));
        }
        prompt
    }

    /// Retrieval gate: short prompts skip it entirely; results (including
    /// the empty sentinel) are cached per `(chat, topic, prompt prefix)`.
    fn retrieval_fragment(&self, run: &ChatRun, agent_id: &str) -> Option<String> {
        let significant = run.prompt.chars().filter(|c| !c.is_whitespace()).count();
        if significant < RETRIEVAL_MIN_CHARS {
            return None;
        }
        let cache_key = RetrievalCache::key(run.chat.0, run.topic.as_str(), &run.prompt);
        if let Some(hit) = self.rcache.get(&cache_key) {
            return Some(hit);
        }
        let fragment = self.memory.retrieve(&RetrievalRequest {
            query: run.prompt.clone(),
            chat: run.chat,
            topic: run.topic.clone(),
            agent: AgentId::new(agent_id),
            limit: self.cfg.retrieval_limit,
        });
        self.rcache.put(cache_key, fragment.clone());
        Some(fragment)
    }

    /// Build the command line and env, then execute under the adapter's
    /// discipline (PTY, stderr merge, timeout, buffer cap).
    async fn invoke(
        &self,
        adapter: &Arc<dyn AgentAdapter>,
        prompt: &str,
        session: Option<&str>,
        run: &ChatRun,
    ) -> Result<(String, ParsedOutput)> {
        let model = run
            .model
            .clone()
            .or_else(|| self.settings.model_for(adapter.id()));
        let thinking = self.settings.thinking();

        let req = CommandRequest {
            prompt,
            prompt_expression: Some("\"$HERALD_PROMPT\""),
            session_id: session,
            session_id_expression: session.is_some().then_some("\"$HERALD_SESSION_ID\""),
            model: model.as_deref(),
            thinking: thinking.as_deref(),
        };
        let line = adapter.build_command(&req);

        let mut env = vec![(ENV_PROMPT.to_string(), prompt.to_string())];
        if let Some(sid) = session {
            env.push((ENV_SESSION_ID.to_string(), sid.to_string()));
        }

        let output = self
            .executor
            .exec(
                ExecRequest {
                    command: line,
                    env,
                    cwd: run.cwd.clone(),
                    timeout_ms: self.cfg.timeout_ms,
                    max_buffer: self.cfg.max_buffer,
                    merge_stderr: adapter.merge_stderr(),
                    needs_pty: adapter.needs_pty(),
                },
                run.chunks.clone(),
            )
            .await?;

        let parsed = adapter.parse_output(&output.stdout);
        Ok((output.stdout, parsed))
    }

    /// Run the adapter's session listing and pull the newest id. Fail-soft:
    /// a broken listing just means no session is recorded this turn.
    async fn list_latest_session(
        &self,
        adapter: &Arc<dyn AgentAdapter>,
        list_cmd: String,
        run: &ChatRun,
    ) -> Option<String> {
        match self
            .executor
            .exec(
                ExecRequest {
                    command: list_cmd,
                    env: Vec::new(),
                    cwd: run.cwd.clone(),
                    timeout_ms: self.cfg.timeout_ms,
                    max_buffer: self.cfg.max_buffer,
                    merge_stderr: adapter.merge_stderr(),
                    needs_pty: false,
                },
                None,
            )
            .await
        {
            Ok(listing) => adapter.parse_session_list(&listing.stdout),
            Err(e) => {
                warn!(agent = adapter.id(), "session list fallback failed: {e}");
                None
            }
        }
    }

    fn track(
        &self,
        chat: ChatId,
        input: i64,
        output: u64,
        source: &str,
        agent: &str,
        cost: Option<f64>,
    ) {
        self.usage.track(TrackEvent {
            chat_id: chat,
            input_tokens: input,
            output_tokens: output,
            source: source.to_string(),
            agent_id: agent.to_string(),
            cost_usd: cost,
        });
    }

    /// Phase 2: correct the estimate with real usage when the agent reported
    /// it, otherwise estimate the output side.
    fn track_completion(
        &self,
        chat: ChatId,
        est_input: i64,
        parsed: &ParsedOutput,
        text: &str,
        source: &str,
        agent: &str,
    ) {
        match parsed.usage {
            Some(usage) => self.track(
                chat,
                usage.input_tokens as i64 - est_input,
                usage.output_tokens,
                source,
                agent,
                parsed.cost_usd,
            ),
            None => self.track(
                chat,
                0,
                (text.chars().count() / 4) as u64,
                source,
                agent,
                parsed.cost_usd,
            ),
        }
    }
}

/// The parsed text, or the raw output when no text was extracted.
fn extract_text(raw: &str, parsed: &ParsedOutput) -> String {
    if parsed.text.is_empty() {
        raw.trim().to_string()
    } else {
        parsed.text.clone()
    }
}

fn rotation_reason(cfg: &RunnerConfig, turn: u32, ctx: Option<usize>) -> Option<&'static str> {
    if cfg.rotation_turns > 0 && turn >= cfg.rotation_turns {
        return Some("turn limit reached");
    }
    if cfg.max_context_chars > 0 {
        match ctx {
            Some(size) if size >= cfg.max_context_chars => return Some("context limit reached"),
            // A session on disk with no in-memory size estimate means we
            // restarted; start fresh rather than silently overflow.
            None => return Some("no context estimate after restart"),
            _ => {}
        }
    }
    None
}
