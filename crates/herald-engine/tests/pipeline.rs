//! End-to-end pipeline scenarios with a scripted executor standing in for
//! the agent subprocesses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use herald_agents::adapter::{ENV_PROMPT, ENV_SESSION_ID};
use herald_agents::exec::{CommandExecutor, ExecOutput, ExecRequest};
use herald_agents::{AdapterRegistry, AgentError};
use herald_core::paths::StateDir;
use herald_core::persist::JsonFile;
use herald_core::types::{AgentId, ChatId, EventKind, Role, ThreadKey, TopicId};
use herald_engine::{AgentRunner, ChatRun, EngineError, RunnerConfig, SettingsStore, ThreadStore, WorkQueue};
use herald_memory::{MemoryService, MemoryStore};
use herald_usage::UsageTracker;

struct ScriptedExecutor {
    outputs: Mutex<VecDeque<Result<ExecOutput, AgentError>>>,
    calls: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    fn new(outputs: Vec<Result<ExecOutput, AgentError>>) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call(&self, i: usize) -> ExecRequest {
        self.calls.lock().unwrap()[i].clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn exec(
        &self,
        req: ExecRequest,
        _chunks: Option<tokio::sync::mpsc::UnboundedSender<String>>,
    ) -> herald_agents::Result<ExecOutput> {
        self.calls.lock().unwrap().push(req);
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecOutput { stdout: String::new(), exit_code: 0 }))
    }
}

fn ok(stdout: &str) -> Result<ExecOutput, AgentError> {
    Ok(ExecOutput {
        stdout: stdout.to_string(),
        exit_code: 0,
    })
}

fn stream(session: Option<&str>, text: &str) -> String {
    let mut out = String::new();
    if let Some(sid) = session {
        out.push_str(&format!(
            "{}\n",
            serde_json::json!({"type": "thread.started", "thread_id": sid})
        ));
    }
    out.push_str(&format!("{}\n", serde_json::json!({"message": text})));
    out
}

fn env_of<'a>(req: &'a ExecRequest, key: &str) -> Option<&'a str> {
    req.env
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

struct Harness {
    runner: Arc<AgentRunner>,
    exec: Arc<ScriptedExecutor>,
    state: StateDir,
    _dir: tempfile::TempDir,
}

fn harness(
    outputs: Vec<Result<ExecOutput, AgentError>>,
    budget: u64,
    tweak: impl FnOnce(&mut RunnerConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::at(dir.path());
    state.ensure().unwrap();

    let exec = ScriptedExecutor::new(outputs);
    let threads = Arc::new(ThreadStore::open(JsonFile::new(state.threads_file())));
    let settings = Arc::new(SettingsStore::open(
        JsonFile::new(state.settings_file()),
        JsonFile::new(state.overrides_file()),
    ));
    let store = Arc::new(MemoryStore::open(state.clone()));
    let memory = Arc::new(MemoryService::new(store, state.clone(), 2000, 0));
    let usage = Arc::new(UsageTracker::open(JsonFile::new(state.usage_file()), budget));

    let mut cfg = RunnerConfig {
        default_agent: "codex".to_string(),
        timeout_ms: 5000,
        max_buffer: 1 << 20,
        rotation_turns: 0,
        max_context_chars: 0,
        file_instructions_every: 5,
        retrieval_limit: 4,
    };
    tweak(&mut cfg);

    let runner = Arc::new(AgentRunner::new(
        AdapterRegistry::with_defaults(),
        exec.clone(),
        threads,
        settings,
        memory,
        usage,
        cfg,
    ));
    Harness {
        runner,
        exec,
        state,
        _dir: dir,
    }
}

fn chat_run(prompt: &str) -> ChatRun {
    ChatRun::new(ChatId(12345), TopicId::root(), prompt)
}

fn thread_key() -> ThreadKey {
    ThreadKey::new(ChatId(12345), TopicId::root(), AgentId::new("codex"))
}

// -- S1: thread continuity ---------------------------------------------------

#[tokio::test]
async fn s1_session_carries_into_the_second_turn() {
    let h = harness(
        vec![
            ok(&stream(Some("t-1"), "Primera respuesta")),
            ok(&stream(None, "Segunda respuesta")),
        ],
        0,
        |_| {},
    );

    let first = h.runner.run_chat(chat_run("Hola equipo")).await.unwrap();
    assert_eq!(first.text, "Primera respuesta");
    assert_eq!(first.session_id.as_deref(), Some("t-1"));

    let second = h.runner.run_chat(chat_run("¿Seguimos?")).await.unwrap();
    assert_eq!(second.text, "Segunda respuesta");
    assert_eq!(second.session_id.as_deref(), Some("t-1"));

    // First invocation starts fresh; second resumes t-1.
    let c0 = h.exec.call(0);
    assert!(env_of(&c0, ENV_SESSION_ID).is_none());
    assert!(!c0.command.contains("resume"));
    let c1 = h.exec.call(1);
    assert_eq!(env_of(&c1, ENV_SESSION_ID), Some("t-1"));
    assert!(c1.command.contains("resume"));

    // The mapping is persisted for the thread key.
    let resolved =
        h.runner
            .threads()
            .resolve(ChatId(12345), TopicId::root(), AgentId::new("codex"));
    assert_eq!(resolved.session_id.as_deref(), Some("t-1"));
}

// -- S2: rotation by turn limit ----------------------------------------------

#[tokio::test]
async fn s2_turn_limit_rotates_with_compact_bootstrap() {
    let h = harness(
        vec![
            ok(&stream(Some("t-1"), "uno")),
            ok(&stream(None, "dos")),
            ok(&stream(Some("t-2"), "tres")),
        ],
        0,
        |cfg| cfg.rotation_turns = 3,
    );
    // A soul preamble long enough that compaction is observable.
    std::fs::write(h.state.soul_md(), "s".repeat(2000)).unwrap();

    for prompt in ["m1", "m2", "m3"] {
        h.runner.run_chat(chat_run(prompt)).await.unwrap();
    }

    let p0 = env_of(&h.exec.call(0), ENV_PROMPT).unwrap().to_string();
    let p1 = env_of(&h.exec.call(1), ENV_PROMPT).unwrap().to_string();
    let p2 = env_of(&h.exec.call(2), ENV_PROMPT).unwrap().to_string();

    // Build 1: new thread, full bootstrap. Build 2: continuing, none.
    // Build 3: rotated, compact bootstrap.
    assert!(p0.contains("<soul>"));
    assert!(p0.contains(&"s".repeat(2000)));
    assert!(!p1.contains("<soul>"));
    assert!(p2.contains("<soul>"));
    assert!(!p2.contains(&"s".repeat(2000)));

    assert!(env_of(&h.exec.call(1), ENV_SESSION_ID).is_some());
    assert!(env_of(&h.exec.call(2), ENV_SESSION_ID).is_none());

    // Post-rotation counters: this run became turn 1 of the fresh thread.
    assert_eq!(h.runner.turn_count(&thread_key()), 1);
}

// -- S3: rotation by accumulated context ---------------------------------------

#[tokio::test]
async fn s3_context_growth_rotates_the_third_turn() {
    let big = "x".repeat(5000);
    let h = harness(
        vec![
            ok(&stream(Some("t-1"), &big)),
            ok(&stream(None, &big)),
            ok(&stream(Some("t-2"), &big)),
        ],
        0,
        |cfg| {
            cfg.rotation_turns = 100;
            cfg.max_context_chars = 6000;
        },
    );

    for prompt in ["m1", "m2", "m3"] {
        let out = h.runner.run_chat(chat_run(prompt)).await.unwrap();
        assert_eq!(out.text, big);
    }

    assert!(env_of(&h.exec.call(0), ENV_SESSION_ID).is_none());
    assert_eq!(env_of(&h.exec.call(1), ENV_SESSION_ID), Some("t-1"));
    // Accumulated context crossed 6000 before turn 3, forcing a fresh thread.
    assert!(env_of(&h.exec.call(2), ENV_SESSION_ID).is_none());
}

#[tokio::test]
async fn context_size_strictly_increases_between_rotations() {
    let h = harness(
        vec![ok(&stream(Some("t-1"), "uno")), ok(&stream(None, "dos"))],
        0,
        |_| {},
    );
    let key = thread_key();
    h.runner.run_chat(chat_run("hola")).await.unwrap();
    let after_one = h.runner.context_chars(&key);
    assert!(after_one > 0);
    h.runner.run_chat(chat_run("sigue")).await.unwrap();
    assert!(h.runner.context_chars(&key) > after_one);
    assert_eq!(h.runner.turn_count(&key), 2);
}

// -- S4: stale-session recovery ----------------------------------------------

#[tokio::test]
async fn s4_stale_session_recovers_exactly_once() {
    let h = harness(
        vec![
            ok(&stream(Some("t-1"), "primera")),
            ok("Error: no conversation found with session id t-1"),
            ok(&stream(Some("t-2"), "recuperada")),
        ],
        0,
        |_| {},
    );

    h.runner.run_chat(chat_run("hola")).await.unwrap();
    let out = h.runner.run_chat(chat_run("sigue")).await.unwrap();

    // One retry happened: attempt with t-1, then a fresh run.
    assert_eq!(h.exec.call_count(), 3);
    assert_eq!(env_of(&h.exec.call(1), ENV_SESSION_ID), Some("t-1"));
    assert!(env_of(&h.exec.call(2), ENV_SESSION_ID).is_none());

    assert_eq!(out.text, "recuperada");
    assert_eq!(out.session_id.as_deref(), Some("t-2"));
    assert!(out.rotated);

    // Counters were reset by the recovery.
    assert_eq!(h.runner.turn_count(&thread_key()), 1);
    let resolved =
        h.runner
            .threads()
            .resolve(ChatId(12345), TopicId::root(), AgentId::new("codex"));
    assert_eq!(resolved.session_id.as_deref(), Some("t-2"));
}

#[tokio::test]
async fn stale_wording_without_a_session_is_not_recovery() {
    let h = harness(
        vec![ok("session not found is what the user asked about")],
        0,
        |_| {},
    );
    let out = h.runner.run_chat(chat_run("what does 'session not found' mean?")).await.unwrap();
    // No session was in use, so the text passes through and nothing retried.
    assert_eq!(h.exec.call_count(), 1);
    assert!(out.text.contains("session not found"));
}

// -- Retrieval gate ------------------------------------------------------------

#[tokio::test]
async fn retrieval_injected_only_for_substantial_prompts() {
    let h = harness(
        vec![ok(&stream(None, "a")), ok(&stream(None, "b"))],
        0,
        |_| {},
    );
    // Seed memory with something findable.
    let key = thread_key();
    h.runner.memory().capture(
        &key,
        Role::Assistant,
        EventKind::Text,
        "the deploy window is friday evening",
    );

    // 14 non-whitespace characters: below the gate.
    h.runner.run_chat(chat_run("deploy windows")).await.unwrap();
    let short = env_of(&h.exec.call(0), ENV_PROMPT).unwrap().to_string();
    assert!(!short.contains("Relevant memory:"));

    // 15+: retrieval runs and lands in the prompt.
    h.runner
        .run_chat(chat_run("about the deploy window please"))
        .await
        .unwrap();
    let long = env_of(&h.exec.call(1), ENV_PROMPT).unwrap().to_string();
    assert!(long.contains("Relevant memory:"));
    assert!(long.contains("deploy window"));
}

// -- Budget gate ---------------------------------------------------------------

#[tokio::test]
async fn exhausted_budget_blocks_chat_runs() {
    let h = harness(vec![ok(&stream(None, "nope"))], 100, |_| {});
    h.runner.usage().track(herald_usage::TrackEvent {
        chat_id: ChatId(12345),
        input_tokens: 200,
        output_tokens: 0,
        source: "chat".to_string(),
        agent_id: "codex".to_string(),
        cost_usd: None,
    });
    let err = h.runner.run_chat(chat_run("hola")).await.unwrap_err();
    assert!(matches!(err, EngineError::BudgetExhausted));
    assert_eq!(h.exec.call_count(), 0);
}

// -- /reset --------------------------------------------------------------------

#[tokio::test]
async fn reset_clears_session_until_next_completion() {
    let h = harness(
        vec![ok(&stream(Some("t-1"), "uno")), ok(&stream(Some("t-9"), "dos"))],
        0,
        |_| {},
    );
    h.runner.run_chat(chat_run("hola")).await.unwrap();
    h.runner.reset(ChatId(12345), &TopicId::root());

    let resolved =
        h.runner
            .threads()
            .resolve(ChatId(12345), TopicId::root(), AgentId::new("codex"));
    assert!(resolved.session_id.is_none());
    assert_eq!(h.runner.turn_count(&thread_key()), 0);

    // The next run starts a fresh thread and records the new session.
    h.runner.run_chat(chat_run("de nuevo")).await.unwrap();
    assert!(env_of(&h.exec.call(1), ENV_SESSION_ID).is_none());
    let resolved =
        h.runner
            .threads()
            .resolve(ChatId(12345), TopicId::root(), AgentId::new("codex"));
    assert_eq!(resolved.session_id.as_deref(), Some("t-9"));
}

// -- Capture ordering through the queue (invariant 1) --------------------------

#[tokio::test]
async fn queue_serialized_captures_match_arrival_order() {
    let h = harness(Vec::new(), 0, |_| {});
    let queue = WorkQueue::new();
    let key = thread_key();

    for i in 0..10u32 {
        let memory = Arc::clone(h.runner.memory());
        let key = key.clone();
        queue.enqueue("12345:root", async move {
            memory.capture(&key, Role::User, EventKind::Text, &format!("mensaje {i}"));
        });
    }
    assert!(queue.drain(std::time::Duration::from_secs(5)).await);

    let tail = h.runner.memory().store().tail(&key, 10);
    let texts: Vec<&str> = tail.iter().map(|e| e.text.as_str()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("mensaje {i}")).collect();
    assert_eq!(texts, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

// -- One-shot variant ----------------------------------------------------------

#[tokio::test]
async fn run_once_skips_bootstrap_and_sessions() {
    let h = harness(vec![ok(&stream(Some("t-1"), "respuesta"))], 0, |_| {});
    std::fs::write(h.state.soul_md(), "never included").unwrap();

    let text = h
        .runner
        .run_once(None, "ping", None, None, "cron")
        .await
        .unwrap();
    assert_eq!(text, "respuesta");

    let prompt = env_of(&h.exec.call(0), ENV_PROMPT).unwrap().to_string();
    assert!(!prompt.contains("never included"));
    assert!(env_of(&h.exec.call(0), ENV_SESSION_ID).is_none());
    // One-shot runs never record sessions.
    let resolved =
        h.runner
            .threads()
            .resolve(ChatId(0), TopicId::root(), AgentId::new("codex"));
    assert!(resolved.session_id.is_none());
}

// -- Unknown agent -------------------------------------------------------------

#[tokio::test]
async fn unknown_agent_is_a_configuration_error() {
    let h = harness(Vec::new(), 0, |_| {});
    let mut run = chat_run("hola");
    run.agent = Some("nonexistent".to_string());
    let err = h.runner.run_chat(run).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownAgent(_)));
}
