//! Daily token accounting: per-chat/source/agent buckets, once-per-day
//! budget alerts, and the coarse budget gate consulted by ingress and cron.
//!
//! Accounting is two-phase: an estimated input count is tracked at dispatch
//! and a correction delta (plus real output) at completion. The message
//! counter only moves on the phase with `input_tokens > 0`, so a run is
//! counted exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use herald_core::persist::JsonFile;
use herald_core::types::ChatId;

/// Budget percentages that trigger an alert, each at most once per day.
pub const ALERT_THRESHOLDS: [u8; 5] = [25, 50, 75, 85, 95];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bucket {
    pub input: u64,
    pub output: u64,
    pub messages: u64,
}

impl Bucket {
    fn apply(&mut self, input: i64, output: u64) {
        self.input = (self.input as i64 + input).max(0) as u64;
        self.output += output;
        if input > 0 {
            self.messages += 1;
        }
    }

    fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// One day of aggregated usage, persisted as `usage.json`. State from an
/// earlier date is discarded on access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayState {
    pub date: String,
    #[serde(default)]
    pub chats: HashMap<String, Bucket>,
    #[serde(default)]
    pub sources: HashMap<String, Bucket>,
    #[serde(default)]
    pub agents: HashMap<String, Bucket>,
    #[serde(default)]
    pub alerts_sent: Vec<u8>,
    #[serde(default)]
    pub total_cost_usd: f64,
}

impl DayState {
    fn total_tokens(&self) -> u64 {
        self.chats.values().map(Bucket::total).sum()
    }
}

/// One accounting event. `input_tokens` may be negative: phase 2 of a run
/// submits the delta between the real and estimated input.
#[derive(Debug, Clone)]
pub struct TrackEvent {
    pub chat_id: ChatId,
    pub input_tokens: i64,
    pub output_tokens: u64,
    pub source: String,
    pub agent_id: String,
    pub cost_usd: Option<f64>,
}

/// Receives budget threshold crossings. Wired to the operator chat by the
/// gateway; tests install a recorder.
pub trait AlertSink: Send + Sync {
    fn budget_alert(&self, threshold: u8, used_pct: f64);
}

pub struct UsageTracker {
    state: Mutex<DayState>,
    file: Arc<JsonFile<DayState>>,
    budget_daily: u64,
    alerts: Option<Arc<dyn AlertSink>>,
}

impl UsageTracker {
    /// Load today's state from `usage.json` (stale or missing state starts
    /// empty).
    pub fn open(file: JsonFile<DayState>, budget_daily: u64) -> Self {
        let mut state = file.load();
        roll_if_stale(&mut state);
        Self {
            state: Mutex::new(state),
            file: Arc::new(file),
            budget_daily,
            alerts: None,
        }
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Record one accounting event and fire any newly crossed alerts.
    /// Persistence is fire-and-forget; a failed write never fails tracking.
    pub fn track(&self, event: TrackEvent) {
        let (snapshot, fired) = {
            let mut state = self.state.lock().unwrap();
            roll_if_stale(&mut state);

            state
                .chats
                .entry(event.chat_id.to_string())
                .or_default()
                .apply(event.input_tokens, event.output_tokens);
            state
                .sources
                .entry(event.source.clone())
                .or_default()
                .apply(event.input_tokens, event.output_tokens);
            state
                .agents
                .entry(event.agent_id.clone())
                .or_default()
                .apply(event.input_tokens, event.output_tokens);
            if let Some(cost) = event.cost_usd {
                state.total_cost_usd += cost;
            }

            let mut fired = Vec::new();
            if self.budget_daily > 0 {
                let pct = state.total_tokens() as f64 / self.budget_daily as f64 * 100.0;
                for threshold in ALERT_THRESHOLDS {
                    if pct >= threshold as f64 && !state.alerts_sent.contains(&threshold) {
                        state.alerts_sent.push(threshold);
                        fired.push((threshold, pct));
                    }
                }
            }
            (state.clone(), fired)
        };

        // Alerts fire outside the lock; sinks may do arbitrary work.
        if let Some(sink) = &self.alerts {
            for (threshold, pct) in fired {
                info!(threshold, pct = format!("{pct:.0}"), "token budget threshold crossed");
                sink.budget_alert(threshold, pct);
            }
        }

        self.file.spawn_save(snapshot);
    }

    /// Percentage of the daily budget consumed today (0 when unlimited).
    pub fn budget_pct(&self) -> f64 {
        if self.budget_daily == 0 {
            return 0.0;
        }
        let mut state = self.state.lock().unwrap();
        roll_if_stale(&mut state);
        state.total_tokens() as f64 / self.budget_daily as f64 * 100.0
    }

    pub fn is_budget_exhausted(&self) -> bool {
        self.budget_pct() >= 100.0
    }

    /// Human-readable report for `/usage`.
    pub fn stats(&self, chat: Option<ChatId>) -> String {
        let mut state = self.state.lock().unwrap();
        roll_if_stale(&mut state);

        let mut out = format!("Usage for {}\n", state.date);
        match chat {
            Some(chat) => {
                let bucket = state.chats.get(&chat.to_string()).cloned().unwrap_or_default();
                out.push_str(&format!(
                    "This chat: {} in / {} out over {} messages\n",
                    bucket.input, bucket.output, bucket.messages
                ));
            }
            None => {
                out.push_str(&format!("Total tokens: {}\n", state.total_tokens()));
            }
        }
        if self.budget_daily > 0 {
            let pct = state.total_tokens() as f64 / self.budget_daily as f64 * 100.0;
            out.push_str(&format!(
                "Budget: {:.0}% of {} tokens\n",
                pct, self.budget_daily
            ));
        }
        if state.total_cost_usd > 0.0 {
            out.push_str(&format!("Reported cost: ${:.4}\n", state.total_cost_usd));
        }
        let mut agents: Vec<_> = state.agents.iter().collect();
        agents.sort_by(|a, b| a.0.cmp(b.0));
        for (agent, bucket) in agents {
            out.push_str(&format!(
                "- {agent}: {} in / {} out ({} msgs)\n",
                bucket.input, bucket.output, bucket.messages
            ));
        }
        out.trim_end().to_string()
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn roll_if_stale(state: &mut DayState) {
    let today = today();
    if state.date != today {
        if !state.date.is_empty() {
            info!(from = %state.date, to = %today, "usage day rollover");
        }
        *state = DayState {
            date: today,
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<u8>>);

    impl AlertSink for Recorder {
        fn budget_alert(&self, threshold: u8, _used_pct: f64) {
            self.0.lock().unwrap().push(threshold);
        }
    }

    fn tracker(budget: u64) -> (UsageTracker, Arc<Recorder>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path().join("usage.json"));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let t = UsageTracker::open(file, budget).with_alert_sink(recorder.clone());
        (t, recorder, dir)
    }

    fn event(chat: i64, input: i64, output: u64) -> TrackEvent {
        TrackEvent {
            chat_id: ChatId(chat),
            input_tokens: input,
            output_tokens: output,
            source: "chat".to_string(),
            agent_id: "claude".to_string(),
            cost_usd: None,
        }
    }

    #[tokio::test]
    async fn two_phase_accounting_counts_one_message() {
        let (t, _r, _d) = tracker(0);
        t.track(event(1, 120, 0)); // phase 1: estimate
        t.track(event(1, 0, 40)); // phase 2: correction + real output
        let stats = t.stats(Some(ChatId(1)));
        assert!(stats.contains("over 1 messages"), "{stats}");
    }

    #[tokio::test]
    async fn negative_correction_never_underflows() {
        let (t, _r, _d) = tracker(0);
        t.track(event(1, 100, 0));
        t.track(event(1, -150, 10));
        let stats = t.stats(Some(ChatId(1)));
        assert!(stats.contains("0 in / 10 out"), "{stats}");
    }

    #[tokio::test]
    async fn alert_thresholds_fire_once_in_order() {
        let (t, recorder, _d) = tracker(1000);
        // cumulative totals: 300, 550, 800, 900, 1000
        for add in [300, 250, 250, 100, 100] {
            t.track(event(1, add, 0));
        }
        assert_eq!(*recorder.0.lock().unwrap(), vec![25, 50, 75, 85, 95]);

        // further tracking must not re-fire
        t.track(event(1, 50, 0));
        assert_eq!(recorder.0.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn one_event_can_cross_many_thresholds() {
        let (t, recorder, _d) = tracker(1000);
        t.track(event(1, 900, 0));
        assert_eq!(*recorder.0.lock().unwrap(), vec![25, 50, 75, 85]);
    }

    #[tokio::test]
    async fn budget_gate_trips_at_100_pct() {
        let (t, _r, _d) = tracker(100);
        assert!(!t.is_budget_exhausted());
        t.track(event(1, 60, 40));
        assert!(t.is_budget_exhausted());
        assert!((t.budget_pct() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unlimited_budget_never_exhausts() {
        let (t, recorder, _d) = tracker(0);
        t.track(event(1, 1_000_000, 0));
        assert!(!t.is_budget_exhausted());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn buckets_split_by_source_and_agent() {
        let (t, _r, _d) = tracker(0);
        t.track(TrackEvent {
            chat_id: ChatId(1),
            input_tokens: 10,
            output_tokens: 5,
            source: "cron".to_string(),
            agent_id: "codex".to_string(),
            cost_usd: Some(0.01),
        });
        let stats = t.stats(None);
        assert!(stats.contains("codex: 10 in / 5 out"));
        assert!(stats.contains("$0.0100"));
    }
}
