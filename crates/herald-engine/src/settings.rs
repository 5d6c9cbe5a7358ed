//! Runtime settings (`config.json`) and per-topic agent overrides
//! (`agent-overrides.json`), both mutable from slash commands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use herald_core::persist::JsonFile;
use herald_core::types::TopicKey;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Global default agent; falls back to the config file default.
    pub agent: Option<String>,
    /// Per-agent model overrides.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Thinking level handed to adapters that support one.
    pub thinking: Option<String>,
    /// Chat that receives cron output when a job names none.
    pub cron_chat_id: Option<i64>,
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file: Arc<JsonFile<Settings>>,
    overrides: Mutex<HashMap<String, String>>,
    overrides_file: Arc<JsonFile<HashMap<String, String>>>,
}

impl SettingsStore {
    pub fn open(file: JsonFile<Settings>, overrides_file: JsonFile<HashMap<String, String>>) -> Self {
        let settings = file.load();
        let overrides = overrides_file.load();
        Self {
            settings: Mutex::new(settings),
            file: Arc::new(file),
            overrides: Mutex::new(overrides),
            overrides_file: Arc::new(overrides_file),
        }
    }

    /// Resolve the effective agent: explicit request, then per-topic
    /// override, then the global default.
    pub fn effective_agent(
        &self,
        explicit: Option<&str>,
        topic: &TopicKey,
        config_default: &str,
    ) -> String {
        if let Some(agent) = explicit.filter(|a| !a.is_empty()) {
            return agent.to_string();
        }
        if let Some(agent) = self.overrides.lock().unwrap().get(&topic.to_string()) {
            return agent.clone();
        }
        self.settings
            .lock()
            .unwrap()
            .agent
            .clone()
            .unwrap_or_else(|| config_default.to_string())
    }

    pub fn default_agent(&self) -> Option<String> {
        self.settings.lock().unwrap().agent.clone()
    }

    /// `None` resets to the config file default.
    pub fn set_default_agent(&self, agent: Option<String>) {
        self.settings.lock().unwrap().agent = agent;
        self.persist_settings();
    }

    pub fn model_for(&self, agent: &str) -> Option<String> {
        self.settings.lock().unwrap().models.get(agent).cloned()
    }

    pub fn set_model(&self, agent: &str, model: Option<String>) {
        {
            let mut settings = self.settings.lock().unwrap();
            match model {
                Some(model) => settings.models.insert(agent.to_string(), model),
                None => settings.models.remove(agent),
            };
        }
        self.persist_settings();
    }

    pub fn thinking(&self) -> Option<String> {
        self.settings.lock().unwrap().thinking.clone()
    }

    pub fn set_thinking(&self, level: Option<String>) {
        self.settings.lock().unwrap().thinking = level;
        self.persist_settings();
    }

    pub fn cron_chat(&self) -> Option<i64> {
        self.settings.lock().unwrap().cron_chat_id
    }

    pub fn set_cron_chat(&self, chat: i64) {
        self.settings.lock().unwrap().cron_chat_id = Some(chat);
        self.persist_settings();
    }

    pub fn override_for(&self, topic: &TopicKey) -> Option<String> {
        self.overrides.lock().unwrap().get(&topic.to_string()).cloned()
    }

    pub fn set_override(&self, topic: &TopicKey, agent: Option<String>) {
        {
            let mut overrides = self.overrides.lock().unwrap();
            match agent {
                Some(agent) => overrides.insert(topic.to_string(), agent),
                None => overrides.remove(&topic.to_string()),
            };
        }
        let snapshot = self.overrides.lock().unwrap().clone();
        self.overrides_file.spawn_save(snapshot);
    }

    fn persist_settings(&self) {
        let snapshot = self.settings.lock().unwrap().clone();
        self.file.spawn_save(snapshot);
    }
}
