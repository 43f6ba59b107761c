use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::llm::{Message, Role};

/// Unrest at or above this means the king has been executed.
pub const TERMINAL_UNREST: u32 = 101;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub group_id: String,
    pub display_name: String,
    #[serde(default)]
    pub last_answered_question_date: Option<NaiveDate>,
    #[serde(default)]
    pub responses_sent: u32,
    #[serde(default)]
    pub chat_history: Vec<Message>,
    #[serde(default)]
    pub peasant_unrest_percentage: u32,
    #[serde(default)]
    pub active_summary: Option<String>,
}

impl ServerState {
    pub fn new(group_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            display_name: display_name.into(),
            last_answered_question_date: None,
            responses_sent: 0,
            chat_history: Vec::new(),
            peasant_unrest_percentage: 0,
            active_summary: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.peasant_unrest_percentage >= TERMINAL_UNREST
    }

    /// Allowed while alive and `responses_sent <= max_per_day`; the extra
    /// turn at `== max_per_day` is the farewell.
    pub fn can_respond(&self, max_per_day: u32) -> bool {
        !self.is_dead() && self.responses_sent <= max_per_day
    }

    pub fn qotd_answered_on(&self, today: NaiveDate) -> bool {
        !is_new_day(self.last_answered_question_date, today)
    }

    /// Start a new day: clear history, raise unrest by one, record today's
    /// QOTD and give the king a fresh response budget.
    pub fn start_day(&mut self, today: NaiveDate) {
        self.chat_history.clear();
        self.peasant_unrest_percentage = self.peasant_unrest_percentage.saturating_add(1);
        self.last_answered_question_date = Some(today);
        self.responses_sent = 0;
    }
}

/// The one place that decides whether a new day has begun for a group.
pub fn is_new_day(last_answered: Option<NaiveDate>, today: NaiveDate) -> bool {
    last_answered != Some(today)
}

// --- Persistence ---

pub trait StatePersistence: Send + Sync {
    fn load_all(&self) -> Result<Vec<ServerState>>;
    fn save(&self, state: &ServerState) -> Result<()>;
}

/// Keeps nothing; state lives for the process lifetime.
pub struct MemoryPersistence;

impl StatePersistence for MemoryPersistence {
    fn load_all(&self) -> Result<Vec<ServerState>> {
        Ok(Vec::new())
    }

    fn save(&self, _state: &ServerState) -> Result<()> {
        Ok(())
    }
}

/// One pretty-printed JSON file per group.
pub struct JsonPersistence {
    dir: PathBuf,
}

impl JsonPersistence {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn state_filename(group_id: &str) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        group_id.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl StatePersistence for JsonPersistence {
    fn load_all(&self) -> Result<Vec<ServerState>> {
        let mut states = Vec::new();
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let content = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<ServerState>(&content) {
                    Ok(state) => states.push(state),
                    Err(e) => tracing::warn!("Skipping unreadable state {}: {e}", path.display()),
                }
            }
        }
        Ok(states)
    }

    fn save(&self, state: &ServerState) -> Result<()> {
        let filename = Self::state_filename(&state.group_id);
        let path = self.dir.join(format!("{filename}.json"));
        let tmp = self.dir.join(format!("{filename}.json.tmp"));

        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to save state: {}", path.display()))?;
        Ok(())
    }
}

// --- Registry ---

/// Per-group mutable state. Each call is atomic on its own; the engine holds
/// a per-group turn lock so one message's calls never interleave with another's.
pub struct StateRegistry {
    states: Mutex<HashMap<String, ServerState>>,
    persistence: Box<dyn StatePersistence>,
    clock: Arc<dyn Clock>,
}

impl StateRegistry {
    pub fn new(persistence: Box<dyn StatePersistence>, clock: Arc<dyn Clock>) -> Result<Self> {
        let states = persistence
            .load_all()?
            .into_iter()
            .map(|s| (s.group_id.clone(), s))
            .collect::<HashMap<_, _>>();
        if !states.is_empty() {
            tracing::info!("Loaded state for {} groups", states.len());
        }
        Ok(Self {
            states: Mutex::new(states),
            persistence,
            clock,
        })
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            persistence: Box::new(MemoryPersistence),
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServerState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a copy of an existing group, persist the copy, then make
    /// it current. A failed save leaves memory untouched. Unknown groups are
    /// left alone.
    fn mutate(&self, group_id: &str, f: impl FnOnce(&mut ServerState)) -> Result<bool> {
        let mut states = self.lock();
        let Some(state) = states.get_mut(group_id) else {
            return Ok(false);
        };
        let mut next = state.clone();
        f(&mut next);
        self.persistence.save(&next)?;
        *state = next;
        Ok(true)
    }

    pub fn get_or_create(&self, group_id: &str, display_name: &str) -> Result<ServerState> {
        let mut states = self.lock();
        if let Some(state) = states.get(group_id) {
            return Ok(state.clone());
        }
        let state = ServerState::new(group_id, display_name);
        self.persistence.save(&state)?;
        tracing::info!("Tracking new group {group_id} ({display_name})");
        states.insert(group_id.to_string(), state.clone());
        Ok(state)
    }

    pub fn get(&self, group_id: &str) -> Option<ServerState> {
        self.lock().get(group_id).cloned()
    }

    pub fn groups(&self) -> Vec<ServerState> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        all
    }

    pub fn reset_daily(&self, group_id: &str) -> Result<()> {
        let today = self.today();
        self.mutate(group_id, |s| s.start_day(today))?;
        Ok(())
    }

    /// Commit one answered turn in a single write: optionally start the day,
    /// then record the user line and the king's reply.
    pub fn record_turn(
        &self,
        group_id: &str,
        starts_day: bool,
        exchange: Option<(&str, &str)>,
    ) -> Result<()> {
        let today = self.today();
        self.mutate(group_id, |s| {
            if starts_day {
                s.start_day(today);
            }
            if let Some((user, reply)) = exchange {
                s.chat_history.push(Message::user(user));
                s.chat_history.push(Message::assistant(reply));
            }
        })?;
        Ok(())
    }

    pub fn append_history(&self, group_id: &str, role: Role, content: &str) -> Result<()> {
        let message = Message {
            role,
            content: content.to_string(),
        };
        self.mutate(group_id, |s| s.chat_history.push(message))?;
        Ok(())
    }

    pub fn can_respond(&self, group_id: &str, max_per_day: u32) -> bool {
        self.lock()
            .get(group_id)
            .is_none_or(|s| s.can_respond(max_per_day))
    }

    pub fn increment_responses(&self, group_id: &str) -> Result<()> {
        self.mutate(group_id, |s| s.responses_sent = s.responses_sent.saturating_add(1))?;
        Ok(())
    }

    pub fn is_qotd_answered_today(&self, group_id: &str) -> bool {
        let today = self.today();
        self.lock()
            .get(group_id)
            .is_some_and(|s| s.qotd_answered_on(today))
    }

    pub fn set_summary(&self, group_id: &str, summary: Option<String>) -> Result<bool> {
        self.mutate(group_id, |s| s.active_summary = summary)
    }
}
