use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::channel::{InboundMessage, ReplyTarget};
use crate::config::Config;
use crate::facts::{Fact, FactStore};
use crate::gate::{
    Decision, Delivery, GatePolicy, ResponseGate, ResponseMode, Roll, Skip, ThreadRoll,
};
use crate::learner::FactLearner;
use crate::llm::{CompletionOptions, LlmClient};
use crate::prompt::{self, PromptComposer, PromptContext};
use crate::state::{ServerState, StateRegistry};

/// What the king said in answer to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub mode: ResponseMode,
    pub text: String,
    pub facts_learned: usize,
}

struct Settings {
    persona: String,
    fact_limit: usize,
    relevance_threshold: f32,
    auto_learn_facts: bool,
    max_response_length: usize,
    options: CompletionOptions,
}

pub struct Engine {
    llm: Arc<dyn LlmClient>,
    facts: Arc<FactStore>,
    states: Arc<StateRegistry>,
    gate: ResponseGate,
    learner: FactLearner,
    settings: Settings,
    /// One turn at a time per group; different groups run concurrently.
    turns: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        facts: Arc<FactStore>,
        states: Arc<StateRegistry>,
    ) -> Self {
        Self::with_roll(config, llm, facts, states, Box::new(ThreadRoll))
    }

    pub fn with_roll(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        facts: Arc<FactStore>,
        states: Arc<StateRegistry>,
        roll: Box<dyn Roll>,
    ) -> Self {
        let learner = FactLearner::new(llm.clone(), facts.clone(), config.bot.name.clone());
        Self {
            gate: ResponseGate::new(GatePolicy::from_config(config), roll),
            settings: Settings {
                persona: config.bot.name.clone(),
                fact_limit: config.facts.result_limit,
                relevance_threshold: config.facts.relevance_threshold,
                auto_learn_facts: config.bot.auto_learn_facts,
                max_response_length: config.llm.max_response_length,
                options: CompletionOptions::from_config(&config.llm),
            },
            llm,
            facts,
            states,
            learner,
            turns: Mutex::new(HashMap::new()),
        }
    }

    fn turn_lock(&self, group: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(group.to_string())
            .or_default()
            .clone()
    }

    /// Decide, speak, remember. `Ok(None)` means the king stayed silent.
    /// Errors from the model or fact store leave the message unanswered and
    /// the group's state as it was.
    pub async fn handle_message(
        &self,
        msg: &InboundMessage,
        target: &dyn ReplyTarget,
    ) -> Result<Option<Outcome>> {
        if let Err(skip) = self.gate.screen(msg) {
            tracing::trace!("Skipping message from {}: {skip:?}", msg.author_name);
            return Ok(None);
        }

        let group = msg.group_id.as_str();
        let turn = self.turn_lock(group);
        let _turn = turn.lock().await;

        let state = self.states.get_or_create(group, &msg.group_name)?;
        let today = self.states.today();
        let mode = match self.gate.decide(msg, &state, today) {
            Decision::Respond(mode) => mode,
            Decision::Ignore(Skip::Dead) => {
                tracing::info!(
                    "Peasant unrest percentage is above 100% for server {group}. The king is dead."
                );
                return Ok(None);
            }
            Decision::Ignore(skip) => {
                tracing::debug!("[{group}] not responding: {skip:?}");
                return Ok(None);
            }
        };

        tracing::info!("[{group}] Received {} message: {}", mode.label(), msg.content);
        // The QOTD answers from the new day's state, which is only committed
        // once the model has answered.
        let mut view = state;
        let starts_day = mode == ResponseMode::Qotd;
        if starts_day {
            view.start_day(today);
        }

        let user_turn = prompt::user_turn(&msg.author_name, &msg.content);
        let (text, facts) = self.generate(mode, msg, &view, &user_turn, target).await?;

        let exchange = mode.uses_history().then_some((user_turn.as_str(), text.as_str()));
        self.states.record_turn(group, starts_day, exchange)?;
        if starts_day {
            tracing::info!(
                "[{group}] New day for {}. Peasant unrest: {}%",
                msg.group_name,
                view.peasant_unrest_percentage
            );
        }

        match mode.delivery() {
            Delivery::Reply => target.reply(&text).await?,
            Delivery::Send => target.send(&text).await?,
        }
        tracing::info!("[{group}] Sent {} response: {text}", mode.label());

        if mode.counts_against_budget() {
            self.states.increment_responses(group)?;
        }
        if let Some(state) = self.states.get(group) {
            let max = self.gate.policy().max_per_day;
            tracing::info!(
                "[{group}] Responses remaining: {} / {max}.",
                i64::from(max) - i64::from(state.responses_sent)
            );
        }

        let facts_learned = if self.settings.auto_learn_facts && !facts.is_empty() {
            self.learner.learn(&text, &facts).await
        } else {
            0
        };

        Ok(Some(Outcome {
            mode,
            text,
            facts_learned,
        }))
    }

    /// Compose, call the model, clean up. Touches no state.
    async fn generate(
        &self,
        mode: ResponseMode,
        msg: &InboundMessage,
        state: &ServerState,
        user_turn: &str,
        target: &dyn ReplyTarget,
    ) -> Result<(String, Vec<Fact>)> {
        let facts = if mode.retrieves_facts() {
            self.facts
                .find_relevant(
                    &msg.content,
                    self.settings.fact_limit,
                    self.settings.relevance_threshold,
                )
                .await?
        } else {
            Vec::new()
        };

        let history = if mode.uses_history() {
            state.chat_history.as_slice()
        } else {
            &[]
        };
        let messages = PromptComposer::build_messages(&PromptContext {
            persona: &self.settings.persona,
            mode,
            unrest: state.peasant_unrest_percentage,
            today: self.states.today(),
            facts: &facts,
            summary: state.active_summary.as_deref(),
            history,
            user_turn,
        });

        let raw = {
            let _typing = target.typing();
            self.llm.complete(messages, &self.settings.options).await?
        };
        Ok((prompt::postprocess(&raw, self.settings.max_response_length), facts))
    }
}
