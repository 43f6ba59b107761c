use chrono::NaiveDate;
use rand::Rng;

use crate::channel::InboundMessage;
use crate::config::Config;
use crate::state::ServerState;

const QOTD_PHRASES: &[&str] = &["qotd:", "question of the day:"];

/// Messages longer than this may draw an unprompted aside.
const ASIDE_MIN_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Qotd,
    DirectReply,
    Farewell,
    Aside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Reply,
    Send,
}

impl ResponseMode {
    pub fn situational_instruction(self) -> &'static str {
        match self {
            Self::Qotd => {
                "ALL QUESTIONS SHOULD BE ANSWERED WITH A SPECIFIC ANSWER. \
                 Do not repeat your response. Answer in 50 words or fewer."
            }
            Self::DirectReply => "The user is talking to you directly.",
            Self::Farewell => {
                "Offer a short, vague excuse for why you must leave for the rest of the day, \
                 and give a goodbye."
            }
            Self::Aside => {
                "The user's message is not addressed to you, \
                 but assert your opinion on what the user said."
            }
        }
    }

    /// The farewell is spoken to the room, not to anyone's message.
    pub fn uses_history(self) -> bool {
        self != Self::Farewell
    }

    pub fn retrieves_facts(self) -> bool {
        self != Self::Farewell
    }

    pub fn delivery(self) -> Delivery {
        match self {
            Self::Farewell => Delivery::Send,
            _ => Delivery::Reply,
        }
    }

    /// The daily question does not spend the response budget.
    pub fn counts_against_budget(self) -> bool {
        self != Self::Qotd
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Qotd => "QOTD",
            Self::DirectReply => "mention",
            Self::Farewell => "farewell",
            Self::Aside => "trigger",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    OwnMessage,
    OtherChannel,
    Dead,
    BudgetSpent,
    AwaitingQotd,
    NotAddressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ignore(Skip),
    Respond(ResponseMode),
}

/// Uniform draw in `1..=100`.
pub trait Roll: Send + Sync {
    fn d100(&self) -> u32;
}

pub struct ThreadRoll;

impl Roll for ThreadRoll {
    fn d100(&self) -> u32 {
        rand::rng().random_range(1..=100)
    }
}

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub bot_id: String,
    pub channel_name: String,
    pub max_per_day: u32,
    pub random_responses: bool,
    pub trigger_words: Vec<String>,
}

impl GatePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bot_id: config.bot.bot_id.clone(),
            channel_name: config.bot.channel_name.clone(),
            max_per_day: config.bot.max_responses_per_day,
            random_responses: config.bot.random_responses,
            trigger_words: config
                .triggers
                .words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
        }
    }
}

pub struct ResponseGate {
    policy: GatePolicy,
    roll: Box<dyn Roll>,
}

impl ResponseGate {
    pub fn new(policy: GatePolicy, roll: Box<dyn Roll>) -> Self {
        Self { policy, roll }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Checks that need no group state. Lets callers skip creating state
    /// for chatter the king never listens to.
    pub fn screen(&self, msg: &InboundMessage) -> Result<(), Skip> {
        if msg.author_id == self.policy.bot_id {
            return Err(Skip::OwnMessage);
        }
        if msg.channel_name != self.policy.channel_name {
            return Err(Skip::OtherChannel);
        }
        Ok(())
    }

    /// Full precedence walk; first match wins.
    pub fn decide(&self, msg: &InboundMessage, state: &ServerState, today: NaiveDate) -> Decision {
        if let Err(skip) = self.screen(msg) {
            return Decision::Ignore(skip);
        }
        if state.is_dead() {
            return Decision::Ignore(Skip::Dead);
        }
        // yesterday's spent budget must not block today's question
        let answered = state.qotd_answered_on(today);
        if answered && !state.can_respond(self.policy.max_per_day) {
            return Decision::Ignore(Skip::BudgetSpent);
        }

        if is_qotd(&msg.content) && !answered {
            return Decision::Respond(ResponseMode::Qotd);
        }
        if !answered {
            return Decision::Ignore(Skip::AwaitingQotd);
        }

        if msg.mentions_bot && !msg.mention_everyone {
            return Decision::Respond(if state.responses_sent == self.policy.max_per_day {
                ResponseMode::Farewell
            } else {
                ResponseMode::DirectReply
            });
        }

        if self.policy.random_responses && self.wants_aside(&msg.content, state.responses_sent) {
            return Decision::Respond(ResponseMode::Aside);
        }
        Decision::Ignore(Skip::NotAddressed)
    }

    /// Trigger word, or a long message and a lucky roll. The odds shrink
    /// two points per response already spent and hit zero with the budget.
    fn wants_aside(&self, content: &str, responses_sent: u32) -> bool {
        let lowered = content.to_lowercase();
        if self
            .policy
            .trigger_words
            .iter()
            .any(|w| !w.is_empty() && lowered.contains(w.as_str()))
        {
            return true;
        }
        if content.chars().count() <= ASIDE_MIN_CHARS {
            return false;
        }
        let odds = 2 * (i64::from(self.policy.max_per_day) - i64::from(responses_sent));
        i64::from(self.roll.d100()) <= odds
    }
}

/// Case-insensitive, with markdown asterisks ignored.
pub fn is_qotd(content: &str) -> bool {
    let trimmed = content.to_lowercase().replace('*', "");
    QOTD_PHRASES.iter().any(|p| trimmed.contains(p))
}
