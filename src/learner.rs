//! Post-reply fact learning.
//!
//! After the king speaks, the model is asked whether his reply added anything
//! worth folding back into the facts that were shown to him. Its answer uses a
//! line protocol:
//!
//! ```text
//! ID: 5
//! UPDATED_FACT: Thunder: Your prized stallion ...
//! ```
//!
//! or the bare sentinel `NO_UPDATES`. Anything else is rejected as a whole.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::facts::{Fact, FactStore, MAX_FACT_CHARS};
use crate::llm::{CompletionOptions, LlmClient, Message};

pub const NO_UPDATES: &str = "NO_UPDATES";
const ID_PREFIX: &str = "ID:";
const FACT_PREFIX: &str = "UPDATED_FACT:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactUpdate {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LearnerParseError {
    #[error("empty response")]
    Empty,
    #[error("line {line}: unexpected text {text:?}")]
    UnexpectedLine { line: usize, text: String },
    #[error("line {line}: UPDATED_FACT without a preceding ID")]
    OrphanFact { line: usize },
    #[error("line {line}: ID {id:?} is not followed by UPDATED_FACT")]
    MissingFact { line: usize, id: String },
    #[error("line {line}: empty value")]
    EmptyValue { line: usize },
    #[error("fact {0:?} was not among the referenced facts")]
    UnknownId(String),
    #[error("fact {0:?} listed more than once")]
    DuplicateId(String),
    #[error("fact {id:?} is {len} characters, over the limit")]
    TooLong { id: String, len: usize },
}

/// Parse the model's answer. Only ids from `known_ids` are accepted.
pub fn parse_updates(
    text: &str,
    known_ids: &[&str],
) -> Result<Vec<FactUpdate>, LearnerParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LearnerParseError::Empty);
    }
    if trimmed.trim_matches(|c| c == '"' || c == '`') == NO_UPDATES {
        return Ok(Vec::new());
    }

    let mut updates = Vec::new();
    let mut seen = HashSet::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in trimmed.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(ID_PREFIX) {
            if let Some((line, id)) = pending.take() {
                return Err(LearnerParseError::MissingFact { line, id });
            }
            let id = unwrap_value(rest).ok_or(LearnerParseError::EmptyValue { line: line_no })?;
            if !known_ids.contains(&id.as_str()) {
                return Err(LearnerParseError::UnknownId(id));
            }
            if !seen.insert(id.clone()) {
                return Err(LearnerParseError::DuplicateId(id));
            }
            pending = Some((line_no, id));
        } else if let Some(rest) = line.strip_prefix(FACT_PREFIX) {
            let (_, id) = pending
                .take()
                .ok_or(LearnerParseError::OrphanFact { line: line_no })?;
            let content =
                unwrap_value(rest).ok_or(LearnerParseError::EmptyValue { line: line_no })?;
            let len = content.chars().count();
            if len > MAX_FACT_CHARS {
                return Err(LearnerParseError::TooLong { id, len });
            }
            updates.push(FactUpdate { id, content });
        } else {
            return Err(LearnerParseError::UnexpectedLine {
                line: line_no,
                text: line.to_string(),
            });
        }
    }

    if let Some((line, id)) = pending {
        return Err(LearnerParseError::MissingFact { line, id });
    }
    Ok(updates)
}

/// Trim, then drop one pair of surrounding brackets.
fn unwrap_value(raw: &str) -> Option<String> {
    let value = raw.trim();
    let value = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value)
        .trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn extraction_prompt(persona: &str, reply: &str, facts: &[Fact]) -> String {
    let referenced = facts
        .iter()
        .map(|f| format!("ID {}: {}", f.id, f.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Analyze the following response from {persona} and decide whether any of the referenced facts should be updated with new information.

Referenced facts:
{referenced}

{persona}'s response:
\"{reply}\"

For each referenced fact that should be updated with new information from the response, provide:
- The fact ID
- The updated fact content, folding in the new details while keeping the original structure. Content should include a brief description as well as the king's feelings about it.

Fact content must be no more than {MAX_FACT_CHARS} characters long.
Only suggest updates if the response contains genuinely new information that would enhance the fact.
Do not update facts for minor rewording or stylistic changes.
If no updates are needed, respond with exactly {NO_UPDATES}.

Otherwise respond with nothing but lines in this format:
ID: [fact_id]
UPDATED_FACT: [new content]
"
    )
}

pub struct FactLearner {
    llm: Arc<dyn LlmClient>,
    facts: Arc<FactStore>,
    persona: String,
}

impl FactLearner {
    pub fn new(llm: Arc<dyn LlmClient>, facts: Arc<FactStore>, persona: impl Into<String>) -> Self {
        Self {
            llm,
            facts,
            persona: persona.into(),
        }
    }

    /// Best effort: every failure is logged and swallowed. Returns how many
    /// facts were rewritten.
    pub async fn learn(&self, reply: &str, referenced: &[Fact]) -> usize {
        if referenced.is_empty() {
            return 0;
        }
        tracing::info!(
            "Analyzing response for fact updates using {} referenced facts",
            referenced.len()
        );

        let prompt = extraction_prompt(&self.persona, reply, referenced);
        let answer = match self
            .llm
            .complete(vec![Message::user(prompt)], &CompletionOptions::precise())
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Fact extraction call failed: {e:#}");
                return 0;
            }
        };

        let known: Vec<&str> = referenced.iter().map(|f| f.id.as_str()).collect();
        let updates = match parse_updates(&answer, &known) {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("Ignoring fact extraction output ({e}): {answer}");
                return 0;
            }
        };
        if updates.is_empty() {
            tracing::info!("No fact updates needed based on response analysis");
            return 0;
        }

        let mut applied = 0;
        for update in updates {
            match self.facts.update(&update.id, &update.content).await {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!("Failed to update fact {}: {e:#}", update.id),
            }
        }
        tracing::info!("Completed fact updates: {applied} facts updated");
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::memory::MemoryIndex;
    use crate::facts::FactIndex;
    use anyhow::Result;
    use std::sync::Mutex;

    const IDS: &[&str] = &["5", "16"];

    #[test]
    fn test_sentinel_means_nothing_to_do() {
        assert_eq!(parse_updates("NO_UPDATES", IDS), Ok(vec![]));
        assert_eq!(parse_updates("  \"NO_UPDATES\"\n", IDS), Ok(vec![]));
        assert_eq!(parse_updates("`NO_UPDATES`", IDS), Ok(vec![]));
    }

    #[test]
    fn test_single_pair() {
        let text = "ID: 5\nUPDATED_FACT: Thunder: Your prized stallion, now fond of apples.";
        assert_eq!(
            parse_updates(text, IDS),
            Ok(vec![FactUpdate {
                id: "5".into(),
                content: "Thunder: Your prized stallion, now fond of apples.".into(),
            }])
        );
    }

    #[test]
    fn test_two_pairs_with_blank_lines_and_brackets() {
        let text = "ID: [5]\nUPDATED_FACT: [Thunder: apples.]\n\n  ID: 16  \n\
                    UPDATED_FACT: Pudding: saffron.\n";
        let updates = parse_updates(text, IDS).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].content, "Thunder: apples.");
        assert_eq!(updates[1].id, "16");
    }

    #[test]
    fn test_ambiguity_is_rejected() {
        assert_eq!(parse_updates("", IDS), Err(LearnerParseError::Empty));
        assert!(matches!(
            parse_updates("Here you go:\nID: 5\nUPDATED_FACT: x", IDS),
            Err(LearnerParseError::UnexpectedLine { line: 1, .. })
        ));
        assert_eq!(
            parse_updates("UPDATED_FACT: x", IDS),
            Err(LearnerParseError::OrphanFact { line: 1 })
        );
        assert_eq!(
            parse_updates("ID: 5\nID: 16\nUPDATED_FACT: x", IDS),
            Err(LearnerParseError::MissingFact { line: 1, id: "5".into() })
        );
        assert_eq!(
            parse_updates("ID: 5", IDS),
            Err(LearnerParseError::MissingFact { line: 1, id: "5".into() })
        );
        assert_eq!(
            parse_updates("ID: 5\nUPDATED_FACT:   ", IDS),
            Err(LearnerParseError::EmptyValue { line: 2 })
        );
        assert_eq!(
            parse_updates("ID: 9\nUPDATED_FACT: x", IDS),
            Err(LearnerParseError::UnknownId("9".into()))
        );
        assert_eq!(
            parse_updates("ID: 5\nUPDATED_FACT: a\nID: 5\nUPDATED_FACT: b", IDS),
            Err(LearnerParseError::DuplicateId("5".into()))
        );
        assert_eq!(
            parse_updates("NO_UPDATES\nID: 5\nUPDATED_FACT: x", IDS),
            Err(LearnerParseError::UnexpectedLine { line: 1, text: "NO_UPDATES".into() })
        );
    }

    #[test]
    fn test_overlong_fact_is_rejected() {
        let text = format!("ID: 5\nUPDATED_FACT: {}", "a".repeat(201));
        assert_eq!(
            parse_updates(&text, IDS),
            Err(LearnerParseError::TooLong { id: "5".into(), len: 201 })
        );
        let ok = format!("ID: 5\nUPDATED_FACT: {}", "a".repeat(200));
        assert_eq!(parse_updates(&ok, IDS).unwrap().len(), 1);
    }

    #[test]
    fn test_prompt_lists_facts_and_sentinel() {
        let facts = [Fact::new("5", "Thunder: stallion.")];
        let prompt = extraction_prompt("King Maximilian VII", "Thunder ate apples.", &facts);
        assert!(prompt.contains("ID 5: Thunder: stallion."));
        assert!(prompt.contains("\"Thunder ate apples.\""));
        assert!(prompt.contains(NO_UPDATES));
    }

    struct ScriptedLlm {
        answer: Result<String, String>,
        calls: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _m: Vec<Message>, options: &CompletionOptions) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            assert_eq!(options.temperature, 0.1);
            self.answer.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    /// Wraps a real index and records update calls.
    struct CountingIndex {
        inner: MemoryIndex,
        updates: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl FactIndex for CountingIndex {
        async fn query(&self, text: &str, n: usize) -> Result<crate::facts::QueryResult> {
            self.inner.query(text, n).await
        }
        async fn update(&self, id: &str, content: &str) -> Result<()> {
            self.updates.lock().unwrap().push((id.into(), content.into()));
            self.inner.update(id, content).await
        }
        async fn upsert(&self, facts: &[Fact]) -> Result<()> {
            self.inner.upsert(facts).await
        }
        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }
    }

    async fn make_learner(
        answer: Result<&str, &str>,
    ) -> (FactLearner, Arc<CountingIndex>, Arc<ScriptedLlm>) {
        let index = Arc::new(CountingIndex {
            inner: MemoryIndex::new(),
            updates: Mutex::new(Vec::new()),
        });
        index
            .upsert(&[Fact::new("5", "Thunder: stallion."), Fact::new("16", "Pudding.")])
            .await
            .unwrap();
        let llm = Arc::new(ScriptedLlm {
            answer: answer.map(str::to_string).map_err(str::to_string),
            calls: Mutex::new(0),
        });
        let store = Arc::new(FactStore::new(index.clone()));
        (FactLearner::new(llm.clone(), store, "King Maximilian VII"), index, llm)
    }

    fn referenced() -> Vec<Fact> {
        vec![Fact::new("5", "Thunder: stallion."), Fact::new("16", "Pudding.")]
    }

    #[tokio::test]
    async fn test_no_updates_never_touches_store() {
        let (learner, index, _) = make_learner(Ok("NO_UPDATES")).await;
        assert_eq!(learner.learn("Hark.", &referenced()).await, 0);
        assert!(index.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_pair_one_update() {
        let (learner, index, _) =
            make_learner(Ok("ID: 5\nUPDATED_FACT: Thunder: stallion who loves apples.")).await;
        assert_eq!(learner.learn("Thunder loves apples.", &referenced()).await, 1);
        assert_eq!(
            *index.updates.lock().unwrap(),
            vec![("5".to_string(), "Thunder: stallion who loves apples.".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let (learner, index, _) = make_learner(Err("model unreachable")).await;
        assert_eq!(learner.learn("Hark.", &referenced()).await, 0);

        let (garbled, _, _) = make_learner(Ok("Sure! Here are my thoughts.")).await;
        assert_eq!(garbled.learn("Hark.", &referenced()).await, 0);
        assert!(index.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_referenced_skips_model() {
        let (learner, _, llm) = make_learner(Ok("NO_UPDATES")).await;
        assert_eq!(learner.learn("Hark.", &[]).await, 0);
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }
}
