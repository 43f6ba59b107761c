use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};

use super::{Fact, FactIndex, QueryResult};

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "but", "by", "can",
    "could", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her", "his",
    "how", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no",
    "not", "of", "on", "or", "our", "qotd", "she", "should", "so", "than", "that", "the",
    "their", "them", "then", "there", "they", "this", "to", "us", "very", "was", "we",
    "were", "what", "when", "where", "which", "who", "why", "will", "with", "would", "you",
    "your",
];

/// Keyword stand-in for the embedding index, used by tests that need
/// predictable distances without an embedding service.
///
/// Distance is cosine distance (`1 - cos`) over term frequencies, so 0.0 is
/// identical wording and 1.0 shares no terms.
#[derive(Default)]
pub struct MemoryIndex {
    facts: RwLock<Vec<Fact>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Fact>> {
        self.facts.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Fact>> {
        self.facts.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl FactIndex for MemoryIndex {
    async fn query(&self, text: &str, n_results: usize) -> Result<QueryResult> {
        let query = term_vector(text);
        let facts = self.read();

        let mut scored: Vec<(f32, &Fact)> = facts
            .iter()
            .map(|f| (cosine_distance(&query, &term_vector(&f.content)), f))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.truncate(n_results);

        let mut result = QueryResult::default();
        for (distance, fact) in scored {
            result.ids.push(fact.id.clone());
            result.documents.push(fact.content.clone());
            result.distances.push(distance);
        }
        Ok(result)
    }

    async fn update(&self, id: &str, content: &str) -> Result<()> {
        let mut facts = self.write();
        let fact = facts
            .iter_mut()
            .find(|f| f.id == id)
            .with_context(|| format!("Fact not found: {id}"))?;
        fact.content = content.to_string();
        Ok(())
    }

    async fn upsert(&self, incoming: &[Fact]) -> Result<()> {
        let mut facts = self.write();
        for new in incoming {
            match facts.iter_mut().find(|f| f.id == new.id) {
                Some(existing) => existing.content = new.content.clone(),
                None => facts.push(new.clone()),
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read().len())
    }
}

fn term_vector(text: &str) -> HashMap<String, f32> {
    let mut terms = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
    {
        let word = word.to_lowercase();
        if STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        *terms.entry(fold_plural(&word)).or_insert(0.0) += 1.0;
    }
    terms
}

/// "horses" and "horse" count as the same term.
fn fold_plural(word: &str) -> String {
    match word.strip_suffix('s') {
        Some(stem) if stem.len() > 2 && !stem.ends_with('s') => stem.to_string(),
        _ => word.to_string(),
    }
}

fn cosine_distance(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let dot: f32 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm = |v: &HashMap<String, f32>| v.values().map(|x| x * x).sum::<f32>().sqrt();
    (1.0 - dot / (norm(a) * norm(b))).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactStore;
    use crate::facts::seed::initial_facts;
    use std::sync::Arc;

    #[test]
    fn test_identical_and_disjoint_distances() {
        let a = term_vector("the prized stallion Thunder");
        let b = term_vector("Thunder, prized stallion!");
        assert!(cosine_distance(&a, &b) < 1e-6);
        let c = term_vector("blood pudding");
        assert_eq!(cosine_distance(&a, &c), 1.0);
        assert_eq!(cosine_distance(&a, &HashMap::new()), 1.0);
    }

    #[test]
    fn test_plural_folding() {
        assert_eq!(fold_plural("horses"), "horse");
        assert_eq!(fold_plural("chess"), "chess");
        assert_eq!(fold_plural("is"), "is");
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let index = MemoryIndex::new();
        index.upsert(&initial_facts()).await.unwrap();
        let result = index.query("Tell me about your stallion Thunder", 3).await.unwrap();
        assert_eq!(result.ids[0], "5");
        assert!(result.distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_store_never_returns_at_or_above_threshold() {
        let index = Arc::new(MemoryIndex::new());
        index.upsert(&initial_facts()).await.unwrap();
        let store = FactStore::new(index.clone());
        for query in ["blood pudding", "England barbarians", "chess game", "xyzzy"] {
            let raw = index.query(query, 3).await.unwrap();
            let hits = store.find_relevant(query, 3, 0.7).await.unwrap();
            for fact in &hits {
                let pos = raw.ids.iter().position(|id| *id == fact.id).unwrap();
                assert!(raw.distances[pos] < 0.7);
            }
        }
        assert!(store.find_relevant("xyzzy", 3, 0.7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_id_fails() {
        let index = MemoryIndex::new();
        index.upsert(&[Fact::new("1", "old")]).await.unwrap();
        assert!(index.update("2", "new").await.is_err());
        index.update("1", "new").await.unwrap();
        let result = index.query("new", 1).await.unwrap();
        assert_eq!(result.documents, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_seed_only_when_empty() {
        let store = FactStore::new(Arc::new(MemoryIndex::new()));
        assert_eq!(store.seed_if_empty(&initial_facts()).await.unwrap(), 26);
        assert_eq!(store.seed_if_empty(&initial_facts()).await.unwrap(), 0);
    }
}
