pub mod embedded;
#[cfg(test)]
pub mod memory;
pub mod seed;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Longest content a fact may carry, in characters.
pub const MAX_FACT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub content: String,
}

impl Fact {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// Parallel arrays as returned by a similarity search; lower distance is closer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub distances: Vec<f32>,
}

/// A similarity-search backend holding the fact documents.
#[async_trait::async_trait]
pub trait FactIndex: Send + Sync {
    async fn query(&self, text: &str, n_results: usize) -> Result<QueryResult>;
    async fn update(&self, id: &str, content: &str) -> Result<()>;
    async fn upsert(&self, facts: &[Fact]) -> Result<()>;
    async fn count(&self) -> Result<usize>;
}

pub struct FactStore {
    index: Arc<dyn FactIndex>,
}

impl FactStore {
    pub fn new(index: Arc<dyn FactIndex>) -> Self {
        Self { index }
    }

    /// Up to `limit` facts strictly closer than `threshold`, closest first.
    pub async fn find_relevant(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<Fact>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let result = self.index.query(query, limit).await?;

        let mut hits: Vec<(f32, Fact)> = result
            .ids
            .into_iter()
            .zip(result.documents)
            .zip(result.distances)
            .filter(|(_, distance)| *distance < threshold)
            .map(|((id, content), distance)| (distance, Fact { id, content }))
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.truncate(limit);

        if hits.is_empty() {
            tracing::info!("No relevant facts found for this message");
        } else {
            tracing::info!("Facts pulled into prompt ({} facts):", hits.len());
            for (distance, fact) in &hits {
                tracing::info!("  ID {} ({distance:.3}): {}", fact.id, fact.content);
            }
        }

        Ok(hits.into_iter().map(|(_, fact)| fact).collect())
    }

    /// Replace the content of an existing fact. Backend errors pass through untouched.
    pub async fn update(&self, id: &str, new_content: &str) -> Result<()> {
        tracing::info!("Updating fact ID {id}: {new_content}");
        self.index.update(id, new_content).await?;
        tracing::info!("Successfully updated fact ID {id}");
        Ok(())
    }

    /// Populate an empty backend. Returns how many facts were written.
    pub async fn seed_if_empty(&self, facts: &[Fact]) -> Result<usize> {
        if self.index.count().await? > 0 {
            return Ok(0);
        }
        self.index.upsert(facts).await?;
        tracing::info!("Seeded fact store with {} facts", facts.len());
        Ok(facts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns a canned result regardless of the query.
    struct CannedIndex {
        result: QueryResult,
        updates: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl FactIndex for CannedIndex {
        async fn query(&self, _text: &str, _n: usize) -> Result<QueryResult> {
            Ok(self.result.clone())
        }
        async fn update(&self, id: &str, content: &str) -> Result<()> {
            if id == "missing" {
                anyhow::bail!("no such id: {id}");
            }
            self.updates
                .lock()
                .unwrap()
                .push((id.to_string(), content.to_string()));
            Ok(())
        }
        async fn upsert(&self, _facts: &[Fact]) -> Result<()> {
            Ok(())
        }
        async fn count(&self) -> Result<usize> {
            Ok(self.result.ids.len())
        }
    }

    fn canned(rows: &[(&str, &str, f32)]) -> Arc<CannedIndex> {
        Arc::new(CannedIndex {
            result: QueryResult {
                ids: rows.iter().map(|r| r.0.to_string()).collect(),
                documents: rows.iter().map(|r| r.1.to_string()).collect(),
                distances: rows.iter().map(|r| r.2).collect(),
            },
            updates: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let store = FactStore::new(canned(&[("1", "a", 0.2), ("2", "b", 0.5), ("3", "c", 0.9)]));
        let hits = store.find_relevant("q", 3, 0.5).await.unwrap();
        assert_eq!(hits, vec![Fact::new("1", "a")]);
    }

    #[tokio::test]
    async fn test_results_come_back_closest_first() {
        let store = FactStore::new(canned(&[("2", "b", 0.4), ("1", "a", 0.1), ("3", "c", 0.3)]));
        let ids: Vec<_> = store
            .find_relevant("q", 3, 1.0)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, ["1", "3", "2"]);
    }

    #[tokio::test]
    async fn test_nothing_qualifies_gives_empty() {
        let store = FactStore::new(canned(&[("1", "a", 0.95)]));
        assert!(store.find_relevant("q", 3, 0.5).await.unwrap().is_empty());
        assert!(store.find_relevant("q", 0, 2.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ragged_arrays_are_clipped() {
        let index = Arc::new(CannedIndex {
            result: QueryResult {
                ids: vec!["1".into(), "2".into()],
                documents: vec!["a".into()],
                distances: vec![0.1, 0.2],
            },
            updates: Mutex::new(Vec::new()),
        });
        let hits = FactStore::new(index).find_relevant("q", 3, 1.0).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_update_passes_backend_error_through() {
        let index = canned(&[]);
        let store = FactStore::new(index.clone());
        store.update("7", "new").await.unwrap();
        let err = store.update("missing", "x").await.unwrap_err();
        assert!(err.to_string().contains("no such id"));
        assert_eq!(
            *index.updates.lock().unwrap(),
            vec![("7".to_string(), "new".to_string())]
        );
    }
}
