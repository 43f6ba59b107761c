use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Fact, FactIndex, QueryResult};
use crate::llm::Embedder;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    id: String,
    content: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    model: String,
    entries: Vec<Entry>,
}

/// Semantic fact index: every fact is stored with its embedding.
///
/// Distance is squared L2 between unit vectors, i.e. `2 * (1 - cos)`: 0.0 is
/// the same meaning, 2.0 the opposite. When opened with a path, every
/// mutation rewrites the JSON file atomically before it becomes visible.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    path: Option<PathBuf>,
    entries: RwLock<Vec<Entry>>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            path: None,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Load a saved index. Facts embedded by a different model are embedded
    /// again so old and new vectors never mix.
    pub async fn open(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.into();
        let snapshot: Snapshot = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read facts: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse facts: {}", path.display()))?
        } else {
            Snapshot::default()
        };

        let mut entries = snapshot.entries;
        if !entries.is_empty() && snapshot.model != embedder.model() {
            tracing::info!(
                "Re-embedding {} facts ({} -> {})",
                entries.len(),
                snapshot.model,
                embedder.model()
            );
            let texts: Vec<String> = entries.iter().map(|e| e.content.clone()).collect();
            let vectors = embed_all(embedder.as_ref(), &texts).await?;
            for (entry, embedding) in entries.iter_mut().zip(vectors) {
                entry.embedding = embedding;
            }
            save(&path, embedder.model(), &entries)?;
        }

        Ok(Self {
            embedder,
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist `next`, then make it current. A failed write leaves the index as it was.
    fn commit(&self, next: Vec<Entry>) -> Result<()> {
        if let Some(path) = &self.path {
            save(path, self.embedder.model(), &next)?;
        }
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = next;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FactIndex for EmbeddingIndex {
    async fn query(&self, text: &str, n_results: usize) -> Result<QueryResult> {
        let query = embed_all(self.embedder.as_ref(), &[text.to_string()])
            .await?
            .pop()
            .unwrap_or_default();

        let entries = self.read();
        let mut scored: Vec<(f32, &Entry)> = entries
            .iter()
            .map(|e| (squared_l2(&query, &e.embedding), e))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.truncate(n_results);

        let mut result = QueryResult::default();
        for (distance, entry) in scored {
            result.ids.push(entry.id.clone());
            result.documents.push(entry.content.clone());
            result.distances.push(distance);
        }
        Ok(result)
    }

    async fn update(&self, id: &str, content: &str) -> Result<()> {
        if !self.read().iter().any(|e| e.id == id) {
            anyhow::bail!("Fact not found: {id}");
        }
        let embedding = embed_all(self.embedder.as_ref(), &[content.to_string()])
            .await?
            .pop()
            .unwrap_or_default();

        let mut next = self.read().clone();
        let entry = next
            .iter_mut()
            .find(|e| e.id == id)
            .with_context(|| format!("Fact not found: {id}"))?;
        entry.content = content.to_string();
        entry.embedding = embedding;
        self.commit(next)
    }

    async fn upsert(&self, facts: &[Fact]) -> Result<()> {
        let texts: Vec<String> = facts.iter().map(|f| f.content.clone()).collect();
        let vectors = embed_all(self.embedder.as_ref(), &texts).await?;

        let mut next = self.read().clone();
        for (fact, embedding) in facts.iter().zip(vectors) {
            match next.iter_mut().find(|e| e.id == fact.id) {
                Some(existing) => {
                    existing.content = fact.content.clone();
                    existing.embedding = embedding;
                }
                None => next.push(Entry {
                    id: fact.id.clone(),
                    content: fact.content.clone(),
                    embedding,
                }),
            }
        }
        self.commit(next)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read().len())
    }
}

/// Embed and unit-normalize, one vector per text.
async fn embed_all(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed(texts).await?;
    if vectors.len() != texts.len() {
        anyhow::bail!(
            "Embedder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        );
    }
    Ok(vectors.into_iter().map(normalize).collect())
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Mismatched lengths or a zero vector count as unrelated.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn save(path: &Path, model: &str, entries: &[Entry]) -> Result<()> {
    #[derive(Serialize)]
    struct SnapshotRef<'a> {
        model: &'a str,
        entries: &'a [Entry],
    }
    let json = serde_json::to_string(&SnapshotRef { model, entries })?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to write facts: {}", path.display()))?;
    Ok(())
}
