use sqlx::{sqlite::SqliteRow, Row};

use recepta_core::domain::knowledge::KnowledgeChunk;

use super::{KnowledgeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn insert_chunk(
        &self,
        category: &str,
        content: &str,
        embedding: &[f32],
    ) -> Result<(), RepositoryError> {
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|error| RepositoryError::Decode(format!("embedding encode failed: {error}")))?;

        sqlx::query("INSERT INTO knowledge_chunk (category, content, embedding) VALUES (?, ?, ?)")
            .bind(category)
            .bind(content)
            .bind(embedding_json)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<KnowledgeChunk>, RepositoryError> {
        let rows = if let Some(category) = category {
            sqlx::query(
                "SELECT id, category, content, embedding
                 FROM knowledge_chunk
                 WHERE category = ?",
            )
            .bind(category)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT id, category, content, embedding FROM knowledge_chunk")
                .fetch_all(&self.pool)
                .await?
        };

        // Cosine ranking happens here: sqlite has no vector operator,
        // and the knowledge base is a few hundred rows at most.
        let mut scored = rows
            .into_iter()
            .map(chunk_from_row)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|chunk| {
                let score = cosine_similarity(query_embedding, &chunk.embedding);
                (chunk, score)
            })
            .collect::<Vec<_>>();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit as usize);

        Ok(scored.into_iter().map(|(chunk, _)| chunk).collect())
    }
}

fn chunk_from_row(row: SqliteRow) -> Result<KnowledgeChunk, RepositoryError> {
    let embedding_raw = row.try_get::<String, _>("embedding")?;
    let embedding = serde_json::from_str(&embedding_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid embedding json: {error}")))?;

    Ok(KnowledgeChunk {
        id: row.try_get("id")?,
        category: row.try_get("category")?,
        content: row.try_get("content")?,
        embedding,
    })
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return f32::MIN;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::MIN;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
