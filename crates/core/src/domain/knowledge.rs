use serde::{Deserialize, Serialize};

/// One chunk of the clinic knowledge base with its embedding vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub category: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Institutional file the agent can send to a patient (price list,
/// directions, accepted insurances, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub category: String,
    pub file_name: String,
    pub media_type: String,
    pub location: String,
}
