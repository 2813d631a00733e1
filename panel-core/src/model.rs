use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat completion request; serialized as-is for the outbound body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
}

// ---- Chat completion wire structs ----

/// One streamed record payload: `choices[0].delta.content`.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatChunk {
    pub fn delta_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
    }
}

/// Extract `choices[0].message.content` from a full (non-streaming) completion body.
pub fn completion_text(body: &serde_json::Value) -> Option<&str> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

// ---- Embeddings ----

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EmbedRequest {
    pub model: String,
    pub input: String,
}

#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    #[serde(default)]
    pub data: Vec<EmbedVector>,
}

#[derive(Debug, Deserialize)]
pub struct EmbedVector {
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn dims(&self) -> usize {
        self.vector.len()
    }

    pub fn preview(&self, n: usize) -> &[f32] {
        &self.vector[..n.min(self.vector.len())]
    }
}

// ---- TTS ----

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TtsRequest {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Audio {
    pub content_type: Option<String>,
    pub bytes: bytes::Bytes,
}

// ---- Analysis gateway ----

fn default_language() -> String {
    "C++14".into()
}
fn default_check_model() -> String {
    "deepseek/deepseek-chat".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CodeCheckRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_check_model")]
    pub model: String,
}

impl CodeCheckRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: default_language(),
            model: default_check_model(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CodeCheckResponse {
    pub status: String,
    pub result: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProblemAnalysisRequest {
    pub problem_code: String,
    pub problem_description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ProblemAnalysis {
    #[serde(default)]
    pub problem_code: String,
    #[serde(default)]
    pub simplified_description: String,
    #[serde(default)]
    pub edge_cases: String,
    #[serde(default)]
    pub possible_errors: String,
    #[serde(default)]
    pub solutions: Vec<serde_json::Value>,
    #[serde(default)]
    pub std_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProblemAnalysisResponse {
    pub status: String,
    pub result: ProblemAnalysis,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StudentCodeAnalysisRequest {
    pub problem_id: String,
    pub student_code: String,
    pub problem_description: String,
    #[serde(default)]
    pub submission_history: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct StudentAnalysis {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub analysis: Option<serde_json::Value>,
    #[serde(default)]
    pub counter_example: Option<serde_json::Value>,
    #[serde(default)]
    pub error_id: Option<String>,
    #[serde(default)]
    pub implementation_analysis: Option<String>,
    #[serde(default)]
    pub fix_suggestions: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StudentCodeAnalysisResponse {
    pub status: String,
    pub result: StudentAnalysis,
    #[serde(default)]
    pub message: Option<String>,
}
