//! OpenAI Chat Completions wire shapes produced by the engine.

use serde::Serialize;

use crate::stream::sse::openai_sse_frame;
use crate::util::{fresh_chatcmpl_id, unix_now_secs};

/// Normalize a raw upstream response id into OpenAI `chatcmpl-` form.
///
/// Empty input generates a fresh id; already-prefixed ids pass through.
#[must_use]
pub fn normalize_chatcmpl_id(raw: &str) -> String {
    let rid = raw.trim();
    if rid.is_empty() {
        return fresh_chatcmpl_id();
    }
    if rid.starts_with("chatcmpl-") {
        return rid.to_string();
    }
    format!("chatcmpl-{rid}")
}

// ---------------------------------------------------------------------------
// Streaming chunk shapes
// ---------------------------------------------------------------------------

#[derive(Serialize, Default)]
struct ChunkDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
}

#[derive(Serialize)]
struct ChunkChoice<'a> {
    index: u32,
    delta: ChunkDelta<'a>,
    logprobs: Option<()>,
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct ChatCompletionChunk<'a> {
    id: &'a str,
    object: &'static str,
    created: u64,
    model: &'a str,
    system_fingerprint: &'a str,
    choices: [ChunkChoice<'a>; 1],
}

// ---------------------------------------------------------------------------
// Aggregate completion shapes
// ---------------------------------------------------------------------------

/// One aggregated `chat.completion` object (collect mode).
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: CompletionUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
    pub refusal: Option<()>,
}

/// Token accounting is not available from the upstream; always zeroed.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Per-request session identity
// ---------------------------------------------------------------------------

/// Completion identity shared by every frame of one request.
///
/// The id is lazily normalized from the first upstream `responseId` seen, or
/// generated right before the first emission; it stays stable afterwards.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub model: String,
    pub created: u64,
    pub id: Option<String>,
    pub fingerprint: String,
}

impl ChatSession {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            created: unix_now_secs(),
            id: None,
            fingerprint: String::new(),
        }
    }

    /// Adopt an upstream response id as the completion id.
    pub fn adopt_response_id(&mut self, raw: &str) {
        self.id = Some(normalize_chatcmpl_id(raw));
    }

    fn ensure_id(&mut self) {
        if self.id.is_none() {
            self.id = Some(fresh_chatcmpl_id());
        }
    }

    fn chunk_frame(&mut self, delta: ChunkDelta<'_>, finish: Option<&'static str>) -> String {
        self.ensure_id();
        let chunk = ChatCompletionChunk {
            id: self.id.as_deref().unwrap_or_default(),
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            system_fingerprint: &self.fingerprint,
            choices: [ChunkChoice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason: finish,
            }],
        };
        let json = serde_json::to_string(&chunk).unwrap_or_else(|_| String::from("{}"));
        openai_sse_frame(&json)
    }

    /// The role-announcement chunk sent before any content.
    #[must_use]
    pub fn role_frame(&mut self) -> String {
        self.chunk_frame(
            ChunkDelta {
                role: Some("assistant"),
                content: Some(""),
            },
            None,
        )
    }

    /// A content-delta chunk.
    #[must_use]
    pub fn content_frame(&mut self, text: &str) -> String {
        self.chunk_frame(
            ChunkDelta {
                role: None,
                content: Some(text),
            },
            None,
        )
    }

    /// The terminal chunk carrying `finish_reason: "stop"` and an empty delta.
    #[must_use]
    pub fn finish_frame(&mut self) -> String {
        self.chunk_frame(ChunkDelta::default(), Some("stop"))
    }

    /// Build the aggregate completion object for collect mode.
    #[must_use]
    pub fn completion(mut self, content: String) -> ChatCompletion {
        self.ensure_id();
        ChatCompletion {
            id: self.id.unwrap_or_default(),
            object: "chat.completion",
            created: self.created,
            model: self.model,
            system_fingerprint: self.fingerprint,
            choices: vec![CompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant",
                    content,
                    refusal: None,
                },
                finish_reason: "stop",
            }],
            usage: CompletionUsage::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Image generation events
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PartialImageEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    b64_json: &'static str,
    index: u32,
    progress: u32,
}

#[derive(Serialize)]
struct CompletedImageEvent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    b64_json: &'a str,
    index: u32,
    usage: ImageUsage,
}

#[derive(Serialize)]
struct ImageUsage {
    total_tokens: u32,
    input_tokens: u32,
    output_tokens: u32,
    input_tokens_details: ImageInputTokens,
}

#[derive(Serialize)]
struct ImageInputTokens {
    text_tokens: u32,
    image_tokens: u32,
}

pub const PARTIAL_IMAGE_EVENT: &str = "image_generation.partial_image";
pub const COMPLETED_IMAGE_EVENT: &str = "image_generation.completed";

/// JSON payload of one `image_generation.partial_image` event.
#[must_use]
pub fn partial_image_payload(index: u32, progress: u32) -> String {
    let event = PartialImageEvent {
        kind: PARTIAL_IMAGE_EVENT,
        b64_json: "",
        index,
        progress,
    };
    serde_json::to_string(&event).unwrap_or_else(|_| String::from("{}"))
}

/// JSON payload of one `image_generation.completed` event.
///
/// The upstream does not report image token usage; a fixed synthetic block
/// keeps the event shape complete for OpenAI clients.
#[must_use]
pub fn completed_image_payload(index: u32, b64_json: &str) -> String {
    let event = CompletedImageEvent {
        kind: COMPLETED_IMAGE_EVENT,
        b64_json,
        index,
        usage: ImageUsage {
            total_tokens: 50,
            input_tokens: 25,
            output_tokens: 25,
            input_tokens_details: ImageInputTokens {
                text_tokens: 5,
                image_tokens: 20,
            },
        },
    };
    serde_json::to_string(&event).unwrap_or_else(|_| String::from("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn chunk_json(frame: &str) -> Value {
        let payload = frame.trim_start_matches("data: ").trim();
        serde_json::from_str(payload).expect("chunk json")
    }

    #[test]
    fn normalize_id_variants() {
        assert_eq!(normalize_chatcmpl_id("abc"), "chatcmpl-abc");
        assert_eq!(normalize_chatcmpl_id("chatcmpl-xyz"), "chatcmpl-xyz");
        assert!(normalize_chatcmpl_id("").starts_with("chatcmpl-"));
        assert!(normalize_chatcmpl_id("  ").starts_with("chatcmpl-"));
    }

    #[test]
    fn role_frame_shape() {
        let mut session = ChatSession::new("grok-4");
        let json = chunk_json(&session.role_frame());
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["model"], "grok-4");
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(json["choices"][0]["delta"]["content"], "");
        assert!(json["choices"][0]["finish_reason"].is_null());
        assert!(json["choices"][0]["logprobs"].is_null());
    }

    #[test]
    fn content_and_finish_frames_keep_one_stable_id() {
        let mut session = ChatSession::new("grok-4");
        let first = chunk_json(&session.content_frame("hello"));
        let second = chunk_json(&session.content_frame("world"));
        let last = chunk_json(&session.finish_frame());
        assert_eq!(first["id"], second["id"]);
        assert_eq!(first["id"], last["id"]);
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["choices"][0]["delta"], serde_json::json!({}));
    }

    #[test]
    fn adopted_id_is_normalized() {
        let mut session = ChatSession::new("grok-4");
        session.adopt_response_id("rid-1");
        let json = chunk_json(&session.role_frame());
        assert_eq!(json["id"], "chatcmpl-rid-1");
    }

    #[test]
    fn completion_shape() {
        let mut session = ChatSession::new("grok-4");
        session.fingerprint = "fp".to_string();
        let completion = session.completion("done".to_string());
        let json = serde_json::to_value(&completion).expect("serialize");
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["system_fingerprint"], "fp");
        assert_eq!(json["choices"][0]["message"]["content"], "done");
        assert!(json["choices"][0]["message"]["refusal"].is_null());
        assert_eq!(json["usage"]["total_tokens"], 0);
    }

    #[test]
    fn image_event_payloads() {
        let partial: Value =
            serde_json::from_str(&partial_image_payload(1, 42)).expect("partial json");
        assert_eq!(partial["type"], "image_generation.partial_image");
        assert_eq!(partial["index"], 1);
        assert_eq!(partial["progress"], 42);
        assert_eq!(partial["b64_json"], "");

        let completed: Value =
            serde_json::from_str(&completed_image_payload(0, "Zm9v")).expect("completed json");
        assert_eq!(completed["type"], "image_generation.completed");
        assert_eq!(completed["b64_json"], "Zm9v");
        assert_eq!(completed["usage"]["total_tokens"], 50);
        assert_eq!(completed["usage"]["input_tokens_details"]["image_tokens"], 20);
    }
}
