//! Decoded upstream vendor events.
//!
//! The upstream speaks line-delimited JSON where every payload hangs off a
//! `result.response` envelope and every field is optional. Absence is a
//! first-class state here: each event carries at most one active payload
//! (`token`, `modelResponse`, image progress, or video progress) and the
//! processors branch on whichever is present.

use serde::Deserialize;

/// Top-level envelope of one upstream line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamEnvelope {
    #[serde(default)]
    pub result: Option<UpstreamResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamResult {
    #[serde(default)]
    pub response: Option<UpstreamResponse>,
}

/// The `result.response` payload; all fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub is_thinking: Option<bool>,
    #[serde(default)]
    pub message_tag: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub llm_info: Option<LlmInfo>,
    #[serde(default)]
    pub streaming_image_generation_response: Option<ImageGenerationProgress>,
    #[serde(default)]
    pub streaming_video_generation_response: Option<VideoGenerationProgress>,
    #[serde(default)]
    pub model_response: Option<ModelResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmInfo {
    #[serde(default)]
    pub model_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationProgress {
    #[serde(default)]
    pub image_index: Option<u32>,
    #[serde(default)]
    pub progress: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenerationProgress {
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub thumbnail_image_url: Option<String>,
}

/// Aggregated final message the upstream sends once per response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub generated_image_urls: Vec<String>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<ModelResponseMetadata>,
}

/// Unlike the envelope, metadata keys arrive in snake_case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelResponseMetadata {
    #[serde(default)]
    pub llm_info: Option<MetadataLlmInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataLlmInfo {
    #[serde(default, rename = "modelHash")]
    pub model_hash: Option<String>,
}

impl ModelResponse {
    /// The `metadata.llm_info.modelHash` value, when present and non-empty.
    #[must_use]
    pub fn metadata_model_hash(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.llm_info.as_ref())
            .and_then(|llm| llm.model_hash.as_deref())
            .filter(|hash| !hash.is_empty())
    }
}

/// Decode one upstream line into its `result.response` payload.
///
/// Undecodable lines and lines without a response payload yield `None`;
/// the caller skips them, matching arrival-order-only processing.
#[must_use]
pub fn decode_line(line: &[u8]) -> Option<UpstreamResponse> {
    let envelope: UpstreamEnvelope = serde_json::from_slice(line).ok()?;
    envelope.result?.response
}
