//! Text chat processors.
//!
//! The streaming variant is the most stateful of the six: it routes
//! reasoning tokens into `<think>` blocks, suppresses upstream replays,
//! filters tag spans across fragment boundaries, and holds narration tokens
//! back while image generation is in flight so image output can win.

use bytes::Bytes;
use futures_util::Stream;

use crate::assets::{extract_asset_id, is_valid_generated_url, AssetFetcher, AssetResolver, MediaKind};
use crate::config::{EngineConfig, ImageFormat};
use crate::error::EngineError;
use crate::protocol::openai::{normalize_chatcmpl_id, ChatCompletion, ChatSession};
use crate::protocol::upstream::{ModelResponse, UpstreamResponse};
use crate::stream::filter::strip_tag_spans;
use crate::stream::sse::done_frame;
use crate::stream::{ReplayDetector, TagFilter};

use super::{drive_collect, frame_stream, CollectHandler, EventHandler};

const THINK_OPEN: &str = "<think>\n";
const THINK_CLOSE: &str = "</think>\n";

/// Streaming text processor: upstream events in, OpenAI SSE frames out.
pub struct TextStreamProcessor<F> {
    session: ChatSession,
    resolver: AssetResolver<F>,
    filter: TagFilter,
    replay: ReplayDetector,
    image_format: ImageFormat,
    show_thinking: bool,
    idle_timeout_secs: f64,
    role_sent: bool,
    think_opened: bool,
    final_token_sent: bool,
    image_generation_seen: bool,
    image_output_emitted: bool,
    pending_image_tokens: Vec<String>,
}

impl<F: AssetFetcher + 'static> TextStreamProcessor<F> {
    /// `think` overrides the configured reasoning visibility per request.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        model: &str,
        token: &str,
        fetcher: F,
        think: Option<bool>,
    ) -> Self {
        Self {
            session: ChatSession::new(model),
            resolver: AssetResolver::new(config, token, fetcher),
            filter: TagFilter::new(&config.filter_tags),
            replay: ReplayDetector::default(),
            image_format: config.image_output_format,
            show_thinking: think.unwrap_or(config.show_thinking),
            idle_timeout_secs: config.stream_idle_timeout_secs,
            role_sent: false,
            think_opened: false,
            final_token_sent: false,
            image_generation_seen: false,
            image_output_emitted: false,
            pending_image_tokens: Vec::new(),
        }
    }

    /// Transcode an upstream line stream into SSE frames.
    pub fn process<S>(self, lines: S) -> impl Stream<Item = Result<String, EngineError>> + Send
    where
        S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
    {
        frame_stream(self, lines)
    }

    fn open_think(&mut self, out: &mut Vec<String>) {
        if !self.think_opened {
            out.push(self.session.content_frame(THINK_OPEN));
            self.think_opened = true;
        }
    }

    fn close_think(&mut self, out: &mut Vec<String>) {
        if self.think_opened {
            out.push(self.session.content_frame(THINK_CLOSE));
            self.think_opened = false;
        }
    }

    /// Emit buffered narration tokens once it is clear no image output
    /// will replace them.
    fn flush_pending_tokens(&mut self, out: &mut Vec<String>) {
        for token in std::mem::take(&mut self.pending_image_tokens) {
            if self.replay.is_replay(&token) {
                continue;
            }
            out.push(self.session.content_frame(&token));
            self.replay.record(&token);
            self.final_token_sent = true;
        }
    }

    async fn handle_token(&mut self, token: &str, event: &UpstreamResponse, out: &mut Vec<String>) {
        let message_tag = event
            .message_tag
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        let is_reasoning = event.is_thinking.unwrap_or(false)
            || matches!(message_tag.as_str(), "header" | "summary");

        let filtered = self.filter.feed(token);
        if filtered.is_empty() {
            return;
        }

        if is_reasoning {
            if self.show_thinking {
                self.open_think(out);
                out.push(self.session.content_frame(&filtered));
            }
            return;
        }

        self.close_think(out);

        // Image generation in flight: hold narration back, image output wins.
        if self.image_generation_seen && !self.image_output_emitted {
            self.pending_image_tokens.push(filtered);
            return;
        }

        if self.replay.is_replay(&filtered) {
            let preview: String = filtered.chars().take(80).collect();
            tracing::debug!(
                model = %self.session.model,
                token_preview = %preview,
                "skip replayed token chunk"
            );
            return;
        }
        out.push(self.session.content_frame(&filtered));
        self.replay.record(&filtered);
        self.final_token_sent = true;
    }

    async fn handle_model_response(&mut self, mr: ModelResponse, out: &mut Vec<String>) {
        if self.show_thinking {
            self.close_think(out);
        }

        let mut emitted_images = 0u32;
        for url in &mr.generated_image_urls {
            let clean = url.trim();
            if !is_valid_generated_url(clean) {
                tracing::warn!(model = %self.session.model, url = clean, "skip invalid generated image url");
                continue;
            }

            let img_id = extract_asset_id(clean);
            let target = match self.image_format {
                ImageFormat::Base64 => {
                    self.resolver
                        .resolve_base64_or_url(clean, MediaKind::Image)
                        .await
                }
                ImageFormat::Url => self.resolver.resolve_url(clean, MediaKind::Image).await,
            };
            out.push(self.session.content_frame(&format!("![{img_id}]({target})\n")));
            emitted_images += 1;
        }

        if emitted_images > 0 {
            self.image_output_emitted = true;
            self.pending_image_tokens.clear();
        } else if !self.pending_image_tokens.is_empty() && !self.final_token_sent {
            self.flush_pending_tokens(out);
        }

        // Token deltas take precedence; the aggregate message is only a
        // fallback when no final token and no image output happened.
        if !self.final_token_sent && emitted_images == 0 {
            if let Some(message) = mr.message.as_deref().filter(|m| !m.is_empty()) {
                let filtered = self.filter.feed(message);
                if !filtered.is_empty() && !self.replay.is_replay(&filtered) {
                    out.push(self.session.content_frame(&filtered));
                    self.replay.record(&filtered);
                    self.final_token_sent = true;
                }
            }
        }

        if let Some(hash) = mr.metadata_model_hash() {
            self.session.fingerprint = hash.to_string();
        }
    }
}

impl<F: AssetFetcher + 'static> EventHandler for TextStreamProcessor<F> {
    fn idle_timeout_secs(&self) -> f64 {
        self.idle_timeout_secs
    }

    async fn on_event(&mut self, mut event: UpstreamResponse, out: &mut Vec<String>) {
        if self.session.fingerprint.is_empty() {
            if let Some(hash) = event.llm_info.as_ref().and_then(|llm| llm.model_hash.as_deref()) {
                self.session.fingerprint = hash.to_string();
            }
        }
        // The id freezes once the first frame went out.
        if let Some(rid) = event.response_id.as_deref().filter(|rid| !rid.is_empty()) {
            if !self.role_sent {
                self.session.adopt_response_id(rid);
            }
        }

        if !self.role_sent {
            out.push(self.session.role_frame());
            self.role_sent = true;
        }

        if let Some(img) = &event.streaming_image_generation_response {
            self.image_generation_seen = true;
            if self.show_thinking {
                self.open_think(out);
                let index = img.image_index.unwrap_or(0) + 1;
                let progress = img.progress.unwrap_or(0);
                out.push(self.session.content_frame(&format!(
                    "正在生成第{index}张图片中，当前进度{progress}%\n"
                )));
            }
            return;
        }

        if let Some(mr) = event.model_response.take() {
            self.handle_model_response(mr, out).await;
            return;
        }

        if let Some(token) = event.token.take().filter(|t| !t.is_empty()) {
            self.handle_token(&token, &event, out).await;
        }
    }

    async fn on_finish(&mut self, out: &mut Vec<String>) {
        if !self.pending_image_tokens.is_empty()
            && !self.image_output_emitted
            && !self.final_token_sent
        {
            self.flush_pending_tokens(out);
        }

        if self.think_opened {
            out.push(self.session.content_frame(THINK_CLOSE));
            self.think_opened = false;
        }
        out.push(self.session.finish_frame());
        out.push(done_frame());
    }
}

// ---------------------------------------------------------------------------
// Collect mode
// ---------------------------------------------------------------------------

/// Non-streaming text processor: folds the stream into one `chat.completion`.
pub struct TextCollectProcessor<F> {
    session: ChatSession,
    resolver: AssetResolver<F>,
    filter_tags: Vec<String>,
    image_format: ImageFormat,
    idle_timeout_secs: f64,
    response_id: String,
    content: String,
}

impl<F: AssetFetcher + 'static> TextCollectProcessor<F> {
    #[must_use]
    pub fn new(config: &EngineConfig, model: &str, token: &str, fetcher: F) -> Self {
        Self {
            session: ChatSession::new(model),
            resolver: AssetResolver::new(config, token, fetcher),
            filter_tags: config.filter_tags.clone(),
            image_format: config.image_output_format,
            idle_timeout_secs: config.stream_idle_timeout_secs,
            response_id: String::new(),
            content: String::new(),
        }
    }

    /// Consume the upstream stream and build the aggregate completion.
    ///
    /// Stream errors degrade to the partial content collected so far.
    pub async fn collect<S>(mut self, lines: S) -> ChatCompletion
    where
        S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
    {
        drive_collect(&mut self, lines).await;

        let content = strip_tag_spans(&self.content, &self.filter_tags);
        self.session.id = Some(normalize_chatcmpl_id(&self.response_id));
        self.session.completion(content)
    }
}

impl<F: AssetFetcher + 'static> CollectHandler for TextCollectProcessor<F> {
    fn idle_timeout_secs(&self) -> f64 {
        self.idle_timeout_secs
    }

    fn context(&self) -> &'static str {
        "text collect"
    }

    async fn on_event(&mut self, event: UpstreamResponse) {
        if self.session.fingerprint.is_empty() {
            if let Some(hash) = event.llm_info.as_ref().and_then(|llm| llm.model_hash.as_deref()) {
                self.session.fingerprint = hash.to_string();
            }
        }

        let Some(mr) = event.model_response else {
            return;
        };

        self.response_id = normalize_chatcmpl_id(
            mr.response_id.as_deref().unwrap_or(&self.response_id),
        );
        self.content = mr.message.clone().unwrap_or_default();

        let mut image_contents: Vec<String> = Vec::new();
        for url in &mr.generated_image_urls {
            let clean = url.trim();
            if !is_valid_generated_url(clean) {
                tracing::warn!(model = %self.session.model, url = clean, "skip invalid generated image url in collect");
                continue;
            }

            let img_id = extract_asset_id(clean);
            let target = match self.image_format {
                ImageFormat::Base64 => {
                    self.resolver
                        .resolve_base64_or_url(clean, MediaKind::Image)
                        .await
                }
                ImageFormat::Url => self.resolver.resolve_url(clean, MediaKind::Image).await,
            };
            image_contents.push(format!("![{img_id}]({target})\n"));
        }

        // Image output replaces the narration message entirely.
        if !image_contents.is_empty() {
            self.content = image_contents.concat();
        }

        if let Some(hash) = mr.metadata_model_hash() {
            self.session.fingerprint = hash.to_string();
        }
    }
}
