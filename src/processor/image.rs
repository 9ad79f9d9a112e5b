//! Image generation processors.
//!
//! These speak the OpenAI Images streaming dialect, not Chat Completions:
//! named `image_generation.partial_image` / `image_generation.completed`
//! events and no `[DONE]` terminator. The upstream always renders two
//! candidates; when the client asked for a single image one candidate is
//! picked at random and the other is masked from the event stream.

use bytes::Bytes;
use futures_util::Stream;

use crate::assets::{is_valid_generated_url, AssetFetcher, AssetResolver, MediaKind};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::protocol::openai::{
    completed_image_payload, partial_image_payload, COMPLETED_IMAGE_EVENT, PARTIAL_IMAGE_EVENT,
};
use crate::protocol::upstream::UpstreamResponse;
use crate::stream::sse::named_sse_frame;

use super::{drive_collect, frame_stream, CollectHandler, EventHandler};

/// Streaming image processor.
pub struct ImageStreamProcessor<F> {
    resolver: AssetResolver<F>,
    model: String,
    n: u32,
    target_index: Option<u32>,
    final_images: Vec<String>,
    idle_timeout_secs: f64,
}

impl<F: AssetFetcher + 'static> ImageStreamProcessor<F> {
    /// `n` is the client-requested image count.
    #[must_use]
    pub fn new(config: &EngineConfig, model: &str, token: &str, fetcher: F, n: u32) -> Self {
        let target_index = (n == 1).then(|| fastrand::u32(0..2));
        Self {
            resolver: AssetResolver::new(config, token, fetcher),
            model: model.to_string(),
            n,
            target_index,
            final_images: Vec::new(),
            idle_timeout_secs: config.stream_idle_timeout_secs,
        }
    }

    pub fn process<S>(self, lines: S) -> impl Stream<Item = Result<String, EngineError>> + Send
    where
        S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
    {
        frame_stream(self, lines)
    }
}

impl<F: AssetFetcher + 'static> EventHandler for ImageStreamProcessor<F> {
    fn idle_timeout_secs(&self) -> f64 {
        self.idle_timeout_secs
    }

    async fn on_event(&mut self, event: UpstreamResponse, out: &mut Vec<String>) {
        if let Some(img) = &event.streaming_image_generation_response {
            let image_index = img.image_index.unwrap_or(0);
            let progress = img.progress.unwrap_or(0);

            if self.n == 1 && Some(image_index) != self.target_index {
                return;
            }
            let out_index = if self.n == 1 { 0 } else { image_index };
            out.push(named_sse_frame(
                PARTIAL_IMAGE_EVENT,
                &partial_image_payload(out_index, progress),
            ));
            return;
        }

        let Some(mr) = event.model_response else {
            return;
        };
        for url in &mr.generated_image_urls {
            let clean = url.trim();
            if !is_valid_generated_url(clean) {
                tracing::warn!(model = %self.model, url = clean, "skip invalid generated image url in image stream");
                continue;
            }
            if let Some(b64) = self.resolver.raw_base64(clean, MediaKind::Image).await {
                self.final_images.push(b64);
            }
        }
    }

    async fn on_finish(&mut self, out: &mut Vec<String>) {
        for (index, b64) in self.final_images.drain(..).enumerate() {
            let index = index as u32;
            let out_index = if self.n == 1 {
                if Some(index) != self.target_index {
                    continue;
                }
                0
            } else {
                index
            };
            out.push(named_sse_frame(
                COMPLETED_IMAGE_EVENT,
                &completed_image_payload(out_index, &b64),
            ));
        }
        // No [DONE]: the images dialect just closes the stream.
    }
}

// ---------------------------------------------------------------------------
// Collect mode
// ---------------------------------------------------------------------------

/// Non-streaming image processor: collects all renderable candidates as raw
/// base64 payloads. Fetch failures degrade to fewer images.
pub struct ImageCollectProcessor<F> {
    resolver: AssetResolver<F>,
    model: String,
    idle_timeout_secs: f64,
    images: Vec<String>,
}

impl<F: AssetFetcher + 'static> ImageCollectProcessor<F> {
    #[must_use]
    pub fn new(config: &EngineConfig, model: &str, token: &str, fetcher: F) -> Self {
        Self {
            resolver: AssetResolver::new(config, token, fetcher),
            model: model.to_string(),
            idle_timeout_secs: config.stream_idle_timeout_secs,
            images: Vec::new(),
        }
    }

    pub async fn collect<S>(mut self, lines: S) -> Vec<String>
    where
        S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
    {
        drive_collect(&mut self, lines).await;
        self.images
    }
}

impl<F: AssetFetcher + 'static> CollectHandler for ImageCollectProcessor<F> {
    fn idle_timeout_secs(&self) -> f64 {
        self.idle_timeout_secs
    }

    fn context(&self) -> &'static str {
        "image collect"
    }

    async fn on_event(&mut self, event: UpstreamResponse) {
        let Some(mr) = event.model_response else {
            return;
        };
        for url in &mr.generated_image_urls {
            let clean = url.trim();
            if !is_valid_generated_url(clean) {
                tracing::warn!(model = %self.model, url = clean, "skip invalid generated image url in image collect");
                continue;
            }
            if let Some(b64) = self.resolver.raw_base64(clean, MediaKind::Image).await {
                self.images.push(b64);
            }
        }
    }
}
