//! Video generation processors.
//!
//! Video generation is slow and chatty: the upstream emits periodic progress
//! events and delivers the asset URLs on the `progress == 100` event. The
//! streaming variant narrates progress inside a `<think>` block; both
//! variants render the final asset either as a bare URL or as an HTML
//! `<video>` embed, per configuration.

use bytes::Bytes;
use futures_util::Stream;

use crate::assets::{AssetFetcher, AssetResolver, MediaKind};
use crate::config::{EngineConfig, VideoFormat};
use crate::error::EngineError;
use crate::protocol::openai::{normalize_chatcmpl_id, ChatCompletion, ChatSession};
use crate::protocol::upstream::{UpstreamResponse, VideoGenerationProgress};
use crate::stream::sse::done_frame;
use crate::util::escape_html;

use super::{drive_collect, frame_stream, CollectHandler, EventHandler};

const THINK_OPEN: &str = "<think>\n";
const THINK_CLOSE: &str = "</think>\n";

/// Render the HTML `<video>` embed. Both URLs are attribute values and get
/// entity-escaped.
fn build_video_html(video_url: &str, thumbnail_url: &str) -> String {
    let safe_video = escape_html(video_url);
    let safe_thumbnail = escape_html(thumbnail_url);
    let poster_attr = if safe_thumbnail.is_empty() {
        String::new()
    } else {
        format!(" poster=\"{safe_thumbnail}\"")
    };
    format!(
        "<video id=\"video\" controls=\"\" preload=\"none\"{poster_attr}>\n  <source id=\"mp4\" src=\"{safe_video}\" type=\"video/mp4\">\n</video>"
    )
}

/// Streaming video processor.
pub struct VideoStreamProcessor<F> {
    session: ChatSession,
    resolver: AssetResolver<F>,
    video_format: VideoFormat,
    show_thinking: bool,
    idle_timeout_secs: f64,
    role_sent: bool,
    think_opened: bool,
}

impl<F: AssetFetcher + 'static> VideoStreamProcessor<F> {
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
            video_format: config.video_output_format,
            show_thinking: think.unwrap_or(config.show_thinking),
            idle_timeout_secs: config.video_idle_timeout_secs,
            role_sent: false,
            think_opened: false,
        }
    }

    pub fn process<S>(self, lines: S) -> impl Stream<Item = Result<String, EngineError>> + Send
    where
        S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
    {
        frame_stream(self, lines)
    }

    async fn handle_progress(&mut self, video: VideoGenerationProgress, out: &mut Vec<String>) {
        let progress = video.progress.unwrap_or(0);

        if self.show_thinking {
            if !self.think_opened {
                out.push(self.session.content_frame(THINK_OPEN));
                self.think_opened = true;
            }
            out.push(
                self.session
                    .content_frame(&format!("正在生成视频中，当前进度{progress}%\n")),
            );
        }

        if progress != 100 {
            return;
        }

        if self.think_opened && self.show_thinking {
            out.push(self.session.content_frame(THINK_CLOSE));
            self.think_opened = false;
        }

        let Some(video_url) = video.video_url.as_deref().filter(|url| !url.is_empty()) else {
            return;
        };

        let final_video_url = self.resolver.resolve_url(video_url, MediaKind::Video).await;
        let final_thumbnail_url = match video.thumbnail_image_url.as_deref() {
            Some(thumb) if !thumb.is_empty() => {
                self.resolver.resolve_url(thumb, MediaKind::Image).await
            }
            _ => String::new(),
        };

        let content = match self.video_format {
            VideoFormat::Url => final_video_url,
            VideoFormat::Html => build_video_html(&final_video_url, &final_thumbnail_url),
        };
        out.push(self.session.content_frame(&content));
        tracing::info!(model = %self.session.model, url = video_url, "video generated");
    }
}

impl<F: AssetFetcher + 'static> EventHandler for VideoStreamProcessor<F> {
    fn idle_timeout_secs(&self) -> f64 {
        self.idle_timeout_secs
    }

    async fn on_event(&mut self, mut event: UpstreamResponse, out: &mut Vec<String>) {
        if let Some(rid) = event.response_id.as_deref().filter(|rid| !rid.is_empty()) {
            self.session.adopt_response_id(rid);
        }

        if !self.role_sent {
            out.push(self.session.role_frame());
            self.role_sent = true;
        }

        if let Some(video) = event.streaming_video_generation_response.take() {
            self.handle_progress(video, out).await;
        }
    }

    async fn on_finish(&mut self, out: &mut Vec<String>) {
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

/// Non-streaming video processor.
pub struct VideoCollectProcessor<F> {
    session: ChatSession,
    resolver: AssetResolver<F>,
    video_format: VideoFormat,
    idle_timeout_secs: f64,
    response_id: String,
    content: String,
}

impl<F: AssetFetcher + 'static> VideoCollectProcessor<F> {
    #[must_use]
    pub fn new(config: &EngineConfig, model: &str, token: &str, fetcher: F) -> Self {
        Self {
            session: ChatSession::new(model),
            resolver: AssetResolver::new(config, token, fetcher),
            video_format: config.video_output_format,
            idle_timeout_secs: config.video_idle_timeout_secs,
            response_id: String::new(),
            content: String::new(),
        }
    }

    /// Consume the stream; errors degrade to whatever was resolved so far.
    pub async fn collect<S>(mut self, lines: S) -> ChatCompletion
    where
        S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
    {
        drive_collect(&mut self, lines).await;

        self.session.id = Some(normalize_chatcmpl_id(&self.response_id));
        self.session.completion(self.content.clone())
    }
}

impl<F: AssetFetcher + 'static> CollectHandler for VideoCollectProcessor<F> {
    fn idle_timeout_secs(&self) -> f64 {
        self.idle_timeout_secs
    }

    fn context(&self) -> &'static str {
        "video collect"
    }

    async fn on_event(&mut self, event: UpstreamResponse) {
        let Some(video) = event.streaming_video_generation_response else {
            return;
        };
        if video.progress != Some(100) {
            return;
        }

        self.response_id = normalize_chatcmpl_id(
            event.response_id.as_deref().unwrap_or(&self.response_id),
        );

        let Some(video_url) = video.video_url.as_deref().filter(|url| !url.is_empty()) else {
            return;
        };

        let final_video_url = self.resolver.resolve_url(video_url, MediaKind::Video).await;
        let final_thumbnail_url = match video.thumbnail_image_url.as_deref() {
            Some(thumb) if !thumb.is_empty() => {
                self.resolver.resolve_url(thumb, MediaKind::Image).await
            }
            _ => String::new(),
        };

        self.content = match self.video_format {
            VideoFormat::Url => final_video_url,
            VideoFormat::Html => build_video_html(&final_video_url, &final_thumbnail_url),
        };
        tracing::info!(model = %self.session.model, url = video_url, "video generated");
    }
}
