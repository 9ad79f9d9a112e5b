//! Generated-asset URL resolution and the download collaborator seam.
//!
//! The engine never fetches bytes itself: an [`AssetFetcher`] capability
//! persists assets locally or inlines them as base64, failing soft. The
//! resolver decides, per configuration, whether a vendor asset is served
//! through the local files proxy, passed through as an absolute vendor URL,
//! or inlined.

use std::fmt;
use std::future::Future;

use crate::config::EngineConfig;

/// Base URL assets resolve against when no local proxy is configured.
const VENDOR_ASSET_BASE: &str = "https://assets.grok.com";

/// Media kind of a generated asset; selects the files-proxy namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Narrow capability the download/cache collaborator exposes to the engine.
///
/// Both operations fail soft: `persist` best-effort caches the asset bytes,
/// `fetch_base64` returns `None` when inlining is unavailable. Neither ever
/// raises into the engine; resource release happens on drop.
pub trait AssetFetcher: Send {
    /// Persist the referenced binary locally so the files proxy can serve it.
    fn persist(
        &mut self,
        path: &str,
        token: &str,
        kind: MediaKind,
    ) -> impl Future<Output = ()> + Send;

    /// Return the asset as a base64 payload (typically a data URL), or `None`.
    fn fetch_base64(
        &mut self,
        url: &str,
        token: &str,
        kind: MediaKind,
    ) -> impl Future<Output = Option<String>> + Send;
}

/// No-op fetcher used when no download collaborator is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFetcher;

impl AssetFetcher for NullFetcher {
    fn persist(
        &mut self,
        _path: &str,
        _token: &str,
        _kind: MediaKind,
    ) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn fetch_base64(
        &mut self,
        _url: &str,
        _token: &str,
        _kind: MediaKind,
    ) -> impl Future<Output = Option<String>> + Send {
        std::future::ready(None)
    }
}

// ---------------------------------------------------------------------------
// URL validation and id extraction
// ---------------------------------------------------------------------------

/// Whether an upstream-reported generated asset URL is worth resolving.
///
/// Rejects empty strings, a bare `/`, and absolute URLs whose path component
/// is empty or root-only.
#[must_use]
pub fn is_valid_generated_url(url: &str) -> bool {
    let raw = url.trim();
    if raw.is_empty() || raw == "/" {
        return false;
    }
    if raw.starts_with("http") {
        return match url::Url::parse(raw) {
            Ok(parsed) => {
                let path = parsed.path();
                !path.is_empty() && path != "/"
            }
            Err(_) => false,
        };
    }
    true
}

/// Deterministic asset id: the second-to-last path segment, else `"image"`.
#[must_use]
pub fn extract_asset_id(url: &str) -> String {
    let path = path_component(url);
    let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    if parts.len() >= 2 {
        parts[parts.len() - 2].to_string()
    } else {
        "image".to_string()
    }
}

/// Reduce an absolute or relative asset reference to its path component,
/// with a guaranteed leading `/`.
fn path_component(raw: &str) -> String {
    let raw = raw.trim();
    let path = if raw.starts_with("http") {
        match url::Url::parse(raw) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => raw.to_string(),
        }
    } else {
        raw.to_string()
    };

    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves vendor asset references into their final representation.
pub struct AssetResolver<F> {
    public_base_url: String,
    token: String,
    fetcher: F,
}

impl<F: AssetFetcher> AssetResolver<F> {
    #[must_use]
    pub fn new(config: &EngineConfig, token: &str, fetcher: F) -> Self {
        Self {
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            fetcher,
        }
    }

    /// Resolve an asset reference to a URL.
    ///
    /// With a public base URL configured the asset is persisted through the
    /// fetcher and served from the local files proxy; otherwise the absolute
    /// vendor URL is returned.
    pub async fn resolve_url(&mut self, raw: &str, kind: MediaKind) -> String {
        let path = path_component(raw);

        if self.public_base_url.is_empty() {
            return format!("{VENDOR_ASSET_BASE}{path}");
        }

        self.fetcher.persist(&path, &self.token, kind).await;
        format!("{}/v1/files/{kind}{path}", self.public_base_url)
    }

    /// Resolve to an inline base64 payload, falling back to URL resolution
    /// when the fetcher cannot inline the asset.
    pub async fn resolve_base64_or_url(&mut self, raw: &str, kind: MediaKind) -> String {
        if let Some(payload) = self.fetcher.fetch_base64(raw, &self.token, kind).await {
            if !payload.is_empty() {
                return payload;
            }
        }
        self.resolve_url(raw, kind).await
    }

    /// Fetch the raw base64 body of an asset, stripping any data-URL prefix.
    /// `None` when the fetcher cannot inline it.
    pub async fn raw_base64(&mut self, raw: &str, kind: MediaKind) -> Option<String> {
        let payload = self.fetcher.fetch_base64(raw, &self.token, kind).await?;
        if payload.is_empty() {
            return None;
        }
        match payload.split_once(',') {
            Some((_, body)) => Some(body.to_string()),
            None => Some(payload),
        }
    }
}
