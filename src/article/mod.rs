//! Wikipedia article reader tool
//!
//! `read_wikipedia_article` runs a four stage pipeline: validate the URL,
//! fetch the page, extract the main content container and convert it to
//! Markdown. Each stage ends the call with a classified [`MCPError`] that
//! the registry turns into a tool failure.

pub mod markdown;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
    config::ArticleConfig,
    error::{AppError, AppResult},
    mcp::{
        errors::{MCPError, MCPResult},
        protocol::ToolArguments,
        registry::{panic_message, ParameterType, ToolDescriptor, ToolHandler, ToolParameter},
    },
};

pub use markdown::{element_to_markdown, html_to_markdown};

/// Registered tool name
pub const TOOL_NAME: &str = "read_wikipedia_article";

const TOOL_DESCRIPTION: &str = "Fetch a Wikipedia article at the provided URL, parse its main content, \
convert it to Markdown, and return it.\n\n\
Usage:\n    read_wikipedia_article(\"https://en.wikipedia.org/wiki/Example\")";

const TRUNCATION_MARKER: &str = "\n\n[... truncated]";

/// Fetches an article and returns its main content as Markdown
pub struct ReadArticleTool {
    client: reqwest::Client,
    selector: Arc<Selector>,
    config: ArticleConfig,
}

impl ReadArticleTool {
    pub fn new(config: ArticleConfig) -> AppResult<Self> {
        let selector = Selector::parse(&config.content_selector).map_err(|e| {
            AppError::config(format!(
                "Invalid content selector '{}': {:?}",
                config.content_selector, e
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            selector: Arc::new(selector),
            config,
        })
    }

    /// Tool descriptor with the single required `url` parameter
    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor::new(TOOL_NAME, TOOL_DESCRIPTION, Arc::new(self)).with_parameter(
            ToolParameter::new("url", ParameterType::String, true)
                .with_description("Full http(s) URL of the Wikipedia article"),
        )
    }

    /// Run the whole pipeline for one URL
    #[instrument(skip(self))]
    pub async fn read(&self, url: &str) -> MCPResult<String> {
        let url = validate_url(url)?;
        let body = self.fetch(url).await?;
        let markdown = self.convert(body).await?;

        info!(chars = markdown.len(), "article converted");
        Ok(truncate_chars(markdown, self.config.max_output_chars))
    }

    /// Parse and convert on the blocking pool, bounded by the convert timeout
    async fn convert(&self, body: String) -> MCPResult<String> {
        let selector = Arc::clone(&self.selector);
        let task = tokio::task::spawn_blocking(move || extract_markdown(&body, &selector));

        match tokio::time::timeout(self.config.convert_timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                let detail = if error.is_panic() {
                    panic_message(error.into_panic().as_ref())
                } else {
                    error.to_string()
                };
                Err(MCPError::internal(format!("Unexpected error: {}", detail)))
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.convert_timeout_ms,
                    "article conversion timed out"
                );
                Err(MCPError::internal(format!(
                    "Unexpected error: conversion did not finish within {}ms",
                    self.config.convert_timeout_ms
                )))
            }
        }
    }

    async fn fetch(&self, url: Url) -> MCPResult<String> {
        debug!(%url, "fetching article");
        let mut response = self.client.get(url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MCPError::internal(format!(
                "Failed to fetch the article. HTTP Status code: {}",
                status.as_u16()
            )));
        }

        let limit = self.config.max_body_bytes;
        if response
            .content_length()
            .is_some_and(|length| length > limit as u64)
        {
            return Err(body_too_large(limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            if body.len() + chunk.len() > limit {
                return Err(body_too_large(limit));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(bytes = body.len(), "article fetched");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl ToolHandler for ReadArticleTool {
    async fn call(&self, arguments: ToolArguments) -> MCPResult<String> {
        let url = arguments
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| MCPError::invalid_params("Required parameter 'url' is missing"))?;
        self.read(url).await
    }
}

fn request_error(error: reqwest::Error) -> MCPError {
    MCPError::internal(format!("Request error: {}", error))
}

fn body_too_large(limit: usize) -> MCPError {
    MCPError::internal(format!(
        "Request error: response body exceeds {} bytes",
        limit
    ))
}

/// Accept only absolute http(s) URLs
pub fn validate_url(raw: &str) -> MCPResult<Url> {
    let raw = raw.trim();
    let scheme_ok = raw
        .split_once(':')
        .is_some_and(|(scheme, _)| matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https"));
    if !scheme_ok {
        return Err(MCPError::invalid_params("URL must start with http or https."));
    }

    Url::parse(raw).map_err(|e| MCPError::internal(format!("Request error: invalid URL: {}", e)))
}

/// Locate the content container and convert it to Markdown.
///
/// Kept synchronous: the parsed document must not live across an await.
pub fn extract_markdown(body: &str, selector: &Selector) -> MCPResult<String> {
    let document = Html::parse_document(body);
    let content = document.select(selector).next().ok_or_else(|| {
        MCPError::invalid_params(
            "Could not find the main content of the article. Please check the URL.",
        )
    })?;
    Ok(element_to_markdown(content))
}

/// Cut `text` after `max_chars` characters and mark the cut
pub fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(index);
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
