//! HTML parser for index and post pages
//!
//! This module handles parsing HTML content to extract:
//! - Post links (and titles) from index pages
//! - The hosting-platform link and description of a post page

use crate::config::{CrawlerConfig, LinkSelection};
use crate::url::{resolve_href, unwrap_out_link, HostingMatcher, LBRY_SCHEME};
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

/// Longest title kept for a post
pub const MAX_TITLE_CHARS: usize = 100;

/// A post page could not be interpreted
#[derive(Debug, Error)]
#[error("Cannot parse {url}: {message}")]
pub struct ParseError {
    pub url: String,
    pub message: String,
}

/// A post link found on an index page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostLink {
    pub url: Url,
    pub title: Option<String>,
}

/// What a post page tells us about the post
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDetails {
    /// The selected hosting-platform link, if the post embeds one
    pub hosting_link: Option<String>,
    pub description: Option<String>,
}

/// Compiles a CSS selector, reporting failures as configuration errors
pub fn compile_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

/// Compiled selectors and link rules for the index site
#[derive(Debug, Clone)]
pub struct PageLayout {
    container: Selector,
    link: Selector,
    title: Selector,
    description: Selector,
    anchor: Selector,
    hosting: HostingMatcher,
    selection: LinkSelection,
}

impl PageLayout {
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            container: compile_selector(&config.post_container)?,
            link: compile_selector(&config.post_link)?,
            title: compile_selector(&config.title_selector)?,
            description: compile_selector(&config.description_selector)?,
            anchor: compile_selector("a[href]")?,
            hosting: HostingMatcher::new(&config.hosting_domains),
            selection: config.link_selection,
        })
    }

    /// Extracts post links from an index page
    ///
    /// Each post card contributes its first link. Relative hrefs are resolved
    /// against `page_url` and normalized; duplicates keep their first
    /// occurrence.
    pub fn extract_posts(&self, html: &str, page_url: &Url) -> Vec<PostLink> {
        let document = Html::parse_document(html);
        let mut posts: Vec<PostLink> = Vec::new();

        for card in document.select(&self.container) {
            let Some(anchor) = card.select(&self.link).next() else {
                continue;
            };
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };

            let url = match resolve_href(page_url, href) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("Skipping post link '{}' on {}: {}", href, page_url, e);
                    continue;
                }
            };

            if posts.iter().any(|p| p.url == url) {
                continue;
            }

            posts.push(PostLink {
                url,
                title: self.card_title(card, anchor),
            });
        }

        posts
    }

    /// Title from the card's heading, the link's title attribute, or the link text
    fn card_title(&self, card: ElementRef<'_>, anchor: ElementRef<'_>) -> Option<String> {
        let text = card
            .select(&self.title)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                anchor
                    .value()
                    .attr("title")
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
            })
            .or_else(|| Some(element_text(anchor)).filter(|t| !t.is_empty()))?;

        Some(text.chars().take(MAX_TITLE_CHARS).collect())
    }

    /// Reads the hosting-platform link and description from a post page
    ///
    /// Redirect links (`/out/?u=...`) are unwrapped first. When several links
    /// match, the configured selection policy picks one. A response that is
    /// not a usable document is a [`ParseError`].
    pub fn extract_post(&self, html: &str, post_url: &Url) -> Result<PostDetails, ParseError> {
        if html.trim().is_empty() {
            return Err(ParseError {
                url: post_url.to_string(),
                message: "empty document".to_string(),
            });
        }

        let document = Html::parse_document(html);
        let mut matches = document
            .select(&self.anchor)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| self.hosting_target(post_url, href));

        let hosting_link = match self.selection {
            LinkSelection::First => matches.next(),
            LinkSelection::Last => matches.last(),
        };

        let description = document
            .select(&self.description)
            .next()
            .map(element_text)
            .filter(|d| !d.is_empty());

        Ok(PostDetails {
            hosting_link,
            description,
        })
    }

    fn hosting_target(&self, post_url: &Url, href: &str) -> Option<String> {
        let candidate = unwrap_out_link(post_url, href).unwrap_or_else(|| href.trim().to_string());

        if candidate
            .get(..LBRY_SCHEME.len() + 3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("lbry://"))
        {
            return Some(candidate);
        }

        let url = post_url.join(&candidate).ok()?;
        self.hosting
            .is_hosting_link(&url)
            .then(|| url.to_string())
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
