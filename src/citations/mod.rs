//! Citation grounding engine
//!
//! Reconciles citation markers emitted by the generator with the retrieved
//! snippets backing them. Two modes, auto-selected per response:
//!
//! - Numeric: the text already carries bracketed markers like `[1]` or
//!   `[1, 2]`. Each referenced ordinal is mapped to the snippet with that
//!   retrieval ordinal; unreferenced snippets are dropped.
//! - Heuristic: no numeric markers. Markdown links are matched to snippets
//!   by URL, then generic "Source" mentions are assigned sequentially,
//!   capped at the available snippet count.
//!
//! The final source list holds each distinct URL or snippet at most once,
//! densely renumbered from 1 in order of first appearance, with the in-text
//! markers rewritten to match. Grounding never fails: malformed input comes
//! back as the raw text with an empty source list.

use crate::retrieval::RetrievedSnippet;
use regex_lite::Regex;
use serde::Serialize;
use std::collections::HashMap;

/// A deduplicated, sanitized citation source
#[derive(Debug, Clone, Serialize)]
pub struct CitationSource {
    /// Dense 1-based number matching the rewritten in-text markers
    pub ordinal: usize,
    pub title: String,
    /// Blank for internal documents that must not be exposed
    pub url: Option<String>,
    pub origin_label: String,
    pub content_snippet: String,
}

/// Generated text with its grounded source list
#[derive(Debug, Clone, Serialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub sources: Vec<CitationSource>,
}

/// Stateless grounding engine with precompiled patterns
pub struct CitationGrounder {
    numeric: Regex,
    markdown_link: Regex,
    source_word: Regex,
}

impl CitationGrounder {
    pub fn new() -> Self {
        // Fixed literal patterns; construction cannot fail.
        Self {
            numeric: Regex::new(r"\[(\d+(?:,\s*\d+)*)\]").unwrap(),
            markdown_link: Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap(),
            source_word: Regex::new(r"(?i)\bsource\b").unwrap(),
        }
    }

    /// Ground generated text against the retrieved snippets.
    pub fn ground(&self, raw_text: &str, snippets: &[RetrievedSnippet]) -> GroundedAnswer {
        if snippets.is_empty() {
            return GroundedAnswer {
                text: raw_text.to_string(),
                sources: Vec::new(),
            };
        }

        if self.numeric.is_match(raw_text) {
            self.ground_numeric(raw_text, snippets)
        } else {
            self.ground_heuristic(raw_text, snippets)
        }
    }

    fn ground_numeric(&self, raw_text: &str, snippets: &[RetrievedSnippet]) -> GroundedAnswer {
        let mut builder = SourceListBuilder::new(snippets);
        let mut text = String::with_capacity(raw_text.len());
        let mut last = 0;

        for caps in self.numeric.captures_iter(raw_text) {
            let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            text.push_str(&raw_text[last..whole.start()]);
            last = whole.end();

            let mut renumbered: Vec<usize> = Vec::new();
            for part in group.as_str().split(',') {
                let Ok(ordinal) = part.trim().parse::<usize>() else {
                    continue;
                };
                if ordinal == 0 || ordinal > snippets.len() {
                    tracing::debug!(ordinal, "Dropping out-of-range citation marker");
                    continue;
                }
                let number = builder.assign(ordinal - 1);
                if !renumbered.contains(&number) {
                    renumbered.push(number);
                }
            }

            if renumbered.is_empty() {
                // Whole marker was invalid; drop it and any space before it.
                if text.ends_with(' ') {
                    text.pop();
                }
            } else {
                text.push_str(&format_marker(&renumbered));
            }
        }
        text.push_str(&raw_text[last..]);

        GroundedAnswer {
            text,
            sources: builder.finish(),
        }
    }

    fn ground_heuristic(&self, raw_text: &str, snippets: &[RetrievedSnippet]) -> GroundedAnswer {
        let mut builder = SourceListBuilder::new(snippets);

        // Pass 1: markdown links matched to snippets by URL.
        let mut text = String::with_capacity(raw_text.len());
        let mut last = 0;
        for caps in self.markdown_link.captures_iter(raw_text) {
            let (Some(whole), Some(url)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            text.push_str(&raw_text[last..whole.start()]);
            last = whole.end();

            let matched = snippets.iter().position(|s| {
                !s.url.is_empty() && (s.url == url.as_str() || url.as_str().contains(&s.url))
            });
            match matched {
                Some(index) => {
                    let number = builder.assign(index);
                    text.push_str(&format!("[{}]", number));
                }
                None => text.push_str(whole.as_str()),
            }
        }
        text.push_str(&raw_text[last..]);

        // Pass 2: generic "Source" mentions, assigned sequentially.
        let mut next_index = 0;
        let with_sources = {
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for found in self.source_word.find_iter(&text) {
                out.push_str(&text[last..found.start()]);
                last = found.end();

                while next_index < snippets.len() && builder.is_assigned(next_index) {
                    next_index += 1;
                }
                if next_index < snippets.len() {
                    let number = builder.assign(next_index);
                    out.push_str(&format!("[{}]", number));
                    next_index += 1;
                } else {
                    out.push_str(found.as_str());
                }
            }
            out.push_str(&text[last..]);
            out
        };

        GroundedAnswer {
            text: with_sources,
            sources: builder.finish(),
        }
    }
}

impl Default for CitationGrounder {
    fn default() -> Self {
        Self::new()
    }
}

/// Deduplicating source-list accumulator. Each distinct URL/snippet gets one
/// dense number, assigned in order of first appearance.
struct SourceListBuilder<'a> {
    snippets: &'a [RetrievedSnippet],
    numbers: HashMap<String, usize>,
    sources: Vec<CitationSource>,
}

impl<'a> SourceListBuilder<'a> {
    fn new(snippets: &'a [RetrievedSnippet]) -> Self {
        Self {
            snippets,
            numbers: HashMap::new(),
            sources: Vec::new(),
        }
    }

    fn assign(&mut self, index: usize) -> usize {
        let snippet = &self.snippets[index];
        let key = dedup_key(snippet);
        if let Some(&number) = self.numbers.get(&key) {
            return number;
        }
        let number = self.sources.len() + 1;
        self.sources.push(sanitize_source(number, snippet));
        self.numbers.insert(key, number);
        number
    }

    fn is_assigned(&self, index: usize) -> bool {
        self.numbers.contains_key(&dedup_key(&self.snippets[index]))
    }

    fn finish(self) -> Vec<CitationSource> {
        self.sources
    }
}

fn dedup_key(snippet: &RetrievedSnippet) -> String {
    if snippet.url.is_empty() {
        format!("content:{}", snippet.content)
    } else {
        format!("url:{}", snippet.url)
    }
}

fn format_marker(numbers: &[usize]) -> String {
    let joined = numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{}]", joined)
}

/// Build a display source, blanking URLs that point at internal hosts.
fn sanitize_source(ordinal: usize, snippet: &RetrievedSnippet) -> CitationSource {
    let (url, origin_label) = if snippet.url.is_empty() {
        (None, snippet.source_label.clone())
    } else {
        match url::Url::parse(&snippet.url) {
            Ok(parsed) if is_internal_host(&parsed) => {
                (None, "internal document".to_string())
            }
            Ok(_) => (Some(snippet.url.clone()), snippet.source_label.clone()),
            Err(_) => (None, snippet.source_label.clone()),
        }
    };

    CitationSource {
        ordinal,
        title: snippet.title.clone(),
        url,
        origin_label,
        content_snippet: snippet.content.clone(),
    }
}

fn is_internal_host(parsed: &url::Url) -> bool {
    match parsed.host() {
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        Some(url::Host::Domain(domain)) => {
            domain.eq_ignore_ascii_case("localhost") || domain.to_lowercase().ends_with(".local")
        }
        None => true,
    }
}
