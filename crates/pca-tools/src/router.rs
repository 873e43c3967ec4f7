//! Lexical router
//!
//! Shortcuts simple queries straight to one safe tool that needs no
//! arguments, so trivial requests skip the Planner. Scores are the share of
//! the query's content words found in a tool's name, description and
//! aliases.

use std::collections::BTreeSet;

use pca_core::{RouteMatch, Router, ToolDescriptor, ToolRisk};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "my", "me", "what", "whats", "show", "check", "get", "please",
    "can", "you", "i", "to", "of", "for", "on", "in", "this", "tell", "do", "does", "give",
];

/// Lower-cased content words of a text
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

#[derive(Debug, Clone)]
struct IndexedTool {
    name: String,
    vocabulary: BTreeSet<String>,
}

/// Router over safe, parameterless tools
#[derive(Debug, Clone, Default)]
pub struct LexicalRouter {
    index: Vec<IndexedTool>,
}

impl LexicalRouter {
    /// Index the eligible tools among `descriptors`
    pub fn new<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = ToolDescriptor>,
    {
        let index: Vec<IndexedTool> = descriptors
            .into_iter()
            .filter(|d| d.risk_level == ToolRisk::Safe && d.required_params().next().is_none())
            .map(|d| {
                let mut vocabulary: BTreeSet<String> = tokenize(&d.name).into_iter().collect();
                vocabulary.extend(tokenize(&d.description));
                for alias in &d.aliases {
                    vocabulary.extend(tokenize(alias));
                }
                IndexedTool {
                    name: d.name,
                    vocabulary,
                }
            })
            .collect();
        tracing::info!(tools = index.len(), "indexed tools for routing");
        Self { index }
    }

    pub fn indexed_tools(&self) -> Vec<&str> {
        self.index.iter().map(|t| t.name.as_str()).collect()
    }

    /// Top `limit` candidates, best first
    pub fn scores(&self, query: &str, limit: usize) -> Vec<RouteMatch> {
        let words = tokenize(query);
        if words.is_empty() {
            return Vec::new();
        }
        let mut matches: Vec<RouteMatch> = self
            .index
            .iter()
            .map(|tool| {
                let hits = words.iter().filter(|w| tool.vocabulary.contains(*w)).count();
                RouteMatch {
                    tool: tool.name.clone(),
                    score: hits as f64 / words.len() as f64,
                }
            })
            .filter(|m| m.score > 0.0)
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool.cmp(&b.tool))
        });
        matches.truncate(limit);
        matches
    }
}

impl Router for LexicalRouter {
    fn route(&self, query: &str) -> Option<RouteMatch> {
        let best = self.scores(query, 1).into_iter().next();
        if let Some(hit) = &best {
            tracing::debug!(query, tool = %hit.tool, score = hit.score, "router check");
        }
        best
    }
}
