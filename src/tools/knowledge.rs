//! Local knowledge base (research notes, protocol whitepapers)
//!
//! Documents under the configured directory are split into overlapping
//! chunks once at startup and searched by term overlap.

use super::{string_param, Tool};
use crate::error::AdvisorError;
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const CHUNK_SIZE: usize = 800;
const CHUNK_OVERLAP: usize = 100;
const TOP_K: usize = 3;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub source: String,
    pub text: String,
    terms: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct KnowledgeBase {
    chunks: Vec<Chunk>,
}

impl KnowledgeBase {
    /// Load every `.md` / `.txt` file in `dir`. A missing directory yields an
    /// empty index.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Knowledge directory not found, index is empty");
            return Ok(Self::default());
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_lowercase().as_str(), "md" | "txt"))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();

        let mut base = Self::default();
        for path in entries {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable knowledge document");
                    continue;
                }
            };
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            base.add_document(&source, &text);
        }

        info!(
            dir = %dir.display(),
            chunks = base.chunks.len(),
            "Knowledge base loaded"
        );
        Ok(base)
    }

    pub fn add_document(&mut self, source: &str, text: &str) {
        for piece in split_chunks(text, CHUNK_SIZE, CHUNK_OVERLAP) {
            let terms = tokenize(&piece);
            if terms.is_empty() {
                continue;
            }
            self.chunks.push(Chunk {
                source: source.to_string(),
                text: piece,
                terms,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Best `k` chunks by shared-term count, ties kept in load order.
    pub fn search(&self, query: &str, k: usize) -> Vec<&Chunk> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| (idx, chunk.terms.intersection(&query_terms).count()))
            .filter(|(_, score)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(k)
            .map(|(idx, _)| &self.chunks[idx])
            .collect()
    }
}

/// Character windows of `size` advancing by `size - overlap`.
fn split_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            out.push(piece.trim().to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

/// Lowercased ASCII words plus single CJK characters.
fn tokenize(text: &str) -> HashSet<String> {
    let mut terms = HashSet::new();
    let mut word = String::new();

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            word.push(ch.to_ascii_lowercase());
            continue;
        }
        if word.len() > 1 {
            terms.insert(std::mem::take(&mut word));
        } else {
            word.clear();
        }
        if is_cjk(ch) {
            terms.insert(ch.to_string());
        }
    }
    if word.len() > 1 {
        terms.insert(word);
    }
    terms
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF)
}

pub struct KnowledgeBaseTool {
    base: Arc<KnowledgeBase>,
}

impl KnowledgeBaseTool {
    pub fn new(base: Arc<KnowledgeBase>) -> Self {
        Self { base }
    }
}

#[async_trait::async_trait]
impl Tool for KnowledgeBaseTool {
    fn name(&self) -> &'static str {
        "query_knowledge_base"
    }

    fn description(&self) -> &'static str {
        "查询专业的加密货币研报、DeFi 白皮书和宏观分析框架。问到协议机制（如集中流动性、无常损失）或宏观市场周期时调用。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Question or topic" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let query = string_param(input, &["query", "text"]).ok_or_else(|| {
            AdvisorError::InvalidToolInput("Expected 'query' for query_knowledge_base".to_string())
        })?;

        let hits = self.base.search(query, TOP_K);
        info!(query = %query, hits = hits.len(), "Knowledge base searched");

        if hits.is_empty() {
            return Ok(ToolOutput::text("本地知识库中未找到相关专业资料。"));
        }

        let joined = hits
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolOutput::text(joined))
    }
}
