//! Reference corpora: scenario samples and declaration surfaces
//!
//! Lexical BM25 ranking over per-host sample snippets, a second-pass ranker
//! that pulls the API declarations most relevant to a task breakdown, and
//! the provider that fetches raw declaration surfaces from disk or HTTPS.

use crate::analyzer::declarations::DeclarationIndex;
use crate::analyzer::{Host, SurfaceProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Read-only projection of one API surface member, as handed to prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclarationEntry {
    pub name: String,
    pub doc_link: String,
    /// Signature text, rendered into pseudo-class prompt blocks.
    pub code_sample: String,
    pub description: String,
    /// Owning type name.
    pub definition: String,
    /// Namespace the owning type lives in.
    pub usage: String,
}

/// One reference snippet from the sample corpus.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub host: Host,
    pub code: String,
}

/// Lexically ranked sample retrieval.
pub struct SampleStore {
    samples: Vec<Sample>,
}

impl SampleStore {
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn empty() -> Self {
        Self { samples: Vec::new() }
    }

    /// Load `<dir>/<host>/<name>.ts` files. Unreadable files and unknown
    /// host directories are skipped.
    pub fn load_dir(dir: &Path) -> Self {
        let mut samples = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ts") {
                continue;
            }
            let Some(host) = path
                .strip_prefix(dir)
                .ok()
                .and_then(|rel| rel.components().next())
                .and_then(|c| c.as_os_str().to_str())
                .and_then(Host::parse)
            else {
                continue;
            };
            let Ok(code) = std::fs::read_to_string(path) else {
                continue;
            };
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("sample")
                .to_string();
            samples.push(Sample { name, host, code });
        }
        tracing::debug!("loaded {} samples from {}", samples.len(), dir.display());
        Self { samples }
    }

    /// The `k` samples for `host` scoring highest against the query.
    /// Zero-scoring samples are never returned.
    pub fn top_k(&self, host: Host, query: &str, k: usize) -> Vec<&Sample> {
        let candidates: Vec<&Sample> = self.samples.iter().filter(|s| s.host == host).collect();
        let docs: Vec<Vec<String>> = candidates.iter().map(|s| tokenize(&s.code)).collect();
        let ranked = bm25_rank(query, &docs);
        ranked
            .into_iter()
            .take(k)
            .map(|(doc_index, _)| candidates[doc_index])
            .collect()
    }
}

/// The `k` declaration-surface members most relevant to a breakdown text,
/// one entry per member, ranked lexically.
pub fn most_relevant_declarations(
    index: &DeclarationIndex,
    query: &str,
    k: usize,
) -> Vec<DeclarationEntry> {
    let mut entries = Vec::new();
    let mut docs = Vec::new();
    for decl in index.types() {
        for member in &decl.members {
            docs.push(tokenize(&format!(
                "{} {} {}",
                decl.name, member.name, member.doc
            )));
            entries.push(DeclarationEntry {
                name: member.name.clone(),
                doc_link: String::new(),
                code_sample: member.signature.clone(),
                description: member.doc.clone(),
                definition: decl.name.clone(),
                usage: decl.namespace.clone(),
            });
        }
    }
    let ranked = bm25_rank(query, &docs);
    ranked
        .into_iter()
        .take(k)
        .map(|(doc_index, _)| entries[doc_index].clone())
        .collect()
}

/// Group entries by owning type for pseudo-class prompt rendering.
pub fn group_by_owner(entries: &[DeclarationEntry]) -> Vec<(String, Vec<String>)> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for entry in entries {
        if !grouped.contains_key(&entry.definition) {
            order.push(entry.definition.clone());
        }
        grouped
            .entry(entry.definition.clone())
            .or_default()
            .push(entry.code_sample.clone());
    }
    order
        .into_iter()
        .map(|owner| {
            let signatures = grouped.remove(&owner).unwrap_or_default();
            (owner, signatures)
        })
        .collect()
}

/// Tokenize for ranking: lowercase words, with camelCase identifiers also
/// contributing their parts (`getRange` -> get, range, getrange).
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.len() < 2 {
            continue;
        }
        tokens.push(raw.to_lowercase());
        let parts = split_camel_case(raw);
        if parts.len() > 1 {
            tokens.extend(parts.into_iter().filter(|p| p.len() >= 2));
        }
    }
    tokens
}

fn split_camel_case(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for c in word.chars() {
        if c.is_uppercase() && !current.is_empty() {
            parts.push(current.to_lowercase());
            current = String::new();
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current.to_lowercase());
    }
    parts
}

/// BM25 over tokenized documents. Returns `(doc_index, score)` sorted by
/// descending score, zero scores dropped.
fn bm25_rank(query: &str, docs: &[Vec<String>]) -> Vec<(usize, f64)> {
    if docs.is_empty() {
        return Vec::new();
    }
    let query_terms = tokenize(query);
    let doc_count = docs.len() as f64;
    let avg_len = docs.iter().map(Vec::len).sum::<usize>() as f64 / doc_count;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in docs {
        let mut seen: Vec<&str> = Vec::new();
        for token in doc {
            if !seen.contains(&token.as_str()) {
                seen.push(token);
                *doc_freq.entry(token).or_insert(0) += 1;
            }
        }
    }

    let mut scores: Vec<(usize, f64)> = docs
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let len_norm = 1.0 - BM25_B + BM25_B * (doc.len() as f64 / avg_len.max(1.0));
            let mut score = 0.0;
            for term in &query_terms {
                let tf = doc.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let df = doc_freq.get(term.as_str()).copied().unwrap_or(0) as f64;
                let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();
                score += idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * len_norm);
            }
            (i, score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scores
}

/// Fetches declaration surfaces from configured URLs or a local directory,
/// in that order. The raw text is cached per host by the catalog, not here.
pub struct FileSurfaceProvider {
    declarations_dir: Option<PathBuf>,
    declaration_urls: HashMap<String, String>,
}

impl FileSurfaceProvider {
    pub fn new(
        declarations_dir: Option<PathBuf>,
        declaration_urls: HashMap<String, String>,
    ) -> Self {
        Self {
            declarations_dir,
            declaration_urls,
        }
    }
}

#[async_trait]
impl SurfaceProvider for FileSurfaceProvider {
    async fn fetch(&self, host: Host) -> anyhow::Result<String> {
        if let Some(url) = self.declaration_urls.get(&host.namespace().to_lowercase()) {
            let response = reqwest::get(url).await?;
            if !response.status().is_success() {
                anyhow::bail!("declaration fetch for {host} failed: {}", response.status());
            }
            return Ok(response.text().await?);
        }
        let dir = self
            .declarations_dir
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no declarations directory configured"))?;
        let path = dir.join(format!("{}.d.ts", host.namespace().to_lowercase()));
        Ok(std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SampleStore {
        SampleStore::from_samples(vec![
            Sample {
                name: "read-range".to_string(),
                host: Host::Excel,
                code: "async function main() { const range = sheet.getRange(\"A1\"); range.load(\"values\"); }".to_string(),
            },
            Sample {
                name: "add-chart".to_string(),
                host: Host::Excel,
                code: "async function main() { const chart = sheet.charts.add(\"ColumnClustered\", range); }".to_string(),
            },
            Sample {
                name: "insert-paragraph".to_string(),
                host: Host::Word,
                code: "async function main() { body.insertParagraph(\"hello\", \"End\"); }".to_string(),
            },
        ])
    }

    #[test]
    fn test_top_k_prefers_lexical_match() {
        let store = store();
        let top = store.top_k(Host::Excel, "read a range value from the sheet", 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "read-range");
    }

    #[test]
    fn test_top_k_filters_by_host() {
        let store = store();
        let top = store.top_k(Host::Word, "insert a paragraph", 5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].host, Host::Word);
    }

    #[test]
    fn test_top_k_without_match_is_empty() {
        let store = store();
        let top = store.top_k(Host::PowerPoint, "anything at all", 3);
        assert!(top.is_empty());
    }

    #[test]
    fn test_tokenize_splits_camel_case() {
        let tokens = tokenize("sheet.getRange(\"A1\")");
        assert!(tokens.contains(&"getrange".to_string()));
        assert!(tokens.contains(&"range".to_string()));
    }

    #[test]
    fn test_most_relevant_declarations_ranked() {
        let surface = r#"
declare namespace Excel {
    class Worksheet {
        /** Gets the range object specified by the address. */
        getRange(address: string): Excel.Range;
        /** Activates the worksheet. */
        activate(): void;
    }
    class Chart {
        /** Sets the chart title. */
        setTitle(title: string): void;
    }
}
"#;
        let index = DeclarationIndex::parse(Host::Excel, surface);
        let entries = most_relevant_declarations(&index, "read the range at an address", 2);
        assert!(!entries.is_empty());
        assert_eq!(entries[0].name, "getRange");
        assert_eq!(entries[0].definition, "Worksheet");
        assert_eq!(entries[0].usage, "Excel");
    }

    #[test]
    fn test_group_by_owner_keeps_first_seen_order() {
        let entries = vec![
            DeclarationEntry {
                name: "getRange".into(),
                doc_link: String::new(),
                code_sample: "getRange(address: string): Excel.Range;".into(),
                description: String::new(),
                definition: "Worksheet".into(),
                usage: "Excel".into(),
            },
            DeclarationEntry {
                name: "load".into(),
                doc_link: String::new(),
                code_sample: "load(propertyNames?: string): Excel.Range;".into(),
                description: String::new(),
                definition: "Range".into(),
                usage: "Excel".into(),
            },
            DeclarationEntry {
                name: "activate".into(),
                doc_link: String::new(),
                code_sample: "activate(): void;".into(),
                description: String::new(),
                definition: "Worksheet".into(),
                usage: "Excel".into(),
            },
        ];
        let grouped = group_by_owner(&entries);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "Worksheet");
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0, "Range");
    }

    #[test]
    fn test_load_dir_reads_host_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let excel = dir.path().join("excel");
        std::fs::create_dir_all(&excel).unwrap();
        std::fs::write(excel.join("read-cell.ts"), "const x = 1;").unwrap();
        std::fs::write(dir.path().join("not-a-host.ts"), "ignored").unwrap();

        let store = SampleStore::load_dir(dir.path());
        let top = store.top_k(Host::Excel, "const", 5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "read-cell");
    }

    #[tokio::test]
    async fn test_file_provider_reads_surface() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("excel.d.ts"), "declare namespace Excel {}").unwrap();
        let provider = FileSurfaceProvider::new(Some(dir.path().to_path_buf()), HashMap::new());
        let text = provider.fetch(Host::Excel).await.unwrap();
        assert!(text.contains("Excel"));
        assert!(provider.fetch(Host::Word).await.is_err());
    }
}
