//! Static issue detection for generated snippets
//!
//! Builds a synthetic program from a candidate snippet plus the host's
//! declaration surface, type-checks it, classifies every diagnostic into an
//! actionable fix hint, and runs heuristic runtime-risk scans. Malformed
//! snippets become diagnostics, never errors; only a missing declaration
//! surface yields a silently empty result.

pub mod classify;
pub mod compile;
pub mod declarations;
pub mod runtime;

pub use declarations::{
    DeclarationCatalog, DeclarationIndex, Host, MemberDecl, MemberKind, SurfaceProvider,
};

use crate::progress::ProgressSink;
use crate::telemetry::TelemetryData;
use async_trait::async_trait;
use std::sync::Arc;
use tree_sitter::Parser;

/// Classified output of one analyzer pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub compile_errors: Vec<String>,
    pub runtime_errors: Vec<String>,
    pub references: Vec<String>,
}

impl DetectionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order-preserving concatenation; duplicates are kept.
    pub fn merge(&mut self, other: DetectionResult) {
        self.compile_errors.extend(other.compile_errors);
        self.runtime_errors.extend(other.runtime_errors);
        self.references.extend(other.references);
    }

    /// Positional equality on both error lists plus reference count.
    ///
    /// Deliberately order-sensitive: `[A, B]` is not the same result as
    /// `[B, A]`, so a reshuffled-but-identical set of errors still counts
    /// as a change between correction iterations.
    pub fn are_same(&self, other: &DetectionResult) -> bool {
        self.compile_errors.len() == other.compile_errors.len()
            && self
                .compile_errors
                .iter()
                .zip(other.compile_errors.iter())
                .all(|(a, b)| a == b)
            && self.runtime_errors.len() == other.runtime_errors.len()
            && self
                .runtime_errors
                .iter()
                .zip(other.runtime_errors.iter())
                .all(|(a, b)| a == b)
            && self.references.len() == other.references.len()
    }

    pub fn is_clean(&self) -> bool {
        self.compile_errors.is_empty() && self.runtime_errors.is_empty()
    }
}

/// The analysis seam the corrector drives.
#[async_trait]
pub trait SnippetAnalyzer: Send + Sync {
    async fn detect_issues(
        &self,
        progress: &dyn ProgressSink,
        host: Host,
        is_custom_function: bool,
        code_snippet: &str,
        telemetry: &mut TelemetryData,
    ) -> DetectionResult;
}

/// Detects compile and runtime issues in one snippet against one host.
pub struct IssueDetector {
    catalog: Arc<DeclarationCatalog>,
}

impl IssueDetector {
    pub fn new(catalog: Arc<DeclarationCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<DeclarationCatalog> {
        &self.catalog
    }

    /// Analyze a snippet. The declaration index for the host is built on
    /// first use and shared afterwards.
    async fn detect_issues_inner(
        &self,
        progress: &dyn ProgressSink,
        host: Host,
        is_custom_function: bool,
        code_snippet: &str,
        telemetry: &mut TelemetryData,
    ) -> DetectionResult {
        progress.progress("Reviewing code...");

        let Some(index) = self.catalog.get_or_load(host).await else {
            return DetectionResult::new();
        };

        let mut parser = Parser::new();
        if parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .is_err()
        {
            tracing::warn!("typescript grammar unavailable, skipping analysis");
            return DetectionResult::new();
        }
        let Some(tree) = parser.parse(code_snippet, None) else {
            tracing::warn!("snippet did not produce a syntax tree, skipping analysis");
            return DetectionResult::new();
        };

        let (raw_diagnostics, summary) = compile::check_snippet(&tree, code_snippet, &index);
        let mut result = DetectionResult::new();
        result.compile_errors =
            classify::format_diagnostics(raw_diagnostics, &index, &self.catalog, telemetry);
        result.merge(runtime::scan(
            &tree,
            code_snippet,
            host,
            is_custom_function,
            &index,
            &summary,
        ));
        result
    }
}

#[async_trait]
impl SnippetAnalyzer for IssueDetector {
    async fn detect_issues(
        &self,
        progress: &dyn ProgressSink,
        host: Host,
        is_custom_function: bool,
        code_snippet: &str,
        telemetry: &mut TelemetryData,
    ) -> DetectionResult {
        self.detect_issues_inner(progress, host, is_custom_function, code_snippet, telemetry)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(compile: &[&str], runtime: &[&str]) -> DetectionResult {
        DetectionResult {
            compile_errors: compile.iter().map(|s| s.to_string()).collect(),
            runtime_errors: runtime.iter().map(|s| s.to_string()).collect(),
            references: Vec::new(),
        }
    }

    #[test]
    fn test_merge_preserves_order_and_duplicates() {
        let mut a = result_with(&["A", "B"], &["R"]);
        a.merge(result_with(&["B"], &[]));
        assert_eq!(a.compile_errors, vec!["A", "B", "B"]);
        assert_eq!(a.runtime_errors, vec!["R"]);
    }

    #[test]
    fn test_merge_never_drops_entries() {
        let mut a = result_with(&["A"], &[]);
        let b = result_with(&["B", "C"], &["R"]);
        let a_len = a.compile_errors.len();
        let b_len = b.compile_errors.len();
        a.merge(b);
        assert_eq!(a.compile_errors.len(), a_len + b_len);
    }

    #[test]
    fn test_are_same_is_reflexive() {
        let a = result_with(&["A", "B"], &["R"]);
        assert!(a.are_same(&a.clone()));
    }

    #[test]
    fn test_are_same_is_positional() {
        let a = result_with(&["A", "B"], &[]);
        let b = result_with(&["B", "A"], &[]);
        assert!(!a.are_same(&b));
    }

    #[test]
    fn test_are_same_checks_reference_count_only() {
        let mut a = result_with(&["A"], &[]);
        let mut b = result_with(&["A"], &[]);
        a.references.push("ref one".to_string());
        b.references.push("completely different ref".to_string());
        assert!(a.are_same(&b));
        b.references.push("second".to_string());
        assert!(!a.are_same(&b));
    }
}
