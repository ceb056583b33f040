//! Self-reflection loop: analyze, fix, re-analyze
//!
//! Bounded, cost-aware repair of the generated snippet. Every fix is
//! re-analyzed and checked against the baseline before it may become the
//! current candidate; a fix that is worse than its baseline is rejected in
//! place and never surfaced.

use crate::analyzer::{DetectionResult, Host, SnippetAnalyzer};
use crate::llm::{parse, tokens, ChatMessage, CompletionClient, Model};
use crate::pipeline::{Outcome, Skill, WorkItem};
use crate::progress::ProgressSink;
use crate::prompts;
use crate::telemetry;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Token budget for the host reference block in fix prompts.
const REFERENCE_TOKEN_BUDGET: usize = 3500;

/// Retry budget and compile-error tolerance for a complexity score.
pub fn retry_tolerances(complexity: u8) -> (usize, usize) {
    if complexity < 50 {
        (5, 3)
    } else {
        (7, 5)
    }
}

pub struct IssueCorrector {
    client: Arc<dyn CompletionClient>,
    analyzer: Arc<dyn SnippetAnalyzer>,
    progress: Arc<dyn ProgressSink>,
}

impl IssueCorrector {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        analyzer: Arc<dyn SnippetAnalyzer>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            client,
            analyzer,
            progress,
        }
    }

    /// One fixer call. Stateless request/response; `None` means "no usable
    /// answer" and the iteration is skipped.
    #[allow(clippy::too_many_arguments)]
    async fn fix_issue(
        &self,
        host: Host,
        is_custom_function: bool,
        code_snippet: &str,
        substeps: &[String],
        errors: &[String],
        warnings: &[String],
        historical_errors: &[String],
        additional_info: &str,
        code_sample: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        if errors.is_empty() {
            return Some(code_snippet.to_string());
        }

        let mut messages = vec![
            ChatMessage::user(prompts::fix_issue_user_prompt(
                code_snippet,
                additional_info,
                historical_errors,
            )),
            ChatMessage::user(prompts::fix_issue_system_prompt(
                host, substeps, errors, warnings,
            )),
        ];
        if !code_sample.is_empty() {
            messages.push(ChatMessage::user(prompts::code_sample_prompt(code_sample)));
        }
        if host == Host::Excel {
            let reference = if is_custom_function {
                prompts::CUSTOM_FUNCTION_REFERENCE_PROMPT
            } else {
                prompts::EXCEL_REFERENCE_PROMPT
            };
            if tokens::estimate_tokens(reference) < REFERENCE_TOKEN_BUDGET {
                messages.push(ChatMessage::user(reference.to_string()));
            }
        }

        let model = Model::Speed;
        tokens::trim_messages_to_limit(&mut messages, model.context_limit());

        let response = self.client.complete(model, &messages, cancel).await.ok()?;
        // A fix answer may restate the broken snippet first; the last fenced
        // block is the candidate.
        parse::extract_last_code_block(&response)
    }

    /// Regression guard: reject a fix that nearly deleted the snippet or
    /// raised the compile-error count above its own baseline.
    fn terminate_fix_iteration(
        baseline_code: &str,
        baseline: &DetectionResult,
        fixed_code: &str,
        fixed: &DetectionResult,
    ) -> Option<String> {
        let shrinkage = baseline_code.len() as i64 - fixed_code.len() as i64;
        if shrinkage > 0 && shrinkage as usize >= fixed_code.len() {
            tracing::debug!("terminate: code length reduced too much");
            return Some("Send back the whole snippet without any explanation.".to_string());
        }
        if fixed.compile_errors.len() > baseline.compile_errors.len() {
            tracing::debug!("terminate: compile error count increased");
            return Some("The previous fix introduced more compile errors.".to_string());
        }
        None
    }
}

/// Location and hint scrubbed from a diagnostic, for the historical list.
fn error_digest(error: &str) -> String {
    let scrubbed = Regex::new(r"at Line \d+:")
        .map(|re| re.replace_all(error, "").into_owned())
        .unwrap_or_else(|_| error.to_string());
    scrubbed
        .split("\nFix suggestion")
        .next()
        .unwrap_or(&scrubbed)
        .trim()
        .to_string()
}

/// The model sometimes echoes an explicit `main()` invocation back; the
/// host calls the entry function itself, so strip it on acceptance.
fn strip_entry_invocation(snippet: &str) -> String {
    match Regex::new(r"(await\s+)?main\(\)(\..+)?;") {
        Ok(re) => re.replacen(snippet, 1, "").into_owned(),
        Err(_) => snippet.to_string(),
    }
}

#[async_trait]
impl Skill for IssueCorrector {
    fn name(&self) -> &str {
        "Code Issue Corrector"
    }

    fn capability(&self) -> &str {
        "Fix code issues"
    }

    fn can_invoke(&self, item: &WorkItem) -> bool {
        item.appendix.host.is_some()
            && !item.appendix.code_snippet.is_empty()
            && !item.appendix.code_task_breakdown.is_empty()
    }

    async fn invoke(&self, mut item: WorkItem, cancel: &CancellationToken) -> (Outcome, WorkItem) {
        let Some(host) = item.appendix.host else {
            return (Outcome::Failure, item);
        };
        let is_custom_function = item.appendix.is_custom_function;
        let substeps = item.appendix.code_task_breakdown.clone();
        let code_sample = item.appendix.code_sample.clone();
        let mut code_snippet = item.appendix.code_snippet.clone();

        let total_started = Instant::now();
        let mut telemetry_data = item.appendix.telemetry.clone();
        let mut baseline = self
            .analyzer
            .detect_issues(
                self.progress.as_ref(),
                host,
                is_custom_function,
                &code_snippet,
                &mut telemetry_data,
            )
            .await;
        tracing::debug!(
            "baseline: [C] {}, [R] {}",
            baseline.compile_errors.len(),
            baseline.runtime_errors.len()
        );

        let (max_retries, issue_tolerance) = retry_tolerances(item.complexity());

        if baseline.compile_errors.is_empty() && baseline.runtime_errors.is_empty() {
            tracing::debug!("no issue found in baseline, skipping self reflection");
            telemetry_data.set_measurement(telemetry::MEASUREMENT_ERRORS_AFTER_CORRECTION, 0.0);
            item.appendix.telemetry = telemetry_data;
            return (Outcome::Success, item);
        }
        if baseline.compile_errors.len() > issue_tolerance {
            // Don't waste budget on low quality code, fail fast.
            tracing::debug!(
                "{} compile errors beyond tolerance {}, skipping self reflection",
                baseline.compile_errors.len(),
                issue_tolerance
            );
            telemetry_data.set_measurement(
                telemetry::MEASUREMENT_ERRORS_AFTER_CORRECTION,
                baseline.compile_errors.len() as f64,
            );
            item.appendix.telemetry = telemetry_data;
            return (Outcome::FailedAndGoNext, item);
        }

        let mut historical_errors: Vec<String> = Vec::new();
        let mut additional_info = String::new();

        for index in 0..max_retries {
            let remaining = max_retries - index;
            if remaining < baseline.compile_errors.len() {
                // Too many errors left for the remaining rounds, fail fast.
                tracing::debug!(
                    "{} compile errors to fix in {} remaining rounds, failing fast",
                    baseline.compile_errors.len(),
                    remaining
                );
                break;
            }

            self.progress.progress("Fixing errors...");
            let iteration_started = Instant::now();
            let fixed_code = self
                .fix_issue(
                    host,
                    is_custom_function,
                    &code_snippet,
                    &substeps,
                    &baseline.compile_errors,
                    &baseline.runtime_errors,
                    &historical_errors,
                    &additional_info,
                    &code_sample,
                    cancel,
                )
                .await;
            tracing::debug!(
                "self reflection iteration {} took {:?}",
                index + 1,
                iteration_started.elapsed()
            );
            let Some(fixed_code) = fixed_code else {
                continue;
            };

            let issues_after_fix = self
                .analyzer
                .detect_issues(
                    self.progress.as_ref(),
                    host,
                    is_custom_function,
                    &fixed_code,
                    &mut telemetry_data,
                )
                .await;
            historical_errors.extend(baseline.compile_errors.iter().map(|e| error_digest(e)));
            tracing::debug!(
                "after fix: [C] {}, [R] {}",
                issues_after_fix.compile_errors.len(),
                issues_after_fix.runtime_errors.len()
            );

            if let Some(suggestion) = Self::terminate_fix_iteration(
                &code_snippet,
                &baseline,
                &fixed_code,
                &issues_after_fix,
            ) {
                additional_info = suggestion;
                continue;
            }

            telemetry_data.set_measurement(
                telemetry::MEASUREMENT_SELF_REFLECTION_TIME_TOTAL_SEC,
                total_started.elapsed().as_secs_f64(),
            );
            telemetry_data
                .add_measurement(telemetry::MEASUREMENT_SELF_REFLECTION_ATTEMPT_COUNT, 1.0);

            // Ideally the fix converges on the baseline; on the last round a
            // clean result is accepted without the equivalence check.
            if issues_after_fix.compile_errors.is_empty()
                && (index == max_retries - 1 || issues_after_fix.are_same(&baseline))
            {
                let accepted = strip_entry_invocation(&fixed_code);
                item.appendix.code_snippet = accepted;
                telemetry_data
                    .set_property(telemetry::PROPERTY_SELF_REFLECTION_SUCCEEDED, "true");
                telemetry_data.set_measurement(
                    telemetry::MEASUREMENT_ERRORS_AFTER_CORRECTION,
                    issues_after_fix.compile_errors.len() as f64,
                );
                item.appendix.telemetry = telemetry_data;
                return (Outcome::Success, item);
            }

            // Prepare for the next iteration.
            code_snippet = fixed_code;
            baseline = issues_after_fix;
        }

        item.appendix.code_snippet = code_snippet;
        telemetry_data.set_property(telemetry::PROPERTY_SELF_REFLECTION_SUCCEEDED, "false");
        telemetry_data.set_measurement(
            telemetry::MEASUREMENT_ERRORS_AFTER_CORRECTION,
            baseline.compile_errors.len() as f64,
        );
        item.appendix.telemetry = telemetry_data;
        (Outcome::FailedAndGoNext, item)
    }
}
