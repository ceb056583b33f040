//! Code generation skill
//!
//! Turns the user's request into a first-draft snippet: pre-scan
//! classification, sample retrieval, task breakdown, then prompt assembly
//! and synthesis.

use crate::analyzer::{DeclarationCatalog, Host};
use crate::corpus::{self, SampleStore};
use crate::llm::{parse, tokens, ChatMessage, CompletionClient, Model};
use crate::pipeline::{Outcome, Skill, WorkItem};
use crate::progress::ProgressSink;
use crate::prompts;
use crate::telemetry;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// How many declaration members the second retrieval pass hands to the
/// synthesis prompt.
const DECLARATION_RETRIEVAL_K: usize = 12;

/// Shape of the pre-scan classification answer.
#[derive(Debug, Deserialize)]
struct PreScanVerdict {
    host: String,
    #[serde(rename = "customFunctions", default)]
    custom_functions: bool,
    #[serde(default)]
    complexity: u8,
    #[serde(rename = "shouldContinue", default)]
    should_continue: bool,
}

/// Shape of the task-breakdown answer.
#[derive(Debug, Deserialize)]
struct TaskBreakdown {
    #[serde(default)]
    spec: String,
    #[serde(default)]
    funcs: Vec<String>,
}

pub struct CodeGenerator {
    client: Arc<dyn CompletionClient>,
    samples: Arc<SampleStore>,
    catalog: Arc<DeclarationCatalog>,
    progress: Arc<dyn ProgressSink>,
}

impl CodeGenerator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        samples: Arc<SampleStore>,
        catalog: Arc<DeclarationCatalog>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            client,
            samples,
            catalog,
            progress,
        }
    }

    async fn pre_scan(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Option<PreScanVerdict> {
        let messages = vec![
            ChatMessage::user(prompts::pre_scan_user_prompt(&item.user_input)),
            ChatMessage::user(prompts::pre_scan_system_prompt()),
        ];
        let response = self
            .client
            .complete(Model::Speed, &messages, cancel)
            .await
            .ok()?;
        let verdict: PreScanVerdict = parse::parse_json_payload(&response)?;
        tracing::debug!(
            "pre-scan: host={}, custom={}, complexity={}",
            verdict.host,
            verdict.custom_functions,
            verdict.complexity
        );
        Some(verdict)
    }

    async fn breakdown(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Option<TaskBreakdown> {
        let mut user_prompt = prompts::breakdown_user_prompt(&item.user_input);
        if item.appendix.is_custom_function {
            user_prompt = format!(
                "{}{}",
                prompts::custom_function_breakdown_preamble(),
                user_prompt
            );
        }
        user_prompt.push_str("\nDo not generate code snippets.\n\nThink about that step by step.");

        let mut messages = vec![ChatMessage::user(user_prompt)];
        if !item.appendix.code_sample.is_empty() {
            messages.push(ChatMessage::user(prompts::code_sample_prompt(
                &item.appendix.code_sample,
            )));
        }

        let response = self
            .client
            .complete(Model::Smart, &messages, cancel)
            .await
            .ok()?;
        let breakdown: TaskBreakdown = parse::parse_json_payload(&response)?;
        if breakdown.spec.is_empty() || breakdown.funcs.is_empty() {
            return None;
        }
        Some(breakdown)
    }

    async fn generate_code(
        &self,
        item: &mut WorkItem,
        host: Host,
        cancel: &CancellationToken,
    ) -> Option<String> {
        // Second retrieval pass, computed at most once per run.
        if item.appendix.api_declarations.is_empty() {
            if let Some(index) = self.catalog.get_or_load(host).await {
                let query = format!(
                    "{} {}",
                    item.appendix.code_explanation,
                    item.appendix.code_task_breakdown.join(" ")
                );
                for entry in
                    corpus::most_relevant_declarations(&index, &query, DECLARATION_RETRIEVAL_K)
                {
                    item.appendix
                        .api_declarations
                        .insert(format!("{}.{}", entry.definition, entry.name), entry);
                }
            }
        }

        let entries: Vec<_> = item.appendix.api_declarations.values().cloned().collect();
        let grouped = corpus::group_by_owner(&entries);
        let declaration_message = if grouped.is_empty() {
            None
        } else {
            Some(ChatMessage::user(prompts::declarations_prompt(&grouped)))
        };

        let reference_message = match host {
            Host::Excel => Some(ChatMessage::user(if item.appendix.is_custom_function {
                prompts::CUSTOM_FUNCTION_REFERENCE_PROMPT.to_string()
            } else {
                prompts::EXCEL_REFERENCE_PROMPT.to_string()
            })),
            _ => None,
        };

        // Order matters: later messages are trimmed first, so the content
        // that must survive truncation goes closer to the front. Custom
        // functions depend on the reference notes more than on raw
        // declarations; normal scenarios are the other way around.
        let mut messages = vec![ChatMessage::user(prompts::generate_code_user_prompt(
            &item.appendix.code_explanation,
            host,
            &item.appendix.code_task_breakdown,
        ))];
        if item.appendix.is_custom_function {
            messages.extend(reference_message);
            messages.extend(declaration_message);
        } else {
            messages.extend(declaration_message);
            messages.extend(reference_message);
        }
        if !item.appendix.code_sample.is_empty() {
            let mut sample_prompt = prompts::code_sample_prompt(&item.appendix.code_sample);
            sample_prompt.push_str("\nLet's think step by step.\n");
            messages.push(ChatMessage::user(sample_prompt));
        }

        let model = Model::Smart;
        tokens::trim_messages_to_limit(&mut messages, model.context_limit());
        tracing::debug!(
            "synthesis prompt: ~{} tokens in {} messages",
            tokens::count_messages_tokens(&messages),
            messages.len()
        );

        let response = self.client.complete(model, &messages, cancel).await.ok()?;
        let snippet = parse::extract_first_code_block(&response)?;
        Some(correct_load_call_arguments(&snippet))
    }
}

#[async_trait]
impl Skill for CodeGenerator {
    fn name(&self) -> &str {
        "Code Generator"
    }

    fn capability(&self) -> &str {
        "Generate code"
    }

    fn can_invoke(&self, item: &WorkItem) -> bool {
        !item.user_input.trim().is_empty()
    }

    async fn invoke(&self, mut item: WorkItem, cancel: &CancellationToken) -> (Outcome, WorkItem) {
        self.progress.progress("Identifying code-generation scenario...");

        if !item.is_scanned() {
            let started = Instant::now();
            let verdict = self.pre_scan(&item, cancel).await;
            item.appendix.telemetry.add_measurement(
                telemetry::MEASUREMENT_CODEGEN_PRESCAN_TIME_SEC,
                started.elapsed().as_secs_f64(),
            );
            let Some(verdict) = verdict else {
                return (Outcome::Failure, item);
            };
            item.appendix.host = Host::parse(&verdict.host);
            item.appendix.is_custom_function = verdict.custom_functions;
            item.appendix.complexity = Some(verdict.complexity.min(100));
            item.appendix.should_continue = verdict.should_continue;
        }

        if !item.appendix.should_continue {
            // Reject makes the whole request rejected.
            return (Outcome::Rejected, item);
        }

        let Some(host) = item.appendix.host else {
            return (Outcome::Failure, item);
        };

        if item.appendix.code_sample.is_empty() {
            let started = Instant::now();
            let top = self.samples.top_k(host, &item.user_input, 1);
            item.appendix.telemetry.add_measurement(
                telemetry::MEASUREMENT_CODEGEN_GET_SAMPLE_TIME_SEC,
                started.elapsed().as_secs_f64(),
            );
            if let Some(sample) = top.first() {
                tracing::debug!("sample code found: {}", sample.name);
                item.appendix
                    .telemetry
                    .set_property(telemetry::PROPERTY_RELATED_SAMPLE, sample.name.clone());
                item.appendix.code_sample = sample.code.clone();
            }
        }

        if item.appendix.code_task_breakdown.is_empty() || item.appendix.code_explanation.is_empty()
        {
            let started = Instant::now();
            let breakdown = self.breakdown(&item, cancel).await;
            item.appendix.telemetry.add_measurement(
                telemetry::MEASUREMENT_CODEGEN_BREAKDOWN_TIME_SEC,
                started.elapsed().as_secs_f64(),
            );
            let Some(mut breakdown) = breakdown else {
                item.appendix
                    .telemetry
                    .add_measurement(telemetry::MEASUREMENT_CODEGEN_BREAKDOWN_FAILED_COUNT, 1.0);
                return (Outcome::Failure, item);
            };
            // The model cannot be steered precisely enough here: non-custom-
            // function snippets always need the async zero-parameter entry
            // function, custom functions must never have one synthesized.
            if !item.appendix.is_custom_function {
                breakdown.funcs.push(prompts::entry_function_subtask());
            }
            item.appendix.code_task_breakdown = breakdown.funcs;
            item.appendix.code_explanation = breakdown.spec;
        }

        item.appendix
            .telemetry
            .add_measurement(telemetry::MEASUREMENT_CODEGEN_ATTEMPT_COUNT, 1.0);
        if item.complexity() >= 50 {
            self.progress
                .progress("Generating code... this is a complex task, it may take a while.");
        } else {
            self.progress.progress("Generating code...");
        }

        let started = Instant::now();
        let snippet = self.generate_code(&mut item, host, cancel).await;
        item.appendix.telemetry.add_measurement(
            telemetry::MEASUREMENT_CODEGEN_TIME_TOTAL_SEC,
            started.elapsed().as_secs_f64(),
        );

        match snippet {
            Some(snippet) => {
                item.appendix
                    .telemetry
                    .set_property(telemetry::PROPERTY_CODEGEN_RESULT, "true");
                item.appendix.code_snippet = snippet;
                (Outcome::Success, item)
            }
            None => {
                item.appendix
                    .telemetry
                    .set_property(telemetry::PROPERTY_CODEGEN_RESULT, "false");
                (Outcome::Failure, item)
            }
        }
    }
}

/// Models regularly split a multi-field load into separate string arguments;
/// the API takes one comma-joined string. `load("a", "b")` -> `load("a, b")`.
pub fn correct_load_call_arguments(snippet: &str) -> String {
    let Ok(re) = Regex::new(r#"\.load\(\s*("[^"]*"(?:\s*,\s*"[^"]*")+)\s*\)"#) else {
        return snippet.to_string();
    };
    re.replace_all(snippet, |caps: &regex::Captures| {
        let fields: Vec<&str> = caps[1]
            .split(',')
            .map(|part| part.trim().trim_matches('"'))
            .collect();
        format!(".load(\"{}\")", fields.join(", "))
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_fix_joins_string_arguments() {
        let fixed = correct_load_call_arguments("range.load(\"values\", \"address\");");
        assert_eq!(fixed, "range.load(\"values, address\");");
    }

    #[test]
    fn test_load_fix_leaves_single_argument_alone() {
        let snippet = "range.load(\"values\");";
        assert_eq!(correct_load_call_arguments(snippet), snippet);
    }

    #[test]
    fn test_load_fix_handles_three_fields() {
        let fixed = correct_load_call_arguments("r.load(\"a\", \"b\", \"c\")");
        assert_eq!(fixed, "r.load(\"a, b, c\")");
    }

    #[test]
    fn test_prescan_verdict_parses_dual_format() {
        let raw: PreScanVerdict = parse::parse_json_payload(
            r#"{"host": "Excel", "customFunctions": true, "complexity": 72, "shouldContinue": true}"#,
        )
        .unwrap();
        assert!(raw.custom_functions);
        assert_eq!(raw.complexity, 72);

        let fenced: PreScanVerdict = parse::parse_json_payload(
            "```json\n{\"host\": \"Word\", \"shouldContinue\": false}\n```",
        )
        .unwrap();
        assert_eq!(fenced.host, "Word");
        assert!(!fenced.should_continue);
    }

    #[test]
    fn test_breakdown_parses_spec_and_funcs() {
        let parsed: TaskBreakdown = parse::parse_json_payload(
            r#"{"spec": "Read cell A1.", "funcs": ["Create a function named 'readCell'"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.funcs.len(), 1);
        assert!(!parsed.spec.is_empty());
    }
}
