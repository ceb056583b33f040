//! End-to-end pipeline tests with a scripted completion client and an
//! in-memory Excel declaration surface. No network, no real model.

use async_trait::async_trait;
use scriptsmith::analyzer::{
    DeclarationCatalog, Host, IssueDetector, SnippetAnalyzer, SurfaceProvider,
};
use scriptsmith::corpus::{Sample, SampleStore};
use scriptsmith::correct::IssueCorrector;
use scriptsmith::generate::CodeGenerator;
use scriptsmith::llm::{ChatMessage, CompletionClient, Model};
use scriptsmith::pipeline::{self, PipelineOutcome, Skill, SkillSet, WorkItem};
use scriptsmith::progress::SilentProgress;
use scriptsmith::telemetry::TelemetryData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const EXCEL_SURFACE: &str = r#"
declare namespace Excel {
    function run(callback: (context: Excel.RequestContext) => any): any;
    class RequestContext {
        readonly workbook: Excel.Workbook;
        sync(): any;
    }
    class Workbook {
        /** Gets the currently active worksheet in the workbook. */
        getActiveWorksheet(): Excel.Worksheet;
    }
    class Worksheet {
        readonly name: string;
        /** Gets the range object specified by the address. */
        getRange(address: string): Excel.Range;
    }
    class Range {
        values: any[][];
        readonly address: string;
        /** Queues up a command to load the specified properties. */
        load(propertyNames?: string): Excel.Range;
        getCell(row: number, column: number): Excel.Range;
    }
}
"#;

struct FixedSurface;

#[async_trait]
impl SurfaceProvider for FixedSurface {
    async fn fetch(&self, host: Host) -> anyhow::Result<String> {
        match host {
            Host::Excel => Ok(EXCEL_SURFACE.to_string()),
            _ => anyhow::bail!("no surface for {host}"),
        }
    }
}

/// Returns scripted responses in call order.
struct ScriptedClient {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(responses: Vec<String>) -> Arc<Self> {
        let mut responses = responses;
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        _model: Model,
        _messages: &[ChatMessage],
        _cancel: &CancellationToken,
    ) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no scripted response left"))
    }
}

const CLEAN_SNIPPET: &str = r#"async function readCellValue(context: Excel.RequestContext) {
  const sheet = context.workbook.getActiveWorksheet();
  const range = sheet.getRange("A1");
  range.load("values");
  await context.sync();
  return range.values;
}

async function main() {
  await Excel.run(async (context: Excel.RequestContext) => {
    const values = await readCellValue(context);
    console.log(values);
  });
}"#;

fn build_pipeline(client: Arc<ScriptedClient>) -> (Arc<dyn Skill>, Arc<DeclarationCatalog>) {
    let catalog = Arc::new(DeclarationCatalog::new(Box::new(FixedSurface)));
    let detector = Arc::new(IssueDetector::new(catalog.clone()));
    let progress = Arc::new(SilentProgress);
    let samples = Arc::new(SampleStore::from_samples(vec![Sample {
        name: "read-cell".to_string(),
        host: Host::Excel,
        code: "const range = sheet.getRange(\"B2\");\nrange.load(\"values\");".to_string(),
    }]));

    let client: Arc<dyn CompletionClient> = client;
    let generator: Arc<dyn Skill> = Arc::new(CodeGenerator::new(
        client.clone(),
        samples,
        catalog.clone(),
        progress.clone(),
    ));
    let corrector: Arc<dyn Skill> = Arc::new(IssueCorrector::new(client, detector, progress));
    let composite: Arc<dyn Skill> = Arc::new(SkillSet::new(
        "generate-and-correct",
        vec![generator, corrector],
        2,
    ));
    (composite, catalog)
}

#[tokio::test]
async fn test_read_a1_end_to_end_succeeds_without_fixer() {
    let client = ScriptedClient::new(vec![
        // pre-scan
        r#"{"host": "Excel", "customFunctions": false, "complexity": 20, "shouldContinue": true}"#
            .to_string(),
        // task breakdown
        r#"```json
{"spec": "Read the value of cell A1 on the active worksheet and log it to the console.", "funcs": ["Create a function named 'readCellValue' that reads the value of cell A1 from the active worksheet and returns it"]}
```"#
            .to_string(),
        // synthesis
        format!("```typescript\n{}\n```", CLEAN_SNIPPET),
    ]);

    let (composite, _catalog) = build_pipeline(client.clone());
    let item = WorkItem::new("read A1 on the active worksheet and log it");
    let (outcome, item) =
        pipeline::execute(&[composite], item, &CancellationToken::new()).await;

    assert_eq!(outcome, PipelineOutcome::Completed);
    assert_eq!(item.appendix.host, Some(Host::Excel));
    assert!(!item.appendix.is_custom_function);
    assert_eq!(item.appendix.complexity, Some(20));

    // breakdown carries the model's subtask plus the synthesized entry one
    assert_eq!(item.appendix.code_task_breakdown.len(), 2);
    assert!(item.appendix.code_task_breakdown[0].contains("A1"));
    let entry_subtask = item.appendix.code_task_breakdown.last().unwrap();
    assert!(entry_subtask.contains("'main'"));
    assert!(entry_subtask.contains("async"));

    // three LLM calls: pre-scan, breakdown, synthesis. The corrector never
    // invoked the fixer because the baseline compiled clean.
    assert_eq!(client.calls(), 3);
    assert_eq!(item.appendix.code_snippet, CLEAN_SNIPPET);

    // the declaration retrieval ran exactly once and found surface members
    assert!(!item.appendix.api_declarations.is_empty());
}

#[tokio::test]
async fn test_custom_function_breakdown_has_no_synthesized_entry() {
    let custom_function = r#"/**
 * Adds two numbers.
 * @customfunction
 * @param {number} first First number.
 * @param {number} second Second number.
 */
function add(first, second) {
  return first + second;
}"#;
    let client = ScriptedClient::new(vec![
        r#"{"host": "Excel", "customFunctions": true, "complexity": 10, "shouldContinue": true}"#
            .to_string(),
        r#"{"spec": "A custom function that adds two numbers.", "funcs": ["Create a custom function named 'add' that returns the sum of its two number parameters"]}"#
            .to_string(),
        format!("```typescript\n{}\n```", custom_function),
    ]);

    let (composite, _catalog) = build_pipeline(client.clone());
    let item = WorkItem::new("a custom function that adds two numbers");
    let (outcome, item) =
        pipeline::execute(&[composite], item, &CancellationToken::new()).await;

    assert_eq!(outcome, PipelineOutcome::Completed);
    assert!(item.appendix.is_custom_function);
    // no entry-function subtask is synthesized for custom functions
    assert_eq!(item.appendix.code_task_breakdown.len(), 1);
    assert!(!item
        .appendix
        .code_task_breakdown
        .iter()
        .any(|task| task.contains("'main'")));
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn test_rejected_prescan_halts_pipeline() {
    let client = ScriptedClient::new(vec![
        r#"{"host": "Excel", "customFunctions": false, "complexity": 0, "shouldContinue": false}"#
            .to_string(),
    ]);

    let (composite, _catalog) = build_pipeline(client.clone());
    let item = WorkItem::new("write me a poem about databases");
    let (outcome, item) =
        pipeline::execute(&[composite], item, &CancellationToken::new()).await;

    assert_eq!(outcome, PipelineOutcome::Rejected);
    assert_eq!(client.calls(), 1);
    assert!(item.appendix.code_snippet.is_empty());
}

#[tokio::test]
async fn test_unparsable_prescan_is_failure_not_rejection() {
    let client = ScriptedClient::new(vec![
        "this is not json at all".to_string(),
        "still not json".to_string(),
    ]);

    let (composite, _catalog) = build_pipeline(client.clone());
    let item = WorkItem::new("read A1");
    let (outcome, _) = pipeline::execute(&[composite], item, &CancellationToken::new()).await;

    // both retry passes failed, but the pipeline still finishes best-effort
    assert_eq!(outcome, PipelineOutcome::BestEffort);
    assert_eq!(client.calls(), 2);
}

async fn analyze(snippet: &str) -> scriptsmith::analyzer::DetectionResult {
    let catalog = Arc::new(DeclarationCatalog::new(Box::new(FixedSurface)));
    let detector = IssueDetector::new(catalog);
    let mut telemetry = TelemetryData::default();
    detector
        .detect_issues(&SilentProgress, Host::Excel, false, snippet, &mut telemetry)
        .await
}

#[tokio::test]
async fn test_import_surfaces_exactly_one_dependency_diagnostic() {
    let snippet = "import fs from \"fs\";\n\nasync function main() {\n  const data = fs.readFileSync(\"x\");\n}";
    let result = analyze(snippet).await;
    let hits: Vec<_> = result
        .compile_errors
        .iter()
        .chain(result.runtime_errors.iter())
        .filter(|e| e.contains("\"import\" or \"require\""))
        .collect();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_missing_main_surfaces_exactly_one_entry_diagnostic() {
    let result = analyze("function helper() { return 1; }").await;
    let hits: Vec<_> = result
        .compile_errors
        .iter()
        .filter(|e| e.contains("Entry function 'main' not found"))
        .collect();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_main_with_parameter_surfaces_signature_diagnostic() {
    let result = analyze("async function main(p) { console.log(p); }").await;
    assert!(result
        .compile_errors
        .iter()
        .any(|e| e.contains("invalid signature")));
    assert!(!result
        .compile_errors
        .iter()
        .any(|e| e.contains("Entry function 'main' not found")));
}

#[tokio::test]
async fn test_clean_snippet_analyzes_with_one_a1_notice_only() {
    let result = analyze(CLEAN_SNIPPET).await;
    assert!(
        result.compile_errors.is_empty(),
        "compile errors: {:?}",
        result.compile_errors
    );
    // the "A1" literal itself earns the generic range-size notice and
    // nothing else fires
    assert_eq!(result.runtime_errors.len(), 1);
    assert!(result.runtime_errors[0].contains("string literal"));
}

#[tokio::test]
async fn test_misspelled_member_gets_targeted_hint() {
    let snippet = r#"
async function main() {
  await Excel.run(async (context: Excel.RequestContext) => {
    const sheet = context.workbook.getActiveWorksheet();
    const range = sheet.getRang("A1");
  });
}
"#;
    let result = analyze(snippet).await;
    assert!(result
        .compile_errors
        .iter()
        .any(|e| e.contains("does not exist on type 'Worksheet'") && e.contains("getRange")));
}

#[tokio::test]
async fn test_unknown_host_yields_empty_result() {
    let catalog = Arc::new(DeclarationCatalog::new(Box::new(FixedSurface)));
    let detector = IssueDetector::new(catalog);
    let mut telemetry = TelemetryData::default();
    let result = detector
        .detect_issues(
            &SilentProgress,
            Host::Word,
            false,
            "function main() {}",
            &mut telemetry,
        )
        .await;
    assert!(result.compile_errors.is_empty());
    assert!(result.runtime_errors.is_empty());
}
