use anyhow::Result;
use clap::Parser;
use scriptsmith::analyzer::{DeclarationCatalog, IssueDetector};
use scriptsmith::config::Config;
use scriptsmith::corpus::{FileSurfaceProvider, SampleStore};
use scriptsmith::correct::IssueCorrector;
use scriptsmith::generate::CodeGenerator;
use scriptsmith::llm::OpenRouterClient;
use scriptsmith::pipeline::{self, PipelineOutcome, Skill, WorkItem};
use scriptsmith::progress::StderrProgress;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "scriptsmith",
    about = "Generate and verify host scripting snippets from a plain-text request",
    version
)]
struct Args {
    /// The feature request, e.g. "read A1 on the active worksheet and log it"
    request: String,

    /// Directory with per-host reference samples (overrides config)
    #[arg(long)]
    samples_dir: Option<PathBuf>,

    /// Directory with per-host declaration surfaces (overrides config)
    #[arg(long)]
    declarations_dir: Option<PathBuf>,

    /// How many times the generate/correct group may retry as a unit
    #[arg(long, default_value = "2")]
    retries: usize,

    /// Print telemetry counters after the run
    #[arg(long)]
    telemetry: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load();

    let client = OpenRouterClient::from_config(&config).ok_or_else(|| {
        anyhow::anyhow!("No API key configured. Set OPENROUTER_API_KEY or edit the config file.")
    })?;
    let client: Arc<dyn scriptsmith::llm::CompletionClient> = Arc::new(client);

    let samples = Arc::new(
        args.samples_dir
            .or(config.samples_dir.clone())
            .map(|dir| SampleStore::load_dir(&dir))
            .unwrap_or_else(SampleStore::empty),
    );

    let provider = FileSurfaceProvider::new(
        args.declarations_dir.or(config.declarations_dir.clone()),
        config.declaration_urls.clone(),
    );
    let catalog = Arc::new(DeclarationCatalog::new(Box::new(provider)));
    let detector = Arc::new(IssueDetector::new(catalog.clone()));
    let progress = Arc::new(StderrProgress);
    let cancel = CancellationToken::new();

    let generator: Arc<dyn Skill> = Arc::new(CodeGenerator::new(
        client.clone(),
        samples,
        catalog,
        progress.clone(),
    ));
    let corrector: Arc<dyn Skill> = Arc::new(IssueCorrector::new(client, detector, progress));
    let composite: Arc<dyn Skill> = Arc::new(pipeline::SkillSet::new(
        "generate-and-correct",
        vec![generator, corrector],
        args.retries,
    ));

    let item = WorkItem::new(args.request);
    let (outcome, item) = pipeline::execute(&[composite], item, &cancel).await;

    match outcome {
        PipelineOutcome::Rejected => {
            eprintln!("The request was rejected: it does not look like a host scripting task.");
            std::process::exit(2);
        }
        PipelineOutcome::Completed | PipelineOutcome::BestEffort => {
            if !item.appendix.code_explanation.is_empty() {
                eprintln!("\n{}\n", item.appendix.code_explanation);
            }
            if item.appendix.code_snippet.is_empty() {
                eprintln!("No snippet could be generated.");
                std::process::exit(1);
            }
            if outcome == PipelineOutcome::BestEffort {
                eprintln!("(best effort: some issues may remain)");
            }
            println!("{}", item.appendix.code_snippet);
        }
    }

    if args.telemetry {
        let mut entries: Vec<_> = item.appendix.telemetry.measurements.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in entries {
            eprintln!("{name}: {value}");
        }
    }

    Ok(())
}
