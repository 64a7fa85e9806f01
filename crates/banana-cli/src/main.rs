use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use banana_contracts::artifacts::{
    ArtifactPattern, DateBucket, LocalDirectory, ResultReconciler, SaveLocation, SequentialNamer,
    DEFAULT_EXTENSION, DEFAULT_PREFIX,
};
use banana_contracts::batch::{failure_hint, write_summary, BatchOutcome, BatchSummary};
use banana_contracts::request::{AspectRatio, GenerationMode, GenerationRequest, MAX_WORKERS};
use banana_contracts::slots::SlotSession;
use banana_contracts::ContractError;
use banana_engine::providers::provider_for_mode;
use banana_engine::{default_provider_registry, BatchConfig, BatchOrchestrator, ProviderTaskFactory};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "banana", version, about = "Parallel image generation with sequential auto-save")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one batch and save its results.
    Generate(GenerateArgs),
    /// Print the next free output names without writing anything.
    NextName(NextNameArgs),
    /// List recent outputs that a failed batch would recover.
    Recover(RecoverArgs),
}

#[derive(Debug, Parser)]
struct OutputArgs {
    /// Save directory. Without it, results go next to the first reference
    /// image, or into `./banana` when there is none.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,
    #[arg(long = "ext", default_value = DEFAULT_EXTENSION)]
    extension: String,
}

impl OutputArgs {
    fn pattern(&self) -> ArtifactPattern {
        ArtifactPattern::new(&self.prefix, DateBucket::today(), &self.extension)
    }

    fn location(&self) -> SaveLocation {
        match self.out.as_ref() {
            Some(out) => SaveLocation::Folder(out.clone()),
            None => SaveLocation::default(),
        }
    }

    fn directory(&self, source: Option<&Path>) -> PathBuf {
        self.location().resolve(source)
    }
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    output: OutputArgs,
    /// Parallel workers.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=MAX_WORKERS as i64))]
    batch: u8,
    #[arg(long, default_value = "text_to_image")]
    mode: GenerationMode,
    #[arg(long = "aspect-ratio", default_value = "1:1")]
    aspect_ratio: AspectRatio,
    /// Defaults to the provider for the mode; `dryrun` works offline.
    #[arg(long)]
    provider: Option<String>,
    /// Reference image, placed in the next free slot. Repeatable.
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    /// When all slots are taken, put the image in slot 1 instead of failing.
    #[arg(long)]
    replace_first_when_full: bool,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Age window for recovering results from disk.
    #[arg(long, default_value_t = 300)]
    max_age_secs: u64,
}

#[derive(Debug, Parser)]
struct NextNameArgs {
    #[command(flatten)]
    output: OutputArgs,
    /// Reference image whose folder is used when `--out` is absent.
    #[arg(long)]
    source: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    count: u32,
}

#[derive(Debug, Parser)]
struct RecoverArgs {
    #[command(flatten)]
    output: OutputArgs,
    /// Reference image whose folder is used when `--out` is absent.
    #[arg(long)]
    source: Option<PathBuf>,
    #[arg(long, default_value_t = 300)]
    max_age_secs: u64,
    #[arg(long, default_value_t = MAX_WORKERS)]
    limit: usize,
}

const EXIT_TOTAL_FAILURE: i32 = 2;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "banana=info,banana_engine=info,banana_contracts=info".into()),
    );
    // stdout carries results; diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("banana error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::NextName(args) => {
            run_next_name(args)?;
            Ok(0)
        }
        Command::Recover(args) => run_recover(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut session = SlotSession::new();
    for image in &args.images {
        fill_slot(&mut session, image, args.replace_first_when_full)?;
    }
    let request = GenerationRequest::from_session(
        &args.prompt,
        &session,
        args.mode,
        args.aspect_ratio,
        usize::from(args.batch),
    )?;

    let registry = default_provider_registry();
    let provider_name = args
        .provider
        .clone()
        .unwrap_or_else(|| provider_for_mode(args.mode).to_string());
    let Some(provider) = registry.get(&provider_name) else {
        bail!(
            "unknown provider '{provider_name}' (available: {})",
            registry.names().join(", ")
        );
    };
    let factory = ProviderTaskFactory::new(provider);

    let mut config = BatchConfig::with_location(args.output.location())
        .with_prefix(&args.output.prefix)
        .with_extension(&args.output.extension)
        .with_reconcile_max_age(Duration::from_secs(args.max_age_secs));
    if let Some(events) = args.events.as_ref() {
        config = config.with_events_path(events);
    }
    let orchestrator = BatchOrchestrator::new(config);

    let started_at = now_utc_iso();
    let handle = orchestrator.start(&request, &factory)?;
    info!(
        batch_id = handle.batch_id(),
        provider = factory.provider_name(),
        workers = request.worker_count(),
        "generating"
    );
    let outcome = handle.wait()?;
    let finished_at = now_utc_iso();

    report_outcome(&outcome);

    if let Some(summary_path) = args.summary.as_ref() {
        let summary = BatchSummary::from_outcome(&outcome, started_at, finished_at);
        let mut extra = Map::new();
        extra.insert("provider".to_string(), Value::from(provider_name));
        extra.insert("prompt".to_string(), Value::from(request.prompt_text()));
        write_summary(summary_path, &summary, Some(&extra))
            .with_context(|| format!("failed to write {}", summary_path.display()))?;
    }

    Ok(if outcome.status.is_usable() {
        0
    } else {
        EXIT_TOTAL_FAILURE
    })
}

/// Caller-side slot policy: next free slot, or slot 1 when full and allowed.
fn fill_slot(session: &mut SlotSession, image: &Path, replace_first_when_full: bool) -> Result<()> {
    if !image.is_file() {
        bail!("reference image not found: {}", image.display());
    }
    if session.add_to_next_available(image) {
        return Ok(());
    }
    if !replace_first_when_full {
        return Err(ContractError::SlotFull {
            capacity: session.slots().len(),
        })
        .with_context(|| format!("cannot add {}", image.display()));
    }
    if let Some(previous) = session.replace_at(0, image)? {
        warn!(
            replaced = %previous.display(),
            image = %image.display(),
            "all slots full; replaced slot 1"
        );
    }
    Ok(())
}

fn report_outcome(outcome: &BatchOutcome) {
    for path in &outcome.artifacts {
        println!("{}", path.display());
    }
    for failure in &outcome.failures {
        match failure_hint(&failure.message) {
            Some(hint) => eprintln!(
                "worker {} failed ({hint}): {}",
                failure.worker_index + 1,
                failure.message
            ),
            None => eprintln!("worker {} failed: {}", failure.worker_index + 1, failure.message),
        }
    }
    for save_error in &outcome.save_errors {
        eprintln!(
            "result {} not saved: {}",
            save_error.result_index + 1,
            save_error.message
        );
    }
    eprintln!("{}: {}", outcome.status, outcome.status_line());
}

fn run_next_name(args: NextNameArgs) -> Result<()> {
    let pattern = args.output.pattern();
    let directory = args.output.directory(args.source.as_deref());
    let namer = SequentialNamer::new(LocalDirectory);
    let start = namer
        .next_sequence(&directory, &pattern)
        .with_context(|| format!("failed to list {}", directory.display()))?;
    for offset in 0..args.count.max(1) {
        let path = namer.allocate(&directory, &pattern, start, offset)?;
        println!("{}", path.display());
    }
    Ok(())
}

fn run_recover(args: RecoverArgs) -> Result<i32> {
    let pattern = args.output.pattern();
    let directory = args.output.directory(args.source.as_deref());
    let reconciler = ResultReconciler::new(LocalDirectory);
    let artifacts = reconciler
        .scan(
            &directory,
            &pattern,
            Duration::from_secs(args.max_age_secs),
            args.limit,
        )
        .with_context(|| format!("failed to scan {}", directory.display()))?;
    if artifacts.is_empty() {
        eprintln!("no {} files newer than {}s", pattern.glob(), args.max_age_secs);
        return Ok(EXIT_TOTAL_FAILURE);
    }
    for artifact in artifacts {
        println!("{}", artifact.path.display());
    }
    Ok(0)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use banana_contracts::artifacts::{SaveLocation, DEFAULT_SAVE_FOLDER};
    use banana_contracts::slots::SlotSession;
    use clap::Parser;

    use super::{fill_slot, Cli, Command};

    #[test]
    fn full_session_rejects_without_replace_flag() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = SlotSession::new();
        let mut paths = Vec::new();
        for idx in 0..5 {
            let path = temp.path().join(format!("{idx}.png"));
            std::fs::write(&path, b"x")?;
            paths.push(path);
        }
        for path in &paths[..4] {
            fill_slot(&mut session, path, false)?;
        }
        assert!(fill_slot(&mut session, &paths[4], false).is_err());
        assert_eq!(session.get(0), Some(paths[0].as_path()));

        fill_slot(&mut session, &paths[4], true)?;
        assert_eq!(session.get(0), Some(paths[4].as_path()));
        assert_eq!(session.count(), 4);
        Ok(())
    }

    #[test]
    fn missing_reference_image_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = SlotSession::new();
        assert!(fill_slot(&mut session, &temp.path().join("nope.png"), false).is_err());
        assert_eq!(session.count(), 0);
        Ok(())
    }

    #[test]
    fn generate_args_parse_modes_and_ratios() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "banana",
            "generate",
            "--prompt",
            "hello",
            "--out",
            "/tmp/out",
            "--batch",
            "3",
            "--mode",
            "edit",
            "--aspect-ratio",
            "16/9",
            "--image",
            "a.png",
            "--image",
            "b.png",
        ])?;
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate");
        };
        assert_eq!(args.batch, 3);
        assert_eq!(args.mode.as_str(), "image_edit");
        assert_eq!(args.aspect_ratio.as_str(), "16:9");
        assert_eq!(args.images.len(), 2);
        assert!(Cli::try_parse_from(["banana", "generate", "--prompt", "x", "--out", "o", "--batch", "5"]).is_err());
        Ok(())
    }

    #[test]
    fn output_defaults_to_next_to_source() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "banana",
            "generate",
            "--prompt",
            "hello",
            "--mode",
            "edit",
            "--image",
            "/photos/cat.png",
        ])?;
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate");
        };
        assert_eq!(args.output.location(), SaveLocation::default());

        let cli = Cli::try_parse_from(["banana", "recover", "--source", "/photos/cat.png"])?;
        let Command::Recover(args) = cli.command else {
            anyhow::bail!("expected recover");
        };
        assert_eq!(
            args.output.directory(args.source.as_deref()),
            PathBuf::from("/photos")
        );

        let cli = Cli::try_parse_from(["banana", "next-name", "--out", "/renders"])?;
        let Command::NextName(args) = cli.command else {
            anyhow::bail!("expected next-name");
        };
        assert_eq!(args.output.directory(None), PathBuf::from("/renders"));

        let cli = Cli::try_parse_from(["banana", "next-name"])?;
        let Command::NextName(args) = cli.command else {
            anyhow::bail!("expected next-name");
        };
        assert_eq!(args.output.directory(None), PathBuf::from(DEFAULT_SAVE_FOLDER));
        Ok(())
    }
}
