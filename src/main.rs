use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use channel_sweep::cancel::cancel_on_ctrl_c;
use channel_sweep::{
    filter_by_confidence, logging, AnalysisReport, BatchMutator, CancelSignal, Checkpoint,
    CheckpointStore, Classifier, Collection, ConfirmationGate, DeletionCandidate, Fetcher,
    InMemoryDirectory, MemberStore, OperationKind, RawMember, ReportWriter, RunStats, SweepConfig,
};

#[derive(Parser)]
#[command(name = "channel-sweep", version, about = "Find and remove dead accounts from a channel")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify stored members of a channel and write candidate reports
    Analyze {
        channel_id: i64,
        /// Also apply the suspicious-handle and default-profile heuristics
        #[arg(long)]
        batch: bool,
        #[arg(long)]
        min_confidence: Option<f64>,
    },
    /// Member and removal counts
    Stats,
    /// Inspect or prune saved checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
    /// Run export, analysis and removal against a simulated channel
    Demo {
        #[arg(long, default_value_t = 50)]
        members: i64,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    List {
        /// export, analyze or delete
        #[arg(long)]
        kind: Option<String>,
    },
    Prune {
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    let config = SweepConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Analyze { channel_id, batch, min_confidence } => {
            run_analyze(&config, channel_id, batch, min_confidence)
        }
        Command::Stats => run_stats(&config),
        Command::Checkpoints { action } => run_checkpoints(&config, action),
        Command::Demo { members } => run_demo(&config, members).await,
    }
}

fn run_analyze(config: &SweepConfig, channel_id: i64, batch: bool, min_confidence: Option<f64>) -> Result<()> {
    println!("🔎 Analyzing channel {}", channel_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = MemberStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let members = store.members_for(channel_id)?;
    let Some(first) = members.first() else {
        println!("⚠️  No stored members for channel {}", channel_id);
        return Ok(());
    };
    let handle = first.channel_username.clone();

    let classifier = Classifier::new();
    let candidates = if batch {
        classifier.evaluate_batch(&members)
    } else {
        members.iter().filter_map(|m| classifier.evaluate(m)).collect()
    };

    let threshold = min_confidence.unwrap_or(config.min_export_confidence);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(anyhow!("--min-confidence must be in [0, 1], got {}", threshold));
    }
    let candidates = filter_by_confidence(&candidates, threshold);
    let report = AnalysisReport::build(Some(channel_id), &candidates);

    println!("✓ Scanned {} members", members.len());
    println!("✓ Flagged {} ({} high confidence)", report.total_candidates, report.high_confidence);
    for (reason, count) in &report.by_reason {
        println!("   • {}: {}", reason, count);
    }

    let writer = ReportWriter::open(&config.reports_dir)?;
    let files = writer.write_candidates(channel_id, &handle, &candidates)?;
    println!("\n💾 CSV:  {}", files.csv.display());
    println!("💾 JSON: {}", files.json.display());

    let checkpoints = CheckpointStore::open(&config.checkpoints_dir)?;
    let mut checkpoint = Checkpoint::new(
        OperationKind::Analyze,
        channel_id,
        &handle,
        members.len() as u64,
        members.len() as u64,
    )
    .with_metadata("candidates", serde_json::json!(candidates.len()))
    .with_metadata("min_confidence", serde_json::json!(threshold));
    checkpoints.save(&mut checkpoint)?;

    Ok(())
}

fn run_stats(config: &SweepConfig) -> Result<()> {
    let store = MemberStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;

    let members = store.count_members(None)?;
    let removed = store.removed_members(None)?.len();
    let mutations = store.mutation_stats()?;

    println!("📊 Database statistics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Members:          {}", members);
    println!("Removed members:  {}", removed);
    println!("Removal attempts: {}", mutations.total);
    println!("  ✅ successful:  {}", mutations.successful);
    println!("  ❌ failed:      {}", mutations.failed);
    println!("  ⚠️  with errors: {}", mutations.with_errors);

    Ok(())
}

fn run_checkpoints(config: &SweepConfig, action: CheckpointAction) -> Result<()> {
    let store = CheckpointStore::open(&config.checkpoints_dir)?;

    match action {
        CheckpointAction::List { kind } => {
            let kind = kind
                .map(|k| OperationKind::parse(&k).ok_or_else(|| anyhow!("unknown checkpoint kind: {}", k)))
                .transpose()?;

            let checkpoints = store.list(kind)?;
            if checkpoints.is_empty() {
                println!("No checkpoints found");
                return Ok(());
            }

            println!("📍 {} checkpoint(s)", checkpoints.len());
            for cp in checkpoints {
                println!(
                    "  {:<8} {:<20} {:>8}/{:<8} {:>6.1}%  {}",
                    cp.kind.as_str(),
                    cp.channel_username,
                    cp.processed_items,
                    cp.total_items,
                    cp.progress_percentage(),
                    cp.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        CheckpointAction::Prune { keep } => {
            let keep = keep.unwrap_or(config.checkpoint_keep);
            let removed = store.prune(keep)?;
            println!("🧹 Removed {} old checkpoint(s), kept {} per operation", removed, keep);
        }
    }

    Ok(())
}

/// Candidates listed before the confirmation question.
const PREVIEW_LIMIT: usize = 20;

fn preview_lines(candidates: &[DeletionCandidate]) -> Vec<String> {
    let mut lines = vec![format!("{:<12} {:<24} {:<16} {:>10}", "ID", "Username", "Reason", "Confidence")];
    for c in candidates.iter().take(PREVIEW_LIMIT) {
        lines.push(format!(
            "{:<12} {:<24} {:<16} {:>10.2}",
            c.user_id,
            c.username.as_deref().unwrap_or("-"),
            c.reason.code(),
            c.confidence
        ));
    }
    if candidates.len() > PREVIEW_LIMIT {
        lines.push(format!("... and {} more", candidates.len() - PREVIEW_LIMIT));
    }
    lines
}

/// Shows the candidates and asks on stdin before anything is removed.
struct PromptGate;

#[async_trait]
impl ConfirmationGate for PromptGate {
    async fn confirm(&self, collection: &Collection, candidates: &[DeletionCandidate]) -> bool {
        println!();
        for line in preview_lines(candidates) {
            println!("{}", line);
        }
        println!(
            "\n⚠️  About to remove {} member(s) from {}. Continue? [y/N]",
            candidates.len(),
            collection.handle
        );
        let _ = io::stdout().flush();

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        matches!(answer, Ok(Ok(line)) if matches!(line.trim(), "y" | "Y" | "yes"))
    }
}

fn demo_members(count: i64) -> Vec<RawMember> {
    (1..=count)
        .map(|id| {
            if id % 5 == 0 {
                RawMember::new(id).named(Some("Deleted Account"), None)
            } else {
                RawMember::new(id)
                    .named(Some("Member"), Some(&id.to_string()))
                    .with_username(&format!("member_{}", id))
            }
        })
        .collect()
}

struct DemoOutcome {
    export: RunStats,
    stored: i64,
    candidates: usize,
    removal: RunStats,
    remaining: usize,
}

/// Export, classify and remove against a fresh simulated channel.
///
/// Every demo starts from an empty store, so nothing is resumed. Snapshots
/// go to a `demo` subdirectory, apart from real checkpoints.
async fn demo_pipeline(
    config: &SweepConfig,
    count: i64,
    gate: &dyn ConfirmationGate,
    cancel: CancelSignal,
) -> Result<DemoOutcome> {
    let directory = InMemoryDirectory::new(demo_members(count));
    let collection = Collection::new(1, "@demo_channel").with_member_count(count.max(0) as u64);
    let store = MemberStore::open_in_memory()?;
    let checkpoints = CheckpointStore::open(config.checkpoints_dir.join("demo"))?;

    let export = Fetcher::new(&directory, &store, &checkpoints, config.fetch_options())
        .with_cancel(cancel.clone())
        .run(&collection, false)
        .await?;
    let stored = store.count_members(Some(collection.id))?;

    let candidates = Classifier::new().scan(&store, collection.id)?;
    let candidates = filter_by_confidence(&candidates, config.min_export_confidence);

    let removal = BatchMutator::new(&directory, &store, &checkpoints, gate, config.mutator_options())
        .with_cancel(cancel)
        .run(&collection, &candidates, false)
        .await?;

    Ok(DemoOutcome {
        export,
        stored,
        candidates: candidates.len(),
        removal,
        remaining: directory.member_count(),
    })
}

async fn run_demo(config: &SweepConfig, count: i64) -> Result<()> {
    println!("🧪 Demo run against a simulated channel");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let (handle, signal) = CancelSignal::new();
    cancel_on_ctrl_c(handle);

    let outcome = demo_pipeline(config, count, &PromptGate, signal)
        .await
        .context("demo pipeline")?;

    println!("\n📥 Export: {}", outcome.export.summary());
    println!("✓ {} members stored", outcome.stored);
    println!("🔎 {} candidate(s)", outcome.candidates);

    if outcome.removal.cancelled {
        println!("✋ Removal declined, nothing changed");
        return Ok(());
    }
    println!("🗑️  Removal: {}", outcome.removal.summary());

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {} members left in the channel", outcome.remaining);
    Ok(())
}
