//! avault CLI
//!
//! Inspect and maintain a vault from the command line.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use artifact_vault::config::{user_config_path, EffectiveConfig};
use artifact_vault::{Depth, PlanMode, RetentionPolicy, Vault, VaultResult};

#[derive(Parser)]
#[command(name = "avault")]
#[command(about = "Versioned artifact store with lineage and retention")]
#[command(version)]
struct Cli {
    /// Managed root directory
    #[arg(long, short = 'r', global = true, default_value = ".")]
    root: PathBuf,

    /// Override the versioning mode (content, timestamp, off)
    #[arg(long, global = true)]
    versioning: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracked artifacts
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the version history of an artifact
    Log {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Version an existing file in place
    Track {
        paths: Vec<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Trace the ancestors of an artifact
    Lineage {
        path: PathBuf,

        /// Levels to walk; omit for unlimited
        #[arg(long)]
        depth: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// List artifacts derived from an artifact
    Children {
        path: PathBuf,

        /// Levels to walk; omit for unlimited
        #[arg(long)]
        depth: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Check whether an artifact's recorded parents are still current
    Stale {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Compute a level-ordered rebuild plan
    Plan {
        #[arg(required = true)]
        targets: Vec<PathBuf>,

        /// strict or propagate
        #[arg(long, default_value = "strict")]
        mode: PlanMode,

        /// Levels below the targets to consider; omit for unlimited
        #[arg(long)]
        depth: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Remove old versions by retention policy
    Prune {
        /// Artifact to prune; all artifacts when omitted
        path: Option<PathBuf>,

        /// Keep the newest N versions
        #[arg(long)]
        keep: Option<usize>,

        /// Keep versions younger than D days
        #[arg(long)]
        days: Option<u32>,

        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        json: bool,
    },

    /// Compare stored hashes with the bytes on disk
    Verify {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Rebuild the reverse parents index from snapshot manifests
    Reindex,

    /// Show the effective configuration and where it came from
    Config,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match effective_config(&cli.root, cli.versioning) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    if let Commands::Config = cli.command {
        match config.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing config: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let vault = match config.options().and_then(|options| Vault::open_with(&cli.root, options)) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error opening vault at {}: {}", cli.root.display(), e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::List { json } => run_list(&vault, json),
        Commands::Log { path, json } => run_log(&vault, &path, json),
        Commands::Track { paths, json } => run_track(&vault, &paths, json),
        Commands::Lineage { path, depth, json } => run_lineage(&vault, &path, depth.into(), json, false),
        Commands::Children { path, depth, json } => run_lineage(&vault, &path, depth.into(), json, true),
        Commands::Stale { path, json } => run_stale(&vault, &path, json),
        Commands::Plan {
            targets,
            mode,
            depth,
            json,
        } => run_plan(&vault, &targets, mode, depth.into(), json),
        Commands::Prune {
            path,
            keep,
            days,
            dry_run,
            json,
        } => run_prune(&vault, path.as_deref(), keep, days, dry_run, json),
        Commands::Verify { path, json } => run_verify(&vault, &path, json),
        Commands::Reindex => run_reindex(&vault),
        Commands::Config => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(if e.is_retryable() { 75 } else { 1 });
    }
}

fn effective_config(root: &Path, versioning: Option<String>) -> VaultResult<EffectiveConfig> {
    let user = user_config_path();
    let overrides = versioning.map(|mode| json!({ "versioning": mode }));
    EffectiveConfig::for_root(root, user.as_deref(), overrides)
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn run_list(vault: &Vault, json_output: bool) -> VaultResult<()> {
    let catalog = vault.read_catalog()?;
    let mut artifacts: Vec<_> = catalog.artifacts.iter().collect();
    artifacts.sort_by(|a, b| a.canonical_path.cmp(&b.canonical_path));

    if json_output {
        print_json(&artifacts);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("No artifacts tracked under {}", vault.root().display());
        return Ok(());
    }
    for artifact in artifacts {
        println!(
            "{:<48} {:>4} versions  {:<6} latest {}",
            display_path(vault, &artifact.canonical_path),
            artifact.version_count,
            artifact.format_tag,
            artifact.latest_version_id
        );
    }
    Ok(())
}

fn run_log(vault: &Vault, path: &Path, json_output: bool) -> VaultResult<()> {
    let record = vault.artifact(path)?;
    let catalog = vault.read_catalog()?;
    let versions = catalog.versions_of(&record.artifact_id);

    if json_output {
        print_json(&versions);
        return Ok(());
    }

    println!("{} ({})", display_path(vault, &record.canonical_path), record.format_tag);
    for version in versions.iter().rev() {
        let marker = if version.version_id == record.latest_version_id {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {}  {} bytes  {}",
            marker,
            version.version_id,
            version.created_at.to_rfc3339(),
            version.size_bytes,
            &version.content_hash[..version.content_hash.len().min(12)]
        );
    }
    Ok(())
}

fn run_track(vault: &Vault, paths: &[PathBuf], json_output: bool) -> VaultResult<()> {
    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        outcomes.push(vault.track(path)?);
    }

    if json_output {
        print_json(&outcomes);
        return Ok(());
    }
    for outcome in &outcomes {
        println!(
            "{:<8} {:<16} {} {}",
            if outcome.is_written() { "written" } else { "skipped" },
            outcome.reason,
            display_path(vault, &outcome.path),
            outcome.version_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn run_lineage(vault: &Vault, path: &Path, depth: Depth, json_output: bool, children: bool) -> VaultResult<()> {
    let trace = if children {
        vault.children_of(path, depth)?
    } else {
        vault.parents_of(path, depth)?
    };

    if json_output {
        print_json(&trace);
        return Ok(());
    }

    println!("{}", display_path(vault, &trace.path));
    for node in &trace.nodes {
        println!(
            "{}{} @ {}",
            "  ".repeat(node.level),
            display_path(vault, &node.path),
            node.version_id
        );
    }
    if trace.from_sidecar {
        println!("(parents read from live sidecar; no snapshot)");
    }
    if trace.truncated {
        println!("(truncated: a snapshot along the walk is missing)");
    }
    Ok(())
}

fn run_stale(vault: &Vault, path: &Path, json_output: bool) -> VaultResult<()> {
    let drift = vault.parent_drift(path)?;

    if json_output {
        print_json(&json!({ "stale": !drift.is_empty(), "drift": drift }));
        return Ok(());
    }

    if drift.is_empty() {
        println!("up to date");
        return Ok(());
    }
    println!("stale:");
    for parent in &drift {
        println!(
            "  {}: recorded {} current {}",
            display_path(vault, &parent.path),
            parent.recorded_version,
            parent.current_version.as_deref().unwrap_or("(untracked)")
        );
    }
    process::exit(2);
}

fn run_plan(vault: &Vault, targets: &[PathBuf], mode: PlanMode, depth: Depth, json_output: bool) -> VaultResult<()> {
    let plan = vault.plan_rebuild(targets, depth, mode)?;

    if json_output {
        print_json(&plan);
        return Ok(());
    }

    if plan.is_empty() {
        println!("Nothing to rebuild ({} mode)", plan.mode);
        return Ok(());
    }
    for (level, entries) in plan.levels() {
        println!("level {}:", level);
        for entry in entries {
            println!("  {:<48} {}", display_path(vault, &entry.path), entry.reason);
        }
    }
    Ok(())
}

fn run_prune(
    vault: &Vault,
    path: Option<&Path>,
    keep: Option<usize>,
    days: Option<u32>,
    dry_run: bool,
    json_output: bool,
) -> VaultResult<()> {
    let policy = if keep.is_some() || days.is_some() {
        RetentionPolicy::from_limits(keep, days)
    } else {
        vault.options().retention
    };
    policy.validate()?;

    let report = match path {
        Some(path) => vault.prune(path, &policy, dry_run)?,
        None => vault.prune_all(&policy, dry_run)?,
    };

    if json_output {
        print_json(&report);
    } else {
        let verb = if dry_run { "would remove" } else { "removed" };
        for pruned in &report.removed {
            println!(
                "{} {} {}",
                verb,
                display_path(vault, &pruned.artifact_path),
                pruned.version_id
            );
        }
        println!(
            "{} {} version(s) under policy {}, {} bytes reclaimed",
            verb,
            report.removed.len(),
            policy,
            report.bytes_reclaimed
        );
        for error in &report.errors {
            eprintln!("warning: {}", error);
        }
    }

    if !report.errors.is_empty() {
        process::exit(1);
    }
    Ok(())
}

fn run_verify(vault: &Vault, path: &Path, json_output: bool) -> VaultResult<()> {
    let report = vault.verify(path)?;

    if json_output {
        print_json(&report);
    } else {
        println!("live: {:?}", report.live);
        for version in &report.versions {
            println!("  {} {:?}", version.version_id, version.integrity);
        }
    }

    if !report.is_clean() {
        process::exit(1);
    }
    Ok(())
}

fn run_reindex(vault: &Vault) -> VaultResult<()> {
    let index = vault.reindex()?;
    let edges: usize = index.entries.values().map(Vec::len).sum();
    println!("Indexed {} parent edges across {} versions", edges, index.covers_versions);
    Ok(())
}

fn display_path(vault: &Vault, path: &Path) -> String {
    path.strip_prefix(vault.root())
        .unwrap_or(path)
        .display()
        .to_string()
}
