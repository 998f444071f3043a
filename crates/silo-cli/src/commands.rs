use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use silo_blob::BlobStore;
use silo_engine::{
    AuditReport, DeletionOutcome, EngineError, FileMetadata, FileView, IngestOutcome, PurgeReport,
    RebuildReport, Silo, SiloConfig, StorageAnalysis, StorageStats,
};
use silo_types::{FileId, FileRole};
use tracing::{debug, warn};

use crate::cli::*;

const DEFAULT_CONFIG: &str = "silo.toml";

type Engine = Silo<Box<dyn BlobStore>>;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    if config.is_volatile() {
        warn!("no journal_path configured; changes will not persist");
    }
    let silo = Silo::open(&config).context("opening silo")?;
    let format = cli.format;

    match cli.command {
        Command::Check => cmd_check(&silo, format),
        Command::Rebuild => cmd_rebuild(&silo, format),
        Command::Stats => cmd_stats(&silo, format),
        Command::Analyze(args) => cmd_analyze(&silo, args, format),
        Command::PurgeDuplicates(args) => cmd_purge(&silo, args, format),
        Command::Ingest(args) => cmd_ingest(&silo, args, format),
        Command::Show(args) => cmd_show(&silo, args, format),
        Command::Delete(args) => cmd_delete(&silo, args, format),
        Command::Compact => cmd_compact(&silo, format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SiloConfig> {
    match path {
        Some(path) => SiloConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            debug!(path = DEFAULT_CONFIG, "using default config file");
            Ok(SiloConfig::load(DEFAULT_CONFIG)?)
        }
        None => Ok(SiloConfig::default()),
    }
}

/// Print `value` as JSON, or run `text` for human output.
fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

fn parse_id(raw: &str) -> anyhow::Result<FileId> {
    raw.parse()
        .with_context(|| format!("invalid file id {raw:?}"))
}

fn cmd_check(silo: &Engine, format: OutputFormat) -> anyhow::Result<()> {
    let report = silo.audit_consistency()?;
    emit(format, &report, print_audit)
}

fn print_audit(report: &AuditReport) {
    if report.fixed_count == 0 {
        println!("{} No inconsistencies found.", "✓".green().bold());
    } else {
        println!(
            "{} Repaired {} inconsistencies",
            "✓".green().bold(),
            report.fixed_count.to_string().bold()
        );
        let rows = [
            ("Referenced canonicals demoted", report.demoted_referenced),
            ("Extra canonicals collapsed", report.collapsed_canonicals),
            ("References repaired", report.repaired_references),
            ("Orphans attached", report.orphans_attached),
            ("Orphans promoted", report.orphans_promoted),
        ];
        for (label, count) in rows.into_iter().filter(|(_, n)| *n > 0) {
            println!("  {label}: {}", count.to_string().yellow());
        }
    }
    println!("  Duplicates: {}", report.current_duplicate_count);
    println!("  References: {}", report.current_reference_count);
}

fn cmd_rebuild(silo: &Engine, format: OutputFormat) -> anyhow::Result<()> {
    let report = silo.rebuild_all()?;
    emit(format, &report, |r: &RebuildReport| {
        println!("{} Rebuilt references", "✓".green().bold());
        println!("  Files: {}", r.total_files);
        println!("  Canonical: {}", r.canonical_count.to_string().green());
        println!("  Duplicates: {}", r.duplicate_count.to_string().yellow());
        println!(
            "  References: {} removed, {} created",
            r.references_removed, r.references_created
        );
    })
}

fn cmd_stats(silo: &Engine, format: OutputFormat) -> anyhow::Result<()> {
    let stats = silo.storage_stats()?;
    emit(format, &stats, print_stats)
}

fn print_stats(stats: &StorageStats) {
    println!("Files: {}", stats.total_files.to_string().bold());
    println!("  Canonical: {}", stats.canonical_count.to_string().green());
    println!("  Duplicates: {}", stats.duplicate_count.to_string().yellow());
    println!("Logical:  {}", human_bytes(stats.logical_bytes));
    println!("Physical: {}", human_bytes(stats.physical_bytes));
    println!(
        "Saved:    {} ({}%)",
        human_bytes(stats.saved_bytes).green(),
        stats.saved_percentage
    );
}

fn cmd_analyze(silo: &Engine, args: AnalyzeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let analysis = silo.analyze_storage(args.min_duplicates, args.top)?;
    emit(format, &analysis, |a: &StorageAnalysis| {
        print_stats(&a.stats);
        println!("Dedup ratio: {:.2}x", a.dedup_ratio);
        println!("Duplicate share: {}%", a.duplicate_percentage);

        if !a.by_media_type.is_empty() {
            println!("\n{}", "By media type".bold());
            for usage in &a.by_media_type {
                println!(
                    "  {:<32} {:>6} files ({} dup)  {}",
                    usage.media_type,
                    usage.files,
                    usage.duplicates,
                    human_bytes(usage.logical_bytes)
                );
            }
        }
        if !a.top_duplicated.is_empty() {
            println!("\n{}", "Most duplicated".bold());
            for file in &a.top_duplicated {
                println!(
                    "  {} {:<32} x{}  saves {}",
                    file.id.short_id().yellow(),
                    file.display_name,
                    file.duplicate_count,
                    human_bytes(file.saved_bytes).green()
                );
            }
        }
        if !a.missing_blobs.is_empty() {
            println!("\n{}", "Missing blobs".red().bold());
            for missing in &a.missing_blobs {
                println!("  {} {}", missing.file.to_string().yellow(), missing.location);
            }
        }
    })
}

fn cmd_purge(silo: &Engine, args: PurgeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = silo.purge_duplicates(args.dry_run)?;
    emit(format, &report, |r: &PurgeReport| {
        let verb = if r.dry_run { "Would delete" } else { "Deleted" };
        println!(
            "{} {verb} {} duplicates ({})",
            "✓".green().bold(),
            r.duplicate_count.to_string().bold(),
            human_bytes(r.bytes)
        );
        if !r.dry_run {
            println!("  Blobs released: {}", r.released_blobs);
        }
    })
}

fn cmd_ingest(silo: &Engine, args: IngestArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut file =
        File::open(&args.path).with_context(|| format!("opening {}", args.path.display()))?;
    let size = file.metadata()?.len();
    let name = match args.name {
        Some(name) => name,
        None => args
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let metadata = FileMetadata::new(name, args.media_type).with_declared_size(size);
    let outcome = silo.ingest(Some(&mut file), metadata)?;

    emit(format, &outcome, |o: &IngestOutcome| {
        if let Some(canonical) = o.canonical_id {
            println!(
                "{} Stored {} as duplicate of {}",
                "✓".green().bold(),
                o.file.id.to_string().yellow(),
                canonical.to_string().cyan()
            );
        } else {
            println!(
                "{} Stored {} (canonical)",
                "✓".green().bold(),
                o.file.id.to_string().yellow()
            );
        }
        println!("  Hash: {}", o.file.content_hash().short_hex().dimmed());
        println!("  Size: {}", human_bytes(o.file.size()));
    })
}

fn cmd_show(silo: &Engine, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    let view = silo.file(&id)?;
    let savings = silo.file_savings(&id)?;
    emit(format, &view, |v: &FileView| {
        let record = &v.record;
        println!("File {}", record.id.to_string().yellow().bold());
        println!("  Name: {}", record.display_name);
        println!("  Media type: {}", record.media_type);
        println!("  Size: {}", human_bytes(record.size()));
        println!("  Hash: {}", record.content_hash());
        println!("  Location: {}", record.location);
        match &v.role {
            FileRole::Canonical { duplicates } => {
                println!("  Role: {}", "canonical".green());
                println!(
                    "  Duplicates: {} (saves {})",
                    duplicates.len(),
                    human_bytes(savings.storage_saved)
                );
            }
            FileRole::Duplicate { canonical, .. } => {
                println!("  Role: {} of {}", "duplicate".yellow(), canonical.to_string().cyan());
            }
        }
    })
}

fn cmd_delete(silo: &Engine, args: DeleteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    let outcome = match silo.delete(&id, args.confirm) {
        Ok(outcome) => outcome,
        Err(EngineError::ConflictRequiresConfirmation {
            duplicate_names, ..
        }) => {
            bail!(
                "file {id} is canonical for {} duplicate(s) ({}); rerun with --confirm to promote one",
                duplicate_names.len(),
                duplicate_names.join(", ")
            );
        }
        Err(e) => return Err(e.into()),
    };

    emit(format, &outcome, |o: &DeletionOutcome| {
        match o {
            DeletionOutcome::Promoted {
                new_canonical,
                repointed,
                ..
            } => println!(
                "{} Deleted {}; promoted {} ({} references moved)",
                "✓".green().bold(),
                id.to_string().yellow(),
                new_canonical.to_string().cyan(),
                repointed
            ),
            _ => println!("{} Deleted {}", "✓".green().bold(), id.to_string().yellow()),
        }
        if o.blob_released() {
            println!("  Blob released");
        }
    })
}

fn cmd_compact(silo: &Engine, format: OutputFormat) -> anyhow::Result<()> {
    let compacted = silo.compact()?;
    emit(format, &serde_json::json!({ "compacted": compacted }), |_| {
        if compacted {
            println!("{} Journal compacted.", "✓".green().bold());
        } else {
            println!("Store is volatile; nothing to compact.");
        }
    })
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
