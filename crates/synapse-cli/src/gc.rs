//! # Garbage Collection
//!
//! Reports blobs nothing references and, with `--delete`, removes those
//! older than the configured grace period.

use anyhow::Result;
use clap::Args;

use synapse_core::Library;

/// Find (and optionally delete) unreferenced blobs
#[derive(Args, Debug)]
pub struct GcArgs {
    /// Actually delete blobs (default is dry-run)
    #[arg(long)]
    delete: bool,

    /// List every orphaned blob
    #[arg(short, long)]
    verbose: bool,
}

pub fn run(lib: &Library, args: GcArgs) -> Result<()> {
    println!();
    println!("  Synapse Garbage Collection");
    println!("  ==========================");

    let report = lib.gc(args.delete)?;

    println!();
    println!("  Blob Store Statistics:");
    println!(
        "    📦 Total blobs:   {} ({})",
        format_number(report.total_blobs),
        format_bytes(report.total_bytes)
    );
    println!("    ✅ Referenced:    {}", format_number(report.referenced));
    println!(
        "    🗑️  Orphaned:      {} ({})",
        format_number(report.orphans.len() as u64),
        format_bytes(report.orphan_bytes)
    );

    if !report.orphans.is_empty() && report.total_bytes > 0 {
        let reclaim_pct = (report.orphan_bytes as f64 / report.total_bytes as f64) * 100.0;
        println!("    💾 Reclaimable:   {:.1}% of store", reclaim_pct);
    }

    if args.verbose {
        println!();
        for (hash, size) in &report.orphans {
            println!("      {}  {}", hash, format_bytes(*size));
        }
    }

    println!();
    if !args.delete {
        println!("  📋 Dry run complete. Use --delete to remove orphaned blobs.");
    } else if report.orphans.is_empty() {
        println!("  ✨ No orphaned blobs to delete!");
    } else {
        println!(
            "  ✅ Deleted: {} blobs ({})",
            format_number(report.deleted),
            format_bytes(report.deleted_bytes)
        );
        if report.kept_recent > 0 {
            println!(
                "  ⏳ Kept {} orphans younger than the grace period ({}s)",
                format_number(report.kept_recent),
                lib.config().gc.grace().as_secs()
            );
        }
    }

    println!();
    Ok(())
}

/// Format bytes in human-readable form
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format number with comma separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
