//! # synapse doctor
//!
//! Store health: config, pinned blob integrity, and per-UI consistency of
//! stack, view and active pointer.

use anyhow::Result;
use console::{style, Emoji};

use synapse_cas::VerifyStatus;
use synapse_core::Library;

use crate::{CHECK, CROSS, WARN_ICON};

static DOT: Emoji<'_, '_> = Emoji("● ", "[-] ");

struct DiagResult {
    passed: u32,
    warned: u32,
    failed: u32,
}

impl DiagResult {
    fn new() -> Self {
        Self {
            passed: 0,
            warned: 0,
            failed: 0,
        }
    }

    fn pass(&mut self, msg: &str) {
        self.passed += 1;
        eprintln!("  {} {}", CHECK, style(msg).green());
    }

    fn warn(&mut self, msg: &str) {
        self.warned += 1;
        eprintln!("  {} {}", WARN_ICON, style(msg).yellow());
    }

    fn fail(&mut self, msg: &str) {
        self.failed += 1;
        eprintln!("  {} {}", CROSS, style(msg).red());
    }

    fn info(&self, msg: &str) {
        eprintln!("  {} {}", DOT, style(msg).dim());
    }
}

pub fn run(lib: &Library, rebuild_views: bool) -> Result<()> {
    eprintln!();
    eprintln!("{}", style("🩺 Synapse Doctor").bold().cyan());
    eprintln!("{}", style("─".repeat(40)).dim());

    let mut d = DiagResult::new();

    eprintln!();
    eprintln!("{}", style("Config").bold());
    check_config(lib, &mut d);

    let report = lib.doctor(rebuild_views)?;

    eprintln!();
    eprintln!("{}", style("Blobs").bold());
    if report.problems.is_empty() {
        d.pass(&format!(
            "{} pinned blobs verified across {} packs",
            report.blobs_checked, report.packs_checked
        ));
    }
    for problem in &report.problems {
        let what = match &problem.status {
            VerifyStatus::Missing => "missing".to_string(),
            VerifyStatus::Corrupt { actual } => format!("corrupt (content hashes to {})", actual.short()),
            VerifyStatus::Ok => continue,
        };
        d.fail(&format!(
            "{}/{}: blob {} {}",
            problem.pack,
            problem.dependency,
            problem.sha256.short(),
            what
        ));
    }
    if !report.problems.is_empty() {
        d.info("Run 'synapse install PACK' to fetch missing blobs again");
    }
    for change in &report.status_changes {
        d.info(&format!(
            "{}/{} marked {:?} (was {:?})",
            change.pack, change.dependency, change.to, change.from
        ));
    }
    if report.temp_files_removed > 0 {
        d.info(&format!(
            "Removed {} leftover import files",
            report.temp_files_removed
        ));
    }

    eprintln!();
    eprintln!("{}", style("Views").bold());
    for view in &report.rebuilt {
        d.info(&format!("Rebuilt {}/{} ({} files)", view.ui, view.profile, view.linked));
        for missing in &view.missing {
            d.warn(&format!(
                "{}/{}: {} '{}' has no blob",
                view.ui, view.profile, missing.pack, missing.dependency
            ));
        }
    }
    for status in &report.ui_status {
        match status.problem() {
            None => d.pass(&format!("{}: {} is active", status.ui, status.top())),
            Some(problem) => d.fail(&format!("{}: {}", status.ui, problem)),
        }
    }
    if report.ui_status.is_empty() {
        d.warn("No UIs registered");
        d.info("Add one under [ui] enabled in the config");
    }

    eprintln!();
    eprintln!("{}", style("─".repeat(40)).dim());
    eprintln!(
        "  {} passed, {} warnings, {} errors",
        style(d.passed).green().bold(),
        style(d.warned).yellow().bold(),
        style(d.failed).red().bold(),
    );

    if d.failed > 0 {
        eprintln!();
        if !rebuild_views {
            eprintln!(
                "{}",
                style("Run 'synapse doctor --rebuild-views' to repair views.").dim()
            );
        }
        std::process::exit(1);
    } else if d.warned > 0 {
        eprintln!("{}", style("Some warnings detected. Store should still work.").dim());
    } else {
        eprintln!("{}", style("All checks passed. Store is healthy!").dim());
    }

    eprintln!();
    Ok(())
}

fn check_config(lib: &Library, d: &mut DiagResult) {
    match synapse_config::Config::global_config_path() {
        Some(path) if path.exists() => d.pass(&format!("Global config: {}", path.display())),
        Some(path) => {
            d.warn(&format!("Global config not found: {}", path.display()));
            d.info("Create with: synapse config init");
        }
        None => d.fail("Cannot determine home directory"),
    }

    d.pass(&format!("Store root: {}", lib.layout().root().display()));
    match lib.store_document() {
        Ok(Some(doc)) => d.pass(&format!(
            "Store schema version {} ({} UIs registered)",
            doc.schema_version,
            doc.uis.len()
        )),
        Ok(None) => d.warn("Store document state/config.json is missing"),
        Err(e) => d.fail(&format!("Store document unreadable: {}", e)),
    }
}
