//! `synapse check` and `synapse update`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use console::style;

use synapse_core::{Library, PlanEntry, UpdatePlan};

use crate::{CHECK, CROSS, WARN_ICON};

/// Apply available updates of a pack
#[derive(Args, Debug)]
pub struct UpdateArgs {
    pack: String,

    /// Show what would change without downloading anything
    #[arg(long)]
    dry_run: bool,

    /// Candidate for an ambiguous dependency, as DEP=CANDIDATE (repeatable)
    #[arg(long = "choose", value_name = "DEP=CANDIDATE", value_parser = parse_choice)]
    choices: Vec<(String, String)>,
}

fn parse_choice(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((dep, candidate)) if !dep.is_empty() && !candidate.is_empty() => {
            Ok((dep.to_string(), candidate.to_string()))
        }
        _ => Err(format!("expected DEP=CANDIDATE, got '{}'", s)),
    }
}

pub fn cmd_check(lib: &Library, pack: &str) -> Result<()> {
    let plan = lib.check_updates(pack)?;
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &UpdatePlan) {
    if plan.entries.is_empty() && plan.errors.is_empty() {
        println!("{} has no follow_latest dependencies", style(&plan.pack).bold());
        return;
    }

    for entry in &plan.entries {
        match entry {
            PlanEntry::UpToDate { dependency } => {
                println!("  {} {} up to date", CHECK, dependency);
            }
            PlanEntry::Determined {
                dependency,
                candidate,
            } => {
                println!(
                    "  {} {} -> {} ({})",
                    WARN_ICON,
                    style(dependency).bold(),
                    style(&candidate.version_name).cyan(),
                    candidate.id
                );
            }
            PlanEntry::Ambiguous {
                dependency,
                candidates,
            } => {
                println!("  {} {} has several candidates:", WARN_ICON, style(dependency).bold());
                for candidate in candidates {
                    let published = candidate
                        .published_at
                        .map(|t| t.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "      {}  {} (version {}, published {})",
                        style(&candidate.id).cyan(),
                        candidate.version_name,
                        candidate.version_id,
                        published
                    );
                }
            }
        }
    }
    for failure in &plan.errors {
        println!("  {} {}", CROSS, style(failure).red());
    }

    if plan.ambiguous().next().is_some() {
        println!();
        println!(
            "{}",
            style("Pick with: synapse update PACK --choose DEP=CANDIDATE").dim()
        );
    }
}

pub fn run(lib: &Library, args: UpdateArgs) -> Result<()> {
    let plan = lib.check_updates(&args.pack)?;
    if !plan.has_updates() {
        print_plan(&plan);
        return Ok(());
    }

    let choices: BTreeMap<String, String> = args.choices.into_iter().collect();
    let result = lib
        .apply_update(&args.pack, &plan, &choices, args.dry_run)
        .with_context(|| format!("Failed to update {}", args.pack))?;

    let verb = if result.dry_run { "Would change" } else { "Changed" };
    for change in &result.changes {
        let from = change.from.as_ref().map(|h| h.short()).unwrap_or("-");
        println!(
            "  {} {} {}: {} -> {}",
            CHECK,
            verb,
            style(&change.dependency).bold(),
            from,
            change.to.short()
        );
    }
    for (ui, profile) in &result.rebuilt {
        println!("  {} rebuilt {}/{}", CHECK, ui, profile);
    }
    if result.dry_run {
        println!();
        println!("{}", style("Dry run complete. Nothing was downloaded.").dim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice() {
        assert_eq!(
            parse_choice("style=v2").unwrap(),
            ("style".to_string(), "v2".to_string())
        );
        assert!(parse_choice("style").is_err());
        assert!(parse_choice("=v2").is_err());
        assert!(parse_choice("style=").is_err());
    }
}
