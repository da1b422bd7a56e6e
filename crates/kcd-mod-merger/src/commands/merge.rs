use crate::errors::CliError;
use crate::println_pad;
use crate::utils::{config, print_ansi_boxed_lines};
use colored::Colorize;
use kmm_core::{ManagerEvent, MergeOptions};
use miette::Result;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MergeModsArgs {
    pub copy_all: bool,
    pub delete_sources: bool,
}

/// Flags on the command line switch options on; they never switch off what
/// config.toml enables.
pub fn resolve_merge_options(cfg: &config::AppConfig, args: &MergeModsArgs) -> MergeOptions {
    let saved = cfg.merge_options();
    MergeOptions {
        copy_all_files: saved.copy_all_files || args.copy_all,
        delete_sources_after_merge: saved.delete_sources_after_merge || args.delete_sources,
    }
}

pub fn merge_mods(args: MergeModsArgs) -> Result<()> {
    let cfg = config::load_config();
    let tool = cfg.merge_tool_path();
    if !tool.exists() {
        return Err(CliError::merge_tool_missing(tool).into());
    }
    let options = resolve_merge_options(&cfg, &args);

    let outcome = super::with_manager(&cfg, |manager| {
        manager.subscribe(Arc::new(|event: &ManagerEvent| {
            if let ManagerEvent::MergeProgress {
                current,
                total,
                identity,
            } = event
            {
                println_pad!(
                    "{} {}",
                    format!("[{current}/{total}]").dimmed(),
                    identity.bright_white()
                );
            }
        }));

        println_pad!("{}", "🔀 Merging conflicts...".bright_blue().bold());
        Ok(manager.merge(options).map_err(CliError::from)?)
    })?;

    let report = &outcome.report;
    for skipped in &report.skipped {
        println_pad!(
            "{} {} {}",
            "✗".bright_red(),
            skipped.identity.bright_white(),
            format!("({})", skipped.reason).dimmed()
        );
    }
    if !report.config_conflicts.is_empty() {
        println_pad!(
            "{} {}",
            "⚙️  mod.cfg conflicts need manual attention:".bright_yellow().bold(),
            report.config_conflicts.join(", ")
        );
    }

    let mut lines = vec![
        format!("{} {}", "Merged:".bright_green().bold(), report.merged.len()),
        format!("{} {}", "Copied:".bright_green().bold(), report.copied.len()),
        format!("{} {}", "Skipped:".bright_red().bold(), report.skipped.len()),
    ];
    match &outcome.package {
        Some(package) => {
            for archive in &package.installed {
                lines.push(format!("{} {}", "Installed:".bright_cyan(), archive));
            }
        }
        None => lines.push("Nothing to install".bright_yellow().to_string()),
    }
    println!();
    print_ansi_boxed_lines(&lines);

    Ok(())
}
