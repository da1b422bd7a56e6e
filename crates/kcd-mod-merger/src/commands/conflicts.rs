use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config;
use colored::Colorize;
use miette::Result;

pub fn list_conflicts() -> Result<()> {
    let cfg = config::load_config();

    super::with_manager(&cfg, |manager| {
        let conflicts = manager.conflicts().map_err(CliError::from)?;
        if conflicts.is_empty() {
            println_pad!("{}", "✓ No conflicts".bright_green().bold());
            return Ok(());
        }

        println_pad!(
            "{} {}",
            "⚔️  Conflicts:".bright_yellow().bold(),
            conflicts.len()
        );
        for (identity, mods) in conflicts.iter() {
            println_pad!("   {} {}", "•".bright_cyan(), identity.bright_white().bold());
            for (priority, name) in mods.iter().enumerate() {
                println_pad!("       {} {}", format!("{}.", priority + 1).dimmed(), name);
            }
        }
        Ok(())
    })
}

#[derive(Debug)]
pub struct OrderConflictArgs {
    pub identity: String,
    pub mods: Vec<String>,
}

/// Set a bucket's priority order and persist it to config.toml.
pub fn order_conflict(args: OrderConflictArgs) -> Result<()> {
    let mut cfg = config::load_config();

    let order = super::with_manager(&cfg, |manager| {
        manager
            .reorder_conflict(&args.identity, args.mods.clone())
            .map_err(CliError::from)?;
        let mut priorities = manager.priorities().map_err(CliError::from)?;
        Ok(priorities.remove(&args.identity).unwrap_or_default())
    })?;

    cfg.conflict_order.insert(args.identity.clone(), order);
    config::save_config(&cfg).map_err(|source| CliError::ConfigSaveFailed { source })?;

    println_pad!(
        "{} {}",
        "✓ Priority saved for".bright_green().bold(),
        args.identity.bright_white()
    );
    for (priority, name) in args.mods.iter().enumerate() {
        println_pad!("   {} {}", format!("{}.", priority + 1).dimmed(), name);
    }
    Ok(())
}
