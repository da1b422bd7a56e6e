use crate::println_pad;
use crate::utils::config;
use colored::Colorize;
use kmm_core::ModStatus;
use miette::Result;

pub fn scan_mods() -> Result<()> {
    let cfg = config::load_config();

    super::with_manager(&cfg, |manager| {
        let state = manager.snapshot().map_err(crate::errors::CliError::from)?;

        println_pad!("{} {}", "🔍 Mods found:".bright_blue().bold(), state.mods.len());
        for m in &state.mods {
            let status = match m.status {
                ModStatus::Enabled => "enabled".bright_green(),
                ModStatus::Disabled => "disabled".bright_red(),
            };
            println_pad!(
                "   {} {} {} {}",
                "•".bright_cyan(),
                m.name.bright_cyan().bold(),
                format!("({})", m.display_name()).dimmed(),
                format!("[{status}, {} files]", m.files.len())
            );
        }

        let file_conflicts = state.conflicts.file_conflicts().count();
        println!();
        println_pad!(
            "{} {}",
            "⚔️  Conflicting files:".bright_yellow().bold(),
            file_conflicts
        );
        if let Some(mods) = state.conflicts.get(kmm_core::CONFIG_BUCKET) {
            println_pad!(
                "{} {}",
                "⚙️  Shared mod.cfg keys:".bright_yellow().bold(),
                mods.join(", ")
            );
        }

        Ok(())
    })
}
