use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config;
use colored::Colorize;
use kmm_core::ModStatus;
use miette::Result;

#[derive(Debug)]
pub struct ToggleModArgs {
    pub name: String,
    pub enable: bool,
}

pub fn toggle_mod(args: ToggleModArgs) -> Result<()> {
    let cfg = config::load_config();
    let status = if args.enable {
        ModStatus::Enabled
    } else {
        ModStatus::Disabled
    };

    let conflicts = super::with_manager(&cfg, |manager| {
        manager
            .change_mod_status(&args.name, status)
            .map_err(CliError::from)?;
        Ok(manager.conflicts().map_err(CliError::from)?.len())
    })?;

    let verb = if args.enable { "enabled" } else { "disabled" };
    println_pad!(
        "{} {} {}",
        "✓".bright_green().bold(),
        args.name.bright_cyan().bold(),
        verb
    );
    println_pad!("{} {}", "Conflicts now:".bright_white(), conflicts);
    Ok(())
}
