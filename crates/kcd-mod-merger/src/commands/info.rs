use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config;
use colored::Colorize;
use miette::Result;

pub struct InfoModArgs {
    pub name: String,
}

pub fn info_mod(args: InfoModArgs) -> Result<()> {
    let cfg = config::load_config();

    super::with_manager(&cfg, |manager| {
        let mods = manager.mods().map_err(CliError::from)?;
        let m = mods
            .iter()
            .find(|m| m.name == args.name)
            .ok_or_else(|| CliError::ModNotFound {
                name: args.name.clone(),
            })?;

        println_pad!(
            "{} {}",
            "📦 Mod:".bright_blue().bold(),
            m.name.bright_cyan().bold()
        );
        println_pad!("{} {}", "📁 Folder:".bright_green(), m.dir);
        println_pad!("{} {}", "🗃️  Archives:".bright_green(), m.archives.len());
        if !m.config_keys.is_empty() {
            let keys: Vec<&str> = m.config_keys.iter().map(String::as_str).collect();
            println_pad!("{} {}", "⚙️  mod.cfg keys:".bright_green(), keys.join(", "));
        }

        println_pad!("\n{}", "🧾 Manifest:".bright_magenta().bold());
        println_pad!("{}", m.manifest.summary());
        Ok(())
    })
}
