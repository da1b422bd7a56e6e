use crate::errors::CliError;
use crate::utils::config::{self, AppConfig};
use camino::Utf8PathBuf;
use colored::Colorize;
use kmm_core::layout::validate_game_root;
use miette::Result;

#[derive(Debug, Default)]
pub struct ConfigArgs {
    pub game_path: Option<String>,
    pub merge_tool: Option<String>,
}

fn print_path_config<F>(name: &str, path: Option<&Utf8PathBuf>, is_valid: F)
where
    F: Fn(&Utf8PathBuf) -> bool,
{
    match path {
        Some(p) => {
            let status = if is_valid(p) {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {} {} {}", format!("{}:", name).bright_white(), p, status);
        }
        None => {
            println!(
                "  {} {}",
                format!("{}:", name).bright_white(),
                "(not set)".bright_yellow()
            );
        }
    }
}

pub fn show_config() -> Result<()> {
    let cfg = config::load_config();
    let config_path = config::default_config_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    println!();
    println!("  {} {}", "config_file:".bright_white(), config_path);

    print_path_config("game_path", cfg.game_path.as_ref(), |p| {
        validate_game_root(p).is_ok()
    });
    print_path_config("merge_tool", Some(&cfg.merge_tool_path()), |p| p.exists());
    print_path_config("index_path", Some(&cfg.index_path()), |p| p.exists());

    println!(
        "  {} {}",
        "copy_all_files:".bright_white(),
        cfg.copy_all_files
    );
    println!(
        "  {} {}",
        "delete_sources_after_merge:".bright_white(),
        cfg.delete_sources_after_merge
    );
    println!(
        "  {} {}",
        "saved priorities:".bright_white(),
        cfg.conflict_order.len()
    );

    println!();
    Ok(())
}

/// Apply `args` to `cfg`, validating each path.
pub fn apply_config_args(cfg: &mut AppConfig, args: ConfigArgs) -> Result<()> {
    if let Some(path) = args.game_path {
        let path = Utf8PathBuf::from(path);
        if validate_game_root(&path).is_err() {
            return Err(CliError::invalid_game_path(path).into());
        }
        cfg.game_path = Some(path);
    }

    if let Some(path) = args.merge_tool {
        let path = Utf8PathBuf::from(path);
        if !path.is_file() {
            return Err(CliError::merge_tool_missing(path).into());
        }
        cfg.merge_tool = Some(path);
    }

    Ok(())
}

pub fn update_config(args: ConfigArgs) -> Result<()> {
    if args.game_path.is_none() && args.merge_tool.is_none() {
        return show_config();
    }

    let (mut cfg, path) = config::load_or_create_config()
        .map_err(|e| miette::miette!("Failed to initialize config: {}", e))?;
    apply_config_args(&mut cfg, args)?;
    config::save_config(&cfg).map_err(|source| CliError::ConfigSaveFailed { source })?;

    println!(
        "{}",
        "✓ Configuration updated successfully!".bright_green().bold()
    );
    println!();
    println!("  {} {}", "Config file:".bright_white().bold(), path);
    Ok(())
}
