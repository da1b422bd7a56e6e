use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{ArgGroup, CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    info_mod, list_conflicts, merge_mods, order_conflict, scan_mods, toggle_mod, update_config,
    ConfigArgs, InfoModArgs, MergeModsArgs, OrderConflictArgs, ToggleModArgs,
};
use miette::Result;
use utils::logging::{cleanup_old_logs, init_logging, LOG_RETENTION_DAYS};

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover mods and report conflicts
    Scan,
    /// List conflicting files and their priority order
    Conflicts,
    /// Set the priority order of one conflict (first merges first, last wins)
    Order {
        /// The conflict identity as listed by `conflicts`
        #[arg(short, long)]
        identity: String,

        /// Every mod of the conflict, in the new order
        #[arg(required = true)]
        mods: Vec<String>,
    },
    /// Enable or disable a mod
    #[command(group(ArgGroup::new("state").required(true).args(["enable", "disable"])))]
    Toggle {
        /// The mod folder name
        name: String,

        #[arg(long)]
        enable: bool,

        #[arg(long)]
        disable: bool,
    },
    /// Merge all conflicts and install the result as a mod
    Merge {
        /// Also copy files that are not in conflict
        #[arg(long)]
        copy_all: bool,

        /// Remove merged files from the source mods afterwards
        #[arg(long)]
        delete_sources: bool,
    },
    /// Show information about a mod
    Info {
        /// The mod folder name
        name: String,
    },
    /// Show or change settings
    Config {
        /// The game folder (contains Mods, Data and Localization)
        #[arg(long)]
        game_path: Option<String>,

        /// The three-way merge program
        #[arg(long)]
        merge_tool: Option<String>,
    },
}

fn parse_args() -> Args {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

fn main() -> Result<()> {
    let args = parse_args();

    let (_log_guard, log_dir) = init_logging();
    if let Some(dir) = &log_dir {
        cleanup_old_logs(dir, LOG_RETENTION_DAYS);
    }
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting");

    match args.command {
        Commands::Scan => scan_mods(),
        Commands::Conflicts => list_conflicts(),
        Commands::Order { identity, mods } => order_conflict(OrderConflictArgs { identity, mods }),
        Commands::Toggle { name, enable, .. } => toggle_mod(ToggleModArgs { name, enable }),
        Commands::Merge {
            copy_all,
            delete_sources,
        } => merge_mods(MergeModsArgs {
            copy_all,
            delete_sources,
        }),
        Commands::Info { name } => info_mod(InfoModArgs { name }),
        Commands::Config {
            game_path,
            merge_tool,
        } => update_config(ConfigArgs {
            game_path,
            merge_tool,
        }),
    }
}
