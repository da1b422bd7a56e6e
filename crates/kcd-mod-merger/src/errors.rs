use camino::Utf8PathBuf;
use kmm_core::ErrorKind;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Game path is not configured")]
    #[diagnostic(
        code(config::game_path_missing),
        help("Run 'kcd-mod-merger config --game-path <path>' with the folder that contains Mods, Data and Localization")
    )]
    GamePathMissing,

    #[error("Invalid game directory: {path}")]
    #[diagnostic(
        code(config::invalid_game_path),
        help("The game folder must contain the Mods, Data and Localization directories")
    )]
    InvalidGamePath { path: Utf8PathBuf },

    #[error("Merge tool not found: {path}")]
    #[diagnostic(
        code(config::merge_tool_missing),
        help("Install KDiff3 next to the executable or run 'kcd-mod-merger config --merge-tool <path>'")
    )]
    MergeToolMissing { path: Utf8PathBuf },

    #[error("Mod not found: {name}")]
    #[diagnostic(
        code(mods::not_found),
        help("Run 'kcd-mod-merger scan' to list the installed mods by folder name")
    )]
    ModNotFound { name: String },

    #[error("No conflict for: {identity}")]
    #[diagnostic(
        code(conflicts::not_found),
        help("Run 'kcd-mod-merger conflicts' to list the current conflicts")
    )]
    ConflictNotFound { identity: String },

    #[error("Operation aborted")]
    #[diagnostic(
        code(operation::aborted),
        help("Close programs that use files in the game folder and try again")
    )]
    Aborted {
        #[source]
        source: kmm_core::Error,
    },

    #[error("Configuration could not be saved")]
    #[diagnostic(
        code(config::save_failed),
        help("Check that the folder of the executable is writable")
    )]
    ConfigSaveFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Mod merger failed")]
    #[diagnostic(code(kmm::failed))]
    Core {
        #[source]
        source: kmm_core::Error,
    },
}

impl From<kmm_core::Error> for CliError {
    fn from(source: kmm_core::Error) -> Self {
        match source {
            kmm_core::Error::ModNotFound(name) => Self::ModNotFound { name },
            kmm_core::Error::ConflictNotFound(identity) => Self::ConflictNotFound { identity },
            source if source.kind() == ErrorKind::UserAbortable => Self::Aborted { source },
            source => Self::Core { source },
        }
    }
}

impl CliError {
    pub fn invalid_game_path(path: Utf8PathBuf) -> Self {
        Self::InvalidGamePath { path }
    }

    pub fn merge_tool_missing(path: Utf8PathBuf) -> Self {
        Self::MergeToolMissing { path }
    }
}
