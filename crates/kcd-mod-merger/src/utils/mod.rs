use camino::Utf8Path;
use colored::Colorize;
use inquire::Confirm;
use kmm_core::{LockedAction, LockedDirectoryHandler};
use regex::Regex;
use std::io;

pub mod config;
pub mod logging;

#[macro_export]
macro_rules! println_pad {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        for __line in __s.lines() {
            println!("    {}", __line);
        }
    }};
}

const ANSI_ESCAPE: &str = "\x1b\\[[0-9;]*m";

/// Character count of `s` as shown in a terminal.
pub fn visible_len(ansi: Option<&Regex>, s: &str) -> usize {
    match ansi {
        Some(ansi) => ansi.replace_all(s, "").chars().count(),
        None => s.chars().count(),
    }
}

/// Prints the provided lines inside an ASCII box
pub fn print_ansi_boxed_lines(lines: &[String]) {
    let ansi = Regex::new(ANSI_ESCAPE).ok();

    let width = lines
        .iter()
        .map(|s| visible_len(ansi.as_ref(), s))
        .max()
        .unwrap_or(0);

    let border = "-".repeat(width + 4);
    println_pad!("{}", border);
    for line in lines {
        let pad = width - visible_len(ansi.as_ref(), line);
        println_pad!("| {}{} |", line, " ".repeat(pad));
    }
    println_pad!("{}", border);
}

/// Asks on the terminal whether to retry removing a locked directory.
/// Non-interactive sessions abort.
pub struct ConfirmLockedHandler;

impl LockedDirectoryHandler for ConfirmLockedHandler {
    fn on_locked(&self, path: &Utf8Path, error: &io::Error, attempt: u32) -> LockedAction {
        eprintln!(
            "  {} {} ({})",
            "⚠ Cannot remove".bright_yellow().bold(),
            path.as_str().bright_white(),
            error
        );

        let answer = Confirm::new("Close programs using this folder, then retry?")
            .with_default(true)
            .with_help_message(&format!("attempt {attempt}"))
            .prompt();

        match answer {
            Ok(true) => LockedAction::Retry,
            Ok(false) => LockedAction::Abort,
            Err(e) => {
                tracing::debug!(error = %e, "no answer to locked directory prompt");
                LockedAction::Abort
            }
        }
    }
}
