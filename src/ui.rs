//! Terminal output helpers for the CLI
//!
//! Styling is applied only when stdout is a terminal and
//! `CARAVEL_NO_COLOR` is unset; piped output stays plain.

use crossterm::style::Stylize;
use is_terminal::IsTerminal;

fn styled() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("CARAVEL_NO_COLOR").is_none()
}

pub fn heading(text: &str) {
    if styled() {
        println!("{}", text.bold());
    } else {
        println!("{text}");
    }
}

pub fn success(text: &str) {
    if styled() {
        println!("{} {text}", "✓".green());
    } else {
        println!("ok: {text}");
    }
}

pub fn warning(text: &str) {
    if styled() {
        eprintln!("{} {text}", "!".yellow());
    } else {
        eprintln!("warning: {text}");
    }
}

pub fn failure(text: &str) {
    if styled() {
        eprintln!("{} {text}", "✗".red());
    } else {
        eprintln!("error: {text}");
    }
}

/// Aligned key/value detail line
pub fn detail(key: &str, value: &str) {
    if styled() {
        println!("  {:<12} {value}", format!("{key}:").dim());
    } else {
        println!("  {key}: {value}");
    }
}
