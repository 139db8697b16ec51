//! ANSI styling for terminal output.
//!
//! Styling is switched off when stdout is not a TTY or `NO_COLOR` is set
//! (https://no-color.org/).

use std::io::IsTerminal;
use std::sync::OnceLock;

static ENABLED: OnceLock<bool> = OnceLock::new();

pub fn enabled() -> bool {
    *ENABLED.get_or_init(|| {
        std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
    })
}

/// What a piece of text means, mapped to one SGR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Strong,
    Muted,
    Good,
    Warn,
    Bad,
    Title,
    Success,
}

impl Tone {
    fn sgr(self) -> &'static str {
        match self {
            Tone::Strong => "1",
            Tone::Muted => "2",
            Tone::Good => "32",
            Tone::Warn => "33",
            Tone::Bad => "31",
            Tone::Title => "1;36",
            Tone::Success => "1;32",
        }
    }
}

pub fn paint(tone: Tone, s: &str) -> String {
    if enabled() {
        format!("\x1b[{}m{}\x1b[0m", tone.sgr(), s)
    } else {
        s.to_string()
    }
}

/// Drop SGR escape sequences, keeping the visible text.
pub fn strip(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_esc = false;
    for c in s.chars() {
        match c {
            '\x1b' => in_esc = true,
            'm' if in_esc => in_esc = false,
            _ if in_esc => {}
            _ => out.push(c),
        }
    }
    out
}

/// Left-align `s` in a column of `width` visible characters.
pub fn rpad(s: &str, width: usize) -> String {
    let visible = strip(s).chars().count();
    format!("{}{}", s, " ".repeat(width.saturating_sub(visible)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_and_pad() {
        let styled = "\x1b[1;32mok\x1b[0m";
        assert_eq!(strip(styled), "ok");
        assert_eq!(strip(&rpad(styled, 5)), "ok   ");
        assert_eq!(rpad("toolong", 3), "toolong");
    }
}
