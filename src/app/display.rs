use std::env;
use std::io::{self, IsTerminal};

use crate::core::VmStatus;

pub const GREEN: &str = "32";
pub const YELLOW: &str = "33";
pub const RED: &str = "31";
pub const GRAY: &str = "90";

pub fn colorize(value: &str, code: &str, enabled: bool) -> String {
    if enabled {
        format!("\u{1b}[{code}m{value}\u{1b}[0m")
    } else {
        value.to_string()
    }
}

/// `NO_COLOR` wins over `FORCE_COLOR`; otherwise color only when stdout is a terminal.
pub fn supports_color() -> bool {
    color_override().unwrap_or_else(|| io::stdout().is_terminal())
}

fn color_override() -> Option<bool> {
    if env_flag("NO_COLOR") {
        Some(false)
    } else if env_flag("FORCE_COLOR") {
        Some(true)
    } else {
        None
    }
}

fn env_flag(name: &str) -> bool {
    env::var_os(name).is_some_and(|value| !value.is_empty())
}

pub fn status_color(status: VmStatus) -> &'static str {
    match status {
        VmStatus::Running => GREEN,
        VmStatus::Stopped => YELLOW,
        VmStatus::NotCreated => GRAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorize_wraps_value_when_enabled() {
        let colored = colorize("ok", GREEN, true);
        assert_eq!(colored, "\u{1b}[32mok\u{1b}[0m");
    }

    #[test]
    fn colorize_returns_plain_when_disabled() {
        let plain = colorize("ok", GREEN, false);
        assert_eq!(plain, "ok");
    }

    #[test]
    fn no_color_beats_force_color() {
        temp_env::with_vars([("NO_COLOR", Some("1")), ("FORCE_COLOR", Some("1"))], || {
            assert_eq!(color_override(), Some(false));
            assert!(!supports_color());
        });
    }

    #[test]
    fn force_color_enables_without_terminal() {
        temp_env::with_vars([("NO_COLOR", None::<&str>), ("FORCE_COLOR", Some("1"))], || {
            assert_eq!(color_override(), Some(true));
            assert!(supports_color());
        });
    }

    #[test]
    fn empty_values_do_not_count() {
        temp_env::with_vars([("NO_COLOR", Some("")), ("FORCE_COLOR", None)], || {
            assert_eq!(color_override(), None);
        });
    }

    #[test]
    fn status_colors_follow_state() {
        assert_eq!(status_color(VmStatus::Running), GREEN);
        assert_eq!(status_color(VmStatus::Stopped), YELLOW);
        assert_eq!(status_color(VmStatus::NotCreated), GRAY);
    }
}
