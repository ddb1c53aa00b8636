//! Terminal capability checks.

use std::io::IsTerminal;

fn env_set(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|v| !v.is_empty())
}

fn dumb_terminal() -> bool {
    std::env::var_os("TERM").is_some_and(|v| v == "dumb")
}

/// Whether output written to `stream` should carry ANSI colour.
///
/// `FORCE_COLOR` always wins. Otherwise colour needs a terminal that is not `TERM=dumb`, and
/// `NO_COLOR` must be unset.
pub fn should_use_color<T: IsTerminal>(stream: &T) -> bool {
    env_set("FORCE_COLOR") || (stream.is_terminal() && !env_set("NO_COLOR") && !dumb_terminal())
}
