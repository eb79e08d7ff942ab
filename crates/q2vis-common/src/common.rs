// common.rs -- console printing and version strings
//
// All console output is routed through the `log` facade; the binary decides
// where it ends up (env_logger, filtered by RUST_LOG).

pub const DISTNAME: &str = "q2vis";
pub const DISTVER: &str = env!("CARGO_PKG_VERSION");

/// Log target used by the console helpers, so `RUST_LOG=console=debug`
/// enables developer prints without the per-module noise.
pub const CONSOLE_TARGET: &str = "console";

/// Strip the trailing newline the Quake-style messages carry.
fn console_line(msg: &str) -> &str {
    msg.trim_end_matches(['\n', '\r'])
}

/// Print a message to the console.
pub fn com_printf(msg: &str) {
    log::info!(target: CONSOLE_TARGET, "{}", console_line(msg));
}

/// Developer-only print. Only shows up when debug logging is enabled.
pub fn com_dprintf(msg: &str) {
    log::debug!(target: CONSOLE_TARGET, "{}", console_line(msg));
}

/// Version banner printed at startup.
pub fn version_string() -> String {
    format!("{} {}", DISTNAME, DISTVER)
}
