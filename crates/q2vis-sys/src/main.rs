// Entry point.
//
// Usage: q2vis [+set <cvar> <value>]...
//
//   q2vis +set map maps/base1.bsp +set frames 50 +set r_dumpatlas atlas.png
//
// Log output is filtered with RUST_LOG (default `info`).

use std::process::ExitCode;

use q2vis_common::cvar::CvarContext;
use q2vis_sys::host;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cvars = CvarContext::new();
    let args: Vec<String> = std::env::args().skip(1).collect();
    for arg in cvars.add_early_commands(&args) {
        log::warn!("ignoring argument {}", arg);
    }

    match host::run(&mut cvars) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
