// logging.rs
//
// Logger initialization and console banner

use colored::Colorize;

/// Initialize the global logger. `debug` turns on per-command output.
pub fn init(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Banner shown at the start of a run, sized to fit its title.
pub fn print_run_banner(action: &str, deployment: &str) {
    let title = format!("drydock {} of {}", action, deployment);
    let inner = title.len() + 2;
    let rule = "─".repeat(inner);

    println!("{}", format!("┌{}┐", rule).as_str().cyan());
    println!("{}", format!("│ {} │", title).as_str().cyan().bold());
    println!("{}", format!("└{}┘", rule).as_str().cyan());
}
