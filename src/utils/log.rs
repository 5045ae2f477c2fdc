// src/utils/log.rs

//! Presentation helpers for operator-facing output.
//!
//! Everything goes through the `log` facade, so the binary's `env_logger`
//! setup decides timestamps, levels and filtering.

/// Width of header borders.
const RULE_WIDTH: usize = 60;

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(RULE_WIDTH);
    ::log::info!("{}", border);
    ::log::info!("  {}", title);
    ::log::info!("{}", border);
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    ::log::info!("{}", format_step(step_num, total, message));
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    ::log::info!("    {}", message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    ::log::info!("[SUMMARY] {}", title);
    let width = items.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (key, value) in items {
        ::log::info!("    {:<width$} : {}", key, value, width = width);
    }
}

fn format_step(step_num: usize, total: usize, message: &str) -> String {
    format!("[STEP {}/{}] {}", step_num, total, message)
}

/// Format a duration as `1h 02m 03s`, `2m 03s` or `3.4s`.
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, _) => format!("{:.1}s", duration.as_secs_f64()),
        (0, m, s) => format!("{}m {:02}s", m, s),
        (h, m, s) => format!("{}h {:02}m {:02}s", h, m, s),
    }
}
