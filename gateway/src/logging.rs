//! Tracing initialization, modeled on the corpus's `tracing` +
//! `tracing-subscriber` setup for its HTTP-serving binaries.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = log_format == "json" || (log_format == "auto" && !is_tty());

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn is_tty() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
