use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
///
/// `level` comes from `[monitoring] log_level`; `--verbose` always wins.
pub fn default_directive(verbose: bool, level: Option<&str>) -> String {
    match (verbose, level) {
        (true, _) => "contact_etl=debug,info".to_string(),
        (false, Some(level)) => format!("contact_etl={},warn", level.trim().to_ascii_lowercase()),
        (false, None) => "contact_etl=info,warn".to_string(),
    }
}

fn env_filter(verbose: bool, level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose, level)))
        .unwrap_or_else(|_| EnvFilter::new("contact_etl=info"))
}

pub fn init_cli_logger(verbose: bool, level: Option<&str>) {
    tracing_subscriber::registry()
        .with(env_filter(verbose, level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// JSON lines for CloudWatch.
pub fn init_lambda_logger() {
    tracing_subscriber::registry()
        .with(env_filter(false, None))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true, Some("warn")), "contact_etl=debug,info");
        assert_eq!(default_directive(false, Some("DEBUG")), "contact_etl=debug,warn");
        assert_eq!(default_directive(false, None), "contact_etl=info,warn");
    }
}
