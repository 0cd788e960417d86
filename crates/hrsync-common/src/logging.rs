use tracing_subscriber::EnvFilter;

// HTTP client internals are noisy at debug; keep them at warn unless RUST_LOG says otherwise.
const QUIET_DEPENDENCIES: &[&str] = &["hyper_util=warn", "reqwest=warn", "rustls=warn"];

pub fn init(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(log_level))
        .with_target(true)
        .try_init();
}

fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let mut directives = vec![log_level.trim().to_string()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| (*d).to_string()));
    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new("info"))
}
