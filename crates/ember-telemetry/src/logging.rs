use tracing_subscriber::EnvFilter;

/// Output format for the fmt layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Configuration for the tracing subscriber.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default directive when RUST_LOG is unset, e.g. "info" or
    /// "info,ember_gateway=debug".
    pub default_directive: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

/// Initialize the global subscriber with defaults. RUST_LOG wins when set.
pub fn init() {
    init_with(&TelemetryConfig::default());
}

/// Initialize the global subscriber from an explicit config. Safe to call
/// more than once; later calls are no-ops.
pub fn init_with(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive.clone()));

    let result = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("subscriber already initialized");
    }
}
