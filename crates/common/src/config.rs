/// Infrastructure configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
/// Tunable pipeline thresholds live in the TOML file at `pipeline_config_path`.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Pipeline threshold file path
    pub pipeline_config_path: String,

    // Bounded queue between the engine and the repository sink
    pub sink_queue_capacity: usize,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            database_url: required_env("DATABASE_URL"),
            pipeline_config_path: optional_env("PIPELINE_CONFIG_PATH")
                .unwrap_or_else(|| "config/pipeline.toml".to_string()),
            sink_queue_capacity: optional_env("SINK_QUEUE_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4096),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
