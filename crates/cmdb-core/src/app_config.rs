use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub jobs_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub http_request_timeout_secs: u64,
    pub http_user_agent: String,
    pub eia_api_key: Option<String>,
    pub misfire_grace_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub sweep_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[redacted]")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("jobs_path", &self.jobs_path)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http_request_timeout_secs", &self.http_request_timeout_secs)
            .field("http_user_agent", &self.http_user_agent)
            .field(
                "eia_api_key",
                &self.eia_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("misfire_grace_secs", &self.misfire_grace_secs)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("sweep_cron", &self.sweep_cron)
            .finish()
    }
}
