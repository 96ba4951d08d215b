use std::net::SocketAddr;

use crate::DailySchedule;

/// Browser origins allowed to call the API with credentials.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = [
    "https://nutri-tracker-app-frontend.vercel.app",
    "http://localhost:3000",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
    pub port: u16,
    pub platform_hosted: bool,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub cleanup_schedule: DailySchedule,
}

impl AppConfig {
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.env == Environment::Production
    }

    /// True when a production deployment runs on the serverless host, which
    /// owns the socket. The binary then neither listens nor starts jobs.
    #[must_use]
    pub fn runs_on_managed_platform(&self) -> bool {
        self.is_production() && self.platform_hosted
    }

    /// Whether unhandled error messages may be echoed back to clients.
    #[must_use]
    pub fn exposes_error_details(&self) -> bool {
        !self.is_production()
    }

    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("port", &self.port)
            .field("platform_hosted", &self.platform_hosted)
            .field("allowed_origins", &self.allowed_origins)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("cleanup_schedule", &self.cleanup_schedule)
            .finish()
    }
}
