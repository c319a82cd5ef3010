use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub db_max_connections: u32,
    pub db_tx_timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("缺少必需的环境变量 {0}")]
    Missing(&'static str),
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let jwt_expiration = var_or("JWT_EXPIRATION", "24h")
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);
        Ok(Config {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW", "60").parse().unwrap_or(60),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", "100").parse().unwrap_or(100),
            server_host: var_or("SERVER_HOST", "::"),
            server_port: var_or("SERVER_PORT", "3000").parse().unwrap_or(3000),
            api_base_uri: var_or("API_BASE_URI", "/api"),
            db_max_connections: var_or("DB_MAX_CONNECTIONS", "10").parse().unwrap_or(10),
            db_tx_timeout_secs: var_or("DB_TX_TIMEOUT_SECS", "10").parse().unwrap_or(10),
        })
    }

    /// 测试和本地工具使用的配置，不读取环境变量
    pub fn for_tests(database_url: &str) -> Self {
        Config {
            database_url: database_url.to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiration_secs: 3600,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            api_base_uri: "/api".to_string(),
            db_max_connections: 5,
            db_tx_timeout_secs: 10,
        }
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.db_tx_timeout_secs)
    }
}
