use serde::{Deserialize, Serialize};

/// Main configuration structure for EasyPay
///
/// Everything is environment-driven; `Config::from_env` reads the
/// `DATABASE_URL` / `REDIS_URL` / `AUTHORIZE_NET_*` / `WEBHOOK_*` family of
/// variables and falls back to the serde defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub currencies: CurrencyConfig,

    #[serde(default)]
    pub limits: ReservedLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheSettings::default(),
            processor: ProcessorConfig::default(),
            webhooks: WebhookConfig::default(),
            rate_limit: RateLimitSettings::default(),
            queue: QueueSettings::default(),
            currencies: CurrencyConfig::default(),
            limits: ReservedLimits::default(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, crate::Error> {
        let mut config = Config::default();

        if let Some(url) = env_var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(size) = env_parse("DATABASE_POOL_SIZE") {
            config.database.pool_size = size;
        }
        if let Some(overflow) = env_parse("DATABASE_MAX_OVERFLOW") {
            config.database.max_overflow = overflow;
        }

        if let Some(url) = env_var("REDIS_URL") {
            config.cache.redis_url = Some(url);
        }
        if let Some(size) = env_parse("REDIS_POOL_SIZE") {
            config.cache.pool_size = size;
        }

        if let Some(login) = env_var("AUTHORIZE_NET_API_LOGIN_ID") {
            config.processor.api_login_id = login;
        }
        if let Some(key) = env_var("AUTHORIZE_NET_TRANSACTION_KEY") {
            config.processor.transaction_key = key;
        }
        if let Some(sandbox) = env_parse("AUTHORIZE_NET_SANDBOX") {
            config.processor.sandbox = sandbox;
        }
        if let Some(url) = env_var("AUTHORIZE_NET_API_URL") {
            config.processor.api_url = Some(url);
        }
        if let Some(secret) = env_var("AUTHORIZE_NET_WEBHOOK_SECRET") {
            config.webhooks.inbound_secret = secret;
        }

        if let Some(secret) = env_var("WEBHOOK_SECRET") {
            config.webhooks.signing_secret = secret;
        }
        if let Some(retries) = env_parse("WEBHOOK_MAX_RETRIES") {
            config.webhooks.max_retries = retries;
        }
        if let Some(interval) = env_parse("WEBHOOK_RETRY_INTERVAL") {
            config.webhooks.retry_interval_secs = interval;
        }
        if let Some(timeout) = env_parse("WEBHOOK_TIMEOUT") {
            config.webhooks.timeout_secs = timeout;
        }

        if let Some(list) = env_var("SUPPORTED_CURRENCIES") {
            config.currencies.supported = list
                .split(',')
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(default) = env_var("DEFAULT_CURRENCY") {
            config.currencies.default = default.to_uppercase();
        }

        if let Some(threshold) = env_parse("FRAUD_THRESHOLD") {
            config.limits.fraud_threshold = threshold;
        }
        if let Some(max) = env_parse("MAX_DAILY_TRANSACTIONS") {
            config.limits.max_daily_transactions = max;
        }

        if let Some(host) = env_var("HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse("PORT") {
            config.server.port = port;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.database.pool_size == 0 {
            return Err(Error::Config("Database pool size must be > 0".to_string()));
        }

        if self.currencies.supported.is_empty() {
            return Err(Error::Config("Supported currency list is empty".to_string()));
        }

        if !self.currencies.supported.contains(&self.currencies.default) {
            return Err(Error::Config(format!(
                "Default currency {} is not in the supported list",
                self.currencies.default
            )));
        }

        if self.webhooks.max_retries == 0 {
            return Err(Error::Config("Webhook max retries must be > 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_graceful_shutdown() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_max_overflow")]
    pub max_overflow: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
        }
    }
}

impl DatabaseConfig {
    /// Hard cap on pool connections (base + overflow)
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }
}

fn default_database_url() -> String {
    "postgres://localhost/easypay".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_max_overflow() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_redis_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_entity_ttl")]
    pub entity_ttl_secs: u64,

    #[serde(default = "default_list_ttl")]
    pub list_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            pool_size: default_redis_pool_size(),
            entity_ttl_secs: default_entity_ttl(),
            list_ttl_secs: default_list_ttl(),
        }
    }
}

fn default_redis_pool_size() -> u32 {
    10
}

fn default_entity_ttl() -> u64 {
    300
}

fn default_list_ttl() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub api_login_id: String,

    #[serde(default)]
    pub transaction_key: String,

    #[serde(default = "default_true")]
    pub sandbox: bool,

    /// Explicit endpoint override; otherwise derived from `sandbox`
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default = "default_processor_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            api_login_id: String::new(),
            transaction_key: String::new(),
            sandbox: true,
            api_url: None,
            timeout_secs: default_processor_timeout(),
        }
    }
}

impl ProcessorConfig {
    /// Resolve the endpoint, honoring the explicit override first
    pub fn endpoint(&self) -> String {
        if let Some(url) = &self.api_url {
            return url.clone();
        }
        if self.sandbox {
            "https://apitest.authorize.net/xml/v1/request.api".to_string()
        } else {
            "https://api.authorize.net/xml/v1/request.api".to_string()
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_login_id.is_empty() && !self.transaction_key.is_empty()
    }
}

fn default_processor_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Secret used to sign outbound webhooks
    #[serde(default)]
    pub signing_secret: String,

    /// Secret used to verify inbound processor webhooks
    #[serde(default)]
    pub inbound_secret: String,

    /// Default delivery target for outbound events
    #[serde(default)]
    pub target_url: Option<String>,

    #[serde(default = "default_webhook_max_retries")]
    pub max_retries: i32,

    /// Base delay of the exponential backoff schedule
    #[serde(default = "default_webhook_retry_interval")]
    pub retry_interval_secs: u64,

    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    /// How often the background sweep looks for due deliveries
    #[serde(default = "default_webhook_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            inbound_secret: String::new(),
            target_url: None,
            max_retries: default_webhook_max_retries(),
            retry_interval_secs: default_webhook_retry_interval(),
            timeout_secs: default_webhook_timeout(),
            poll_interval_secs: default_webhook_poll_interval(),
        }
    }
}

fn default_webhook_max_retries() -> i32 {
    3
}

fn default_webhook_retry_interval() -> u64 {
    60
}

fn default_webhook_timeout() -> u64 {
    30
}

fn default_webhook_poll_interval() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: default_requests_per_hour(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    100
}

fn default_requests_per_hour() -> u32 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_task_workers")]
    pub task_workers: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_workers: default_max_workers(),
            request_timeout_secs: default_request_timeout(),
            task_workers: default_task_workers(),
        }
    }
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_max_workers() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_task_workers() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    #[serde(default = "default_supported_currencies")]
    pub supported: Vec<String>,

    #[serde(default = "default_currency")]
    pub default: String,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            supported: default_supported_currencies(),
            default: default_currency(),
        }
    }
}

impl CurrencyConfig {
    pub fn is_supported(&self, currency: &str) -> bool {
        self.supported.iter().any(|c| c == currency)
    }
}

fn default_supported_currencies() -> Vec<String> {
    ["USD", "EUR", "GBP", "CAD", "AUD"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Reserved thresholds carried in config but not enforced in the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedLimits {
    #[serde(default = "default_fraud_threshold")]
    pub fraud_threshold: f64,

    #[serde(default = "default_max_daily_transactions")]
    pub max_daily_transactions: u32,
}

impl Default for ReservedLimits {
    fn default() -> Self {
        Self {
            fraud_threshold: default_fraud_threshold(),
            max_daily_transactions: default_max_daily_transactions(),
        }
    }
}

fn default_fraud_threshold() -> f64 {
    0.8
}

fn default_max_daily_transactions() -> u32 {
    10000
}
