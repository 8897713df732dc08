//! 配置管理模块
//!
//! 支持多格式配置文件加载、环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// MCP 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    pub fn is_http(self) -> bool {
        !matches!(self, Self::Stdio)
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable-http" | "streamable_http" => Ok(Self::StreamableHttp),
            other => Err(format!("未知的传输方式: {}", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        };
        write!(f, "{}", s)
    }
}

/// 规则集存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    #[serde(alias = "postgres")]
    Postgresql,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgresql" | "postgres" => Ok(Self::Postgresql),
            other => Err(format!("不支持的存储后端: {}", other)),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Postgresql => write!(f, "postgresql"),
        }
    }
}

/// 传输配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
    /// 仅被接受，不做校验
    pub auth_token: Option<String>,
    /// HTTP 优雅关闭的最长等待时间
    pub shutdown_grace_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            host: "localhost".to_string(),
            port: 9000,
            auth_token: None,
            shutdown_grace_seconds: 5,
        }
    }
}

impl TransportConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: None,
            max_connections: 10,
            connect_timeout_seconds: 30,
        }
    }
}

/// 规则引擎缓存配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// lru 或 lfu
    pub cache_type: String,
    pub cache_size: usize,
    pub ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub max_cycles: usize,
    /// 在执行报告中记录每条规则的条件判定结果
    pub trace: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_type: "lru".to_string(),
            cache_size: 1000,
            ttl_seconds: 900,
            cleanup_interval_seconds: 3600,
            max_cycles: 5000,
            trace: false,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9001,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub transport: TransportConfig,
    pub storage: StorageConfig,
    pub engine: EngineSettings,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "rule-mcp".to_string(),
            environment: "development".to_string(),
            transport: TransportConfig::default(),
            storage: StorageConfig::default(),
            engine: EngineSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. 环境变量（RULE_MCP_ 前缀，`__` 分隔层级，如 RULE_MCP_ENGINE__CACHE_SIZE）
    /// 4. 兼容的扁平环境变量（MCP_TRANSPORT、HTTP_PORT、GRULE_CACHE_SIZE 等）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("RULE_MCP_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, Path::new(&config_dir), &env, |key| {
            std::env::var(key).ok()
        })
    }

    /// 从指定目录加载配置，扁平环境变量通过 `lookup` 读取
    pub fn load_from<F>(
        service_name: &str,
        config_dir: &Path,
        env: &str,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                Environment::with_prefix("RULE_MCP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.apply_legacy_env(lookup)?;
        config.validate()?;

        Ok(config)
    }

    /// 应用扁平格式的环境变量
    ///
    /// `lookup` 按变量名返回取值，便于测试时注入。
    pub fn apply_legacy_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("MCP_TRANSPORT") {
            self.transport.kind = kind.parse().map_err(ConfigError::Message)?;
        }
        if let Some(host) = lookup("HTTP_HOST") {
            self.transport.host = host;
        }
        if let Some(port) = lookup("HTTP_PORT") {
            self.transport.port = parse_number("HTTP_PORT", &port)?;
        }
        if let Some(token) = lookup("HTTP_AUTH_TOKEN") {
            self.transport.auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(backend) = lookup("DATABASE_TYPE") {
            self.storage.backend = backend.parse().map_err(ConfigError::Message)?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.storage.url = Some(url);
        }
        if let Some(cache_type) = lookup("GRULE_CACHE_TYPE") {
            self.engine.cache_type = cache_type;
        }
        if let Some(size) = lookup("GRULE_CACHE_SIZE") {
            self.engine.cache_size = parse_number("GRULE_CACHE_SIZE", &size)?;
        }
        if let Some(ttl) = lookup("GRULE_CACHE_TTL") {
            self.engine.ttl_seconds = parse_number("GRULE_CACHE_TTL", &ttl)?;
        }
        if let Some(interval) = lookup("GRULE_CACHE_CLEANUP_INTERVAL") {
            self.engine.cleanup_interval_seconds =
                parse_number("GRULE_CACHE_CLEANUP_INTERVAL", &interval)?;
        }
        if let Some(trace) = lookup("GRULE_TRACE") {
            self.engine.trace = parse_number("GRULE_TRACE", &trace)?;
        }
        Ok(())
    }

    /// 校验配置项之间的约束
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Postgresql
            && self.storage.url.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Message(
                "postgresql 存储后端需要配置 storage.url 或 DATABASE_URL".to_string(),
            ));
        }
        if self.transport.kind.is_http() && self.transport.host.trim().is_empty() {
            return Err(ConfigError::Message("HTTP 传输需要配置监听地址".to_string()));
        }
        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Message(format!("环境变量 {} 的值无效: {}", key, value)))
}
