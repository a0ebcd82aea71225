use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::session::ExpiryPolicy;
use crate::store::DataRoot;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub data_path: String,
    /// 每次读写时优先使用的环境变量，留空表示只用 data_path
    pub data_path_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub store_file: String,
    pub expiry_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_file: String,
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub sessions: SessionConfig,
    pub logging: LoggingConfig,
}

const DEFAULT_CONFIG: &str = r#"[server]
# 服务名称
name = "professor-oak"

[data]
# 记录文件的根目录
data_path = "data"
# 设置后每次读写都会先读取该环境变量作为根目录
data_path_env = "DATA_PATH"

[sessions]
# 测验会话的持久化记录(相对于根目录)
store_file = "quiz-sessions.yaml"
# 会话有效期(秒)
expiry_seconds = 3600
# 后台清理过期会话的间隔(秒)，0 表示不启用
cleanup_interval_seconds = 300

[logging]
# 日志文件路径
log_file = "logs/server.log"
# 日志级别: "error", "warn", "info", "debug", "trace"
level = "info"
"#;

impl Settings {
    /// 从当前目录下的 config/default.toml 加载配置
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// 从指定目录加载配置，目录或配置文件不存在时写入默认配置
    ///
    /// 环境变量 `OAK_<段>__<键>` 会覆盖文件中的值，
    /// 例如 `OAK_SESSIONS__EXPIRY_SECONDS=600`。
    pub fn load_from(config_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let default_config_path = config_dir.join("default.toml");

        // 确保配置目录存在
        if !config_dir.exists() {
            fs::create_dir_all(config_dir)
                .map_err(|e| ConfigError::Message(format!("无法创建配置目录: {}", e)))?;
        }

        // 配置文件不存在时写入默认配置
        if !default_config_path.exists() {
            let mut file = fs::File::create(&default_config_path)
                .map_err(|e| ConfigError::Message(format!("无法创建配置文件: {}", e)))?;

            file.write_all(DEFAULT_CONFIG.as_bytes())
                .map_err(|e| ConfigError::Message(format!("无法写入配置文件: {}", e)))?;
        }

        let settings = Config::builder()
            .add_source(File::from(default_config_path))
            .add_source(
                Environment::with_prefix("OAK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// 记录存储的根目录
    pub fn data_root(&self) -> DataRoot {
        if self.data.data_path_env.is_empty() {
            DataRoot::fixed(&self.data.data_path)
        } else {
            DataRoot::env(&self.data.data_path_env, &self.data.data_path)
        }
    }

    /// 会话过期策略
    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::from_secs(self.sessions.expiry_seconds)
    }
}
