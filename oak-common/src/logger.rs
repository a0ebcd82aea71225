use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("无法打开日志文件 {path}: {source}")]
    OpenFile { path: String, source: io::Error },
    #[error("无法初始化日志系统: {0}")]
    SetLogger(#[from] SetLoggerError),
}

/// 解析日志级别，无法识别时使用 info
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// 初始化终端日志和文件日志
///
/// 标准输出用于返回工具结果，终端日志只写到标准错误。
pub fn init_logger(log_file: &str, level: &str) -> Result<(), LoggerError> {
    // 确保日志目录存在
    if let Some(parent) = Path::new(log_file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).unwrap_or_else(|e| {
                eprintln!("无法创建日志目录: {}", e);
            });
        }
    }

    // 打开或创建日志文件
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|source| LoggerError::OpenFile {
            path: log_file.to_string(),
            source,
        })?;

    let level_filter = parse_level(level);

    CombinedLogger::init(vec![
        TermLogger::new(
            level_filter,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ),
        WriteLogger::new(level_filter, Config::default(), file),
    ])?;
    Ok(())
}
