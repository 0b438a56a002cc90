//! 日志模块 - 文件日志与大小轮转

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// 日志文件名
const LOG_FILE_NAME: &str = "backuptools.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从 config.json 的 log 段加载日志配置
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        if let Ok(content) = fs::read_to_string(&config_file) {
            if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                if let Some(log) = config.get("log") {
                    if let Ok(parsed) = serde_json::from_value::<LogConfig>(log.clone()) {
                        return parsed;
                    }
                }
            }
        }
        Self::default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，超限时轮转为 .log.old
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = (max_size_mb as u64) * 1024 * 1024;

        let writer = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        if let Ok(metadata) = fs::metadata(file_path) {
            if metadata.len() > max_size {
                Self::rotate_log(file_path)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件：当前日志改名为 .log.old
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)?;
        Ok(())
    }

    fn check_and_rotate(&self) -> io::Result<()> {
        if let Ok(metadata) = fs::metadata(&self.file_path) {
            if metadata.len() > self.max_size {
                let mut guard = self.writer.lock().unwrap();
                if let Some(mut w) = guard.take() {
                    let _ = w.flush();
                }
                Self::rotate_log(&self.file_path)?;
                *guard = Some(Self::open_file(&self.file_path, self.max_size)?);
            }
        }
        Ok(())
    }
}

impl Clone for SizeRotatingWriter {
    fn clone(&self) -> Self {
        Self {
            file_path: self.file_path.clone(),
            max_size: self.max_size,
            writer: self.writer.clone(),
        }
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(ref mut writer) = *guard {
            let written = writer.write(buf)?;
            writer.flush()?;
            Ok(written)
        } else {
            Err(io::Error::new(io::ErrorKind::Other, "Writer not available"))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(ref mut writer) = *guard {
            writer.flush()
        } else {
            Ok(())
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        // 在创建写入器前检查轮转
        let _ = self.check_and_rotate();

        LogWriter {
            inner: self.writer.clone(),
        }
    }
}

/// 初始化日志系统：文件 + 控制台输出
pub fn init(config_dir: &Path) {
    let config = LogConfig::load(config_dir);

    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("opendal=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    let log_dir = config_dir.join("logs");

    match SizeRotatingWriter::new(&log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false);

            let console_layer = tracing_subscriber::fmt::layer().with_target(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer);

            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        Err(_) => {
            // 文件日志创建失败，回退到控制台
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_size_mb, 5);
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_log_config_load_from_config_json() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "log": { "enabled": false, "max_size_mb": 10, "level": "debug" } }"#,
        )
        .unwrap();

        let config = LogConfig::load(dir.path());
        assert!(!config.enabled);
        assert_eq!(config.max_size_mb, 10);
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_rotation_renames_oversized_log() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join(LOG_FILE_NAME);
        std::fs::write(&log_path, vec![0u8; 2048]).unwrap();

        // 上限 0 MB，任何内容都触发轮转
        let _writer = SizeRotatingWriter::new(dir.path(), 0).unwrap();
        assert!(dir.path().join("backuptools.log.old").exists());
    }
}
