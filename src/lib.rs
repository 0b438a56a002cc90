use std::path::PathBuf;
use std::sync::Arc;

pub mod config;
pub mod core;
pub mod logging;
pub mod storage;

pub use crate::config::{ConfigStore, RetentionRule, S3Bucket, ScheduleEntry, SyncRule};
pub use crate::core::{
    ProgressTracker, RetentionEngine, ScanResult, SyncEngine, SyncScheduler, TaskSnapshot,
};

/// 应用配置目录
pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("backuptools"))
        .unwrap_or_else(|| PathBuf::from(".backuptools"))
}

/// 应用状态：配置、共享进度跟踪与两个后台引擎
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub tracker: Arc<ProgressTracker>,
    pub retention: Arc<RetentionEngine>,
    pub sync: Arc<SyncScheduler>,
}

impl AppState {
    pub fn new() -> anyhow::Result<Self> {
        let config_dir = app_config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let config = Arc::new(ConfigStore::load(&config_dir)?);
        let tracker = Arc::new(ProgressTracker::new());

        let retention = Arc::new(RetentionEngine::new(config.clone(), tracker.clone()));
        let engine = Arc::new(SyncEngine::new(config.clone(), tracker.clone()));
        let sync = Arc::new(SyncScheduler::new(config.clone(), engine));

        Ok(Self {
            config,
            tracker,
            retention,
            sync,
        })
    }

    /// 启动全部后台循环
    pub fn start(&self) {
        self.retention.clone().start_monitoring();
        self.sync.clone().start();
    }

    /// 停止全部后台循环（尽力而为，不打断进行中的批次）
    pub async fn cleanup(&self) {
        tracing::info!("正在停止后台任务...");
        self.sync.stop();
        self.retention.stop_monitoring().await;
        self.tracker.clear_all();
        tracing::info!("后台任务已停止");
    }

    /// 当前所有活动任务的快照（清理 + 同步共用一个跟踪器）
    pub fn active_tasks(&self) -> Vec<TaskSnapshot> {
        self.tracker.list()
    }

    /// 立即执行一次完整扫描清理
    pub fn scan_and_clean(&self) -> ScanResult {
        self.retention.scan_and_clean()
    }

    /// 立即同步指定规则
    pub fn run_sync_now(&self, rule_index: usize) -> bool {
        self.sync.run_sync_now(rule_index)
    }
}

/// 平台配置/缓存目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }
}
