//! 同步引擎 - 将本地文件夹按规则上传到 S3，支持日期版本化
//!
//! 版本化时每个文件夹以带时间戳的前缀上传，
//! 例如: backups_2026-01-16_14-30/file.txt

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{ConfigStore, SyncRule};
use crate::core::matcher;
use crate::core::rotation;
use crate::core::tracker::ProgressTracker;
use crate::storage::{create_object_store, format_size, ObjectStore, ProgressCallback};

/// 版本时间戳格式，同一次同步的所有文件共享一个时间戳
const VERSION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// 构造对象存储键，路径分隔符统一为 "/"
pub fn build_key(base: &str, relative: &Path, version_timestamp: Option<&str>) -> String {
    let rel = relative.to_string_lossy().replace('\\', "/");
    match version_timestamp {
        Some(ts) => format!("{}_{}/{}", base, ts, rel),
        None => format!("{}/{}", base, rel),
    }
}

/// 待上传的单个文件
struct PendingUpload {
    path: PathBuf,
    key: String,
    size: u64,
}

/// 同步引擎：执行单条规则的一次完整同步
pub struct SyncEngine {
    config: Arc<ConfigStore>,
    tracker: Arc<ProgressTracker>,
    running: AtomicBool,
}

impl SyncEngine {
    pub fn new(config: Arc<ConfigStore>, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            config,
            tracker,
            running: AtomicBool::new(true),
        }
    }

    /// 请求停止：进行中的同步在当前文件后中断
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 同步一条规则（失败只记录日志，不向调用方抛出）
    pub async fn sync_rule(&self, rule: &SyncRule) {
        let bucket = match self.config.bucket_by_name(&rule.bucket_name) {
            Some(b) => b,
            None => {
                error!(
                    "规则 '{}': 未找到桶 '{}'",
                    rule.name, rule.bucket_name
                );
                return;
            }
        };

        let store = match create_object_store(&bucket) {
            Ok(s) => s,
            Err(e) => {
                error!("规则 '{}': 创建对象存储失败: {}", rule.name, e);
                return;
            }
        };

        self.sync_rule_with_store(rule, store.as_ref()).await;
    }

    /// 使用指定的对象存储执行同步（测试注入点）
    pub(crate) async fn sync_rule_with_store(&self, rule: &SyncRule, store: &dyn ObjectStore) {
        let task_id = self
            .tracker
            .create(format!("同步: {}", rule.name), "开始同步...".to_string());

        // 无论中途如何退出，任务都会被标记完成
        let tracker = self.tracker.clone();
        let guard_id = task_id.clone();
        scopeguard::defer! {
            tracker.complete(&guard_id);
        }

        // 同一次同步的所有文件共享一个版本时间戳
        let timestamp = Local::now().format(VERSION_TIMESTAMP_FORMAT).to_string();
        let version_ts = rule.versioning_enabled.then_some(timestamp.as_str());

        let uploads = collect_uploads(rule, version_ts);
        let total_files = uploads.len() as u64;
        let total_bytes: u64 = uploads.iter().map(|u| u.size).sum();

        self.tracker.set_totals(&task_id, total_files, total_bytes);
        info!(
            "规则 '{}': 找到 {} 个文件待同步 ({})",
            rule.name,
            total_files,
            format_size(total_bytes)
        );

        let mut synced = 0u64;
        let mut uploaded_bytes = 0u64;

        for upload in &uploads {
            if !self.is_running() {
                warn!("规则 '{}': 同步被中断", rule.name);
                break;
            }

            let file_name = upload
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            self.tracker.set_status(
                &task_id,
                format!("上传: {} (0/{})", file_name, format_size(upload.size)),
            );

            // 当前文件进度 + 整体字节进度
            let cb_tracker = self.tracker.clone();
            let cb_id = task_id.clone();
            let cb_name = file_name.clone();
            let base_bytes = uploaded_bytes;
            let progress: ProgressCallback = Arc::new(move |done, total| {
                let cumulative = base_bytes + done;
                let percent = if total_bytes > 0 {
                    ((cumulative * 100) / total_bytes).min(100) as u8
                } else {
                    0
                };
                cb_tracker.set_progress(
                    &cb_id,
                    percent,
                    format!(
                        "上传: {} ({}/{})",
                        cb_name,
                        format_size(done),
                        format_size(total)
                    ),
                );
            });

            match store
                .upload_file(&upload.path, &upload.key, Some(progress))
                .await
            {
                Ok(()) => {
                    synced += 1;
                    uploaded_bytes += upload.size;
                    debug!("已上传: {}", upload.key);

                    if rule.delete_after_sync {
                        match std::fs::remove_file(&upload.path) {
                            Ok(()) => debug!("已删除本地文件: {}", upload.path.display()),
                            Err(e) => error!(
                                "删除本地文件失败 {}: {}",
                                upload.path.display(),
                                e
                            ),
                        }
                    }
                }
                Err(e) => {
                    error!("上传失败 {}: {}", upload.key, e);
                }
            }

            let percent = if total_bytes > 0 {
                ((uploaded_bytes * 100) / total_bytes).min(100) as u8
            } else if total_files > 0 {
                ((synced * 100) / total_files).min(100) as u8
            } else {
                100
            };
            self.tracker.set_processed_files(&task_id, synced);
            self.tracker.set_progress(
                &task_id,
                percent,
                format!(
                    "已上传 {} / {} 个文件 ({}/{})",
                    synced,
                    total_files,
                    format_size(uploaded_bytes),
                    format_size(total_bytes)
                ),
            );
        }

        // 版本轮换：仅针对仍然存在的本地文件夹
        if rule.versioning_enabled {
            let mut folder_names: Vec<String> = rule
                .folders
                .iter()
                .map(Path::new)
                .filter(|p| p.exists())
                .filter_map(folder_base_name)
                .collect();
            folder_names.sort();
            folder_names.dedup();

            for name in folder_names {
                rotation::rotate(store, &name, rule).await;
            }
        }

        info!(
            "规则 '{}': 同步完成 {} / {} 个文件",
            rule.name, synced, total_files
        );
    }
}

/// 枚举规则涉及的所有待上传文件
fn collect_uploads(rule: &SyncRule, version_ts: Option<&str>) -> Vec<PendingUpload> {
    let mut uploads = Vec::new();

    for folder_path in &rule.folders {
        let folder = Path::new(folder_path);
        if !folder.exists() {
            warn!("文件夹不存在: {}", folder.display());
            continue;
        }

        let base = match folder_base_name(folder) {
            Some(b) => b,
            None => continue,
        };

        for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if !matcher::matches_pattern(&name, &rule.pattern, rule.pattern_type) {
                continue;
            }

            let relative = entry.path().strip_prefix(folder).unwrap_or(entry.path());
            let key = build_key(&base, relative, version_ts);
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

            uploads.push(PendingUpload {
                path: entry.path().to_path_buf(),
                key,
                size,
            });
        }
    }

    uploads
}

fn folder_base_name(folder: &Path) -> Option<String> {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}
