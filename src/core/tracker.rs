//! 进度跟踪 - 登记正在运行的长时操作，供外部轮询

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 完成的任务在移除前保留的时间
const COMPLETED_TTL: Duration = Duration::from_secs(5);

/// 任务快照（只读副本，不是活引用）
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub name: String,
    pub status: String,
    /// 0 - 100
    pub progress: u8,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

/// 线程安全的任务注册表
///
/// 唯一被多个后台任务并发修改的结构，所有访问都经过同一把锁。
pub struct ProgressTracker {
    tasks: Arc<Mutex<HashMap<String, TaskSnapshot>>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 创建新任务，返回任务 id
    pub fn create(&self, name: String, status: String) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let task = TaskSnapshot {
            id: id.clone(),
            name,
            status,
            progress: 0,
            total_files: 0,
            processed_files: 0,
            total_bytes: 0,
            processed_bytes: 0,
            started_at: Utc::now(),
            finished: false,
        };
        self.tasks.lock().unwrap().insert(id.clone(), task);
        id
    }

    /// 设置任务的文件与字节总量
    pub fn set_totals(&self, id: &str, total_files: u64, total_bytes: u64) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.total_files = total_files;
            task.total_bytes = total_bytes;
        }
    }

    pub fn set_status(&self, id: &str, status: String) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.status = status;
        }
    }

    /// 直接设置进度百分比与状态
    pub fn set_progress(&self, id: &str, progress: u8, status: String) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.progress = progress.min(100);
            task.status = status;
        }
    }

    /// 设置已处理文件数（不重算进度）
    pub fn set_processed_files(&self, id: &str, processed: u64) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.processed_files = processed;
        }
    }

    /// 推进删除任务：进度取文件比例与字节比例的平均值
    pub fn advance_delete(&self, id: &str, files: u64, bytes: u64) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(id) {
            task.processed_files += files;
            task.processed_bytes += bytes;
            task.progress = delete_progress(
                task.processed_files,
                task.total_files,
                task.processed_bytes,
                task.total_bytes,
            );
            task.status = format!(
                "已处理 {} / {} 个对象",
                task.processed_files, task.total_files
            );
        }
    }

    /// 标记任务完成，约 5 秒后自动移除
    pub fn complete(&self, id: &str) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.get_mut(id) {
                task.finished = true;
                task.progress = 100;
                task.status = "完成".to_string();
            } else {
                return;
            }
        }

        let tasks = self.tasks.clone();
        let id = id.to_string();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(COMPLETED_TTL).await;
                tasks.lock().unwrap().remove(&id);
            });
        } else {
            // 无运行时（同步上下文），立即移除
            tasks.lock().unwrap().remove(&id);
        }
    }

    /// 所有活动任务的快照副本
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.lock().unwrap();
        let mut list: Vec<TaskSnapshot> = tasks.values().cloned().collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }

    /// 清空所有任务（扫描结束时的兜底清理）
    pub fn clear_all(&self) {
        self.tasks.lock().unwrap().clear();
    }
}

/// 删除任务的进度：文件比例与字节比例的平均值，总量为 0 时该项按 100 计
fn delete_progress(
    processed_files: u64,
    total_files: u64,
    processed_bytes: u64,
    total_bytes: u64,
) -> u8 {
    let file_pct = if total_files == 0 {
        100.0
    } else {
        (processed_files as f64 / total_files as f64 * 100.0).min(100.0)
    };
    let byte_pct = if total_bytes == 0 {
        100.0
    } else {
        (processed_bytes as f64 / total_bytes as f64 * 100.0).min(100.0)
    };
    ((file_pct + byte_pct) / 2.0) as u8
}
