//! 清理引擎 - 按规则扫描监控文件夹并删除过期对象
//!
//! 规则按列表顺序评估，先匹配的规则认领对象（保留或删除），
//! 后面的规则不再考虑已被认领的路径。

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{parse_hhmm, ConfigStore, RetentionRule, ScheduleEntry};
use crate::core::deleter::SafeDeleter;
use crate::core::matcher;
use crate::core::tracker::ProgressTracker;

/// 一次完整扫描的结果
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanResult {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    pub total_scanned: u64,
}

/// 清理引擎与后台监控循环
pub struct RetentionEngine {
    config: Arc<ConfigStore>,
    deleter: SafeDeleter,
    tracker: Arc<ProgressTracker>,
    running: Arc<AtomicBool>,
}

impl RetentionEngine {
    pub fn new(config: Arc<ConfigStore>, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            config,
            deleter: SafeDeleter::new(),
            tracker,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 使用自定义删除器（测试注入）
    pub fn with_deleter(
        config: Arc<ConfigStore>,
        tracker: Arc<ProgressTracker>,
        deleter: SafeDeleter,
    ) -> Self {
        Self {
            config,
            deleter,
            tracker,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 扫描所有监控文件夹并删除过期对象
    pub fn scan_and_clean(&self) -> ScanResult {
        info!("开始扫描清理");
        let mut results = ScanResult::default();

        let watch_folders = self.config.watch_folders();
        let rules: Vec<RetentionRule> =
            self.config.rules().into_iter().filter(|r| r.enabled).collect();

        info!(
            "监控文件夹: {} 个, 启用规则: {} 个",
            watch_folders.len(),
            rules.len()
        );

        for folder in &watch_folders {
            if !folder.exists() {
                let msg = format!("文件夹不存在: {}", folder.display());
                warn!("{}", msg);
                results.errors.push(msg);
                continue;
            }

            let folder_results = self.process_folder(folder, &rules);
            if !folder_results.deleted.is_empty() {
                info!(
                    "从 {} 删除了 {} 个对象",
                    folder.display(),
                    folder_results.deleted.len()
                );
            }
            if !folder_results.errors.is_empty() {
                warn!(
                    "处理 {} 时出现 {} 个错误",
                    folder.display(),
                    folder_results.errors.len()
                );
            }
            results.deleted.extend(folder_results.deleted);
            results.errors.extend(folder_results.errors);
            results.total_scanned += folder_results.total_scanned;
        }

        info!(
            "扫描完成. 删除: {}, 错误: {}, 检查: {}",
            results.deleted.len(),
            results.errors.len(),
            results.total_scanned
        );

        // 兜底清理：扫描结束后不留下任何残余任务
        self.tracker.clear_all();

        results
    }

    /// 按规则处理单个文件夹（只列出第一层，不递归）
    fn process_folder(&self, folder: &Path, rules: &[RetentionRule]) -> ScanResult {
        let mut results = ScanResult::default();

        let applicable: Vec<&RetentionRule> = rules
            .iter()
            .filter(|r| matcher::applies_to_folder(folder, r))
            .collect();

        if applicable.is_empty() {
            return results;
        }

        let entries: Vec<PathBuf> = match std::fs::read_dir(folder) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() || p.is_dir())
                .collect(),
            Err(e) => {
                results
                    .errors
                    .push(format!("无法访问文件夹 {}: {}", folder.display(), e));
                return results;
            }
        };

        // 已被某个规则认领（保留或删除）的路径
        let mut claimed: HashSet<PathBuf> = HashSet::new();

        for rule in &applicable {
            let mut matching: Vec<(PathBuf, SystemTime)> = Vec::new();

            for path in &entries {
                if claimed.contains(path) {
                    continue;
                }

                if path.is_file() {
                    results.total_scanned += 1;
                } else if !path.is_dir() {
                    continue;
                }

                let name = match path.file_name() {
                    Some(n) => n.to_string_lossy().into_owned(),
                    None => continue,
                };

                if !matcher::matches_pattern(&name, &rule.pattern, rule.pattern_type) {
                    continue;
                }
                if !matcher::is_expired(path, rule) {
                    continue;
                }

                match path.metadata().and_then(|m| m.modified()) {
                    Ok(mtime) => matching.push((path.clone(), mtime)),
                    // 读不到的对象跳过
                    Err(_) => continue,
                }
            }

            if rule.keep_latest > 0 {
                if matching.is_empty() {
                    continue;
                }
                // 按修改时间从新到旧排序，保留前 N 个
                matching.sort_by(|a, b| b.1.cmp(&a.1));
                let keep_count = rule.keep_latest.min(matching.len());
                let (to_keep, to_delete) = matching.split_at(keep_count);

                for (path, _) in to_keep {
                    claimed.insert(path.clone());
                }

                let delete_paths: Vec<PathBuf> =
                    to_delete.iter().map(|(p, _)| p.clone()).collect();
                for path in &delete_paths {
                    claimed.insert(path.clone());
                }

                self.delete_batch(rule, &delete_paths, &mut results);
            } else {
                // keep_latest == 0：删除全部匹配对象，从旧到新
                matching.sort_by(|a, b| a.1.cmp(&b.1));
                let delete_paths: Vec<PathBuf> = matching.iter().map(|(p, _)| p.clone()).collect();
                for path in &delete_paths {
                    claimed.insert(path.clone());
                }

                self.delete_batch(rule, &delete_paths, &mut results);
            }
        }

        results
    }

    /// 删除一批路径，进度登记到跟踪器
    fn delete_batch(&self, rule: &RetentionRule, paths: &[PathBuf], results: &mut ScanResult) {
        if paths.is_empty() {
            return;
        }

        // 先统计批次的文件数与字节数（文件夹递归统计，仅用于进度）
        let measured: Vec<(u64, u64)> = paths.iter().map(|p| measure(p)).collect();
        let total_files: u64 = measured.iter().map(|(f, _)| f).sum();
        let total_bytes: u64 = measured.iter().map(|(_, b)| b).sum();

        let task_id = self
            .tracker
            .create(format!("清理: {}", rule.name), "正在删除...".to_string());
        self.tracker.set_totals(&task_id, total_files, total_bytes);

        for (path, (files, bytes)) in paths.iter().zip(measured) {
            match self.deleter.delete(path, rule.permanent_delete) {
                Ok(Some(record)) => {
                    results.deleted.push(record);
                    self.tracker.advance_delete(&task_id, files, bytes);
                }
                // 路径在扫描与删除之间消失，按无操作处理
                Ok(None) => {}
                Err(e) => {
                    error!("{}", e);
                    results.errors.push(e.to_string());
                }
            }
        }

        self.tracker.complete(&task_id);
    }

    /// 启动后台监控循环
    pub fn start_monitoring(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("监控已在运行");
            return;
        }

        let interval_minutes = self.config.check_interval_minutes();
        info!("启动监控, 检查间隔: {} 分钟", interval_minutes);

        tokio::spawn(async move {
            let mut iteration = 0u64;

            while self.running.load(Ordering::SeqCst) {
                iteration += 1;
                // 每轮重新读取间隔，配置修改无需重启
                let interval_minutes = self.config.check_interval_minutes().max(1);
                info!("开始第 {} 次检查 (间隔: {} 分钟)", iteration, interval_minutes);

                let due = schedule_matches(
                    self.config.schedule_enabled(),
                    &self.config.schedules(),
                    interval_minutes as f64,
                    Local::now().naive_local(),
                );

                if due {
                    let engine = self.clone();
                    match tokio::task::spawn_blocking(move || engine.scan_and_clean()).await {
                        Ok(results) => info!(
                            "第 {} 次检查完成. 删除: {}, 错误: {}, 检查: {}",
                            iteration,
                            results.deleted.len(),
                            results.errors.len(),
                            results.total_scanned
                        ),
                        Err(e) => error!("第 {} 次检查执行失败: {}", iteration, e),
                    }
                } else {
                    info!(
                        "第 {} 次检查跳过 (不在调度窗口内: {})",
                        iteration,
                        render_schedules(&self.config.schedules())
                    );
                }

                if self.running.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_secs(interval_minutes * 60)).await;
                }
            }

            info!("监控循环退出");
        });
    }

    /// 停止监控（尽力而为，不打断进行中的扫描）
    pub async fn stop_monitoring(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("正在停止监控...");
            // 给循环留出退出时间
            tokio::time::sleep(Duration::from_millis(500)).await;
            info!("监控已停止");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// 统计单个路径的文件数与字节数（文件夹递归统计）
fn measure(path: &Path) -> (u64, u64) {
    if path.is_file() {
        return (1, path.metadata().map(|m| m.len()).unwrap_or(0));
    }

    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            files += 1;
            bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    (files, bytes)
}

/// 判断当前时刻是否落在某个调度窗口内
///
/// 调度关闭或列表为空时总是允许。时间容差为检查间隔的一半，
/// 保证轮询粒度内不错过调度时刻。无法解析的时间退化为字符串精确比较。
pub fn schedule_matches(
    enabled: bool,
    schedules: &[ScheduleEntry],
    check_interval_minutes: f64,
    now: NaiveDateTime,
) -> bool {
    if !enabled {
        return true;
    }
    if schedules.is_empty() {
        return true;
    }

    let current_day = now.weekday().num_days_from_monday();

    for entry in schedules {
        if !entry.days.contains(&current_day) {
            continue;
        }

        match parse_hhmm(&entry.time) {
            Some((hour, minute)) => {
                let scheduled = match now.date().and_hms_opt(hour, minute, 0) {
                    Some(t) => t,
                    None => continue,
                };
                let diff_minutes = (now - scheduled).num_seconds().abs() as f64 / 60.0;
                if diff_minutes <= check_interval_minutes / 2.0 {
                    return true;
                }
            }
            None => {
                // 无法解析时按 "HH:MM" 字符串精确比较
                let current = format!("{:02}:{:02}", now.hour(), now.minute());
                if current == entry.time {
                    return true;
                }
            }
        }
    }

    false
}

/// 渲染调度列表用于跳过日志
fn render_schedules(schedules: &[ScheduleEntry]) -> String {
    const DAY_NAMES: [&str; 7] = ["周一", "周二", "周三", "周四", "周五", "周六", "周日"];

    let rendered: Vec<String> = schedules
        .iter()
        .map(|s| {
            let days: Vec<&str> = s
                .days
                .iter()
                .filter_map(|d| DAY_NAMES.get(*d as usize).copied())
                .collect();
            let days_str = if days.is_empty() {
                "无".to_string()
            } else {
                days.join(", ")
            };
            format!("{} {}", days_str, s.time)
        })
        .collect();

    rendered.join("; ")
}
