//! 应用配置模块 - 清理规则、同步规则、S3 桶与调度设置

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::logging::LogConfig;

/// 模式类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    #[default]
    Wildcard,
    Regex,
}

/// 同步调度类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    #[default]
    Interval,
    Schedule,
}

/// 清理规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRule {
    pub name: String,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub pattern_type: PatternType,
    /// 最大文件年龄（分钟）
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: u64,
    /// 旧格式：以天为单位的年龄，存在时优先于分钟
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 适用的文件夹列表，"*" 表示所有监控文件夹，空列表表示不适用于任何文件夹
    #[serde(default)]
    pub folders: Vec<String>,
    /// 保留最新的 N 个匹配对象（0 = 不按数量保留）
    #[serde(default)]
    pub keep_latest: usize,
    /// true = 永久删除，false = 删除到回收站
    #[serde(default)]
    pub permanent_delete: bool,
}

impl RetentionRule {
    /// 生效的年龄阈值（分钟），旧的天格式优先
    pub fn age_threshold_minutes(&self) -> u64 {
        match self.max_age_days {
            Some(days) => days * 24 * 60,
            None => self.max_age_minutes,
        }
    }
}

/// 同步规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRule {
    pub name: String,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub schedule_type: ScheduleType,
    #[serde(default = "default_check_interval")]
    pub interval_minutes: u64,
    /// 星期标记："mon" .. "sun"
    #[serde(default)]
    pub schedule_days: Vec<String>,
    #[serde(default = "default_schedule_time")]
    pub schedule_time: String,
    #[serde(default)]
    pub versioning_enabled: bool,
    /// 保留的版本数量（0 = 不限制）
    #[serde(default)]
    pub max_versions: usize,
    /// 版本最大年龄（天，0 = 不限制）
    #[serde(default)]
    pub max_version_age_days: u64,
    /// 上传成功后删除本地文件
    #[serde(default)]
    pub delete_after_sync: bool,
    /// 预留：同步删除远端多余对象（目前仅保存，不生效）
    #[serde(default)]
    pub sync_deletions: bool,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub pattern_type: PatternType,
    /// 上次触发同步的时间，每次触发后写回配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// S3 桶配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
    /// 为空时使用默认公有云 endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

/// 调度条目：星期集合 + 时间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// 星期：0 = 周一 .. 6 = 周日
    #[serde(default)]
    pub days: Vec<u32>,
    #[serde(default = "default_midnight")]
    pub time: String,
}

/// 旧格式的单条调度配置（仅迁移用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacySchedule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_all_days")]
    pub days: Vec<u32>,
    #[serde(default = "default_midnight")]
    pub time: String,
}

/// 完整应用配置（config.json）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub watch_folders: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RetentionRule>,
    #[serde(default)]
    pub sync_rules: Vec<SyncRule>,
    #[serde(default)]
    pub buckets: Vec<S3Bucket>,
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,
    /// 旧格式：以秒为单位的检查间隔，迁移时换算为分钟
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval_seconds: Option<u64>,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
    /// 旧格式：单条调度，迁移为 schedules 列表
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<LegacySchedule>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_max_age_minutes() -> u64 {
    43200 // 30 天
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    60
}

fn default_schedule_time() -> String {
    "03:00".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_midnight() -> String {
    "00:00".to_string()
}

fn default_all_days() -> Vec<u32> {
    (0..7).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_folders: Vec::new(),
            rules: vec![RetentionRule {
                name: "删除 43200 分钟（30 天）前的文件".to_string(),
                pattern: default_pattern(),
                pattern_type: PatternType::Wildcard,
                max_age_minutes: default_max_age_minutes(),
                max_age_days: None,
                enabled: true,
                folders: Vec::new(),
                keep_latest: 0,
                permanent_delete: false,
            }],
            sync_rules: Vec::new(),
            buckets: Vec::new(),
            check_interval_minutes: default_check_interval(),
            check_interval_seconds: None,
            schedule_enabled: false,
            schedules: vec![ScheduleEntry {
                days: default_all_days(),
                time: default_midnight(),
            }],
            schedule: None,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 迁移旧格式字段，返回是否有改动
    fn migrate(&mut self) -> bool {
        let mut changed = false;

        if let Some(secs) = self.check_interval_seconds.take() {
            self.check_interval_minutes = (secs / 60).max(1);
            changed = true;
        }

        if let Some(old) = self.schedule.take() {
            if self.schedules.is_empty() {
                self.schedule_enabled = old.enabled;
                self.schedules = vec![ScheduleEntry {
                    days: old.days,
                    time: old.time,
                }];
            }
            changed = true;
        }

        for rule in &mut self.rules {
            if let Some(days) = rule.max_age_days.take() {
                rule.max_age_minutes = days * 24 * 60;
                changed = true;
            }
        }

        changed
    }
}

/// 解析 "HH:MM" 格式的时间
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some((h, m))
}

/// 配置存储：加载、保存与线程安全访问
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<AppConfig>,
}

impl ConfigStore {
    /// 从配置目录加载 config.json，不存在时写入默认配置
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("config.json");

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("配置文件解析失败，使用默认配置: {}", e);
                    AppConfig::default()
                }
            }
        } else {
            let cfg = AppConfig::default();
            Self::write_file(&path, &cfg)?;
            info!("已创建默认配置: {}", path.display());
            cfg
        };

        if config.migrate() {
            info!("已迁移旧格式配置");
            Self::write_file(&path, &config)?;
        }

        Ok(Self {
            path,
            inner: RwLock::new(config),
        })
    }

    fn write_file(path: &Path, config: &AppConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }

    /// 保存当前配置到磁盘
    pub fn save(&self) -> Result<()> {
        let config = self.inner.read().unwrap().clone();
        Self::write_file(&self.path, &config)
    }

    pub fn watch_folders(&self) -> Vec<PathBuf> {
        self.inner
            .read()
            .unwrap()
            .watch_folders
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    pub fn rules(&self) -> Vec<RetentionRule> {
        self.inner.read().unwrap().rules.clone()
    }

    pub fn sync_rules(&self) -> Vec<SyncRule> {
        self.inner.read().unwrap().sync_rules.clone()
    }

    pub fn bucket_by_name(&self, name: &str) -> Option<S3Bucket> {
        self.inner
            .read()
            .unwrap()
            .buckets
            .iter()
            .find(|b| b.name == name)
            .cloned()
    }

    pub fn check_interval_minutes(&self) -> u64 {
        self.inner.read().unwrap().check_interval_minutes
    }

    pub fn schedule_enabled(&self) -> bool {
        self.inner.read().unwrap().schedule_enabled
    }

    pub fn schedules(&self) -> Vec<ScheduleEntry> {
        self.inner.read().unwrap().schedules.clone()
    }

    /// 更新同步规则的 last_sync 并立即持久化
    pub fn set_sync_rule_last_sync(&self, index: usize, ts: DateTime<Utc>) -> Result<()> {
        {
            let mut config = self.inner.write().unwrap();
            let rule = config
                .sync_rules
                .get_mut(index)
                .with_context(|| format!("同步规则索引越界: {}", index))?;
            rule.last_sync = Some(ts);
        }
        self.save()
    }

    pub fn add_watch_folder(&self, folder: &Path) -> Result<()> {
        let folder_str = folder.to_string_lossy().into_owned();
        {
            let mut config = self.inner.write().unwrap();
            if !config.watch_folders.contains(&folder_str) {
                config.watch_folders.push(folder_str);
            }
        }
        self.save()
    }

    pub fn remove_watch_folder(&self, folder: &Path) -> Result<()> {
        let folder_str = folder.to_string_lossy().into_owned();
        {
            let mut config = self.inner.write().unwrap();
            config.watch_folders.retain(|f| *f != folder_str);
        }
        self.save()
    }

    pub fn add_rule(&self, rule: RetentionRule) -> Result<()> {
        self.inner.write().unwrap().rules.push(rule);
        self.save()
    }

    pub fn update_rule(&self, index: usize, rule: RetentionRule) -> Result<()> {
        {
            let mut config = self.inner.write().unwrap();
            let slot = config
                .rules
                .get_mut(index)
                .with_context(|| format!("规则索引越界: {}", index))?;
            *slot = rule;
        }
        self.save()
    }

    pub fn remove_rule(&self, index: usize) -> Result<()> {
        {
            let mut config = self.inner.write().unwrap();
            if index < config.rules.len() {
                config.rules.remove(index);
            }
        }
        self.save()
    }

    pub fn add_sync_rule(&self, rule: SyncRule) -> Result<()> {
        self.inner.write().unwrap().sync_rules.push(rule);
        self.save()
    }

    pub fn update_sync_rule(&self, index: usize, rule: SyncRule) -> Result<()> {
        {
            let mut config = self.inner.write().unwrap();
            let slot = config
                .sync_rules
                .get_mut(index)
                .with_context(|| format!("同步规则索引越界: {}", index))?;
            *slot = rule;
        }
        self.save()
    }

    pub fn remove_sync_rule(&self, index: usize) -> Result<()> {
        {
            let mut config = self.inner.write().unwrap();
            if index < config.sync_rules.len() {
                config.sync_rules.remove(index);
            }
        }
        self.save()
    }

    pub fn add_bucket(&self, bucket: S3Bucket) -> Result<()> {
        self.inner.write().unwrap().buckets.push(bucket);
        self.save()
    }

    pub fn remove_bucket(&self, name: &str) -> Result<()> {
        {
            let mut config = self.inner.write().unwrap();
            config.buckets.retain(|b| b.name != name);
        }
        self.save()
    }

    pub fn set_schedule_enabled(&self, enabled: bool) -> Result<()> {
        self.inner.write().unwrap().schedule_enabled = enabled;
        self.save()
    }

    pub fn set_check_interval_minutes(&self, minutes: u64) -> Result<()> {
        self.inner.write().unwrap().check_interval_minutes = minutes.max(1);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> ConfigStore {
        ConfigStore::load(dir).unwrap()
    }

    #[test]
    fn test_default_config_created() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(dir.path().join("config.json").exists());
        assert_eq!(store.check_interval_minutes(), 60);
        assert!(!store.schedule_enabled());
        assert_eq!(store.rules().len(), 1);
        assert_eq!(store.rules()[0].max_age_minutes, 43200);
    }

    #[test]
    fn test_legacy_migration() {
        let dir = tempdir().unwrap();
        let legacy = serde_json::json!({
            "watch_folders": ["/tmp/data"],
            "check_interval_seconds": 7200,
            "schedule": { "enabled": true, "days": [0, 4], "time": "12:30" },
            "rules": [{ "name": "old", "max_age_days": 30 }],
        });
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let store = store_in(dir.path());
        assert_eq!(store.check_interval_minutes(), 120);
        assert!(store.schedule_enabled());
        assert_eq!(store.schedules().len(), 1);
        assert_eq!(store.schedules()[0].time, "12:30");
        let rule = &store.rules()[0];
        assert_eq!(rule.max_age_minutes, 43200);
        assert!(rule.max_age_days.is_none());

        // 迁移结果已写回磁盘，重新加载不再发生迁移
        let reloaded = store_in(dir.path());
        assert_eq!(reloaded.check_interval_minutes(), 120);
    }

    #[test]
    fn test_age_threshold_days_precedence() {
        let mut rule = RetentionRule {
            name: "r".into(),
            pattern: "*".into(),
            pattern_type: PatternType::Wildcard,
            max_age_minutes: 99999,
            max_age_days: Some(1),
            enabled: true,
            folders: vec![],
            keep_latest: 0,
            permanent_delete: false,
        };
        assert_eq!(rule.age_threshold_minutes(), 1440);
        rule.max_age_days = None;
        assert_eq!(rule.age_threshold_minutes(), 99999);
    }

    #[test]
    fn test_bucket_by_name() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .add_bucket(S3Bucket {
                name: "backups".into(),
                endpoint: None,
                access_key: "ak".into(),
                secret_key: "sk".into(),
                region: "us-east-1".into(),
            })
            .unwrap();

        assert!(store.bucket_by_name("backups").is_some());
        assert!(store.bucket_by_name("missing").is_none());
    }

    #[test]
    fn test_last_sync_persisted() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .add_sync_rule(SyncRule {
                name: "s".into(),
                bucket_name: "b".into(),
                enabled: true,
                folders: vec![],
                schedule_type: ScheduleType::Interval,
                interval_minutes: 60,
                schedule_days: vec![],
                schedule_time: "03:00".into(),
                versioning_enabled: false,
                max_versions: 0,
                max_version_age_days: 0,
                delete_after_sync: false,
                sync_deletions: false,
                pattern: "*".into(),
                pattern_type: PatternType::Wildcard,
                last_sync: None,
            })
            .unwrap();

        let ts = Utc::now();
        store.set_sync_rule_last_sync(0, ts).unwrap();

        let reloaded = store_in(dir.path());
        let saved = reloaded.sync_rules()[0].last_sync.unwrap();
        assert_eq!(saved.timestamp(), ts.timestamp());
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("03:00"), Some((3, 0)));
        assert_eq!(parse_hhmm("23:59"), Some((23, 59)));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("abc"), None);
        assert_eq!(parse_hhmm(""), None);
    }
}
