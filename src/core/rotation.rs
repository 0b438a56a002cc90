//! 版本轮换 - 按数量/年龄清理对象存储中的旧版本前缀
//!
//! 版本由实时对象列表重建，存储本身是版本存在性的唯一事实来源。
//! 键格式约定: ^{folder}_(\d{4}-\d{2}-\d{2}_\d{2}-\d{2})/

use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::config::SyncRule;
use crate::storage::{ObjectInfo, ObjectStore};

/// 版本时间戳的解析格式
const VERSION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// 轮换一个文件夹的远端版本
///
/// 数量规则先于年龄规则：已因数量超限标记删除的版本不再做年龄判断。
pub async fn rotate(store: &dyn ObjectStore, folder_name: &str, rule: &SyncRule) {
    let max_versions = rule.max_versions;
    let max_age_days = rule.max_version_age_days;

    if max_versions == 0 && max_age_days == 0 {
        return; // 未配置轮换
    }

    let objects = match store.list_objects("").await {
        Ok(objects) => objects,
        Err(e) => {
            error!("获取对象列表失败: {}", e);
            return;
        }
    };

    if objects.is_empty() {
        return;
    }

    let pattern = match Regex::new(&format!(
        r"^{}_(\d{{4}}-\d{{2}}-\d{{2}}_\d{{2}}-\d{{2}})/",
        regex::escape(folder_name)
    )) {
        Ok(p) => p,
        Err(e) => {
            error!("构造版本匹配正则失败: {}", e);
            return;
        }
    };

    // 按时间戳分组
    let mut versions: HashMap<String, Vec<ObjectInfo>> = HashMap::new();
    for obj in objects {
        if let Some(captures) = pattern.captures(&obj.key) {
            versions.entry(captures[1].to_string()).or_default().push(obj);
        }
    }

    if versions.is_empty() {
        debug!("文件夹 '{}' 没有可轮换的版本", folder_name);
        return;
    }

    // 从新到旧排序
    let mut sorted: Vec<String> = versions.keys().cloned().collect();
    sorted.sort();
    sorted.reverse();

    info!("文件夹 '{}' 共有 {} 个版本", folder_name, sorted.len());

    let now = Utc::now();

    for (rank, timestamp) in sorted.iter().enumerate() {
        let mut should_delete = false;

        if max_versions > 0 && rank >= max_versions {
            should_delete = true;
            debug!("版本 {} 超出数量上限 {}", timestamp, max_versions);
        }

        if max_age_days > 0 && !should_delete {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(timestamp, VERSION_TIMESTAMP_FORMAT)
            {
                let age_days = (now - parsed.and_utc()).num_days();
                if age_days > max_age_days as i64 {
                    should_delete = true;
                    debug!(
                        "版本 {} 超过 {} 天 (实际 {} 天)",
                        timestamp, max_age_days, age_days
                    );
                }
            }
        }

        if should_delete {
            let mut deleted = 0usize;
            for obj in &versions[timestamp] {
                match store.delete_object(&obj.key).await {
                    Ok(()) => deleted += 1,
                    Err(e) => error!("删除对象失败 {}: {}", obj.key, e),
                }
            }
            info!(
                "已删除版本 '{}_{}' ({} 个文件)",
                folder_name, timestamp, deleted
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PatternType, ScheduleType};
    use crate::storage::{ObjectMeta, ProgressCallback};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::path::Path;
    use std::sync::Mutex;

    /// 内存对象存储：只支持列表与删除
    struct FakeStore {
        objects: Mutex<Vec<ObjectInfo>>,
        deleted: Mutex<Vec<String>>,
        list_calls: Mutex<u32>,
    }

    impl FakeStore {
        fn with_keys(keys: &[&str]) -> Self {
            Self {
                objects: Mutex::new(
                    keys.iter()
                        .map(|k| ObjectInfo {
                            key: k.to_string(),
                            last_modified: 0,
                            size: 1,
                        })
                        .collect(),
                ),
                deleted: Mutex::new(Vec::new()),
                list_calls: Mutex::new(0),
            }
        }

        fn deleted_keys(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn list_objects(&self, _prefix: &str) -> Result<Vec<ObjectInfo>> {
            *self.list_calls.lock().unwrap() += 1;
            Ok(self.objects.lock().unwrap().clone())
        }

        async fn head_object(&self, _key: &str) -> Result<Option<ObjectMeta>> {
            Ok(None)
        }

        async fn upload_file(
            &self,
            _local: &Path,
            _key: &str,
            _progress: Option<ProgressCallback>,
        ) -> Result<()> {
            unreachable!("rotation never uploads")
        }

        async fn delete_object(&self, key: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn rule_with_limits(max_versions: usize, max_age_days: u64) -> SyncRule {
        SyncRule {
            name: "r".into(),
            bucket_name: "b".into(),
            enabled: true,
            folders: vec![],
            schedule_type: ScheduleType::Interval,
            interval_minutes: 60,
            schedule_days: vec![],
            schedule_time: "03:00".into(),
            versioning_enabled: true,
            max_versions,
            max_version_age_days: max_age_days,
            delete_after_sync: false,
            sync_deletions: false,
            pattern: "*".into(),
            pattern_type: PatternType::Wildcard,
            last_sync: None,
        }
    }

    #[tokio::test]
    async fn test_no_limits_is_noop() {
        let store = FakeStore::with_keys(&["db_2026-01-01_00-00/a.sql"]);
        rotate(&store, "db", &rule_with_limits(0, 0)).await;

        assert!(store.deleted_keys().is_empty());
        // 未配置轮换时连列表都不请求
        assert_eq!(*store.list_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rotate_by_count_keeps_newest() {
        let store = FakeStore::with_keys(&[
            "db_2026-01-01_00-00/a.sql",
            "db_2026-01-02_00-00/a.sql",
            "db_2026-01-03_00-00/a.sql",
            "db_2026-01-04_00-00/a.sql",
            "db_2026-01-05_00-00/a.sql",
        ]);
        rotate(&store, "db", &rule_with_limits(2, 0)).await;

        let mut deleted = store.deleted_keys();
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "db_2026-01-01_00-00/a.sql",
                "db_2026-01-02_00-00/a.sql",
                "db_2026-01-03_00-00/a.sql",
            ]
        );
    }

    #[tokio::test]
    async fn test_rotate_by_age() {
        let old = (Utc::now() - Duration::days(40))
            .format(VERSION_TIMESTAMP_FORMAT)
            .to_string();
        let young = (Utc::now() - Duration::days(10))
            .format(VERSION_TIMESTAMP_FORMAT)
            .to_string();
        let old_key = format!("db_{}/a.sql", old);
        let young_key = format!("db_{}/a.sql", young);

        let store = FakeStore::with_keys(&[old_key.as_str(), young_key.as_str()]);
        rotate(&store, "db", &rule_with_limits(0, 30)).await;

        assert_eq!(store.deleted_keys(), vec![old_key]);
    }

    #[tokio::test]
    async fn test_rotate_deletes_all_objects_of_version() {
        let store = FakeStore::with_keys(&[
            "db_2026-01-01_00-00/a.sql",
            "db_2026-01-01_00-00/sub/b.sql",
            "db_2026-01-02_00-00/a.sql",
        ]);
        rotate(&store, "db", &rule_with_limits(1, 0)).await;

        let mut deleted = store.deleted_keys();
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "db_2026-01-01_00-00/a.sql",
                "db_2026-01-01_00-00/sub/b.sql",
            ]
        );
    }

    #[tokio::test]
    async fn test_unrelated_keys_ignored() {
        let store = FakeStore::with_keys(&[
            // 前缀相似的其他文件夹不受影响
            "db2_2026-01-01_00-00/a.sql",
            "db/plain.sql",
            "db_2026-01-01_00-00/a.sql",
            "db_2026-01-02_00-00/a.sql",
        ]);
        rotate(&store, "db", &rule_with_limits(1, 0)).await;

        assert_eq!(store.deleted_keys(), vec!["db_2026-01-01_00-00/a.sql"]);
    }

    #[tokio::test]
    async fn test_version_key_roundtrip_with_builder() {
        // build_key 产出的键必须能被轮换正则重新识别
        let key = crate::core::sync::build_key(
            "backups",
            Path::new("a/b.txt"),
            Some("2026-01-16_14-30"),
        );
        assert_eq!(key, "backups_2026-01-16_14-30/a/b.txt");

        let store = FakeStore::with_keys(&[key.as_str(), "backups_2026-02-01_09-00/a/b.txt"]);
        rotate(&store, "backups", &rule_with_limits(1, 0)).await;

        assert_eq!(store.deleted_keys(), vec![key]);
    }
}
