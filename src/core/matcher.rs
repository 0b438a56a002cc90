//! 规则匹配 - 纯谓词逻辑，除 stat 外无任何副作用

use std::path::Path;
use std::time::SystemTime;

use crate::config::{PatternType, RetentionRule};

/// 检查规则是否适用于指定文件夹
///
/// "*" 表示所有监控文件夹；空列表不适用于任何文件夹；
/// 否则要求精确匹配或规则文件夹是其上级目录。
pub fn applies_to_folder(folder: &Path, rule: &RetentionRule) -> bool {
    if rule.folders.is_empty() {
        return false;
    }

    if rule.folders.iter().any(|f| f == "*") {
        return true;
    }

    rule.folders.iter().any(|rule_folder| {
        let rule_folder = Path::new(rule_folder);
        folder == rule_folder || folder.starts_with(rule_folder)
    })
}

/// 检查文件名是否匹配规则模式
///
/// wildcard 使用 shell 通配符语义；regex 要求整个文件名完全匹配；
/// 非法正则返回 false，从不报错。
pub fn matches_pattern(name: &str, pattern: &str, pattern_type: PatternType) -> bool {
    match pattern_type {
        PatternType::Regex => match regex::Regex::new(&format!(r"\A(?:{})\z", pattern)) {
            Ok(re) => re.is_match(name),
            Err(_) => false,
        },
        PatternType::Wildcard => match glob::Pattern::new(pattern) {
            Ok(p) => p.matches(name),
            Err(_) => false,
        },
    }
}

/// 检查文件是否超过规则的年龄阈值（含边界）
///
/// stat 失败时返回 false：读不到的文件绝不判定为过期。
pub fn is_expired(path: &Path, rule: &RetentionRule) -> bool {
    let threshold_minutes = rule.age_threshold_minutes() as f64;

    let mtime = match path.metadata().and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return false,
    };

    let age = match SystemTime::now().duration_since(mtime) {
        Ok(d) => d,
        // 修改时间在未来，视为未过期
        Err(_) => return false,
    };

    age.as_secs_f64() / 60.0 >= threshold_minutes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn rule_with_folders(folders: Vec<&str>) -> RetentionRule {
        RetentionRule {
            name: "r".into(),
            pattern: "*".into(),
            pattern_type: PatternType::Wildcard,
            max_age_minutes: 0,
            max_age_days: None,
            enabled: true,
            folders: folders.into_iter().map(String::from).collect(),
            keep_latest: 0,
            permanent_delete: false,
        }
    }

    #[test]
    fn test_applies_to_folder_star() {
        let rule = rule_with_folders(vec!["*"]);
        assert!(applies_to_folder(Path::new("/any/where"), &rule));
    }

    #[test]
    fn test_applies_to_folder_empty_list() {
        let rule = rule_with_folders(vec![]);
        assert!(!applies_to_folder(Path::new("/any/where"), &rule));
    }

    #[test]
    fn test_applies_to_folder_exact_and_ancestor() {
        let rule = rule_with_folders(vec!["/data/backups"]);
        assert!(applies_to_folder(Path::new("/data/backups"), &rule));
        assert!(applies_to_folder(Path::new("/data/backups/daily"), &rule));
        assert!(!applies_to_folder(Path::new("/data/other"), &rule));
        // 前缀相似但不是路径上级
        assert!(!applies_to_folder(Path::new("/data/backups2"), &rule));
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(matches_pattern("a.bak", "*.bak", PatternType::Wildcard));
        assert!(matches_pattern("db_2026.sql", "db_*.sql", PatternType::Wildcard));
        assert!(matches_pattern("a1", "a?", PatternType::Wildcard));
        assert!(!matches_pattern("a.txt", "*.bak", PatternType::Wildcard));
        assert!(matches_pattern("anything", "*", PatternType::Wildcard));
    }

    #[test]
    fn test_regex_requires_full_match() {
        assert!(matches_pattern("123", r"\d+", PatternType::Regex));
        assert!(!matches_pattern("file123.txt", r"\d+", PatternType::Regex));
        assert!(matches_pattern("backup_01.zip", r"backup_\d{2}\.zip", PatternType::Regex));
    }

    #[test]
    fn test_invalid_regex_is_false() {
        assert!(!matches_pattern("abc", "[unclosed", PatternType::Regex));
    }

    #[test]
    fn test_expiry_inclusive_boundary() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("fresh.txt");
        std::fs::write(&file, b"x").unwrap();

        // 阈值 0 分钟：刚创建的文件年龄 >= 0，已过期（含边界）
        let expired = rule_with_folders(vec!["*"]);
        assert!(is_expired(&file, &expired));

        // 阈值很大：未过期
        let mut young = rule_with_folders(vec!["*"]);
        young.max_age_minutes = 10_000_000;
        assert!(!is_expired(&file, &young));
    }

    #[test]
    fn test_expiry_stat_failure_is_false() {
        let rule = rule_with_folders(vec!["*"]);
        assert!(!is_expired(&PathBuf::from("/no/such/file"), &rule));
    }

    #[test]
    fn test_expiry_days_precedence() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();

        // max_age_days = 0 优先于很大的分钟数，文件立即过期
        let mut rule = rule_with_folders(vec!["*"]);
        rule.max_age_minutes = 10_000_000;
        rule.max_age_days = Some(0);
        assert!(is_expired(&file, &rule));
    }
}
