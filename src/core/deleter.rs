//! 安全删除 - 回收站或永久删除单个路径
//!
//! 安全不变量：请求删除到回收站而回收站不可用或失败时，
//! 文件必须保持原样并报告错误，绝不悄悄改为永久删除。

use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error};

/// 删除失败原因
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("回收站不可用，文件未删除: {path}")]
    TrashUnavailable { path: String },
    #[error("删除到回收站失败，文件未删除: {path}: {source}")]
    TrashFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("删除失败: {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// 回收站能力抽象
pub trait TrashFacility: Send + Sync {
    /// 回收站是否可用
    fn available(&self) -> bool;

    /// 将路径移入回收站
    fn send_to_trash(&self, path: &Path) -> anyhow::Result<()>;
}

/// 基于系统回收站的默认实现
pub struct OsTrash;

impl TrashFacility for OsTrash {
    fn available(&self) -> bool {
        // Linux 上无桌面环境时 XDG 回收站通常不可用
        if cfg!(target_os = "linux") {
            std::env::var_os("XDG_CURRENT_DESKTOP").is_some()
                || std::env::var_os("DESKTOP_SESSION").is_some()
                || std::env::var_os("XDG_DATA_HOME").is_some()
        } else {
            true
        }
    }

    fn send_to_trash(&self, path: &Path) -> anyhow::Result<()> {
        trash::delete(path)?;
        Ok(())
    }
}

/// 执行单个删除操作
pub struct SafeDeleter {
    trash: Box<dyn TrashFacility>,
}

impl Default for SafeDeleter {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeDeleter {
    pub fn new() -> Self {
        Self {
            trash: Box::new(OsTrash),
        }
    }

    pub fn with_facility(trash: Box<dyn TrashFacility>) -> Self {
        Self { trash }
    }

    /// 删除单个路径（文件或文件夹）
    ///
    /// 路径已不存在时返回 Ok(None)（视为成功的无操作）。
    /// 成功时返回人类可读的删除记录。
    pub fn delete(&self, path: &Path, permanent: bool) -> Result<Option<String>, DeleteError> {
        if !path.exists() {
            return Ok(None);
        }

        let is_dir = path.is_dir();

        if permanent {
            let result = if is_dir {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };

            return match result {
                Ok(()) => {
                    debug!("已永久删除: {}", path.display());
                    let record = if is_dir {
                        format!("{} (文件夹, 永久删除)", path.display())
                    } else {
                        format!("{} (永久删除)", path.display())
                    };
                    Ok(Some(record))
                }
                Err(e) => Err(DeleteError::Io {
                    path: path.display().to_string(),
                    source: e,
                }),
            };
        }

        if !self.trash.available() {
            let err = DeleteError::TrashUnavailable {
                path: path.display().to_string(),
            };
            error!("{}", err);
            return Err(err);
        }

        match self.trash.send_to_trash(path) {
            Ok(()) => {
                debug!("已移入回收站: {}", path.display());
                let kind = if is_dir { "文件夹" } else { "文件" };
                Ok(Some(format!("{} ({}, 回收站)", path.display(), kind)))
            }
            Err(e) => {
                let err = DeleteError::TrashFailed {
                    path: path.display().to_string(),
                    source: e,
                };
                error!("{}", err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// 测试用回收站：可配置为不可用或总是失败
    struct FakeTrash {
        available: bool,
        fail: bool,
        trashed: Mutex<Vec<PathBuf>>,
    }

    impl FakeTrash {
        fn new(available: bool, fail: bool) -> Self {
            Self {
                available,
                fail,
                trashed: Mutex::new(Vec::new()),
            }
        }
    }

    impl TrashFacility for FakeTrash {
        fn available(&self) -> bool {
            self.available
        }

        fn send_to_trash(&self, path: &Path) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("simulated trash failure");
            }
            self.trashed.lock().unwrap().push(path.to_path_buf());
            std::fs::remove_file(path)?;
            Ok(())
        }
    }

    #[test]
    fn test_permanent_delete_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.bak");
        std::fs::write(&file, b"x").unwrap();

        let deleter = SafeDeleter::new();
        let record = deleter.delete(&file, true).unwrap().unwrap();
        assert!(record.contains("永久删除"));
        assert!(!file.exists());
    }

    #[test]
    fn test_permanent_delete_directory_tree() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("old");
        std::fs::create_dir_all(sub.join("nested")).unwrap();
        std::fs::write(sub.join("nested/f.txt"), b"x").unwrap();

        let deleter = SafeDeleter::new();
        let record = deleter.delete(&sub, true).unwrap().unwrap();
        assert!(record.contains("文件夹"));
        assert!(!sub.exists());
    }

    #[test]
    fn test_missing_path_is_noop() {
        let deleter = SafeDeleter::new();
        let result = deleter.delete(Path::new("/no/such/path"), true).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_trash_unavailable_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("keep.bak");
        std::fs::write(&file, b"x").unwrap();

        let deleter = SafeDeleter::with_facility(Box::new(FakeTrash::new(false, false)));
        let err = deleter.delete(&file, false).unwrap_err();
        assert!(matches!(err, DeleteError::TrashUnavailable { .. }));
        assert!(file.exists());
    }

    #[test]
    fn test_trash_failure_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("keep.bak");
        std::fs::write(&file, b"x").unwrap();

        let deleter = SafeDeleter::with_facility(Box::new(FakeTrash::new(true, true)));
        let err = deleter.delete(&file, false).unwrap_err();
        assert!(matches!(err, DeleteError::TrashFailed { .. }));
        assert!(file.exists());
    }

    #[test]
    fn test_trash_success_record() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("gone.bak");
        std::fs::write(&file, b"x").unwrap();

        let deleter = SafeDeleter::with_facility(Box::new(FakeTrash::new(true, false)));
        let record = deleter.delete(&file, false).unwrap().unwrap();
        assert!(record.contains("回收站"));
        assert!(!file.exists());
    }
}
