pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::S3Bucket;

pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 读写
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 对象信息
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub last_modified: i64,
    pub size: u64,
}

/// 对象元数据
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: i64,
    pub etag: Option<String>,
}

/// 上传进度回调：(已上传字节, 总字节)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 对象存储抽象接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 递归列出指定前缀下的所有对象
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// 获取对象元数据，对象不存在时返回 None
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// 上传本地文件，可选进度回调
    async fn upload_file(
        &self,
        local: &Path,
        key: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<()>;

    /// 删除对象
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 规范化 endpoint：补全协议并纠正协议与端口不匹配
///
/// 无协议时按端口推断：80 -> http，其余（含无端口）-> https。
/// https + :80 纠正为 http，http + :443 纠正为 https。
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return String::new();
    }

    if let Some(rest) = endpoint.strip_prefix("http://") {
        return match port_of(rest) {
            Some(443) => format!("https://{}", rest),
            _ => endpoint.to_string(),
        };
    }

    if let Some(rest) = endpoint.strip_prefix("https://") {
        return match port_of(rest) {
            Some(80) => format!("http://{}", rest),
            _ => endpoint.to_string(),
        };
    }

    match port_of(endpoint) {
        Some(80) => format!("http://{}", endpoint),
        _ => format!("https://{}", endpoint),
    }
}

fn port_of(hostport: &str) -> Option<u16> {
    let (_, port) = hostport.rsplit_once(':')?;
    port.parse().ok()
}

/// 根据桶配置创建对象存储实例
pub fn create_object_store(bucket: &S3Bucket) -> Result<Arc<dyn ObjectStore>> {
    if bucket.name.trim().is_empty() {
        anyhow::bail!("桶名称为空");
    }
    if bucket.access_key.is_empty() || bucket.secret_key.is_empty() {
        anyhow::bail!("桶 '{}' 的访问凭证不完整", bucket.name);
    }

    let endpoint = bucket
        .endpoint
        .as_deref()
        .map(normalize_endpoint)
        .filter(|e| !e.is_empty());

    tracing::info!(
        "初始化 S3 存储: bucket={}, region={}",
        bucket.name,
        bucket.region
    );

    Ok(Arc::new(S3Store::new(
        &bucket.name,
        &bucket.region,
        &bucket.access_key,
        &bucket.secret_key,
        endpoint,
    )?))
}

/// 人类可读的字节大小
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
