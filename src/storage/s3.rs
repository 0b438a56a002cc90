use super::{
    ObjectInfo, ObjectMeta, ObjectStore, ProgressCallback, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// 上传分块大小，每写入一块回调一次进度
const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

pub struct S3Store {
    operator: Operator,
    name: String,
}

impl S3Store {
    pub fn new(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            name: format!("s3://{}", bucket),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();

        let mut lister = self
            .operator
            .lister_with(prefix)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path = entry.path().to_string();

            if path.is_empty() || path == "/" {
                continue;
            }

            let meta = entry.metadata();
            if meta.is_dir() {
                continue;
            }

            objects.push(ObjectInfo {
                key: path.trim_start_matches('/').to_string(),
                size: meta.content_length(),
                last_modified: meta.last_modified().map_or(0, |t| t.timestamp()),
            });
        }

        Ok(objects)
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(ObjectMeta {
                size: meta.content_length(),
                last_modified: meta.last_modified().map_or(0, |t| t.timestamp()),
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_file(
        &self,
        local: &Path,
        key: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let mut file = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("打开文件失败: {}", local.display()))?;
        let total = file.metadata().await?.len();

        let mut writer = self.operator.writer(key).await?;
        let mut uploaded = 0u64;
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(buf[..n].to_vec()).await?;
            uploaded += n as u64;
            if let Some(cb) = &progress {
                cb(uploaded, total);
            }
        }

        writer.close().await?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        // S3 删除不存在的对象不会报错
        self.operator.delete(key).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
