use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

use crate::config::S3Config;

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;

    /// URL prefix under which stored objects are publicly reachable.
    fn public_base(&self) -> &str;

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base().trim_end_matches('/'), key)
    }

    /// Inverse of `public_url`; `None` for URLs this store did not produce.
    fn key_from_url(&self, url: &str) -> Option<String> {
        let base = self.public_base().trim_end_matches('/');
        url.strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

/// S3 / MinIO backed storage.
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    public_base: String,
}

impl Storage {
    pub async fn new(cfg: &S3Config, region: &str) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_base: format!("{}/{}", cfg.public_base_url.trim_end_matches('/'), cfg.bucket),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    fn public_base(&self) -> &str {
        &self.public_base
    }
}

/// Files under a local upload directory, served elsewhere under `/uploads`.
#[derive(Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(key);
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        anyhow::ensure!(safe && !key.is_empty(), "refusing object key {key:?}");
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageClient for DiskStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }

    fn public_base(&self) -> &str {
        "/uploads"
    }
}
