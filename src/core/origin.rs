//! Origin fetcher (C2): downloads an object from the mirror, deciding between
//! an inline in-memory body and an atomically-persisted on-disk large file.

use crate::core::envelope::Envelope;
use crate::core::errors::CdnError;
use bytes::Bytes;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

/// Bodies at or under this size are cached in memory; bodies over it are
/// streamed to disk instead.
pub const LARGE_OBJECT_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Deterministic on-disk path for a large cached object: `<cachedir>/<hex-md5(key)>`.
pub fn large_object_path(cachedir: &Path, key: &str) -> PathBuf {
    let digest = md5::compute(key.as_bytes());
    cachedir.join(hex::encode(digest.0))
}

/// Fetches keys from a single upstream mirror, streaming large bodies to disk.
pub struct OriginFetcher {
    mirror_base: Url,
    cachedir: PathBuf,
    client: reqwest::Client,
}

impl OriginFetcher {
    pub fn new(mirror_base: Url, cachedir: PathBuf) -> Self {
        Self {
            mirror_base,
            cachedir,
            client: reqwest::Client::new(),
        }
    }

    fn origin_url(&self, key: &str) -> Url {
        let mut url = self.mirror_base.clone();
        url.set_path(key);
        url
    }

    /// Downloads `key` from the origin and produces the envelope to cache.
    pub async fn fetch(&self, key: &str) -> Result<Envelope, CdnError> {
        let url = self.origin_url(key);
        let response = self.client.get(url).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            let code = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .unwrap_or_else(|_| Bytes::new());
            return Err(CdnError::OriginStatus { code, body });
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let content_length = response.content_length();

        if content_length.is_some_and(|len| len > LARGE_OBJECT_THRESHOLD) {
            let length = content_length.unwrap();
            let path = large_object_path(&self.cachedir, key);
            self.stream_large_object(response, &path, length).await?;
            Ok(Envelope::file(
                headers,
                path.to_string_lossy().into_owned(),
            ))
        } else {
            let body = response.bytes().await.map_err(|e| CdnError::OriginIo(e.to_string()))?;
            Ok(Envelope::inline(headers, body.to_vec()))
        }
    }

    /// Streams `response`'s body into `path`, skipping the download entirely
    /// if `path` already exists with the expected `length`.
    async fn stream_large_object(
        &self,
        response: reqwest::Response,
        path: &Path,
        length: u64,
    ) -> Result<(), CdnError> {
        if let Ok(metadata) = fs::metadata(path).await
            && metadata.len() == length
        {
            debug!(path = %path.display(), "large object already cached, skipping download");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CdnError::OriginIo(e.to_string()))?;
        }

        let tmp_path = tmp_path_for(path);
        let result = self.write_to_tmp(response, &tmp_path).await;
        match result {
            Ok(()) => fs::rename(&tmp_path, path)
                .await
                .map_err(|e| CdnError::OriginIo(e.to_string())),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(e)
            }
        }
    }

    async fn write_to_tmp(
        &self,
        response: reqwest::Response,
        tmp_path: &Path,
    ) -> Result<(), CdnError> {
        let mut file = File::create(tmp_path)
            .await
            .map_err(|e| CdnError::OriginIo(e.to_string()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CdnError::OriginIo(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| CdnError::OriginIo(e.to_string()))?;
        }
        file.flush().await.map_err(|e| CdnError::OriginIo(e.to_string()))
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".xxx.download");
    PathBuf::from(name)
}
