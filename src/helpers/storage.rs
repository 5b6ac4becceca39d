use std::path::Path;

use log::{info, warn};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

use crate::config::S3Config;
use crate::errors::ApiError;

const PRESIGN_SECONDS: u32 = 3600;

const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("video/mp4", "mp4"),
    ("video/mpeg", "mpeg"),
    ("video/webm", "webm"),
    ("video/x-matroska", "mkv"),
    ("video/mkv", "mkv"),
    ("image/png", "png"),
    ("image/jpeg", "jpeg"),
    ("image/webp", "webp"),
    ("application/x-subrip", "srt"),
    ("text/vtt", "vtt"),
];

pub fn extension_for(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    MIME_EXTENSIONS
        .iter()
        .find(|(m, _)| *m == essence)
        .map(|(_, ext)| *ext)
}

pub fn content_type_for(ext: &str) -> &'static str {
    MIME_EXTENSIONS
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(m, _)| *m)
        .unwrap_or("application/octet-stream")
}

/// `<prefix>/<uuid>.<ext>`
pub fn object_key(prefix: &str, ext: &str) -> String {
    format!("{}/{}.{}", prefix.trim_matches('/'), Uuid::new_v4(), ext)
}

/// Thin wrapper over an S3-compatible bucket. Disabled when S3 is not configured.
pub struct Storage {
    bucket: Option<Box<Bucket>>,
    public_url: Option<String>,
}

impl Storage {
    pub fn new(config: Option<&S3Config>) -> Result<Self, ApiError> {
        let config = match config {
            Some(c) => c,
            None => {
                warn!("object storage is not configured; uploads are disabled");
                return Ok(Storage::disabled());
            }
        };

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let credentials = Credentials::new(Some(&config.access_key), Some(&config.secret_key), None, None, None)
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)?.with_path_style();
        if config.public_url.is_some() {
            bucket.add_header("x-amz-acl", "public-read");
        }

        info!("object storage bucket {} at {}", config.bucket, config.endpoint);
        Ok(Storage {
            bucket: Some(bucket),
            public_url: config.public_url.clone(),
        })
    }

    pub fn disabled() -> Self {
        Storage {
            bucket: None,
            public_url: None,
        }
    }

    fn bucket(&self) -> Result<&Bucket, ApiError> {
        self.bucket.as_deref().ok_or(ApiError::Unavailable("object storage"))
    }

    /// Streams a file from disk into the bucket.
    pub async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), ApiError> {
        let bucket = self.bucket()?;
        let mut file = tokio::fs::File::open(path).await?;
        let response = bucket
            .put_object_stream_with_content_type(&mut file, key, content_type)
            .await?;

        match response.status_code() {
            200 => Ok(()),
            code => Err(ApiError::Storage(format!("upload of {} returned status {}", key, code))),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), ApiError> {
        let response = self.bucket()?.delete_object(key).await?;

        match response.status_code() {
            200 | 204 => Ok(()),
            code => Err(ApiError::Storage(format!("delete of {} returned status {}", key, code))),
        }
    }

    /// A URL the client can fetch the object from.
    pub async fn url(&self, key: &str) -> Result<String, ApiError> {
        if let Some(base) = &self.public_url {
            return Ok(format!("{}/{}", base, key.trim_start_matches('/')));
        }

        Ok(self.bucket()?.presign_get(key, PRESIGN_SECONDS, None).await?)
    }

    /// Like `url`, but a missing key or disabled storage yields `None` instead of an error.
    pub async fn url_opt(&self, key: Option<&str>) -> Option<String> {
        let key = key?;
        match self.url(key).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("could not build url for {}: {}", key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_mime_types_to_extensions() {
        assert_eq!(extension_for("video/mp4"), Some("mp4"));
        assert_eq!(extension_for("IMAGE/JPEG"), Some("jpeg"));
        assert_eq!(extension_for("text/vtt; charset=utf-8"), Some("vtt"));
        assert_eq!(extension_for("application/zip"), None);
        assert_eq!(content_type_for("webp"), "image/webp");
        assert_eq!(content_type_for("exe"), "application/octet-stream");
    }

    #[test]
    fn builds_prefixed_keys() {
        let key = object_key("/images/avatars/", "png");
        assert!(key.starts_with("images/avatars/"));
        assert!(key.ends_with(".png"));
    }

    #[actix_web::test]
    async fn disabled_storage_reports_unavailable() {
        let storage = Storage::disabled();
        let upload = storage.put_file("a", Path::new("/nonexistent/a.txt"), "text/plain").await;
        assert!(matches!(upload, Err(ApiError::Unavailable(_))));
        assert_eq!(storage.url_opt(Some("a")).await, None);
        assert_eq!(storage.url_opt(None).await, None);
    }

    #[actix_web::test]
    async fn public_url_is_used_verbatim() {
        let storage = Storage {
            bucket: None,
            public_url: Some("https://cdn.example.com".into()),
        };
        assert_eq!(storage.url("/videos/a.mp4").await.unwrap(), "https://cdn.example.com/videos/a.mp4");
    }
}
