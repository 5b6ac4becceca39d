use std::collections::HashMap;

use actix_multipart::{Field, Multipart};
use actix_web::web;
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::errors::ApiError;
use crate::helpers::storage::extension_for;

/// A file part spooled to disk. The temporary file is removed when this is dropped.
pub struct UploadedFile {
    pub file: NamedTempFile,
    pub size: u64,
    pub content_type: String,
    pub ext: &'static str,
    pub file_name: Option<String>,
}

pub struct ParsedMultipart<D> {
    pub files: HashMap<String, UploadedFile>,
    pub data: Option<D>, // the JSON part, if any
}

impl<D> ParsedMultipart<D> {
    pub fn take_file(&mut self, field: &str) -> Option<UploadedFile> {
        self.files.remove(field)
    }
}

/// Browsers often send subtitles as `application/octet-stream`, so the file name decides then.
pub fn resolve_extension(content_type: Option<&str>, file_name: Option<&str>) -> Option<&'static str> {
    if let Some(ext) = content_type.and_then(extension_for) {
        return Some(ext);
    }

    let ext = file_name?.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" => Some("mp4"),
        "mkv" => Some("mkv"),
        "webm" => Some("webm"),
        "mpeg" | "mpg" => Some("mpeg"),
        "png" => Some("png"),
        "jpg" | "jpeg" => Some("jpeg"),
        "webp" => Some("webp"),
        "srt" => Some("srt"),
        "vtt" => Some("vtt"),
        _ => None,
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.map_or(false, |ct| ct.starts_with("application/json"))
}

/// Running byte count over the whole body.
struct Budget {
    used: usize,
    max: usize,
}

impl Budget {
    fn spend(&mut self, bytes: usize) -> Result<(), ApiError> {
        self.used += bytes;
        if self.used > self.max {
            return Err(ApiError::PayloadTooLarge);
        }
        Ok(())
    }
}

async fn read_to_memory(field: &mut Field, budget: &mut Budget) -> Result<Vec<u8>, ApiError> {
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        budget.spend(chunk.len())?;
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn spool_to_disk(field: &mut Field, budget: &mut Budget) -> Result<(NamedTempFile, u64), ApiError> {
    let temp = web::block(NamedTempFile::new).await??;
    let mut writer = tokio::fs::File::from_std(temp.as_file().try_clone()?);
    let mut size = 0u64;

    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        budget.spend(chunk.len())?;
        writer.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    writer.flush().await?;

    Ok((temp, size))
}

/*
    Walks every part of the multipart body.
    A part named `data` or sent as `application/json` is read into memory and deserialized into D;
    every other part is a file, streamed to a temporary file and keyed by its field name.
    The whole body may not exceed `max_bytes`.
*/
pub async fn attempt_parse_multipart<D: DeserializeOwned>(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<ParsedMultipart<D>, ApiError> {
    let mut parsed: ParsedMultipart<D> = ParsedMultipart {
        files: HashMap::new(),
        data: None,
    };
    let mut budget = Budget { used: 0, max: max_bytes };

    while let Some(mut field) = multipart.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(|m| m.essence_str().to_string());
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        if name == "data" || is_json(content_type.as_deref()) {
            let bytes = read_to_memory(&mut field, &mut budget).await?;
            let data = serde_json::from_slice::<D>(&bytes)
                .map_err(|e| ApiError::BadRequest(format!("invalid JSON part: {}", e)))?;
            parsed.data = Some(data);
            continue;
        }

        let ext = resolve_extension(content_type.as_deref(), file_name.as_deref()).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "unsupported file type {} for field {}",
                content_type.as_deref().unwrap_or("unknown"),
                name
            ))
        })?;

        let (file, size) = spool_to_disk(&mut field, &mut budget).await?;
        parsed.files.insert(
            name,
            UploadedFile {
                file,
                size,
                content_type: content_type.unwrap_or_else(|| "application/octet-stream".into()),
                ext,
                file_name,
            },
        );
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use actix_multipart::test::create_form_data_payload_and_headers;
    use actix_web::error::PayloadError;
    use actix_web::web::Bytes;
    use rstest::rstest;
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct Meta {
        language: String,
    }

    fn multipart_of(name: &str, file_name: &str, mime: actix_web::mime::Mime, body: &'static [u8]) -> Multipart {
        let (payload, headers) =
            create_form_data_payload_and_headers(name, Some(file_name.to_string()), Some(mime), Bytes::from_static(body));
        let stream = futures::stream::once(async move { Ok::<Bytes, PayloadError>(payload) });
        Multipart::new(&headers, stream)
    }

    #[rstest]
    #[case(Some("video/mp4"), None, Some("mp4"))]
    #[case(Some("application/octet-stream"), Some("episode.EN.srt"), Some("srt"))]
    #[case(None, Some("poster.JPG"), Some("jpeg"))]
    #[case(Some("application/zip"), Some("archive.zip"), None)]
    #[case(None, None, None)]
    fn resolves_extensions(
        #[case] content_type: Option<&str>,
        #[case] file_name: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(resolve_extension(content_type, file_name), expected);
    }

    #[actix_web::test]
    async fn collects_files_by_field_name() {
        let multipart = multipart_of("thumbnail", "thumb.png", actix_web::mime::IMAGE_PNG, b"\x89PNG");
        let mut parsed = attempt_parse_multipart::<Meta>(multipart, 1024).await.unwrap();

        assert!(parsed.data.is_none());
        let file = parsed.take_file("thumbnail").unwrap();
        assert_eq!(file.ext, "png");
        assert_eq!(file.size, 4);
        assert_eq!(std::fs::read(file.file.path()).unwrap(), b"\x89PNG");
        assert_eq!(file.file_name.as_deref(), Some("thumb.png"));
    }

    #[actix_web::test]
    async fn parses_json_part() {
        let multipart = multipart_of("data", "meta.json", actix_web::mime::APPLICATION_JSON, br#"{"language":"fr"}"#);
        let parsed = attempt_parse_multipart::<Meta>(multipart, 1024).await.unwrap();
        assert_eq!(parsed.data.unwrap().language, "fr");
    }

    #[actix_web::test]
    async fn enforces_size_cap() {
        let multipart = multipart_of("video", "clip.mp4", "video/mp4".parse().unwrap(), b"0123456789");
        let result = attempt_parse_multipart::<Meta>(multipart, 4).await;
        assert!(matches!(result, Err(ApiError::PayloadTooLarge)));
    }

    #[actix_web::test]
    async fn temporary_files_are_removed_on_drop() {
        let multipart = multipart_of("video", "clip.mp4", "video/mp4".parse().unwrap(), b"0123456789");
        let mut parsed = attempt_parse_multipart::<Meta>(multipart, 1024).await.unwrap();

        let file = parsed.take_file("video").unwrap();
        let path = file.file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[actix_web::test]
    async fn unsupported_types_are_rejected() {
        let multipart = multipart_of("video", "archive.zip", "application/zip".parse().unwrap(), b"PK");
        let result = attempt_parse_multipart::<Meta>(multipart, 1024).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
