use std::path::Path;

use actix_multipart::{Multipart, MultipartError};
use futures_util::StreamExt;
use tracing::debug;

use crate::domain::error::{IngestError, Result};
use crate::domain::RawPayload;

/// Multipart field that carries the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

fn multipart_error(e: MultipartError) -> IngestError {
    IngestError::InvalidUpload(format!("malformed multipart body: {}", e))
}

pub fn is_csv_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Pull the `file` part out of a multipart upload. The name is checked before
/// any of the body is buffered, and buffering stops with `InvalidUpload` once
/// the file grows past `max_bytes`.
pub async fn read_csv_upload(mut payload: Multipart, max_bytes: usize) -> Result<RawPayload> {
    while let Some(field) = payload.next().await {
        let mut field = field.map_err(multipart_error)?;

        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "skipping multipart field");
            while let Some(chunk) = field.next().await {
                chunk.map_err(multipart_error)?;
            }
            continue;
        }

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string)
            .ok_or_else(|| IngestError::InvalidUpload("file part has no file name".to_string()))?;
        if !is_csv_name(&file_name) {
            return Err(IngestError::InvalidUpload(format!(
                "{} is not a .csv file",
                file_name
            )));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(multipart_error)?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(IngestError::InvalidUpload(format!(
                    "{} is larger than the {} byte upload limit",
                    file_name, max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        debug!(file = %file_name, bytes = bytes.len(), "received upload");
        return Ok(RawPayload::new(file_name, bytes));
    }

    Err(IngestError::InvalidUpload(format!(
        "multipart field `{}` is missing",
        UPLOAD_FIELD
    )))
}
