use crate::error::UploadError;
use crate::models::SelectedFile;
use std::path::Path;

/// Rejects files above the form's size limit. A file exactly at the limit is allowed.
pub fn validate_file_size(size: u64, max_size: u64) -> Result<(), UploadError> {
    if size > max_size {
        tracing::warn!(
            "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
            size,
            max_size,
            max_size / 1024 / 1024
        );
        return Err(UploadError::FileTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

/// Reduces a local path to the name a browser would report for the file:
/// the last path component, with control characters and reserved characters
/// replaced. Returns `None` when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Windows separators are not separators for `Path` on unix
    let last = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let name = Path::new(last).file_name().and_then(|n| n.to_str())?;

    if name.is_empty() || name == ".." {
        return None;
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    Some(sanitized)
}

/// Sniffs the content type from magic bytes.
pub fn detect_content_type(header: &[u8]) -> String {
    infer::get(header)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Reads a local file into memory the way a file input hands it to the page.
/// The size comes from metadata and is checked against `max_size` before any
/// byte is read.
pub async fn read_selected_file(
    path: &Path,
    max_size: u64,
) -> Result<SelectedFile, UploadError> {
    let name = path
        .to_str()
        .and_then(sanitize_filename)
        .ok_or_else(|| {
            UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid filename: {}", path.display()),
            ))
        })?;

    let metadata = tokio::fs::metadata(path).await?;
    validate_file_size(metadata.len(), max_size)?;

    let content = tokio::fs::read(path).await?;
    let content_type = detect_content_type(&content);

    Ok(SelectedFile::new(name, content).with_content_type(content_type))
}
