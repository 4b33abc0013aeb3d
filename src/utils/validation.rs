use crate::services::error::{UploadError, UploadResult};

/// Reference maximum chunk size: 1 MB
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Longest logical file name accepted, in bytes
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Characters rejected in a name because they are unsafe on common filesystems
const RESERVED_CHARS: &[char] = &[':', '*', '?', '"', '<', '>', '|', ';'];

/// Sanitizes a client supplied logical file name so it can address exactly one
/// entry directly below the staging and output roots.
///
/// Nothing is rewritten apart from trimming surrounding whitespace: a name is
/// either accepted as is or rejected, so two distinct names never map to the
/// same entry and sanitizing a sanitized name returns it unchanged.
pub fn sanitize_file_name(file_name: &str) -> UploadResult<String> {
    let name = file_name.trim();

    if name.is_empty() {
        return Err(UploadError::InvalidFileName(
            "File name cannot be empty".to_string(),
        ));
    }

    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        tracing::warn!("Path traversal attempt detected: {:?}", file_name);
        return Err(UploadError::InvalidFileName(format!(
            "'{}' contains a path separator",
            file_name.escape_debug()
        )));
    }

    if name.contains("..") || name.chars().all(|c| c == '.') {
        tracing::warn!("Path traversal attempt detected: {:?}", file_name);
        return Err(UploadError::InvalidFileName(format!(
            "'{}' contains a parent directory segment",
            file_name.escape_debug()
        )));
    }

    // Leading dots would collide with the hidden partial files in the output root
    if name.starts_with('.') {
        return Err(UploadError::InvalidFileName(
            "Hidden files (starting with '.') are not allowed".to_string(),
        ));
    }

    if let Some(c) = name
        .chars()
        .find(|c| c.is_control() || RESERVED_CHARS.contains(c))
    {
        return Err(UploadError::InvalidFileName(format!(
            "'{}' contains the reserved character {:?}",
            file_name.escape_debug(),
            c
        )));
    }

    if name.len() > MAX_FILE_NAME_LEN {
        return Err(UploadError::InvalidFileName(format!(
            "File name is {} bytes, the limit is {}",
            name.len(),
            MAX_FILE_NAME_LEN
        )));
    }

    Ok(name.to_string())
}

/// Validates a single chunk payload against the configured limit
pub fn validate_chunk_size(size: usize, max_size: usize) -> UploadResult<()> {
    if size > max_size {
        return Err(UploadError::PayloadTooLarge {
            size: size as u64,
            limit: max_size as u64,
        });
    }
    Ok(())
}

/// Validates the running total of a logical file against the configured limit
pub fn validate_file_size(total: u64, max_size: u64) -> UploadResult<()> {
    if total > max_size {
        return Err(UploadError::PayloadTooLarge {
            size: total,
            limit: max_size,
        });
    }
    Ok(())
}
