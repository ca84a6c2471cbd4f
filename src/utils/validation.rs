use axum::http::{HeaderMap, header};
use std::path::Path;

/// Longest staged filename we accept, in bytes
pub const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Rejects a request whose declared `Content-Length` is above `max_size` bytes.
///
/// Runs before any body bytes are read. Requests without the header pass here
/// and are bounded later by the router's body limit.
pub fn validate_content_length(headers: &HeaderMap, max_size: usize) -> Result<(), ValidationError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match declared {
        Some(length) if length > max_size as u64 => Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "The size of the file is too large. The request must not exceed {} bytes ({} MB)",
                max_size,
                max_size / 1024 / 1024
            ),
        }),
        _ => Ok(()),
    }
}

/// Reduces a client-supplied filename to a bare, filesystem-safe name.
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    // Clients on Windows send backslash-separated paths
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from filename: {}", filename);
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
    let sanitized = sanitized.trim().to_string();

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    // Limit length safely for UTF-8
    if sanitized.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        return Ok(sanitized[..end].to_string());
    }

    Ok(sanitized)
}

/// True when `name` can be joined onto a directory without escaping it.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.chars().any(|c| c.is_control())
}
