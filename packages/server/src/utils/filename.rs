use thiserror::Error;

/// Longest filename accepted, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Reasons an uploaded filename is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilenameError {
    #[error("Filename cannot be empty")]
    Empty,
    #[error("Filename must be at most {MAX_FILENAME_BYTES} bytes")]
    TooLong,
    #[error("Invalid filename: path separators are not allowed")]
    ContainsPathSeparator,
    #[error("Invalid filename: '..' is not allowed")]
    PathTraversal,
    #[error("Invalid filename: hidden files (starting with '.') are not allowed")]
    Hidden,
    /// Includes NUL, CR and LF, which would otherwise reach `Content-Disposition`.
    #[error("Invalid filename: control characters are not allowed")]
    ControlCharacter,
}

/// Validate a client-supplied filename and return it trimmed.
///
/// The name is stored and echoed back on download, so it must be a single
/// flat path component.
pub fn validate_flat_filename(filename: &str) -> Result<&str, FilenameError> {
    let name = filename.trim();

    if name.is_empty() {
        return Err(FilenameError::Empty);
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err(FilenameError::TooLong);
    }
    if name.chars().any(char::is_control) {
        return Err(FilenameError::ControlCharacter);
    }
    if name.contains(['/', '\\']) {
        return Err(FilenameError::ContainsPathSeparator);
    }
    if name == ".." {
        return Err(FilenameError::PathTraversal);
    }
    if name.starts_with('.') {
        return Err(FilenameError::Hidden);
    }

    Ok(name)
}
