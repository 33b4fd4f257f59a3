use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("value must not be empty")]
    Empty,
    #[error("value is too long (max {max}, got {got})")]
    TooLong { max: usize, got: usize },
    #[error("invalid id")]
    InvalidId,
}

pub const MAX_MESSAGE_LEN: usize = 2000;

/// Validate direct-message content: non-empty after trimming, bounded length.
/// Returns the trimmed content so callers persist exactly what was validated.
pub fn validate_message_content(content: &str) -> Result<&str, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.len() > MAX_MESSAGE_LEN {
        return Err(ValidationError::TooLong {
            max: MAX_MESSAGE_LEN,
            got: trimmed.len(),
        });
    }
    Ok(trimmed)
}

/// Parse a client-supplied id (ids travel as strings on the wire).
pub fn parse_id(raw: &str) -> Result<i64, ValidationError> {
    raw.parse::<i64>().map_err(|_| ValidationError::InvalidId)
}
