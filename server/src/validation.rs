use crate::error::ApiError;

/// Maximum text length for voice requests
const MAX_TEXT_LENGTH: usize = 5000;
/// Maximum session id length
const MAX_SESSION_ID_LENGTH: usize = 128;

/// Validate a voice/text request body
pub fn validate_voice_request(
    text: &str,
    session_id: Option<&str>,
    language: Option<&str>,
) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.len() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    if let Some(id) = session_id {
        validate_session_id(id)?;
    }

    // Validate language code format if provided
    if let Some(lang) = language {
        if !is_valid_language_code(lang) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid language code format: {}. Expected format: ll or ll_CC (e.g., en, en_US)",
                lang
            )));
        }
    }

    Ok(())
}

/// Session ids are client-chosen; keep them short and header-safe.
pub fn validate_session_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > MAX_SESSION_ID_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Session id must be 1-{} characters",
            MAX_SESSION_ID_LENGTH
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::InvalidInput(
            "Session id may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

/// Validate language code format (e.g., en, en_US)
fn is_valid_language_code(code: &str) -> bool {
    let parts: Vec<&str> = code.split('_').collect();
    match parts.len() {
        1 => parts[0].len() == 2 && parts[0].chars().all(|c| c.is_ascii_lowercase()),
        2 => {
            parts[0].len() == 2
                && parts[0].chars().all(|c| c.is_ascii_lowercase())
                && parts[1].len() == 2
                && parts[1].chars().all(|c| c.is_ascii_uppercase())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_voice_request_valid() {
        assert!(validate_voice_request("Hello", None, Some("en_US")).is_ok());
        assert!(validate_voice_request("Test", Some("session-1_a"), None).is_ok());
    }

    #[test]
    fn test_validate_voice_request_empty_text() {
        let result = validate_voice_request("   ", None, None);
        assert!(matches!(result, Err(ApiError::InvalidInput(msg)) if msg.contains("empty")));
    }

    #[test]
    fn test_validate_voice_request_too_long() {
        let long_text = "a".repeat(5001);
        let result = validate_voice_request(&long_text, None, None);
        assert!(matches!(result, Err(ApiError::InvalidInput(msg)) if msg.contains("too long")));
        assert!(validate_voice_request(&"a".repeat(5000), None, None).is_ok());
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id(&"a".repeat(129)).is_err());
        assert!(validate_session_id("abc def").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_validate_language_code() {
        assert!(validate_voice_request("Hello", None, Some("invalid")).is_err());
        assert!(validate_voice_request("Hello", None, Some("EN")).is_err());
        assert!(validate_voice_request("Hello", None, Some("en_us")).is_err());
        assert!(validate_voice_request("Hello", None, Some("te")).is_ok());
        assert!(validate_voice_request("Hello", None, Some("hi_IN")).is_ok());
    }
}
