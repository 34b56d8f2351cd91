use gatehouse_core::DomainError;

/// Validate a lowercase identifier segment: `[a-z][a-z0-9_-]*`.
///
/// `separator` permits a delimiter between segments (pages use `.`); it is
/// never interpreted structurally after validation.
pub(crate) fn check_name(
    kind: &str,
    value: &str,
    max_len: usize,
    separator: Option<char>,
) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::validation(format!("{kind} must not be empty")));
    }
    if value.len() > max_len {
        return Err(DomainError::validation(format!(
            "{kind} must be at most {max_len} characters"
        )));
    }

    let segments: Vec<&str> = match separator {
        Some(sep) => value.split(sep).collect(),
        None => vec![value],
    };

    for segment in segments {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => {}
            _ => {
                return Err(DomainError::validation(format!(
                    "{kind} '{value}' must start each segment with a lowercase letter"
                )));
            }
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
            return Err(DomainError::validation(format!(
                "{kind} '{value}' may only contain lowercase letters, digits, '_' and '-'"
            )));
        }
    }

    Ok(())
}
