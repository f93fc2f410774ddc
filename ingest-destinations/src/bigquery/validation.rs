use ingest::bail;
use ingest::error::{ErrorKind, IngestResult};

/// Maximum length of a BigQuery dataset id.
const MAX_DATASET_ID_LEN: usize = 1024;

/// Sanitizes a BigQuery identifier for safe backtick quoting.
///
/// Rejects empty identifiers and identifiers containing control characters. Backticks and
/// backslashes are escaped with a backslash so that the value can be wrapped in backticks
/// without altering the identifier or breaking out of it.
pub fn sanitize_identifier(identifier: &str, context: &str) -> IngestResult<String> {
    if identifier.is_empty() {
        bail!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        );
    }

    if identifier.chars().any(char::is_control) {
        bail!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        );
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

/// Returns a backtick quoted column name.
pub fn quote_column(name: &str) -> IngestResult<String> {
    Ok(format!("`{}`", sanitize_identifier(name, "BigQuery column name")?))
}

/// Validates a dataset id.
///
/// Datasets are addressed through the REST API as well, where no quoting applies, so only
/// letters, digits and underscores are accepted.
pub fn validate_dataset_id(dataset_id: &str) -> IngestResult<()> {
    let valid = !dataset_id.is_empty()
        && dataset_id.len() <= MAX_DATASET_ID_LEN
        && dataset_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        bail!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery dataset id",
            format!(
                "dataset id `{dataset_id}` must be 1 to {MAX_DATASET_ID_LEN} letters, digits or underscores"
            )
        );
    }

    Ok(())
}

/// Renders a GoogleSQL string literal.
pub fn quote_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            ch if ch.is_control() => quoted.push_str(&format!("\\u{:04x}", ch as u32)),
            ch => quoted.push(ch),
        }
    }
    quoted.push('\'');

    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier_escapes_backticks() {
        assert_eq!(
            sanitize_identifier("my`table\\x", "table").unwrap(),
            "my\\`table\\\\x"
        );
        assert_eq!(quote_column("clicks").unwrap(), "`clicks`");
    }

    #[test]
    fn test_sanitize_identifier_rejects_empty_and_control_characters() {
        assert_eq!(
            sanitize_identifier("", "table").map_err(|err| err.kind()),
            Err(ErrorKind::DestinationTableNameInvalid)
        );
        assert_eq!(
            sanitize_identifier("a\nb", "table").map_err(|err| err.kind()),
            Err(ErrorKind::DestinationTableNameInvalid)
        );
    }

    #[test]
    fn test_dataset_ids() {
        assert!(validate_dataset_id("marketing_next").is_ok());
        assert!(validate_dataset_id("marketing-next").is_err());
        assert!(validate_dataset_id("").is_err());
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string("it's"), "'it\\'s'");
        assert_eq!(quote_string("a\\b\nc"), "'a\\\\b\\nc'");
        assert_eq!(quote_string("\u{1}"), "'\\u0001'");
    }
}
