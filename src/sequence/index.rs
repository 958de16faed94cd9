/// Extract the leading work-item index from a filename or remote title.
///
/// The index is the leading run of ASCII digits, padded or unpadded. It must be
/// followed by the end of input or a non-alphanumeric separator, so `"2fa.md"`
/// and `"Setup 2FA"` carry no index. Zero and values that overflow `u32` are
/// rejected.
pub fn parse_leading_index(text: &str) -> Option<u32> {
    let digits_end = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    if digits_end == 0 {
        return None;
    }

    if let Some(next) = text[digits_end..].chars().next()
        && next.is_alphanumeric()
    {
        return None;
    }

    match text[..digits_end].parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(index) => Some(index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_and_unpadded() {
        assert_eq!(parse_leading_index("007-title.md"), Some(7));
        assert_eq!(parse_leading_index("7-title.md"), Some(7));
        assert_eq!(parse_leading_index("042-answer-to-everything"), Some(42));
    }

    #[test]
    fn test_separators() {
        assert_eq!(parse_leading_index("001 Set up clean architecture"), Some(1));
        assert_eq!(parse_leading_index("001: Set up clean architecture"), Some(1));
        assert_eq!(parse_leading_index("12_underscored.md"), Some(12));
        assert_eq!(parse_leading_index("12.md"), Some(12));
        assert_eq!(parse_leading_index("123"), Some(123));
    }

    #[test]
    fn test_no_leading_number() {
        assert_eq!(parse_leading_index("Set up clean architecture"), None);
        assert_eq!(parse_leading_index("Setup 2FA Authentication System"), None);
        assert_eq!(parse_leading_index(""), None);
        assert_eq!(parse_leading_index("README.md"), None);
    }

    #[test]
    fn test_number_glued_to_letters_is_not_an_index() {
        assert_eq!(parse_leading_index("2fa-setup.md"), None);
        assert_eq!(parse_leading_index("10x"), None);
    }

    #[test]
    fn test_zero_and_overflow_rejected() {
        assert_eq!(parse_leading_index("000-intro.md"), None);
        assert_eq!(parse_leading_index("99999999999-huge.md"), None);
    }
}
