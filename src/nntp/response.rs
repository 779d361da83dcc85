//! NNTP status line framing
//!
//! Single-line responses are `<3-digit code> <message>` terminated by CRLF.
//! The first three bytes are the code; bytes from position 4 (when present)
//! to the line terminator are the message.

use crate::error::NntpError;

type Result<T> = std::result::Result<T, NntpError>;

/// A parsed NNTP status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NntpResponse {
    /// Three-digit response code
    pub code: u16,
    /// Message text after the code (may be empty)
    pub message: String,
}

impl NntpResponse {
    /// Greeting codes that permit proceeding (posting allowed or not)
    pub fn is_greeting(&self) -> bool {
        self.code == 200 || self.code == 201
    }
}

/// Parse one status line (already stripped of its CRLF terminator).
pub fn parse_status_line(line: &str) -> Result<NntpResponse> {
    if line.len() < 3 {
        return Err(NntpError::InvalidResponse(format!(
            "status line too short: {line:?}"
        )));
    }

    let code: u16 = line[..3]
        .parse()
        .map_err(|_| NntpError::InvalidResponse(format!("non-numeric status code: {line:?}")))?;

    if !(100..=599).contains(&code) {
        return Err(NntpError::InvalidResponse(format!(
            "status code out of range: {line:?}"
        )));
    }

    let message = if line.len() > 4 {
        line[4..].to_string()
    } else {
        String::new()
    };

    Ok(NntpResponse { code, message })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_message() {
        let resp = parse_status_line("222 0 <m@x> article body follows").unwrap();
        assert_eq!(resp.code, 222);
        assert_eq!(resp.message, "0 <m@x> article body follows");
    }

    #[test]
    fn parses_bare_code_without_message() {
        let resp = parse_status_line("205").unwrap();
        assert_eq!(resp.code, 205);
        assert_eq!(resp.message, "");
    }

    #[test]
    fn code_followed_by_single_space_has_empty_message() {
        let resp = parse_status_line("381 ").unwrap();
        assert_eq!(resp.code, 381);
        assert_eq!(resp.message, "");
    }

    #[test]
    fn greeting_codes_are_200_and_201() {
        assert!(parse_status_line("200 ready").unwrap().is_greeting());
        assert!(parse_status_line("201 ready, no posting").unwrap().is_greeting());
        assert!(!parse_status_line("400 unavailable").unwrap().is_greeting());
    }

    #[test]
    fn short_line_is_invalid() {
        assert!(parse_status_line("20").is_err());
        assert!(parse_status_line("").is_err());
    }

    #[test]
    fn non_numeric_code_is_invalid() {
        assert!(parse_status_line("abc hello").is_err());
    }

    #[test]
    fn out_of_range_code_is_invalid() {
        assert!(parse_status_line("999 weird").is_err());
        assert!(parse_status_line("099 weird").is_err());
    }
}
