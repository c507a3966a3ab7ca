//! Percent-encoding for URL parameters
//!
//! The service expects the strict unreserved set: every byte outside
//! `[A-Za-z0-9-_.~]` becomes `%HH` with uppercase hex, including UTF-8
//! continuation bytes.

/// Percent-encodes `value` for use in a query string
pub fn url_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreserved_passes_through() {
        assert_eq!(url_encode("AZaz09-_.~"), "AZaz09-_.~");
    }

    #[test]
    fn test_reserved_bytes_are_escaped_uppercase() {
        assert_eq!(url_encode("a b"), "a%20b");
        assert_eq!(url_encode("/dev/docs"), "%2Fdev%2Fdocs");
        assert_eq!(url_encode("user@example.com"), "user%40example.com");
        assert_eq!(url_encode("q&r=s"), "q%26r%3Ds");
    }

    #[test]
    fn test_utf8_bytes_escape_individually() {
        assert_eq!(url_encode("ü"), "%C3%BC");
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(url_encode(""), "");
    }
}
