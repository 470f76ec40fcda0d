//! SASL PLAIN credentials (RFC 4616).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Encodes the PLAIN initial response: `NUL username NUL password`, base64.
pub fn plain_credentials(username: &str, password: &str) -> String {
    let mut message = Vec::with_capacity(username.len() + password.len() + 2);
    message.push(0);
    message.extend_from_slice(username.as_bytes());
    message.push(0);
    message.extend_from_slice(password.as_bytes());
    STANDARD.encode(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_nul_separated_and_decodable() {
        let encoded = plain_credentials("u", "p");
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, [0, b'u', 0, b'p']);
    }

    #[test]
    fn base64_round_trips() {
        assert_eq!(STANDARD.encode("hello world!"), "aGVsbG8gd29ybGQh");
        assert_eq!(
            STANDARD.decode("aGVsbG8gd29ybGQh").unwrap(),
            b"hello world!"
        );
    }
}
