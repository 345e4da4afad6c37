//! WS-Security UsernameToken header (password digest profile)

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use quick_xml::escape::escape;
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Build a `wsse:Security` header with a fresh nonce and timestamp
pub fn username_token_header(username: &str, password: &str) -> String {
    let nonce = Uuid::new_v4().into_bytes();
    let created = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    build_username_token(username, password, &nonce, &created)
}

/// `Base64(SHA1(nonce + created + password))`
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

pub(crate) fn build_username_token(
    username: &str,
    password: &str,
    nonce: &[u8],
    created: &str,
) -> String {
    let digest = password_digest(nonce, created, password);
    format!(
        concat!(
            r#"<wsse:Security s:mustUnderstand="1" "#,
            r#"xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" "#,
            r#"xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">"#,
            "<wsse:UsernameToken>",
            "<wsse:Username>{}</wsse:Username>",
            r#"<wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</wsse:Password>"#,
            r#"<wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</wsse:Nonce>"#,
            "<wsu:Created>{}</wsu:Created>",
            "</wsse:UsernameToken>",
            "</wsse:Security>"
        ),
        escape(username),
        digest,
        BASE64.encode(nonce),
        created
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let nonce = [7u8; 16];
        let a = password_digest(&nonce, "2024-01-01T00:00:00.000Z", "secret");
        let b = password_digest(&nonce, "2024-01-01T00:00:00.000Z", "secret");
        assert_eq!(a, b);
        // 20-byte SHA-1 -> 28 base64 chars
        assert_eq!(a.len(), 28);
        assert_eq!(BASE64.decode(&a).unwrap().len(), 20);

        let c = password_digest(&[8u8; 16], "2024-01-01T00:00:00.000Z", "secret");
        assert_ne!(a, c);
    }

    #[test]
    fn test_header_contents() {
        let nonce = [1u8; 16];
        let header = build_username_token("admin<x>", "pw", &nonce, "2024-01-01T00:00:00.000Z");
        assert!(header.contains("<wsse:Username>admin&lt;x&gt;</wsse:Username>"));
        assert!(header.contains(&BASE64.encode(nonce)));
        assert!(header.contains(&password_digest(&nonce, "2024-01-01T00:00:00.000Z", "pw")));
        assert!(header.contains("<wsu:Created>2024-01-01T00:00:00.000Z</wsu:Created>"));
        assert!(!header.contains(">pw<"));
    }

    #[test]
    fn test_fresh_nonce_per_header() {
        assert_ne!(
            username_token_header("admin", "pw"),
            username_token_header("admin", "pw")
        );
    }
}
