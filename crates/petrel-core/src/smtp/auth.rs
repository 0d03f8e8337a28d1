//! SASL material decoding for SMTP AUTH

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Base64("Username:") — AUTH LOGIN first challenge
pub const LOGIN_CHALLENGE_USERNAME: &str = "VXNlcm5hbWU6";

/// Base64("Password:") — AUTH LOGIN second challenge
pub const LOGIN_CHALLENGE_PASSWORD: &str = "UGFzc3dvcmQ6";

/// Decode AUTH PLAIN material: base64 of `[authzid]\0authcid\0password`
/// (RFC 4616). Returns `(username, password)`.
pub fn decode_auth_plain(credentials: &str) -> Option<(String, String)> {
    let decoded = BASE64.decode(credentials.trim()).ok()?;
    let parts: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
    match parts.len() {
        2 => Some((
            String::from_utf8_lossy(parts[0]).to_string(),
            String::from_utf8_lossy(parts[1]).to_string(),
        )),
        3 => Some((
            String::from_utf8_lossy(parts[1]).to_string(),
            String::from_utf8_lossy(parts[2]).to_string(),
        )),
        _ => None,
    }
}

/// Decode one base64 line of an AUTH LOGIN exchange
pub fn decode_base64_line(line: &str) -> Option<String> {
    let decoded = BASE64.decode(line.trim()).ok()?;
    Some(String::from_utf8_lossy(&decoded).to_string())
}

/// Encode credentials as AUTH PLAIN initial-response material. Test helper.
pub fn encode_auth_plain(username: &str, password: &str) -> String {
    BASE64.encode(format!("\0{}\0{}", username, password))
}
