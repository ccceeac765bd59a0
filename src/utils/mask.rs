//! Credential masking for the public API surface (§4.I).

/// Mask a credential value for display: `head[0..4] + "****" + tail[-4..]`, or `"****"`
/// when the value is 8 characters or shorter.
pub fn mask_credential(value: &str) -> String {
    let len = value.chars().count();
    if len <= 8 {
        return "****".to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}****{tail}")
}
