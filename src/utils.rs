//! Small helpers shared by the authentication flow and the request pipeline.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Random lowercase a-z string, used for the OAuth `state` and the PKCE
/// `code_verifier`.
pub fn generate_random_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length).map(|_| rng.random_range(b'a'..=b'z') as char).collect()
}

/// Random lowercase hex string, used for the per-request `x-cfc-api-key`
/// header (128 hex chars).
pub fn generate_random_hex(length: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..length).map(|_| HEX[rng.random_range(0..16)] as char).collect()
}

/// PKCE S256 challenge: base64url(SHA-256(verifier)) with padding stripped.
pub fn code_challenge(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Extract a query string parameter from a redirect `Location` value.
///
/// Locations seen in the flow are either absolute (including the vendor's
/// custom `panasonic-iot-cfc://` scheme) or server-relative; relative ones
/// get a dummy base so `url` can parse them.
pub fn query_parameter(location: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(location).ok().or_else(|| {
        let path = location.strip_prefix('/').unwrap_or(location);
        url::Url::parse(&format!("https://redirect.invalid/{}", path)).ok()
    })?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn tag_attributes(tag: &str) -> Vec<(String, String)> {
    let attr_re = Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
    attr_re
        .captures_iter(tag)
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).map(|m| m.as_str()).unwrap_or("");
            (c[1].to_ascii_lowercase(), value.to_string())
        })
        .collect()
}

/// Collect name/value pairs of all hidden `<input>` elements in an HTML page.
/// The login flow re-submits these verbatim to the callback endpoint.
pub fn parse_hidden_inputs(html: &str) -> Vec<(String, String)> {
    let input_re = Regex::new(r"(?is)<input\b[^>]*>").unwrap();
    let mut fields = Vec::new();
    for tag in input_re.find_iter(html) {
        let attrs = tag_attributes(tag.as_str());
        let is_hidden = attrs
            .iter()
            .any(|(k, v)| k == "type" && v.eq_ignore_ascii_case("hidden"));
        if !is_hidden {
            continue;
        }
        let name = attrs.iter().find(|(k, _)| k == "name").map(|(_, v)| v.clone());
        let value = attrs
            .iter()
            .find(|(k, _)| k == "value")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        if let Some(name) = name {
            fields.push((name, value));
        }
    }
    fields
}

/// Read the app version from an AppBrain application page
/// (`<meta itemprop="softwareVersion" content="...">`).
pub fn parse_appbrain_app_version(html: &str) -> Option<String> {
    let meta_re = Regex::new(r"(?is)<meta\b[^>]*>").unwrap();
    for tag in meta_re.find_iter(html) {
        let attrs = tag_attributes(tag.as_str());
        let is_version = attrs
            .iter()
            .any(|(k, v)| k == "itemprop" && v == "softwareVersion");
        if !is_version {
            continue;
        }
        if let Some((_, content)) = attrs.iter().find(|(k, _)| k == "content") {
            return Some(content.clone());
        }
    }
    None
}
