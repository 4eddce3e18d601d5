//! HMAC-SHA256 request signing for authenticated venue calls.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::credentials::ApiCredentials;

type HmacSha256 = Hmac<Sha256>;

/// Build a signed query string: parameters in given order, `timestamp`
/// appended, then `signature=HMAC-SHA256(secret, query)` hex-encoded.
pub(crate) fn signed_query(
    credentials: &ApiCredentials,
    params: &[(&str, String)],
    timestamp_ms: i64,
) -> String {
    let mut parts: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    parts.push(format!("timestamp={}", timestamp_ms));
    let query = parts.join("&");

    let mut mac = HmacSha256::new_from_slice(credentials.secret().as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(query.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    format!("{}&signature={}", query, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_published_vector() {
        // Known HMAC vector from the venue API documentation.
        let creds = ApiCredentials::new(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A".into(),
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".into(),
        );

        let params = [
            ("symbol", "LTCBTC".to_string()),
            ("side", "BUY".to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", "1".to_string()),
            ("price", "0.1".to_string()),
            ("recvWindow", "5000".to_string()),
        ];
        let signed = signed_query(&creds, &params, 1499827319559);

        assert!(signed.ends_with(
            "signature=c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        ));
    }

    #[test]
    fn timestamp_is_appended_before_signature() {
        let creds = ApiCredentials::new("k".into(), "s".into());
        let signed = signed_query(&creds, &[("a", "1".to_string())], 42);
        assert!(signed.starts_with("a=1&timestamp=42&signature="));
    }
}
