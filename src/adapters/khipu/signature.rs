use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-khipu-signature";

/// The exact bytes that get signed for a notification.
pub fn canonical_message(api_version: &str, notification_token: &str) -> String {
    format!("api_version={api_version}&notification_token={notification_token}")
}

/// Hex-encoded HMAC-SHA256 of the canonical message. `None` for an empty secret.
pub fn sign_notification(secret: &str, api_version: &str, notification_token: &str) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(canonical_message(api_version, notification_token).as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check a notification signature in constant time.
///
/// Returns false when the secret is not configured or the signature is
/// missing or malformed; a misconfigured deployment rejects every webhook.
pub fn verify_webhook_signature(
    secret: Option<&str>,
    notification_token: &str,
    signature: Option<&str>,
    api_version: &str,
) -> bool {
    let (Some(secret), Some(signature)) = (secret, signature) else {
        return false;
    };
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical_message(api_version, notification_token).as_bytes());
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn accepts_own_signature() {
        let sig = sign_notification(SECRET, "3.0", "tok_1").unwrap();
        assert!(verify_webhook_signature(Some(SECRET), "tok_1", Some(&sig), "3.0"));
    }

    #[test]
    fn rejects_other_token() {
        let sig = sign_notification(SECRET, "3.0", "tok_1").unwrap();
        assert!(!verify_webhook_signature(Some(SECRET), "tok_2", Some(&sig), "3.0"));
    }

    #[test]
    fn rejects_other_api_version() {
        let sig = sign_notification(SECRET, "3.0", "tok_1").unwrap();
        assert!(!verify_webhook_signature(Some(SECRET), "tok_1", Some(&sig), "1.3"));
    }

    #[test]
    fn missing_secret_or_signature_is_false() {
        let sig = sign_notification(SECRET, "3.0", "tok_1").unwrap();
        assert!(!verify_webhook_signature(None, "tok_1", Some(&sig), "3.0"));
        assert!(!verify_webhook_signature(Some(""), "tok_1", Some(&sig), "3.0"));
        assert!(!verify_webhook_signature(Some(SECRET), "tok_1", None, "3.0"));
    }

    #[test]
    fn malformed_signature_is_false() {
        assert!(!verify_webhook_signature(Some(SECRET), "tok_1", Some("zz-not-hex"), "3.0"));
        assert!(!verify_webhook_signature(Some(SECRET), "tok_1", Some("abcd"), "3.0"));
    }

    #[test]
    fn canonical_message_layout() {
        assert_eq!(
            canonical_message("3.0", "abc"),
            "api_version=3.0&notification_token=abc"
        );
    }
}
