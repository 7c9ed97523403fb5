//! Signed HTTP messages between farm nodes.
//!
//! A request is signed over `"{METHOD}\n{path}\n{timestamp}\n{sha256(body)}"`,
//! a response over `"RESPONSE\n{path}\n{timestamp}\n{sha256(body)}"`. The
//! signer, timestamp and hex signature travel in the `x-fpm-*` headers.

use crate::{verify_signature_hex, Identity};
use sha2::{Digest, Sha256};

pub const SIGNER_HEADER: &str = "x-fpm-signer";
pub const TIMESTAMP_HEADER: &str = "x-fpm-timestamp";
pub const SIGNATURE_HEADER: &str = "x-fpm-signature";

const RESPONSE_TAG: &str = "RESPONSE";

/// Hex SHA-256 of a message body.
pub fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub fn request_payload(method: &str, path: &str, timestamp: u64, body: &[u8]) -> Vec<u8> {
    format!(
        "{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        timestamp,
        body_digest(body)
    )
    .into_bytes()
}

pub fn response_payload(path: &str, timestamp: u64, body: &[u8]) -> Vec<u8> {
    format!("{}\n{}\n{}\n{}", RESPONSE_TAG, path, timestamp, body_digest(body)).into_bytes()
}

/// Header values attached to a signed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    /// Decimal node id of the signer.
    pub signer: String,
    pub timestamp: String,
    /// Hex-encoded ed25519 signature.
    pub signature: String,
}

impl SignatureHeaders {
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (SIGNER_HEADER, self.signer.as_str()),
            (TIMESTAMP_HEADER, self.timestamp.as_str()),
            (SIGNATURE_HEADER, self.signature.as_str()),
        ]
    }
}

pub fn sign_request(
    identity: &Identity,
    signer: u32,
    method: &str,
    path: &str,
    timestamp: u64,
    body: &[u8],
) -> SignatureHeaders {
    let payload = request_payload(method, path, timestamp, body);
    SignatureHeaders {
        signer: signer.to_string(),
        timestamp: timestamp.to_string(),
        signature: hex::encode(identity.sign(&payload)),
    }
}

pub fn sign_response(
    identity: &Identity,
    signer: u32,
    path: &str,
    timestamp: u64,
    body: &[u8],
) -> SignatureHeaders {
    let payload = response_payload(path, timestamp, body);
    SignatureHeaders {
        signer: signer.to_string(),
        timestamp: timestamp.to_string(),
        signature: hex::encode(identity.sign(&payload)),
    }
}

pub fn verify_request(
    method: &str,
    path: &str,
    timestamp: u64,
    body: &[u8],
    signature_hex: &str,
    public_key_hex: &str,
) -> bool {
    let payload = request_payload(method, path, timestamp, body);
    verify_signature_hex(&payload, signature_hex, public_key_hex)
}

pub fn verify_response(
    path: &str,
    timestamp: u64,
    body: &[u8],
    signature_hex: &str,
    public_key_hex: &str,
) -> bool {
    let payload = response_payload(path, timestamp, body);
    verify_signature_hex(&payload, signature_hex, public_key_hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_digest_of_empty_body() {
        assert_eq!(
            body_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_request_signature_verifies() {
        let id = Identity::generate();
        let body = br#"{"leader":1,"node":9,"target":"down"}"#;
        let headers = sign_request(&id, 1, "post", "/power", 1_700_000_000, body);
        assert_eq!(headers.signer, "1");
        assert_eq!(headers.timestamp, "1700000000");
        assert!(verify_request(
            "POST",
            "/power",
            1_700_000_000,
            body,
            &headers.signature,
            &id.public_key_hex()
        ));
    }

    #[test]
    fn test_request_signature_bound_to_path_and_time() {
        let id = Identity::generate();
        let headers = sign_request(&id, 1, "POST", "/power", 100, b"{}");
        let pk = id.public_key_hex();
        assert!(!verify_request("POST", "/self", 100, b"{}", &headers.signature, &pk));
        assert!(!verify_request("POST", "/power", 101, b"{}", &headers.signature, &pk));
        assert!(!verify_request("GET", "/power", 100, b"{}", &headers.signature, &pk));
    }

    #[test]
    fn test_response_signature_not_valid_as_request() {
        let id = Identity::generate();
        let headers = sign_response(&id, 4, "/self", 100, b"{}");
        let pk = id.public_key_hex();
        assert!(verify_response("/self", 100, b"{}", &headers.signature, &pk));
        assert!(!verify_request("GET", "/self", 100, b"{}", &headers.signature, &pk));
    }

    #[test]
    fn test_header_pairs() {
        let id = Identity::generate();
        let headers = sign_request(&id, 12, "GET", "/x", 5, b"");
        let pairs = headers.pairs();
        assert_eq!(pairs[0], (SIGNER_HEADER, "12"));
        assert_eq!(pairs[1], (TIMESTAMP_HEADER, "5"));
        assert_eq!(pairs[2].0, SIGNATURE_HEADER);
    }

    proptest! {
        #[test]
        fn prop_tampered_body_rejected(body in proptest::collection::vec(any::<u8>(), 1..256), flip in any::<usize>()) {
            let id = Identity::from_seed(&[11u8; 32]).unwrap();
            let headers = sign_request(&id, 1, "POST", "/power", 42, &body);
            let mut tampered = body.clone();
            let at = flip % tampered.len();
            tampered[at] ^= 0x01;
            prop_assert!(!verify_request("POST", "/power", 42, &tampered, &headers.signature, &id.public_key_hex()));
        }
    }
}
