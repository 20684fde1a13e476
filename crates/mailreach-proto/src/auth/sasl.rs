//! SASL encodings and digests.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

use crate::{Error, Result};

/// Base64-encodes a client response. An empty response is sent as `=`
/// when it travels as an initial response.
#[must_use]
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes a server challenge.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| Error::Protocol(format!("invalid base64 challenge: {e}")))
}

/// PLAIN message (RFC 4616): `authzid NUL authcid NUL password`.
#[must_use]
pub fn plain_message(authzid: &str, user: &str, password: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(authzid.len() + user.len() + password.len() + 2);
    message.extend_from_slice(authzid.as_bytes());
    message.push(0);
    message.extend_from_slice(user.as_bytes());
    message.push(0);
    message.extend_from_slice(password.as_bytes());
    message
}

/// CRAM-MD5 response (RFC 2195): `user SP hex(HMAC-MD5(password, challenge))`.
pub fn cram_md5_response(user: &str, password: &str, challenge: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes())
        .map_err(|e| Error::Protocol(format!("CRAM-MD5 key: {e}")))?;
    mac.update(challenge);
    Ok(format!("{user} {}", hex(&mac.finalize().into_bytes())))
}

/// APOP digest (RFC 1939): `hex(MD5(timestamp + password))`.
#[must_use]
pub fn apop_digest(timestamp: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message() {
        assert_eq!(plain_message("tim", "tim", "pw"), b"tim\0tim\0pw");
        assert_eq!(encode(&plain_message("", "user", "pass")), "AHVzZXIAcGFzcw==");
    }

    #[test]
    fn test_cram_md5_rfc2195_example() {
        let challenge = b"<1896.697170952@postoffice.reston.mci.net>";
        let response = cram_md5_response("tim", "tanstaaftanstaaf", challenge).unwrap();
        assert_eq!(response, "tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_apop_rfc1939_example() {
        let digest = apop_digest("<1896.697170952@dbc.mtview.ca.us>", "tanstaaf");
        assert_eq!(digest, "c4c9334bac560ecc979e58001b3e22fb");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode("PDEyMzQ+").unwrap(), b"<1234>");
        assert!(matches!(decode("not base64!"), Err(Error::Protocol(_))));
    }
}
