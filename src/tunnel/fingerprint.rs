use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use md5::{Digest as _, Md5};
use sha2::Sha256;

/// Checks a host key against a pinned fingerprint.
///
/// `key_blob` is the SSH wire encoding of the public key. `expected` may be the
/// unpadded base64 SHA-256 digest (optionally prefixed with `SHA256:`) or the hex
/// MD5 digest, with or without colons. Returns the verdict together with the
/// computed SHA-256 and MD5 fingerprints.
pub fn check_fingerprint(key_blob: &[u8], expected: &str) -> (bool, [String; 2]) {
    let sha256 = STANDARD_NO_PAD.encode(Sha256::digest(key_blob));
    let md5 = Md5::digest(key_blob)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    let expected = expected.trim();
    let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
    let expected = expected.replace(':', "");

    let ok = !expected.is_empty()
        && (expected == sha256 || expected.eq_ignore_ascii_case(&md5));
    (ok, [sha256, md5])
}
