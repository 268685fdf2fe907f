//! # CSRF token codec
//!
//! Signs and verifies self-contained, time-limited CSRF tokens.
//!
//! Tokens are HMAC-SHA256 signed with a key derived from the secret and a
//! salt, and follow the format:
//!
//! ```text
//! v1.<base64url(payload || issued_at || mac)>
//! ```
//!
//! - `issued_at` is the issuance time as big-endian UNIX seconds (8 bytes)
//! - `mac` is `HMAC-SHA256(key(secret, salt), "v1" || payload || issued_at)` (32 bytes)
//! - Base64 is URL-safe without padding
//!
//! Verification needs no server-side state: only the secret, the accepted
//! salts and a maximum age.
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use chrono::Duration;
//! use wzs_csrf::csrf::codec::TokenCodec;
//! use wzs_csrf::time::fixed_clock::FixedClock;
//!
//! let clock = Arc::new(FixedClock::at_unix(0));
//! let codec = TokenCodec::new([9u8; 32], clock.clone());
//!
//! let token = codec.issue(b"payload", "s1");
//! clock.advance(Duration::seconds(500));
//! let verified = codec.verify(&token, "s1", Duration::seconds(600)).unwrap();
//! assert_eq!(verified.payload, b"payload");
//! ```

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::csrf::VerifyError;
use crate::time::clock::Clock;

/// Version prefix of every token.
pub const TOKEN_VERSION: &str = "v1";

/// Length of the random payload used by [`TokenCodec::issue_nonce`].
pub const NONCE_LEN: usize = 32;

const TIMESTAMP_LEN: usize = 8;
const MAC_LEN: usize = 32;
const KEY_CONTEXT: &[u8] = b"csrf-salt:";

type HmacSha256 = Hmac<Sha256>;

/// A successfully verified token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verified {
    pub payload: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    /// Index of the salt that matched in the candidate list (`0` = current).
    pub salt_index: usize,
}

/// A salt accepted during verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaltCandidate<'a> {
    pub salt: &'a str,
    /// Ignored for the first candidate. For later candidates the salt is only
    /// tried while `now <= grace_deadline`; `None` means no deadline.
    pub grace_deadline: Option<DateTime<Utc>>,
}

impl<'a> SaltCandidate<'a> {
    pub fn current(salt: &'a str) -> Self {
        Self {
            salt,
            grace_deadline: None,
        }
    }

    pub fn until(salt: &'a str, grace_deadline: DateTime<Utc>) -> Self {
        Self {
            salt,
            grace_deadline: Some(grace_deadline),
        }
    }
}

/// Decoded token bytes: `payload || issued_at || mac`.
struct RawToken {
    blob: Vec<u8>,
}

impl RawToken {
    fn payload(&self) -> &[u8] {
        &self.blob[..self.blob.len() - TIMESTAMP_LEN - MAC_LEN]
    }

    fn timestamp(&self) -> [u8; TIMESTAMP_LEN] {
        let start = self.blob.len() - TIMESTAMP_LEN - MAC_LEN;
        let mut out = [0u8; TIMESTAMP_LEN];
        out.copy_from_slice(&self.blob[start..start + TIMESTAMP_LEN]);
        out
    }

    fn mac(&self) -> &[u8] {
        &self.blob[self.blob.len() - MAC_LEN..]
    }
}

/// Stateless signer/verifier for CSRF tokens.
#[derive(Clone)]
pub struct TokenCodec {
    secret: [u8; 32],
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: [u8; 32], clock: Arc<dyn Clock>) -> Self {
        Self { secret, clock }
    }

    /// Signs `payload` with the current time using `salt`.
    pub fn issue(&self, payload: &[u8], salt: &str) -> String {
        let issued_at = u64::try_from(self.clock.now().timestamp()).unwrap_or(0);
        let timestamp = issued_at.to_be_bytes();
        let tag = self.sign(salt, payload, &timestamp);

        let mut blob = Vec::with_capacity(payload.len() + TIMESTAMP_LEN + MAC_LEN);
        blob.extend_from_slice(payload);
        blob.extend_from_slice(&timestamp);
        blob.extend_from_slice(&tag);

        format!("{TOKEN_VERSION}.{}", URL_SAFE_NO_PAD.encode(blob))
    }

    /// Issues a token carrying a fresh random nonce.
    pub fn issue_nonce(&self, salt: &str) -> String {
        let nonce: [u8; NONCE_LEN] = rand::random();
        self.issue(&nonce, salt)
    }

    /// Verifies `token` against a single salt.
    ///
    /// The signature is checked first, then the age.
    pub fn verify(&self, token: &str, salt: &str, max_age: Duration) -> Result<Verified, VerifyError> {
        let raw = decode(token)?;
        self.verify_raw(&raw, salt, max_age, self.clock.now())
    }

    /// Verifies `token` against an ordered list of salts, current first.
    ///
    /// Returns the first success. When every salt fails, the error of the
    /// first attempt is returned so callers cannot tell which legacy salt
    /// came close.
    pub fn verify_with_rotation(
        &self,
        token: &str,
        salts: &[SaltCandidate<'_>],
        max_age: Duration,
    ) -> Result<Verified, VerifyError> {
        let raw = decode(token)?;
        let now = self.clock.now();

        let mut first_err = VerifyError::BadSignature;
        for (index, candidate) in salts.iter().enumerate() {
            if index > 0 && candidate.grace_deadline.is_some_and(|deadline| now > deadline) {
                continue;
            }
            match self.verify_raw(&raw, candidate.salt, max_age, now) {
                Ok(verified) => {
                    return Ok(Verified {
                        salt_index: index,
                        ..verified
                    });
                }
                Err(err) if index == 0 => first_err = err,
                Err(_) => {}
            }
        }

        Err(first_err)
    }

    /// Checks only the structure of `token`, without any key material.
    pub fn check_format(token: &str) -> Result<(), VerifyError> {
        decode(token).map(|_| ())
    }

    fn verify_raw(
        &self,
        raw: &RawToken,
        salt: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Verified, VerifyError> {
        let timestamp = raw.timestamp();
        let expected = self.sign(salt, raw.payload(), &timestamp);
        if expected.as_slice().ct_eq(raw.mac()).unwrap_u8() != 1 {
            return Err(VerifyError::BadSignature);
        }

        let secs = i64::try_from(u64::from_be_bytes(timestamp))
            .map_err(|_| VerifyError::Malformed)?;
        let issued_at = DateTime::from_timestamp(secs, 0).ok_or(VerifyError::Malformed)?;

        // Timestamps in the future count as age zero.
        if now.signed_duration_since(issued_at) > max_age {
            return Err(VerifyError::Expired);
        }

        Ok(Verified {
            payload: raw.payload().to_vec(),
            issued_at,
            salt_index: 0,
        })
    }

    fn sign(&self, salt: &str, payload: &[u8], timestamp: &[u8; TIMESTAMP_LEN]) -> [u8; MAC_LEN] {
        let mut mac = self.salted_mac(salt);
        mac.update(TOKEN_VERSION.as_bytes());
        mac.update(payload);
        mac.update(timestamp);

        let mut tag = [0u8; MAC_LEN];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        tag
    }

    fn salted_mac(&self, salt: &str) -> HmacSha256 {
        // HMAC accepts keys of any length, so construction cannot fail.
        let mut kdf = HmacSha256::new_from_slice(&self.secret).expect("HMAC key");
        kdf.update(KEY_CONTEXT);
        kdf.update(salt.as_bytes());
        let key = kdf.finalize().into_bytes();
        HmacSha256::new_from_slice(&key).expect("HMAC key")
    }
}

fn decode(token: &str) -> Result<RawToken, VerifyError> {
    let (version, body) = token.split_once('.').ok_or(VerifyError::Malformed)?;
    if version != TOKEN_VERSION {
        return Err(VerifyError::Malformed);
    }

    let blob = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| VerifyError::Malformed)?;
    if blob.len() < TIMESTAMP_LEN + MAC_LEN {
        return Err(VerifyError::Malformed);
    }

    Ok(RawToken { blob })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::csrf::derive_secret_from_string;
    use crate::time::fixed_clock::FixedClock;

    const SECRET: [u8; 32] = [42u8; 32];

    fn codec_at(secs: i64) -> (TokenCodec, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at_unix(secs));
        (TokenCodec::new(SECRET, clock.clone()), clock)
    }

    fn decode_blob(token: &str) -> Vec<u8> {
        let (_, body) = token.split_once('.').unwrap();
        URL_SAFE_NO_PAD.decode(body).unwrap()
    }

    fn encode_blob(blob: &[u8]) -> String {
        format!("{TOKEN_VERSION}.{}", URL_SAFE_NO_PAD.encode(blob))
    }

    #[test]
    fn issued_token_has_version_prefix_and_layout() {
        let (codec, _) = codec_at(1_700_000_000);
        let token = codec.issue(b"abc", "s1");

        assert!(token.starts_with("v1."));
        assert!(!token.contains('='), "no padding expected");

        let blob = decode_blob(&token);
        assert_eq!(blob.len(), 3 + TIMESTAMP_LEN + MAC_LEN);
        assert_eq!(&blob[..3], b"abc");
        assert_eq!(
            u64::from_be_bytes(blob[3..3 + TIMESTAMP_LEN].try_into().unwrap()),
            1_700_000_000
        );
    }

    #[test]
    fn roundtrip_returns_payload_and_issue_time() {
        let (codec, _) = codec_at(1_000);

        for payload in [&b""[..], b"x", b"a longer payload with spaces"] {
            let token = codec.issue(payload, "salt");
            let verified = codec
                .verify(&token, "salt", Duration::seconds(60))
                .unwrap();

            assert_eq!(verified.payload, payload);
            assert_eq!(verified.issued_at.timestamp(), 1_000);
            assert_eq!(verified.salt_index, 0);
        }
    }

    #[test]
    fn nonce_tokens_differ_and_verify() {
        let (codec, _) = codec_at(0);
        let a = codec.issue_nonce("s");
        let b = codec.issue_nonce("s");

        assert_ne!(a, b);
        assert_eq!(
            codec.verify(&a, "s", Duration::seconds(1)).unwrap().payload.len(),
            NONCE_LEN
        );
    }

    #[test]
    fn scenario_expires_after_max_age() {
        let clock = Arc::new(FixedClock::at_unix(0));
        let codec = TokenCodec::new(derive_secret_from_string("k"), clock.clone());
        let token = codec.issue(b"", "s1");

        clock.advance(Duration::seconds(500));
        assert!(codec.verify(&token, "s1", Duration::seconds(600)).is_ok());

        clock.advance(Duration::seconds(100));
        assert!(
            codec.verify(&token, "s1", Duration::seconds(600)).is_ok(),
            "age equal to max_age is still valid"
        );

        clock.advance(Duration::seconds(100));
        assert_eq!(
            codec.verify(&token, "s1", Duration::seconds(600)),
            Err(VerifyError::Expired)
        );
    }

    #[test]
    fn token_from_the_future_is_accepted() {
        let (codec, clock) = codec_at(10_000);
        let token = codec.issue(b"p", "s");

        clock.set(DateTime::from_timestamp(9_000, 0).unwrap());
        assert!(codec.verify(&token, "s", Duration::seconds(1)).is_ok());
    }

    #[test]
    fn flipping_any_byte_is_detected_as_bad_signature() {
        let (codec, _) = codec_at(0);
        let token = codec.issue(b"payload", "s1");
        let blob = decode_blob(&token);

        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert_eq!(
                codec.verify(&encode_blob(&tampered), "s1", Duration::days(1)),
                Err(VerifyError::BadSignature),
                "byte {i} flip must be rejected"
            );
        }
    }

    // Flips in the "v1." prefix, or ones that leave the base64 alphabet or
    // its canonical trailing bits, are Malformed. Every other flip changes
    // the decoded blob and is a BadSignature.
    #[test]
    fn flipping_any_character_of_the_token_is_rejected() {
        let (codec, _) = codec_at(0);
        let token = codec.issue_nonce("s1");
        let prefix_len = TOKEN_VERSION.len() + 1;
        let mut bad_signatures = 0;

        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();

            let expected = if i >= prefix_len
                && URL_SAFE_NO_PAD.decode(&tampered[prefix_len..]).is_ok()
            {
                bad_signatures += 1;
                VerifyError::BadSignature
            } else {
                VerifyError::Malformed
            };

            assert_eq!(
                codec.verify(&tampered, "s1", Duration::days(1)),
                Err(expected),
                "character {i} flip"
            );
        }

        assert!(bad_signatures > 0);
    }

    #[test]
    fn wrong_salt_or_secret_is_bad_signature() {
        let (codec, clock) = codec_at(0);
        let token = codec.issue(b"p", "s1");

        assert_eq!(
            codec.verify(&token, "s2", Duration::days(1)),
            Err(VerifyError::BadSignature)
        );

        let other = TokenCodec::new([1u8; 32], clock);
        assert_eq!(
            other.verify(&token, "s1", Duration::days(1)),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn bad_signature_is_reported_before_expiry() {
        let (codec, clock) = codec_at(0);
        let token = codec.issue(b"p", "s1");
        clock.advance(Duration::days(30));

        assert_eq!(
            codec.verify(&token, "other", Duration::seconds(1)),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn malformed_inputs_never_panic() {
        let (codec, _) = codec_at(0);
        let short = encode_blob(&[0u8; TIMESTAMP_LEN + MAC_LEN - 1]);

        for input in [
            "",
            "v1",
            "v1.",
            "v2.AAAA",
            "no-dot-at-all",
            "v1.**not base64**",
            "v1.abc.def",
            short.as_str(),
        ] {
            assert_eq!(
                codec.verify(input, "s", Duration::days(1)),
                Err(VerifyError::Malformed),
                "input {input:?}"
            );
            assert_eq!(TokenCodec::check_format(input), Err(VerifyError::Malformed));
        }
    }

    #[test]
    fn minimal_length_blob_is_well_formed_but_unsigned() {
        let (codec, _) = codec_at(0);
        let blob = encode_blob(&[0u8; TIMESTAMP_LEN + MAC_LEN]);

        assert_eq!(TokenCodec::check_format(&blob), Ok(()));
        assert_eq!(
            codec.verify(&blob, "s", Duration::days(1)),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn rotation_accepts_previous_salt_within_grace() {
        let (codec, clock) = codec_at(0);
        let token = codec.issue(b"p", "old");
        let salts = [
            SaltCandidate::current("new"),
            SaltCandidate::until("old", DateTime::from_timestamp(100, 0).unwrap()),
        ];

        clock.set(DateTime::from_timestamp(100, 0).unwrap());
        let verified = codec
            .verify_with_rotation(&token, &salts, Duration::days(1))
            .unwrap();
        assert_eq!(verified.salt_index, 1);
        assert_eq!(verified.payload, b"p");

        clock.set(DateTime::from_timestamp(101, 0).unwrap());
        assert_eq!(
            codec.verify_with_rotation(&token, &salts, Duration::days(1)),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn rotation_prefers_current_salt() {
        let (codec, _) = codec_at(0);
        let token = codec.issue(b"p", "new");
        let salts = [
            SaltCandidate::current("new"),
            SaltCandidate::until("old", DateTime::from_timestamp(100, 0).unwrap()),
        ];

        let verified = codec
            .verify_with_rotation(&token, &salts, Duration::days(1))
            .unwrap();
        assert_eq!(verified.salt_index, 0);
    }

    #[test]
    fn rotation_reports_first_salt_error() {
        let (codec, clock) = codec_at(0);
        let expired_current = codec.issue(b"p", "new");
        let salts = [
            SaltCandidate::current("new"),
            SaltCandidate::until("old", DateTime::from_timestamp(1_000_000, 0).unwrap()),
        ];

        clock.advance(Duration::seconds(10));
        assert_eq!(
            codec.verify_with_rotation(&expired_current, &salts, Duration::seconds(5)),
            Err(VerifyError::Expired)
        );

        // Expired under the legacy salt still surfaces the current-salt error.
        let expired_legacy = {
            clock.set(DateTime::from_timestamp(0, 0).unwrap());
            let t = codec.issue(b"p", "old");
            clock.advance(Duration::seconds(10));
            t
        };
        assert_eq!(
            codec.verify_with_rotation(&expired_legacy, &salts, Duration::seconds(5)),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn rotation_first_salt_ignores_its_deadline() {
        let (codec, clock) = codec_at(0);
        let token = codec.issue(b"p", "s");
        let salts = [SaltCandidate::until("s", DateTime::from_timestamp(1, 0).unwrap())];

        clock.advance(Duration::seconds(50));
        assert!(codec
            .verify_with_rotation(&token, &salts, Duration::seconds(60))
            .is_ok());
    }

    #[test]
    fn rotation_with_malformed_token_is_malformed() {
        let (codec, _) = codec_at(0);
        assert_eq!(
            codec.verify_with_rotation("garbage", &[SaltCandidate::current("s")], Duration::days(1)),
            Err(VerifyError::Malformed)
        );
    }
}
