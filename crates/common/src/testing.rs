//! Test fixtures shared across Skiff crates.
//!
//! Only compiled for `cfg(test)` or with the `test-utils` feature.

use crate::config::ServiceCredential;
use crate::secret::SecretString;

/// A 2048-bit RSA private key in PKCS#8 PEM form.
///
/// Never use outside of tests.
pub const TEST_RSA_PRIVATE_KEY_PEM: &str = include_str!("../testdata/rsa_test_key.pem");

/// Issuer identity paired with [`TEST_RSA_PRIVATE_KEY_PEM`].
pub const TEST_ISSUER: &str = "uploader@skiff-test.iam.gserviceaccount.com";

/// Build a [`ServiceCredential`] from the fixture key.
#[must_use]
pub fn test_credential() -> ServiceCredential {
    ServiceCredential::new(
        TEST_ISSUER.to_string(),
        SecretString::from(TEST_RSA_PRIVATE_KEY_PEM),
    )
}

/// DER-encoded `RSAPublicKey` for the fixture key, for signature verification.
///
/// Returns `None` if the fixture cannot be parsed (which would indicate a
/// corrupted testdata file).
#[must_use]
pub fn test_public_key_der() -> Option<Vec<u8>> {
    use ring::signature::{KeyPair, RsaKeyPair};

    let der = crate::jwt::decode_pkcs8_pem(TEST_RSA_PRIVATE_KEY_PEM).ok()?;
    let key_pair = RsaKeyPair::from_pkcs8(&der).ok()?;
    Some(key_pair.public_key().as_ref().to_vec())
}
