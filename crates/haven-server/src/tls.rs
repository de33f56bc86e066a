//! Self-signed TLS identity for the receive server
//!
//! RSA-2048, one year validity, digitalSignature|keyEncipherment, EKU
//! serverAuth, with the host's local IPs as subject-alternative-name
//! entries. A fresh identity is minted at every server start.

use std::net::IpAddr;

use haven_core::{HavenError, HavenResult};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

const RSA_BITS: usize = 2048;
const VALIDITY_DAYS: i64 = 365;

/// A serving certificate with its private key and display fingerprint.
pub struct TlsIdentity {
    /// DER-encoded certificate
    pub cert_der: Vec<u8>,
    /// PKCS#8 DER-encoded private key
    pub key_der: Vec<u8>,
    /// SHA-256 of the certificate DER, lowercase hex
    pub fingerprint: String,
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("fingerprint", &self.fingerprint)
            .field("key_der", &"[REDACTED]")
            .finish()
    }
}

fn tls_err(context: &str, err: impl std::fmt::Display) -> HavenError {
    HavenError::Tls(format!("{context}: {err}"))
}

/// Mint a fresh self-signed identity for the given addresses.
pub fn generate_identity(
    common_name: &str,
    organization: &str,
    ip_addresses: &[IpAddr],
) -> HavenResult<TlsIdentity> {
    // rcgen cannot generate RSA keys itself; mint one and hand it over
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_BITS)
        .map_err(|err| tls_err("rsa key generation", err))?;
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| tls_err("pkcs8 encoding", err))?;
    let key_pair = KeyPair::from_pem_and_sign_algo(key_pem.as_str(), &PKCS_RSA_SHA256)
        .map_err(|err| tls_err("loading key pair", err))?;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, common_name);
    distinguished_name.push(DnType::OrganizationName, organization);

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name;
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = params.not_before + Duration::days(VALIDITY_DAYS);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.subject_alt_names = ip_addresses
        .iter()
        .map(|ip| SanType::IpAddress(*ip))
        .collect();

    let certificate = params
        .self_signed(&key_pair)
        .map_err(|err| tls_err("certificate signing", err))?;

    let cert_der = certificate.der().to_vec();
    let fingerprint = hex::encode(Sha256::digest(&cert_der));

    Ok(TlsIdentity {
        cert_der,
        key_der: key_pair.serialize_der(),
        fingerprint,
    })
}
