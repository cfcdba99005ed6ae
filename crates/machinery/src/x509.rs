//! Leaf certificates issued by the CAs of the machine config.

use std::net::IpAddr;
use std::time::Duration;

use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType, PKCS_ECDSA_P256_SHA256,
};

use crate::constants;
use crate::resources::secrets::CertAndKey;

/// Errors issuing a certificate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The CA or the new certificate could not be handled.
    #[error("certificate error: {0}")]
    Certificate(#[from] rcgen::RcgenError),
    /// The CA has no certificate or no key.
    #[error("issuing CA is missing")]
    MissingCa,
    /// The lifetime doesn't fit a timestamp.
    #[error("invalid certificate lifetime {0:?}")]
    Lifetime(Duration),
}

/// Subject and usage of a certificate to issue.
#[derive(Clone, Debug, Default)]
pub struct Profile<'a> {
    /// Subject CN.
    pub common_name: &'a str,
    /// Subject O, omitted when empty.
    pub organization: &'a str,
    /// DNS names and IP addresses, IPs are recognised by parsing.
    pub sans: &'a [String],
    /// Adds the `serverAuth` extended key usage.
    pub server: bool,
    /// Adds the `clientAuth` extended key usage.
    pub client: bool,
    /// Validity from now.
    pub lifetime: Duration,
}

/// Mints a client certificate for `CN=common_name, O=organization`, signed
/// by `ca`.
pub fn client_certificate(
    ca: &CertAndKey,
    common_name: &str,
    organization: &str,
    lifetime: Duration,
) -> Result<CertAndKey, Error> {
    issue(
        ca,
        &Profile {
            common_name,
            organization,
            client: true,
            lifetime,
            ..Profile::default()
        },
    )
}

/// Mints a server certificate valid for `sans`, signed by `ca`.
pub fn server_certificate(
    ca: &CertAndKey,
    common_name: &str,
    sans: &[String],
    lifetime: Duration,
) -> Result<CertAndKey, Error> {
    issue(
        ca,
        &Profile {
            common_name,
            sans,
            server: true,
            lifetime,
            ..Profile::default()
        },
    )
}

/// Issues an ECDSA P-256 certificate for `profile`.
///
/// The certificate is backdated by [`constants::CERTIFICATE_SKEW`] so that
/// peers with a slightly late clock accept it right away.
pub fn issue(ca: &CertAndKey, profile: &Profile<'_>) -> Result<CertAndKey, Error> {
    if ca.is_empty() {
        return Err(Error::MissingCa);
    }
    let ca_key = KeyPair::from_pem(&ca.key)?;
    let issuer = Certificate::from_params(CertificateParams::from_ca_cert_pem(&ca.crt, ca_key)?)?;

    let lifetime = chrono::Duration::from_std(profile.lifetime).map_err(|_| Error::Lifetime(profile.lifetime))?;
    let skew =
        chrono::Duration::from_std(constants::CERTIFICATE_SKEW).map_err(|_| Error::Lifetime(profile.lifetime))?;
    let now = chrono::Utc::now();

    let mut params = CertificateParams::default();
    params.not_before = now - skew;
    params.not_after = now + lifetime;

    let mut distinguished_name = DistinguishedName::new();
    if !profile.organization.is_empty() {
        distinguished_name.push(DnType::OrganizationName, profile.organization);
    }
    distinguished_name.push(DnType::CommonName, profile.common_name);
    params.distinguished_name = distinguished_name;

    params.subject_alt_names = profile
        .sans
        .iter()
        .map(|san| match san.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(san.clone()),
        })
        .collect();

    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
    if profile.server {
        params.extended_key_usages.push(ExtendedKeyUsagePurpose::ServerAuth);
    }
    if profile.client {
        params.extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth);
    }
    params.key_pair.replace(KeyPair::generate(&PKCS_ECDSA_P256_SHA256)?);
    params.alg = &PKCS_ECDSA_P256_SHA256;

    let cert = Certificate::from_params(params)?;
    Ok(CertAndKey {
        crt: cert.serialize_pem_with_signer(&issuer)?,
        key: cert.serialize_private_key_pem(),
    })
}
