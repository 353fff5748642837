//! Client identity and server trust anchor loading
//!
//! Both are read once per run, fully validated, and then only read. A key
//! that does not belong to its certificate is caught here, before any
//! network traffic, by signing a probe with the key and verifying it against
//! the certificate's public key.

use crate::error::{CredentialError, CredentialKind};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, SignatureScheme};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Signed during the key/certificate match check
const KEY_PROBE: &[u8] = b"secure-publisher key possession probe";

/// Schemes offered to the private key when producing the probe signature
const PROBE_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PKCS1_SHA256,
];

/// ASN.1 SEQUENCE tag, the first byte of any DER certificate or key
const DER_SEQUENCE: u8 = 0x30;

/// Client certificate chain plus the private key for its leaf
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Identity {
    /// Read a certificate (PEM or DER) and its private key (PEM PKCS#8,
    /// PKCS#1 or SEC1, or DER PKCS#8) and check that they belong together
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CredentialError> {
        let cert_bytes = read_file(cert_path, CredentialKind::Certificate)?;
        let cert_chain = parse_certificates(&cert_bytes, cert_path, CredentialKind::Certificate)?;
        if cert_chain.is_empty() {
            return Err(CredentialError::Missing {
                kind: CredentialKind::Certificate,
                path: cert_path.to_path_buf(),
            });
        }

        let key_bytes = read_file(key_path, CredentialKind::PrivateKey)?;
        let key = parse_private_key(&key_bytes, key_path)?;

        if !key_matches_certificate(&cert_chain[0], &key, cert_path, key_path)? {
            return Err(CredentialError::KeyMismatch {
                cert_path: cert_path.to_path_buf(),
                key_path: key_path.to_path_buf(),
            });
        }

        info!(
            certificate = %cert_path.display(),
            chain_length = cert_chain.len(),
            "Loaded client identity"
        );
        Ok(Self { cert_chain, key })
    }

    /// Leaf first, then any intermediates
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.cert_chain[0]
    }

    pub(crate) fn clone_key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("chain_length", &self.cert_chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// CA certificates used to validate the broker's chain
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    roots: RootCertStore,
}

impl TrustAnchor {
    /// Read a CA bundle. Entries that do not parse as trust anchors are
    /// skipped; the bundle must yield at least one.
    pub fn load(ca_path: &Path) -> Result<Self, CredentialError> {
        let bytes = read_file(ca_path, CredentialKind::CaBundle)?;
        let certs = parse_certificates(&bytes, ca_path, CredentialKind::CaBundle)?;

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            warn!(
                bundle = %ca_path.display(),
                ignored,
                "Skipped CA bundle entries that are not valid certificates"
            );
        }
        if added == 0 {
            return Err(CredentialError::Missing {
                kind: CredentialKind::CaBundle,
                path: ca_path.to_path_buf(),
            });
        }

        info!(bundle = %ca_path.display(), certificates = added, "Loaded trust anchor");
        Ok(Self { roots })
    }

    /// Number of usable CA certificates
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn root_store(&self) -> &RootCertStore {
        &self.roots
    }
}

/// Load the client certificate/key pair
pub fn load_identity(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Identity, CredentialError> {
    Identity::load(cert_path.as_ref(), key_path.as_ref())
}

/// Load the CA bundle the broker's certificate must chain to
pub fn load_trust_anchor(ca_path: impl AsRef<Path>) -> Result<TrustAnchor, CredentialError> {
    TrustAnchor::load(ca_path.as_ref())
}

fn read_file(path: &Path, kind: CredentialKind) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|source| CredentialError::Unreadable {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

/// PEM `CERTIFICATE` sections, or the whole file as one DER certificate
fn parse_certificates(
    bytes: &[u8],
    path: &Path,
    kind: CredentialKind,
) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let mut certs = Vec::new();
    for item in rustls_pemfile::certs(&mut &bytes[..]) {
        match item {
            Ok(cert) => certs.push(cert),
            // A corrupt PEM section in a CA bundle is skipped like any
            // other unusable entry; a client certificate must be intact.
            Err(e) if kind == CredentialKind::CaBundle => {
                debug!(bundle = %path.display(), error = %e, "Skipping unreadable PEM section");
            }
            Err(e) => return Err(malformed(kind, path, e.to_string())),
        }
    }

    if certs.is_empty() && bytes.first() == Some(&DER_SEQUENCE) {
        certs.push(CertificateDer::from(bytes.to_vec()));
    }

    if kind == CredentialKind::Certificate {
        if let Some(leaf) = certs.first() {
            webpki::EndEntityCert::try_from(leaf)
                .map_err(|e| malformed(kind, path, format!("{e:?}")))?;
        }
    }

    Ok(certs)
}

fn parse_private_key(bytes: &[u8], path: &Path) -> Result<PrivateKeyDer<'static>, CredentialError> {
    match rustls_pemfile::private_key(&mut &bytes[..]) {
        Ok(Some(key)) => Ok(key),
        Ok(None) if bytes.first() == Some(&DER_SEQUENCE) => {
            Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(bytes.to_vec())))
        }
        Ok(None) => Err(CredentialError::Missing {
            kind: CredentialKind::PrivateKey,
            path: path.to_path_buf(),
        }),
        Err(e) => Err(malformed(CredentialKind::PrivateKey, path, e.to_string())),
    }
}

fn key_matches_certificate(
    leaf: &CertificateDer<'_>,
    key: &PrivateKeyDer<'_>,
    cert_path: &Path,
    key_path: &Path,
) -> Result<bool, CredentialError> {
    let signing_key = rustls::crypto::ring::sign::any_supported_type(key).map_err(|e| {
        malformed(
            CredentialKind::PrivateKey,
            key_path,
            format!("unsupported key: {e}"),
        )
    })?;

    let Some(signer) = signing_key.choose_scheme(PROBE_SCHEMES) else {
        return Err(malformed(
            CredentialKind::PrivateKey,
            key_path,
            format!("no usable signature scheme for {:?} key", signing_key.algorithm()),
        ));
    };
    let signature = signer.sign(KEY_PROBE).map_err(|e| {
        malformed(
            CredentialKind::PrivateKey,
            key_path,
            format!("signing failed: {e}"),
        )
    })?;

    let certificate = webpki::EndEntityCert::try_from(leaf)
        .map_err(|e| malformed(CredentialKind::Certificate, cert_path, format!("{e:?}")))?;

    let scheme = signer.scheme();
    let algorithms = rustls::crypto::ring::default_provider().signature_verification_algorithms;
    let matched = algorithms
        .mapping
        .iter()
        .filter(|(candidate, _)| *candidate == scheme)
        .flat_map(|(_, verifiers)| verifiers.iter())
        .any(|alg| certificate.verify_signature(*alg, KEY_PROBE, &signature).is_ok());

    debug!(?scheme, matched, "Checked private key against certificate");
    Ok(matched)
}

fn malformed(kind: CredentialKind, path: &Path, reason: String) -> CredentialError {
    CredentialError::Malformed {
        kind,
        path: PathBuf::from(path),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn test_identity_debug_redacts_key() {
        let identity = Identity::load(&fixture("client.pem"), &fixture("client.key")).unwrap();
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("chain_length: 1"));
    }

    #[test]
    fn test_der_certificate_is_accepted() {
        let identity = Identity::load(&fixture("client.der"), &fixture("client.key")).unwrap();
        assert_eq!(identity.cert_chain().len(), 1);
    }

    #[test]
    fn test_parse_certificates_empty_input() {
        let certs =
            parse_certificates(b"", Path::new("empty"), CredentialKind::CaBundle).unwrap();
        assert!(certs.is_empty());
    }

    #[test]
    fn test_private_key_missing_from_text_file() {
        let result = parse_private_key(b"hello", Path::new("key.pem"));
        assert!(matches!(
            result,
            Err(CredentialError::Missing {
                kind: CredentialKind::PrivateKey,
                ..
            })
        ));
    }
}
