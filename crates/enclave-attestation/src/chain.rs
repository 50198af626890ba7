//! AMD certificate chain: ARK (root) signs ASK (intermediate) signs VCEK.
//!
//! The ARK is provisioned by the operator and pinned. ASK and VCEK
//! certificates come from the key distribution service or the local cache and
//! are trusted only once their signatures chain back to the pinned ARK.
//!
//! AMD signs the chain with RSASSA-PSS over SHA-384. ECDSA P-384 / SHA-384
//! links are accepted as well.

use std::path::Path;

use p384::ecdsa::signature::Verifier;
use p384::ecdsa::VerifyingKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::signature::Verifier as _;
use sha2::Sha384;
use x509_cert::der::{Decode, Encode};
use x509_cert::spki::ObjectIdentifier;
use x509_cert::Certificate;

use crate::error::AttestationError;

const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const RSASSA_PSS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.10");

/// The operator-provisioned AMD Root Key certificate for one product line.
#[derive(Debug, Clone)]
pub struct PinnedArk {
    certificate: Certificate,
}

impl PinnedArk {
    /// Parse a PEM or DER ARK certificate. It must be self-signed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AttestationError> {
        let certificate = parse_certificates(bytes)
            .map_err(|e| AttestationError::TrustAnchor(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| AttestationError::TrustAnchor("no certificate found".to_string()))?;
        verify_issued_by(&certificate, &certificate)
            .map_err(|e| AttestationError::TrustAnchor(format!("ARK is not self-signed: {e}")))?;
        Ok(Self { certificate })
    }

    pub fn load(path: &Path) -> Result<Self, AttestationError> {
        let bytes = std::fs::read(path).map_err(|e| {
            AttestationError::TrustAnchor(format!("cannot read ARK {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Check that `ask` was signed by this ARK.
    pub fn verify_ask(&self, ask: &Certificate) -> Result<(), AttestationError> {
        verify_issued_by(ask, &self.certificate)
    }
}

/// Verify `ask` against the pinned ARK and `vcek_der` against `ask`, then
/// return the VCEK public key.
pub fn verify_vcek_chain(
    ark: &PinnedArk,
    ask: &Certificate,
    vcek_der: &[u8],
) -> Result<VerifyingKey, AttestationError> {
    ark.verify_ask(ask)?;
    let vcek = Certificate::from_der(vcek_der)
        .map_err(|e| AttestationError::InvalidVcek(format!("failed to parse certificate: {e}")))?;
    verify_issued_by(&vcek, ask)?;
    crate::verify::vcek_public_key(&vcek)
}

/// One certificate (DER) or a concatenated PEM bundle.
pub(crate) fn parse_certificates(bytes: &[u8]) -> Result<Vec<Certificate>, AttestationError> {
    let is_pem = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'-');
    let parsed = if is_pem {
        Certificate::load_pem_chain(bytes)
    } else {
        Certificate::from_der(bytes).map(|c| vec![c])
    };
    parsed.map_err(|e| AttestationError::InvalidVcek(format!("failed to parse certificate: {e}")))
}

fn untrusted(reason: impl Into<String>) -> AttestationError {
    AttestationError::UntrustedVcek(reason.into())
}

fn verify_issued_by(child: &Certificate, issuer: &Certificate) -> Result<(), AttestationError> {
    if child.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Err(untrusted("issuer name does not match signing certificate"));
    }
    let message = child
        .tbs_certificate
        .to_der()
        .map_err(|e| untrusted(format!("cannot encode certificate body: {e}")))?;
    let signature = child
        .signature
        .as_bytes()
        .ok_or_else(|| untrusted("signature is not octet aligned"))?;
    let issuer_key = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| untrusted("issuer key is not octet aligned"))?;

    let algorithm = child.signature_algorithm.oid;
    if algorithm == ECDSA_WITH_SHA384 {
        let key = VerifyingKey::from_sec1_bytes(issuer_key)
            .map_err(|e| untrusted(format!("issuer key is not P-384: {e}")))?;
        let signature = p384::ecdsa::Signature::from_der(signature)
            .map_err(|e| untrusted(format!("malformed ECDSA signature: {e}")))?;
        key.verify(&message, &signature)
            .map_err(|_| untrusted("ECDSA signature mismatch"))
    } else if algorithm == RSASSA_PSS {
        let key = rsa::RsaPublicKey::from_pkcs1_der(issuer_key)
            .map_err(|e| untrusted(format!("issuer key is not RSA: {e}")))?;
        let signature = rsa::pss::Signature::try_from(signature)
            .map_err(|e| untrusted(format!("malformed RSA-PSS signature: {e}")))?;
        rsa::pss::VerifyingKey::<Sha384>::new(key)
            .verify(&message, &signature)
            .map_err(|_| untrusted("RSA-PSS signature mismatch"))
    } else {
        Err(untrusted(format!("unsupported signature algorithm {algorithm}")))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
        PKCS_ECDSA_P384_SHA384,
    };

    use super::*;

    fn params(common_name: &str, ca: bool) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        params
    }

    /// ARK and ASK generated in process, P-384 throughout.
    pub(crate) struct TestChain {
        pub ark_pem: String,
        ask: rcgen::Certificate,
        ask_key: KeyPair,
    }

    impl TestChain {
        pub(crate) fn new() -> Self {
            let ark_key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap();
            let ark = params("ARK-Milan", true).self_signed(&ark_key).unwrap();
            let ask_key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap();
            let ask = params("SEV-Milan", true)
                .signed_by(&ask_key, &ark, &ark_key)
                .unwrap();
            Self {
                ark_pem: ark.pem(),
                ask,
                ask_key,
            }
        }

        pub(crate) fn ark(&self) -> PinnedArk {
            PinnedArk::from_bytes(self.ark_pem.as_bytes()).unwrap()
        }

        pub(crate) fn ask(&self) -> Certificate {
            Certificate::from_der(self.ask.der()).unwrap()
        }

        /// The bundle served at `cert_chain`: ASK first, then ARK.
        pub(crate) fn cert_chain_pem(&self) -> String {
            format!("{}{}", self.ask.pem(), self.ark_pem)
        }

        /// VCEK for `key`, signed by the ASK. DER encoded.
        pub(crate) fn issue_vcek(&self, key: &KeyPair) -> Vec<u8> {
            params("SEV-VCEK", false)
                .signed_by(key, &self.ask, &self.ask_key)
                .unwrap()
                .der()
                .to_vec()
        }
    }

    /// A VCEK-shaped certificate that signs itself.
    pub(crate) fn self_signed_vcek(key: &KeyPair) -> Vec<u8> {
        params("SEV-VCEK", false)
            .self_signed(key)
            .unwrap()
            .der()
            .to_vec()
    }

    pub(crate) fn p384_key() -> KeyPair {
        KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn issued_vcek_verifies() {
        let chain = TestChain::new();
        let key = p384_key();
        let vcek = chain.issue_vcek(&key);
        let public = verify_vcek_chain(&chain.ark(), &chain.ask(), &vcek).unwrap();
        assert_eq!(public.to_encoded_point(false).as_bytes(), key.public_key_raw());
    }

    #[test]
    fn self_signed_vcek_rejected() {
        let chain = TestChain::new();
        let vcek = self_signed_vcek(&p384_key());
        assert!(matches!(
            verify_vcek_chain(&chain.ark(), &chain.ask(), &vcek),
            Err(AttestationError::UntrustedVcek(_))
        ));
    }

    #[test]
    fn vcek_from_foreign_ask_rejected() {
        let chain = TestChain::new();
        let other = TestChain::new();
        let vcek = other.issue_vcek(&p384_key());
        assert!(matches!(
            verify_vcek_chain(&chain.ark(), &chain.ask(), &vcek),
            Err(AttestationError::UntrustedVcek(_))
        ));
    }

    #[test]
    fn ask_under_other_root_rejected() {
        let chain = TestChain::new();
        let other = TestChain::new();
        assert!(matches!(
            chain.ark().verify_ask(&other.ask()),
            Err(AttestationError::UntrustedVcek(_))
        ));
    }

    #[test]
    fn garbage_vcek_rejected() {
        let chain = TestChain::new();
        assert!(matches!(
            verify_vcek_chain(&chain.ark(), &chain.ask(), b"not a certificate"),
            Err(AttestationError::InvalidVcek(_))
        ));
    }

    #[test]
    fn chain_bundle_parses_in_order() {
        let chain = TestChain::new();
        let certs = parse_certificates(chain.cert_chain_pem().as_bytes()).unwrap();
        assert_eq!(certs.len(), 2);
        assert_eq!(certs[0], chain.ask());
    }

    #[test]
    fn ark_must_be_self_signed() {
        let chain = TestChain::new();
        let ask_pem = chain.cert_chain_pem();
        // First certificate of the bundle is the ASK, which the ARK signed
        assert!(matches!(
            PinnedArk::from_bytes(ask_pem.as_bytes()),
            Err(AttestationError::TrustAnchor(_))
        ));
        assert!(matches!(
            PinnedArk::load(Path::new("/nonexistent/ark.pem")),
            Err(AttestationError::TrustAnchor(_))
        ));
    }
}
