//! ECDSA P-384 / SHA-384 verification of SEV-SNP reports.

use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, VerifyingKey};
use x509_cert::Certificate;

use crate::error::AttestationError;
use crate::report::{AttestationReport, SnpReport};

/// Verify a parsed report against the chip's VCEK public key.
///
/// This is the only constructor of a verified [`AttestationReport`].
pub fn verify_report(
    report: &SnpReport,
    vcek: &VerifyingKey,
) -> Result<AttestationReport, AttestationError> {
    let signature =
        Signature::from_slice(&report.signature).map_err(|_| AttestationError::SignatureInvalid)?;
    vcek.verify(report.signed_body(), &signature)
        .map_err(|_| AttestationError::SignatureInvalid)?;
    Ok(AttestationReport::new(report, true))
}

/// Extract the P-384 public key from a VCEK certificate.
///
/// Says nothing about who issued the certificate; callers establish that
/// through [`crate::chain::verify_vcek_chain`].
pub(crate) fn vcek_public_key(certificate: &Certificate) -> Result<VerifyingKey, AttestationError> {
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    let point = spki.subject_public_key.as_bytes().ok_or_else(|| {
        AttestationError::InvalidVcek("public key bit string is not octet aligned".to_string())
    })?;
    VerifyingKey::from_sec1_bytes(point)
        .map_err(|e| AttestationError::InvalidVcek(format!("not a P-384 key: {e}")))
}
