//! Master key derivation from attestation reports.

use enclave_attestation::AttestationReport;
use enclave_crypto::{derive_master_key_from_measurement, MasterKey};

use crate::error::{KeyError, Result};

/// Derive the master key for the code a report attests to.
///
/// Only verified reports are accepted: an unverified measurement is just a
/// claim and must never become key material.
pub fn derive_master_key(report: &AttestationReport) -> Result<MasterKey> {
    if !report.is_verified() {
        return Err(KeyError::UnverifiedReport);
    }
    let measurement = report.measurement_bytes();
    Ok(derive_master_key_from_measurement(
        &measurement,
        report.platform_version(),
    )?)
}
