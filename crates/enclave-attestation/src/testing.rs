//! Software attestor for tests.
//!
//! Builds SEV-SNP shaped reports, signs them with an in-process P-384 key and
//! runs them through the real verifier. Reports are therefore `verified`
//! exactly as a hardware report would be, without any hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use p384::ecdsa::signature::Signer;
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use parking_lot::Mutex;

use crate::error::AttestationError;
use crate::provider::AttestationProvider;
use crate::report::{
    build_raw_report, embed_signature, AttestationReport, SnpReport, TcbVersion,
    MEASUREMENT_LENGTH, SIGNATURE_LENGTH, SIGNED_LENGTH,
};
use crate::verify::verify_report;

const DEFAULT_SEED: [u8; 48] = [0x5A; 48];

pub const TEST_TCB: TcbVersion = TcbVersion {
    boot_loader: 3,
    tee: 0,
    snp: 8,
    microcode: 115,
};

pub struct SoftwareAttestor {
    key: SigningKey,
    measurement: Mutex<[u8; MEASUREMENT_LENGTH]>,
    report_version: u32,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl SoftwareAttestor {
    pub fn new(measurement: [u8; MEASUREMENT_LENGTH]) -> Self {
        let key = SigningKey::from_slice(&DEFAULT_SEED).expect("seed is a valid P-384 scalar");
        Self::with_key(key, measurement)
    }

    pub fn with_key(key: SigningKey, measurement: [u8; MEASUREMENT_LENGTH]) -> Self {
        Self {
            key,
            measurement: Mutex::new(measurement),
            report_version: 2,
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Report format version, which doubles as the platform version.
    pub fn with_report_version(mut self, version: u32) -> Self {
        self.report_version = version;
        self
    }

    /// Simulate deploying a different binary.
    pub fn set_measurement(&self, measurement: [u8; MEASUREMENT_LENGTH]) {
        *self.measurement.lock() = measurement;
    }

    /// Toggle whether reports can be produced at all.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of report requests served so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }

    /// Raw signed report bytes for the current measurement.
    pub fn raw_report(&self) -> Vec<u8> {
        let measurement = *self.measurement.lock();
        let mut bytes = build_raw_report(
            self.report_version,
            &measurement,
            &[0u8; 64],
            TEST_TCB,
            &[0x42; 64],
        );
        let signature: Signature = self.key.sign(&bytes[..SIGNED_LENGTH]);
        let mut sig = [0u8; SIGNATURE_LENGTH];
        sig.copy_from_slice(&signature.to_bytes());
        embed_signature(&mut bytes, &sig);
        bytes
    }
}

#[async_trait]
impl AttestationProvider for SoftwareAttestor {
    async fn get_attestation_report(&self) -> Result<AttestationReport, AttestationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(AttestationError::Unavailable(
                "software attestor disabled".to_string(),
            ));
        }
        let report = SnpReport::parse(&self.raw_report())?;
        verify_report(&report, self.key.verifying_key())
    }
}
