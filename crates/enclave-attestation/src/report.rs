//! SEV-SNP attestation report parsing.
//!
//! Report layout (AMD SEV-SNP ABI, 0x4A0 bytes, little-endian):
//!
//! ```text
//! Offset  Size  Field
//! 0x000   4     version
//! 0x034   4     signature_algo (1 = ECDSA P-384 with SHA-384)
//! 0x050   64    report_data
//! 0x090   48    measurement
//! 0x180   8     reported_tcb (bl, tee, _, _, _, _, snp, ucode)
//! 0x1A0   64    chip_id
//! 0x2A0   72    signature r (little-endian, zero-padded)
//! 0x2E8   72    signature s (little-endian, zero-padded)
//! ```
//!
//! The signature covers bytes `0x000..0x2A0`.

use serde::Serialize;

use crate::error::AttestationError;

pub const REPORT_LENGTH: usize = 0x4A0;
pub const SIGNED_LENGTH: usize = 0x2A0;
pub const MEASUREMENT_LENGTH: usize = 48;
pub const CHIP_ID_LENGTH: usize = 64;
pub const REPORT_DATA_LENGTH: usize = 64;
pub const SIGNATURE_LENGTH: usize = 96;

pub(crate) const SIG_ALGO_ECDSA_P384_SHA384: u32 = 1;

const OFFSET_VERSION: usize = 0x000;
const OFFSET_SIG_ALGO: usize = 0x034;
const OFFSET_REPORT_DATA: usize = 0x050;
const OFFSET_MEASUREMENT: usize = 0x090;
const OFFSET_REPORTED_TCB: usize = 0x180;
const OFFSET_CHIP_ID: usize = 0x1A0;
const OFFSET_SIG_R: usize = 0x2A0;
const OFFSET_SIG_S: usize = 0x2E8;
const SIG_COMPONENT_LENGTH: usize = 72;
const SCALAR_LENGTH: usize = 48;

/// Security patch levels of the firmware components, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcbVersion {
    pub boot_loader: u8,
    pub tee: u8,
    pub snp: u8,
    pub microcode: u8,
}

impl TcbVersion {
    fn from_raw(raw: [u8; 8]) -> Self {
        Self {
            boot_loader: raw[0],
            tee: raw[1],
            snp: raw[6],
            microcode: raw[7],
        }
    }

    pub(crate) fn to_raw(self) -> [u8; 8] {
        [self.boot_loader, self.tee, 0, 0, 0, 0, self.snp, self.microcode]
    }
}

/// A parsed, not yet verified, SEV-SNP report.
///
/// Every field is untrusted until the signature has been checked against the
/// chip's VCEK.
#[derive(Debug, Clone)]
pub struct SnpReport {
    pub version: u32,
    pub signature_algo: u32,
    pub report_data: [u8; REPORT_DATA_LENGTH],
    pub measurement: [u8; MEASUREMENT_LENGTH],
    pub reported_tcb: TcbVersion,
    pub chip_id: [u8; CHIP_ID_LENGTH],
    /// r‖s, big-endian, 48 bytes each.
    pub signature: [u8; SIGNATURE_LENGTH],
    signed_body: Vec<u8>,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[offset..offset + N]);
    buf
}

/// Convert a 72-byte little-endian signature component to a 48-byte
/// big-endian scalar.
fn le_component_to_be(component: &[u8]) -> Result<[u8; SCALAR_LENGTH], AttestationError> {
    if component[SCALAR_LENGTH..].iter().any(|b| *b != 0) {
        return Err(AttestationError::MalformedReport(
            "signature component exceeds 384 bits".to_string(),
        ));
    }
    let mut scalar = [0u8; SCALAR_LENGTH];
    scalar.copy_from_slice(&component[..SCALAR_LENGTH]);
    scalar.reverse();
    Ok(scalar)
}

impl SnpReport {
    /// Parse raw report bytes. Performs structural checks only.
    pub fn parse(bytes: &[u8]) -> Result<Self, AttestationError> {
        if bytes.len() != REPORT_LENGTH {
            return Err(AttestationError::MalformedReport(format!(
                "expected {} bytes, got {}",
                REPORT_LENGTH,
                bytes.len()
            )));
        }

        let signature_algo = read_u32(bytes, OFFSET_SIG_ALGO);
        if signature_algo != SIG_ALGO_ECDSA_P384_SHA384 {
            return Err(AttestationError::MalformedReport(format!(
                "unsupported signature algorithm {}",
                signature_algo
            )));
        }

        let r = le_component_to_be(&bytes[OFFSET_SIG_R..OFFSET_SIG_R + SIG_COMPONENT_LENGTH])?;
        let s = le_component_to_be(&bytes[OFFSET_SIG_S..OFFSET_SIG_S + SIG_COMPONENT_LENGTH])?;
        let mut signature = [0u8; SIGNATURE_LENGTH];
        signature[..SCALAR_LENGTH].copy_from_slice(&r);
        signature[SCALAR_LENGTH..].copy_from_slice(&s);

        Ok(Self {
            version: read_u32(bytes, OFFSET_VERSION),
            signature_algo,
            report_data: read_array(bytes, OFFSET_REPORT_DATA),
            measurement: read_array(bytes, OFFSET_MEASUREMENT),
            reported_tcb: TcbVersion::from_raw(read_array(bytes, OFFSET_REPORTED_TCB)),
            chip_id: read_array(bytes, OFFSET_CHIP_ID),
            signature,
            signed_body: bytes[..SIGNED_LENGTH].to_vec(),
        })
    }

    /// Bytes covered by the signature.
    pub fn signed_body(&self) -> &[u8] {
        &self.signed_body
    }

    pub fn chip_id_hex(&self) -> String {
        hex::encode(self.chip_id)
    }

    /// Platform version used as the key-derivation salt: the report format
    /// version in decimal.
    ///
    /// This is the report ABI version, not the code identity. A firmware
    /// update that moves reports from version 2 to 3 changes the master key
    /// even when the measurement is unchanged, and the active DEK then needs
    /// `migrate_dek_to_new_master_key` with the key derived under the old
    /// version.
    pub fn platform_version(&self) -> String {
        self.version.to_string()
    }

    /// Describe this report without vouching for it.
    pub fn to_unverified(&self) -> AttestationReport {
        AttestationReport::new(self, false)
    }
}

/// Code-identity statement extracted from a hardware report.
///
/// `verified` is only ever `true` for reports produced by
/// [`crate::verify::verify_report`]. Serialize only: a verified report cannot
/// be read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttestationReport {
    measurement: String,
    platform_version: Option<String>,
    chip_id: String,
    #[serde(with = "hex_bytes")]
    signature: Vec<u8>,
    verified: bool,
}

impl AttestationReport {
    pub(crate) fn new(report: &SnpReport, verified: bool) -> Self {
        Self {
            measurement: hex::encode(report.measurement),
            platform_version: Some(report.platform_version()),
            chip_id: report.chip_id_hex(),
            signature: report.signature.to_vec(),
            verified,
        }
    }

    /// Launch measurement, lowercase hex (96 chars).
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Launch measurement bytes.
    pub fn measurement_bytes(&self) -> Vec<u8> {
        // Constructed from a fixed-size array, so decoding cannot fail.
        hex::decode(&self.measurement).unwrap_or_default()
    }

    /// See [`SnpReport::platform_version`].
    pub fn platform_version(&self) -> Option<&str> {
        self.platform_version.as_deref()
    }

    pub fn chip_id(&self) -> &str {
        &self.chip_id
    }

    /// ECDSA-P384 signature, r‖s big-endian.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}

/// Assemble raw report bytes. Inverse of [`SnpReport::parse`] for the fields
/// this crate reads; everything else is zero.
#[cfg(any(test, feature = "test-util"))]
pub(crate) fn build_raw_report(
    version: u32,
    measurement: &[u8; MEASUREMENT_LENGTH],
    report_data: &[u8; REPORT_DATA_LENGTH],
    tcb: TcbVersion,
    chip_id: &[u8; CHIP_ID_LENGTH],
) -> Vec<u8> {
    let mut bytes = vec![0u8; REPORT_LENGTH];
    bytes[OFFSET_VERSION..OFFSET_VERSION + 4].copy_from_slice(&version.to_le_bytes());
    bytes[OFFSET_SIG_ALGO..OFFSET_SIG_ALGO + 4]
        .copy_from_slice(&SIG_ALGO_ECDSA_P384_SHA384.to_le_bytes());
    bytes[OFFSET_REPORT_DATA..OFFSET_REPORT_DATA + REPORT_DATA_LENGTH].copy_from_slice(report_data);
    bytes[OFFSET_MEASUREMENT..OFFSET_MEASUREMENT + MEASUREMENT_LENGTH].copy_from_slice(measurement);
    bytes[OFFSET_REPORTED_TCB..OFFSET_REPORTED_TCB + 8].copy_from_slice(&tcb.to_raw());
    bytes[OFFSET_CHIP_ID..OFFSET_CHIP_ID + CHIP_ID_LENGTH].copy_from_slice(chip_id);
    bytes
}

/// Write a big-endian r‖s signature into the report's little-endian slots.
#[cfg(any(test, feature = "test-util"))]
pub(crate) fn embed_signature(bytes: &mut [u8], signature_be: &[u8; SIGNATURE_LENGTH]) {
    let mut r = [0u8; SCALAR_LENGTH];
    let mut s = [0u8; SCALAR_LENGTH];
    r.copy_from_slice(&signature_be[..SCALAR_LENGTH]);
    s.copy_from_slice(&signature_be[SCALAR_LENGTH..]);
    r.reverse();
    s.reverse();
    bytes[OFFSET_SIG_R..OFFSET_SIG_R + SIG_COMPONENT_LENGTH].fill(0);
    bytes[OFFSET_SIG_S..OFFSET_SIG_S + SIG_COMPONENT_LENGTH].fill(0);
    bytes[OFFSET_SIG_R..OFFSET_SIG_R + SCALAR_LENGTH].copy_from_slice(&r);
    bytes[OFFSET_SIG_S..OFFSET_SIG_S + SCALAR_LENGTH].copy_from_slice(&s);
}
