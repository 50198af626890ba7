//! AMD SEV-SNP attestation: report retrieval, VCEK lookup, and signature
//! verification.

pub mod chain;
pub mod config;
pub mod error;
pub mod provider;
pub mod report;
pub mod source;
pub mod vcek;
pub mod verify;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use chain::{verify_vcek_chain, PinnedArk};
pub use config::AttestationConfig;
pub use error::AttestationError;
pub use provider::{AttestationProvider, SevSnpProvider};
pub use report::{AttestationReport, SnpReport, TcbVersion};
pub use source::{FileSource, MetadataSource, ReportSource, SnpGuestSource};
pub use vcek::{KdsClient, PinnedVcek, VcekSource};
pub use verify::verify_report;
