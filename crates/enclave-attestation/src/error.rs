use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("Attestation unavailable: {0}")]
    Unavailable(String),

    #[error("Attestation report signature is invalid")]
    SignatureInvalid,

    #[error("Malformed attestation report: {0}")]
    MalformedReport(String),

    #[error("Invalid VCEK certificate: {0}")]
    InvalidVcek(String),

    #[error("VCEK does not chain to the pinned AMD root: {0}")]
    UntrustedVcek(String),

    #[error("AMD root key unusable: {0}")]
    TrustAnchor(String),

    #[error("VCEK fetch failed: {0}")]
    VcekFetch(String),

    #[error("Report source {source_name} failed: {reason}")]
    Source {
        source_name: &'static str,
        reason: String,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
