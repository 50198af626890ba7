//! Attestation configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default AMD Key Distribution Service endpoint.
pub const DEFAULT_KDS_BASE_URL: &str = "https://kdsintf.amd.com";

/// Default processor product line used in KDS URLs.
pub const DEFAULT_PRODUCT: &str = "Milan";

/// Default location of cached VCEK certificates.
pub const DEFAULT_VCEK_CACHE_DIR: &str = "/var/cache/enclave/vcek";

/// Directory holding the operator-provisioned ARK, one `ark-{product}.pem`
/// per product line.
pub const DEFAULT_ARK_DIR: &str = "/etc/enclave/amd";

/// Where to obtain reports and how to verify them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Raw report file that overrides every other source.
    pub report_path: Option<PathBuf>,
    /// `snpguest` executable used with `/dev/sev-guest`.
    pub snpguest_path: PathBuf,
    /// Cloud metadata endpoint serving a raw report.
    pub metadata_url: Option<String>,
    pub kds_base_url: String,
    pub product: String,
    pub vcek_cache_dir: PathBuf,
    /// Pinned AMD Root Key certificate. Defaults to
    /// `{DEFAULT_ARK_DIR}/ark-{product}.pem`.
    pub ark_path: Option<PathBuf>,
    /// Timeout for every HTTP request (KDS and metadata).
    pub http_timeout_secs: u64,
    /// Timeout for the `snpguest` invocation.
    pub command_timeout_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            report_path: None,
            snpguest_path: PathBuf::from("snpguest"),
            metadata_url: None,
            kds_base_url: DEFAULT_KDS_BASE_URL.to_string(),
            product: DEFAULT_PRODUCT.to_string(),
            vcek_cache_dir: PathBuf::from(DEFAULT_VCEK_CACHE_DIR),
            ark_path: None,
            http_timeout_secs: 10,
            command_timeout_secs: 15,
        }
    }
}

impl AttestationConfig {
    /// Build from `SEV_SNP_REPORT_PATH` and `ENCLAVE_ATTESTATION_*` variables,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty("SEV_SNP_REPORT_PATH") {
            config.report_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty("ENCLAVE_ATTESTATION_SNPGUEST_PATH") {
            config.snpguest_path = PathBuf::from(path);
        }
        if let Some(url) = non_empty("ENCLAVE_ATTESTATION_METADATA_URL") {
            config.metadata_url = Some(url);
        }
        if let Some(url) = non_empty("ENCLAVE_ATTESTATION_KDS_URL") {
            config.kds_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(product) = non_empty("ENCLAVE_ATTESTATION_PRODUCT") {
            config.product = product;
        }
        if let Some(dir) = non_empty("ENCLAVE_ATTESTATION_VCEK_CACHE_DIR") {
            config.vcek_cache_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty("ENCLAVE_ATTESTATION_ARK_PATH") {
            config.ark_path = Some(PathBuf::from(path));
        }
        if let Some(secs) =
            non_empty("ENCLAVE_ATTESTATION_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            config.http_timeout_secs = secs;
        }
        if let Some(secs) =
            non_empty("ENCLAVE_ATTESTATION_COMMAND_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            config.command_timeout_secs = secs;
        }
        config
    }

    pub fn ark_path(&self) -> PathBuf {
        self.ark_path.clone().unwrap_or_else(|| {
            PathBuf::from(DEFAULT_ARK_DIR).join(format!("ark-{}.pem", self.product))
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
