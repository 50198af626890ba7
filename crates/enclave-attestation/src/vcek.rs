//! VCEK (Versioned Chip Endorsement Key) retrieval.
//!
//! Certificates come from the AMD Key Distribution Service, keyed by chip id
//! and reported TCB. Every successful fetch is written to a local cache; when
//! the service is unreachable the cached certificate is used instead. Fetched
//! and cached certificates alike must chain to the pinned ARK.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use p384::ecdsa::VerifyingKey;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use x509_cert::Certificate;

use crate::chain::{parse_certificates, verify_vcek_chain, PinnedArk};
use crate::config::AttestationConfig;
use crate::error::AttestationError;
use crate::report::TcbVersion;

/// Resolves the public key that must have signed a chip's reports.
#[async_trait]
pub trait VcekSource: Send + Sync {
    async fn vcek(&self, chip_id: &[u8], tcb: TcbVersion) -> Result<VerifyingKey, AttestationError>;
}

/// A single, fixed VCEK. Useful where the key is provisioned out of band.
pub struct PinnedVcek(pub VerifyingKey);

#[async_trait]
impl VcekSource for PinnedVcek {
    async fn vcek(
        &self,
        _chip_id: &[u8],
        _tcb: TcbVersion,
    ) -> Result<VerifyingKey, AttestationError> {
        Ok(self.0)
    }
}

/// AMD KDS client with on-disk fallback cache.
pub struct KdsClient {
    http: reqwest::Client,
    base_url: String,
    product: String,
    cache_dir: PathBuf,
    ark: PinnedArk,
    ask: OnceCell<Certificate>,
}

impl KdsClient {
    /// Client trusting the ARK at [`AttestationConfig::ark_path`].
    pub fn new(config: &AttestationConfig) -> Result<Self, AttestationError> {
        Self::with_ark(config, PinnedArk::load(&config.ark_path())?)
    }

    pub fn with_ark(config: &AttestationConfig, ark: PinnedArk) -> Result<Self, AttestationError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.http_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.kds_base_url.trim_end_matches('/').to_string(),
            product: config.product.clone(),
            cache_dir: config.vcek_cache_dir.clone(),
            ark,
            ask: OnceCell::new(),
        })
    }

    /// KDS URL for a chip at a TCB level.
    pub fn vcek_url(&self, chip_id: &[u8], tcb: TcbVersion) -> String {
        format!(
            "{}/vcek/v1/{}/{}?blSPL={:02}&teeSPL={:02}&snpSPL={:02}&ucodeSPL={:02}",
            self.base_url,
            self.product,
            hex::encode(chip_id),
            tcb.boot_loader,
            tcb.tee,
            tcb.snp,
            tcb.microcode
        )
    }

    /// KDS URL of the ASK + ARK bundle for the product line.
    pub fn cert_chain_url(&self) -> String {
        format!("{}/vcek/v1/{}/cert_chain", self.base_url, self.product)
    }

    /// Cache file for a chip at a TCB level.
    pub fn cache_path(&self, chip_id: &[u8], tcb: TcbVersion) -> PathBuf {
        cache_file(&self.cache_dir, chip_id, tcb)
    }

    pub fn cert_chain_cache_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}-cert_chain.pem", self.product))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AttestationError> {
        debug!(%url, "fetching from key distribution service");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttestationError::VcekFetch(format!("KDS returned {status}")));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn store_cached(&self, path: &Path, bytes: &[u8]) {
        if let Err(e) = tokio::fs::create_dir_all(&self.cache_dir).await {
            warn!(error = %e, dir = %self.cache_dir.display(), "cannot create VCEK cache dir");
            return;
        }
        if let Err(e) = tokio::fs::write(path, bytes).await {
            warn!(error = %e, path = %path.display(), "cannot write VCEK cache entry");
        }
    }

    /// The ASK, verified against the pinned ARK. Resolved once per client.
    async fn ask(&self) -> Result<&Certificate, AttestationError> {
        self.ask.get_or_try_init(|| self.load_ask()).await
    }

    async fn load_ask(&self) -> Result<Certificate, AttestationError> {
        let path = self.cert_chain_cache_path();
        match self.fetch(&self.cert_chain_url()).await {
            Ok(bundle) => {
                let ask = self.ask_from_bundle(&bundle)?;
                self.store_cached(&path, &bundle).await;
                Ok(ask)
            }
            Err(fetch_err) => {
                warn!(error = %fetch_err, "KDS unreachable, falling back to cached certificate chain");
                let bundle = tokio::fs::read(&path).await.map_err(|_| {
                    AttestationError::Unavailable(format!(
                        "AMD certificate chain not retrievable and not cached ({fetch_err})"
                    ))
                })?;
                self.ask_from_bundle(&bundle)
            }
        }
    }

    fn ask_from_bundle(&self, bundle: &[u8]) -> Result<Certificate, AttestationError> {
        let ask = parse_certificates(bundle)?
            .into_iter()
            .next()
            .ok_or_else(|| AttestationError::UntrustedVcek("empty certificate chain".to_string()))?;
        self.ark.verify_ask(&ask)?;
        Ok(ask)
    }
}

pub(crate) fn cache_file(dir: &Path, chip_id: &[u8], tcb: TcbVersion) -> PathBuf {
    dir.join(format!(
        "{}-{}-{}-{}-{}.der",
        hex::encode(chip_id),
        tcb.boot_loader,
        tcb.tee,
        tcb.snp,
        tcb.microcode
    ))
}

#[async_trait]
impl VcekSource for KdsClient {
    async fn vcek(
        &self,
        chip_id: &[u8],
        tcb: TcbVersion,
    ) -> Result<VerifyingKey, AttestationError> {
        let ask = self.ask().await?;
        let path = self.cache_path(chip_id, tcb);

        match self.fetch(&self.vcek_url(chip_id, tcb)).await {
            Ok(der) => {
                let key = verify_vcek_chain(&self.ark, ask, &der)?;
                self.store_cached(&path, &der).await;
                info!(chip_id = %hex::encode(&chip_id[..8.min(chip_id.len())]), "VCEK fetched");
                Ok(key)
            }
            Err(fetch_err) => {
                warn!(error = %fetch_err, "KDS unreachable, falling back to cached VCEK");
                match tokio::fs::read(&path).await {
                    Ok(der) => verify_vcek_chain(&self.ark, ask, &der),
                    Err(_) => Err(AttestationError::Unavailable(format!(
                        "VCEK not retrievable and not cached ({fetch_err})"
                    ))),
                }
            }
        }
    }
}
