use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::AttestationConfig;
use crate::error::AttestationError;
use crate::report::{AttestationReport, SnpReport};
use crate::source::{sources_from_config, ReportSource};
use crate::vcek::{KdsClient, VcekSource};
use crate::verify::verify_report;

/// Produces fresh, verified attestation reports for the running code.
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    async fn get_attestation_report(&self) -> Result<AttestationReport, AttestationError>;
}

/// SEV-SNP provider: first report source that yields bytes wins, then the
/// report is parsed and verified against the chip's VCEK.
pub struct SevSnpProvider {
    sources: Vec<Box<dyn ReportSource>>,
    vcek: Arc<dyn VcekSource>,
}

impl SevSnpProvider {
    pub fn new(sources: Vec<Box<dyn ReportSource>>, vcek: Arc<dyn VcekSource>) -> Self {
        Self { sources, vcek }
    }

    /// Sources and KDS client derived from configuration.
    pub fn from_config(config: &AttestationConfig) -> Result<Self, AttestationError> {
        Ok(Self::new(
            sources_from_config(config)?,
            Arc::new(KdsClient::new(config)?),
        ))
    }

    async fn raw_report(&self) -> Result<Vec<u8>, AttestationError> {
        let mut failures = Vec::new();
        for source in &self.sources {
            match source.fetch().await {
                Ok(Some(bytes)) => {
                    debug!(source = source.name(), len = bytes.len(), "report obtained");
                    return Ok(bytes);
                }
                Ok(None) => debug!(source = source.name(), "report source not present"),
                Err(e) => {
                    warn!(source = source.name(), error = %e, "report source failed");
                    failures.push(format!("{}: {e}", source.name()));
                }
            }
        }
        let detail = if failures.is_empty() {
            "no report source present".to_string()
        } else {
            failures.join("; ")
        };
        Err(AttestationError::Unavailable(detail))
    }
}

#[async_trait]
impl AttestationProvider for SevSnpProvider {
    async fn get_attestation_report(&self) -> Result<AttestationReport, AttestationError> {
        let bytes = self.raw_report().await?;
        let report = SnpReport::parse(&bytes)?;
        let vcek = self.vcek.vcek(&report.chip_id, report.reported_tcb).await?;
        let verified = verify_report(&report, &vcek)?;
        info!(
            measurement = &verified.measurement()[..16],
            platform_version = verified.platform_version().unwrap_or(""),
            "attestation report verified"
        );
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{build_raw_report, embed_signature, TcbVersion, SIGNED_LENGTH};
    use crate::chain::fixtures::{p384_key, self_signed_vcek, TestChain};
    use crate::vcek::PinnedVcek;
    use p384::ecdsa::signature::Signer;
    use p384::ecdsa::{Signature, SigningKey};

    struct Fixed(Option<Vec<u8>>);

    #[async_trait]
    impl ReportSource for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn fetch(&self) -> Result<Option<Vec<u8>>, AttestationError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl ReportSource for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn fetch(&self) -> Result<Option<Vec<u8>>, AttestationError> {
            Err(AttestationError::Timeout("broken"))
        }
    }

    fn key() -> SigningKey {
        SigningKey::from_slice(&[0x11; 48]).unwrap()
    }

    fn signed(key: &SigningKey) -> Vec<u8> {
        let tcb = TcbVersion {
            boot_loader: 3,
            tee: 0,
            snp: 8,
            microcode: 115,
        };
        let mut bytes = build_raw_report(2, &[0xAB; 48], &[0u8; 64], tcb, &[0x42; 64]);
        let signature: Signature = key.sign(&bytes[..SIGNED_LENGTH]);
        let mut sig = [0u8; 96];
        sig.copy_from_slice(&signature.to_bytes());
        embed_signature(&mut bytes, &sig);
        bytes
    }

    fn provider(sources: Vec<Box<dyn ReportSource>>) -> SevSnpProvider {
        SevSnpProvider::new(sources, Arc::new(PinnedVcek(*key().verifying_key())))
    }

    #[tokio::test]
    async fn skips_absent_and_failing_sources() {
        let p = provider(vec![
            Box::new(Fixed(None)),
            Box::new(Broken),
            Box::new(Fixed(Some(signed(&key())))),
        ]);
        let report = p.get_attestation_report().await.unwrap();
        assert!(report.is_verified());
        assert_eq!(report.platform_version(), Some("2"));
    }

    #[tokio::test]
    async fn unavailable_when_nothing_yields() {
        let p = provider(vec![Box::new(Fixed(None)), Box::new(Broken)]);
        let err = p.get_attestation_report().await.unwrap_err();
        assert!(matches!(err, AttestationError::Unavailable(ref d) if d.contains("broken")));

        let err = provider(vec![]).get_attestation_report().await.unwrap_err();
        assert!(matches!(err, AttestationError::Unavailable(_)));
    }

    #[tokio::test]
    async fn report_signed_by_other_key_fails() {
        let other = SigningKey::from_slice(&[0x22; 48]).unwrap();
        let p = provider(vec![Box::new(Fixed(Some(signed(&other))))]);
        assert!(matches!(
            p.get_attestation_report().await,
            Err(AttestationError::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn malformed_report_is_fatal() {
        let p = provider(vec![
            Box::new(Fixed(Some(vec![0u8; 10]))),
            Box::new(Fixed(Some(signed(&key())))),
        ]);
        assert!(matches!(
            p.get_attestation_report().await,
            Err(AttestationError::MalformedReport(_))
        ));
    }

    /// Config with a report file, an unreachable KDS, a provisioned ARK and a
    /// cached chain bundle. The cached VCEK is left to the caller.
    fn offline_config(
        dir: &std::path::Path,
        key: &SigningKey,
        chain: &TestChain,
    ) -> AttestationConfig {
        let report_path = dir.join("report.bin");
        std::fs::write(&report_path, signed(key)).unwrap();
        let ark_path = dir.join("ark.pem");
        std::fs::write(&ark_path, &chain.ark_pem).unwrap();

        let config = AttestationConfig {
            report_path: Some(report_path),
            snpguest_path: dir.join("no-snpguest"),
            kds_base_url: "http://127.0.0.1:9".to_string(),
            vcek_cache_dir: dir.join("vcek"),
            ark_path: Some(ark_path),
            http_timeout_secs: 2,
            ..AttestationConfig::default()
        };
        let kds = KdsClient::new(&config).unwrap();
        std::fs::create_dir_all(&config.vcek_cache_dir).unwrap();
        std::fs::write(kds.cert_chain_cache_path(), chain.cert_chain_pem()).unwrap();
        config
    }

    fn cache_vcek(config: &AttestationConfig, key: &SigningKey, der: &[u8]) {
        let kds = KdsClient::new(config).unwrap();
        let tcb = SnpReport::parse(&signed(key)).unwrap().reported_tcb;
        std::fs::write(kds.cache_path(&[0x42; 64], tcb), der).unwrap();
    }

    #[tokio::test]
    async fn from_config_uses_report_file_and_cached_chain() {
        use p384::pkcs8::DecodePrivateKey;

        let chain = TestChain::new();
        let key_pair = p384_key();
        let key = SigningKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path(), &key, &chain);
        cache_vcek(&config, &key, &chain.issue_vcek(&key_pair));

        let report = SevSnpProvider::from_config(&config)
            .unwrap()
            .get_attestation_report()
            .await
            .unwrap();
        assert!(report.is_verified());
        assert_eq!(report.measurement(), hex::encode([0xAB; 48]));
    }

    #[tokio::test]
    async fn self_signed_vcek_cannot_vouch_for_report() {
        use p384::pkcs8::DecodePrivateKey;

        let chain = TestChain::new();
        let key_pair = p384_key();
        let key = SigningKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path(), &key, &chain);
        cache_vcek(&config, &key, &self_signed_vcek(&key_pair));

        let err = SevSnpProvider::from_config(&config)
            .unwrap()
            .get_attestation_report()
            .await
            .unwrap_err();
        assert!(matches!(err, AttestationError::UntrustedVcek(_)));
    }
}
