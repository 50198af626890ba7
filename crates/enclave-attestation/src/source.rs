//! Raw report sources.
//!
//! Each source either yields raw report bytes, reports that it is not present
//! on this host (`Ok(None)`), or fails. The provider walks them in order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::AttestationConfig;
use crate::error::AttestationError;
use crate::report::REPORT_LENGTH;

/// Guest device exposed by the SEV-SNP kernel driver.
pub const SEV_GUEST_DEVICE: &str = "/dev/sev-guest";

#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// Raw report bytes, or `None` if this source is not available here.
    async fn fetch(&self) -> Result<Option<Vec<u8>>, AttestationError>;
}

/// Report file pointed to by `SEV_SNP_REPORT_PATH`.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self) -> Result<Option<Vec<u8>>, AttestationError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AttestationError::Source {
                source_name: self.name(),
                reason: format!("{} does not exist", self.path.display()),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// `snpguest report` against the guest device.
pub struct SnpGuestSource {
    binary: PathBuf,
    device: PathBuf,
    timeout: Duration,
}

impl SnpGuestSource {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            device: PathBuf::from(SEV_GUEST_DEVICE),
            timeout,
        }
    }

    /// Use a different guest device path.
    pub fn with_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.device = device.into();
        self
    }

    async fn run(&self, workdir: &Path) -> Result<Option<Vec<u8>>, AttestationError> {
        let report_path = workdir.join("report.bin");
        let request_path = workdir.join("request.bin");

        let mut command = Command::new(&self.binary);
        command
            .arg("report")
            .arg(&report_path)
            .arg(&request_path)
            .arg("--random")
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => return Err(AttestationError::Timeout("snpguest")),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(binary = %self.binary.display(), "snpguest not installed");
                return Ok(None);
            }
            Ok(result) => result?,
        };

        if !output.status.success() {
            return Err(AttestationError::Source {
                source_name: self.name(),
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(Some(tokio::fs::read(&report_path).await?))
    }
}

#[async_trait]
impl ReportSource for SnpGuestSource {
    fn name(&self) -> &'static str {
        "snpguest"
    }

    async fn fetch(&self) -> Result<Option<Vec<u8>>, AttestationError> {
        if !tokio::fs::try_exists(&self.device).await.unwrap_or(false) {
            debug!(device = %self.device.display(), "no SEV-SNP guest device");
            return Ok(None);
        }
        let workdir = tempfile::tempdir()?;
        self.run(workdir.path()).await
    }
}

/// HTTP metadata endpoint serving the report as raw bytes or hex.
pub struct MetadataSource {
    http: reqwest::Client,
    url: String,
}

impl MetadataSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AttestationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReportSource for MetadataSource {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn fetch(&self) -> Result<Option<Vec<u8>>, AttestationError> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttestationError::Source {
                source_name: self.name(),
                reason: format!("endpoint returned {status}"),
            });
        }
        let body = response.bytes().await?;
        Ok(Some(decode_body(&body)))
    }
}

fn decode_body(body: &[u8]) -> Vec<u8> {
    if body.len() != REPORT_LENGTH {
        if let Ok(decoded) = hex::decode(body.trim_ascii()) {
            return decoded;
        }
    }
    body.to_vec()
}

/// Sources implied by a configuration, in priority order.
pub fn sources_from_config(
    config: &AttestationConfig,
) -> Result<Vec<Box<dyn ReportSource>>, AttestationError> {
    let mut sources: Vec<Box<dyn ReportSource>> = Vec::new();
    if let Some(path) = &config.report_path {
        sources.push(Box::new(FileSource::new(path)));
    }
    sources.push(Box::new(SnpGuestSource::new(
        &config.snpguest_path,
        config.command_timeout(),
    )));
    if let Some(url) = &config.metadata_url {
        sources.push(Box::new(MetadataSource::new(url, config.http_timeout())?));
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_source_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.bin");
        std::fs::write(&path, [7u8; 16]).unwrap();
        let bytes = FileSource::new(&path).fetch().await.unwrap().unwrap();
        assert_eq!(bytes, vec![7u8; 16]);
    }

    #[tokio::test]
    async fn configured_but_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::new(dir.path().join("absent.bin"))
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, AttestationError::Source { source_name: "file", .. }));
    }

    #[tokio::test]
    async fn snpguest_skipped_without_device() {
        let dir = tempfile::tempdir().unwrap();
        let source = SnpGuestSource::new("snpguest", Duration::from_secs(1))
            .with_device(dir.path().join("sev-guest"));
        assert!(source.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snpguest_skipped_when_binary_missing() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("sev-guest");
        std::fs::write(&device, b"").unwrap();
        let source =
            SnpGuestSource::new(dir.path().join("no-such-binary"), Duration::from_secs(1))
                .with_device(device);
        assert!(source.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_metadata_endpoint_errors() {
        let source =
            MetadataSource::new("http://127.0.0.1:9/report", Duration::from_secs(2)).unwrap();
        assert!(source.fetch().await.is_err());
    }

    #[test]
    fn hex_bodies_are_decoded() {
        assert_eq!(decode_body(b"0a0b\n"), vec![0x0a, 0x0b]);
        assert_eq!(decode_body(&[0xFF, 0x00]), vec![0xFF, 0x00]);
        let raw = vec![0x30u8; REPORT_LENGTH];
        assert_eq!(decode_body(&raw), raw);
    }

    #[test]
    fn config_source_order() {
        let config = AttestationConfig {
            report_path: Some(PathBuf::from("/tmp/report.bin")),
            metadata_url: Some("http://127.0.0.1:9".to_string()),
            ..AttestationConfig::default()
        };
        let names: Vec<_> = sources_from_config(&config)
            .unwrap()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, ["file", "snpguest", "metadata"]);

        let names: Vec<_> = sources_from_config(&AttestationConfig::default())
            .unwrap()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, ["snpguest"]);
    }
}
