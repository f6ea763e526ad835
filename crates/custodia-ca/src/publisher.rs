//! 证书发布器
//!
//! 发布是尽力而为的异步动作，单个发布器失败不影响签发本身。

use thiserror::Error;
use tracing::info;

use custodia_core::CertRevocationInfo;

#[derive(Debug, Error)]
#[error("publisher error: {0}")]
pub struct PublisherError(pub String);

/// 发布事件携带的证书信息
#[derive(Debug, Clone)]
pub struct PublishedCert {
    pub cert_id: i64,
    pub issuer_id: u32,
    pub serial: String,
    pub subject: String,
    pub cert_der: Vec<u8>,
}

/// 订阅签发/撤销/CRL 事件的发布器
pub trait CertPublisher: Send + Sync {
    fn name(&self) -> &str;

    fn certificate_added(&self, cert: &PublishedCert) -> Result<(), PublisherError>;

    fn certificate_status_changed(
        &self,
        issuer_id: u32,
        serial: &str,
        revocation: Option<&CertRevocationInfo>,
    ) -> Result<(), PublisherError>;

    fn certificate_removed(&self, issuer_id: u32, serial: &str) -> Result<(), PublisherError>;

    fn crl_added(&self, issuer_id: u32, crl_number: i64, crl_der: &[u8])
        -> Result<(), PublisherError>;
}

/// 日志发布器，默认兜底
pub struct LogPublisher {
    name: String,
}

impl LogPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogPublisher {
    fn default() -> Self {
        Self::new("log")
    }
}

impl CertPublisher for LogPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn certificate_added(&self, cert: &PublishedCert) -> Result<(), PublisherError> {
        info!(
            "published certificate 0x{} ({}) of issuer {}",
            cert.serial, cert.subject, cert.issuer_id
        );
        Ok(())
    }

    fn certificate_status_changed(
        &self,
        issuer_id: u32,
        serial: &str,
        revocation: Option<&CertRevocationInfo>,
    ) -> Result<(), PublisherError> {
        match revocation {
            Some(rev) => info!(
                "certificate 0x{} of issuer {} revoked, reason {:?}",
                serial, issuer_id, rev.reason
            ),
            None => info!(
                "certificate 0x{} of issuer {} unsuspended",
                serial, issuer_id
            ),
        }
        Ok(())
    }

    fn certificate_removed(&self, issuer_id: u32, serial: &str) -> Result<(), PublisherError> {
        info!("certificate 0x{} of issuer {} removed", serial, issuer_id);
        Ok(())
    }

    fn crl_added(
        &self,
        issuer_id: u32,
        crl_number: i64,
        crl_der: &[u8],
    ) -> Result<(), PublisherError> {
        info!(
            "CRL {} of issuer {} published ({} bytes)",
            crl_number,
            issuer_id,
            crl_der.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_publisher_accepts_events() {
        let publisher = LogPublisher::default();
        assert_eq!(publisher.name(), "log");

        let cert = PublishedCert {
            cert_id: 1,
            issuer_id: 1,
            serial: "ab".to_string(),
            subject: "CN=x".to_string(),
            cert_der: vec![0x30, 0x00],
        };
        publisher.certificate_added(&cert).unwrap();
        publisher
            .certificate_status_changed(1, "ab", None)
            .unwrap();
        publisher.certificate_removed(1, "ab").unwrap();
        publisher.crl_added(1, 1, &[0x30, 0x00]).unwrap();
    }
}
