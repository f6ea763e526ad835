//! CA 实例
//!
//! 单个 CA 的签发、撤销、移除、CRL 生成与发布扇出。

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use base64::Engine;
use der::Encode;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use x509_cert::{serial_number::SerialNumber, time::Time, Certificate, TbsCertificate, Version};

use custodia_core::{
    CertRevocationInfo, CrlReason, NameId, OperationError, Result, UniqueIdGenerator,
};
use custodia_profile::Certprofile;

use crate::{
    ca_info::{CaInfo, CrlControl},
    crl::{build_crl, CrlEntry},
    keygen::KeypairGenerator,
    publisher::{CertPublisher, PublishedCert},
    signer::SignerPool,
    store::{serial_hex, CertListFilter, CertOrderBy, CertRecord, CertStore},
    template::{map_profile_error, CertTemplateData, GrantedCertTemplate, TemplateBuilder},
};

/// 一次签发的结果
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_id: i64,
    pub cert_der: Vec<u8>,
    pub serial: Vec<u8>,
    /// 服务端生成密钥时返回
    pub private_key_der: Option<Vec<u8>>,
    pub warning: Option<String>,
}

/// 批量发布的结果
#[derive(Debug, Default)]
pub struct PublishReport {
    pub published: usize,
    /// (serial, publisher, error)
    pub failures: Vec<(String, String, String)>,
}

/// 单个 CA 的运行实例，由管理器独占持有
pub struct CaInstance {
    info: RwLock<CaInfo>,
    store: Arc<CertStore>,
    signer_pool: SignerPool,
    keypair_generators: Vec<Arc<dyn KeypairGenerator>>,
    publishers: RwLock<Vec<Arc<dyn CertPublisher>>>,
    id_generator: Arc<UniqueIdGenerator>,
}

impl CaInstance {
    pub fn new(
        info: CaInfo,
        store: Arc<CertStore>,
        signer_pool: SignerPool,
        keypair_generators: Vec<Arc<dyn KeypairGenerator>>,
        publishers: Vec<Arc<dyn CertPublisher>>,
        id_generator: Arc<UniqueIdGenerator>,
    ) -> Self {
        Self {
            info: RwLock::new(info),
            store,
            signer_pool,
            keypair_generators,
            publishers: RwLock::new(publishers),
            id_generator,
        }
    }

    pub fn ident(&self) -> NameId {
        self.read_info().ident.clone()
    }

    pub fn ca_info(&self) -> CaInfo {
        self.read_info()
    }

    pub fn store(&self) -> &Arc<CertStore> {
        &self.store
    }

    pub fn set_publishers(&self, publishers: Vec<Arc<dyn CertPublisher>>) {
        *self.publishers.write().expect("publisher lock poisoned") = publishers;
    }

    fn read_info(&self) -> CaInfo {
        self.info.read().expect("ca info lock poisoned").clone()
    }

    // ------------------------------------------------------------------
    // issuance
    // ------------------------------------------------------------------

    /// 签发一张证书
    ///
    /// 同一 `(issuer, serial)` 的重复请求返回已存在的证书。
    pub fn generate_certificate(
        &self,
        profile: &Certprofile,
        profile_ident: &NameId,
        template: &CertTemplateData,
        requestor_id: Option<u32>,
    ) -> Result<IssuedCertificate> {
        let ca_info = self.read_info();
        let now = OffsetDateTime::now_utc();

        let builder = TemplateBuilder::new(&ca_info);
        let granted = builder.build(
            profile,
            template,
            &self.signer_pool,
            &self.keypair_generators,
            now,
        )?;

        let spki_der = granted
            .spki
            .to_der()
            .map_err(|e| OperationError::system_failure(format!("encode SPKI: {}", e)))?;

        let serial = match profile.generate_serial_number(
            &ca_info.cert.subject_der,
            &spki_der,
            &ca_info.extra_control,
        ) {
            Ok(Some(serial)) => serial,
            Ok(None) => random_ca_serial(ca_info.serial_number_bytes)?,
            Err(e) => return Err(map_profile_error(e)),
        };
        let serial_str = serial_hex(&serial);

        // idempotent on (issuer, serial)
        if let Some(existing) = self.store.cert(ca_info.ident.id(), &serial_str) {
            return Ok(IssuedCertificate {
                cert_id: existing.id,
                cert_der: existing.cert_der,
                serial,
                private_key_der: None,
                warning: Some("certificate already issued".to_string()),
            });
        }

        let cert_der = self.assemble_and_sign(profile, &ca_info, &granted, &serial)?;

        if let Some(max_size) = profile.max_cert_size() {
            if cert_der.len() > max_size {
                return Err(OperationError::system_failure(format!(
                    "certificate of {} bytes exceeds the maximal size {}",
                    cert_der.len(),
                    max_size
                )));
            }
        }

        let cert_id = self.store.next_cert_id(&self.id_generator)?;
        let record = CertRecord {
            id: cert_id,
            issuer_id: ca_info.ident.id(),
            serial: serial_str.clone(),
            subject: custodia_profile::subject::name_to_string(&granted.granted_subject),
            not_before: granted.not_before.unix_timestamp(),
            not_after: granted.not_after.unix_timestamp(),
            revocation: None,
            profile_id: profile_ident.id(),
            requestor_id,
            cert_der: cert_der.clone(),
            cert_hash: self.cert_hash(&cert_der)?,
            crl_id: 0,
        };
        self.store.add_cert(record.clone())?;
        self.store.enqueue_publish(ca_info.ident.id(), cert_id)?;

        self.fan_out_added(&record);

        info!(
            "issued certificate 0x{} for {} with profile {}",
            serial_str,
            record.subject,
            profile_ident.name()
        );

        Ok(IssuedCertificate {
            cert_id,
            cert_der,
            serial,
            private_key_der: granted.private_key_der,
            warning: granted.warning,
        })
    }

    fn assemble_and_sign(
        &self,
        profile: &Certprofile,
        ca_info: &CaInfo,
        granted: &GrantedCertTemplate,
        serial: &[u8],
    ) -> Result<Vec<u8>> {
        let extension_values = profile
            .extensions(
                &granted.requested_subject,
                &granted.granted_subject,
                &granted.requested_extensions,
                &granted.spki,
                &ca_info.public_ca_info(),
                granted.not_before,
                granted.not_after,
            )
            .map_err(map_profile_error)?;

        let extensions = extension_values
            .to_extensions()
            .map_err(map_profile_error)?;

        let serial_number = SerialNumber::new(serial)
            .map_err(|e| OperationError::system_failure(format!("invalid serial: {}", e)))?;

        let signature_algorithm = granted.signer.algorithm().algorithm_identifier();

        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number,
            signature: signature_algorithm.clone(),
            issuer: ca_info.cert.subject.clone(),
            validity: x509_cert::time::Validity {
                not_before: to_asn1_time(granted.not_before)?,
                not_after: to_asn1_time(granted.not_after)?,
            },
            subject: granted.granted_subject.clone(),
            subject_public_key_info: granted.spki.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        };

        let tbs_der = tbs
            .to_der()
            .map_err(|e| OperationError::system_failure(format!("encode TbsCertificate: {}", e)))?;
        let signature = granted
            .signer
            .sign(&tbs_der)
            .map_err(|e| OperationError::system_failure(format!("signing failed: {}", e)))?;

        let certificate = Certificate {
            tbs_certificate: tbs,
            signature_algorithm,
            signature: der::asn1::BitString::from_bytes(&signature)
                .map_err(|e| OperationError::system_failure(e.to_string()))?,
        };

        certificate
            .to_der()
            .map_err(|e| OperationError::system_failure(format!("encode certificate: {}", e)))
    }

    fn cert_hash(&self, cert_der: &[u8]) -> Result<String> {
        let algo = self
            .store
            .dbschema("CERTHASH_ALGO")
            .unwrap_or_else(|| "SHA256".to_string());
        let digest = match algo.to_ascii_uppercase().as_str() {
            "SHA1" => Sha1::digest(cert_der).to_vec(),
            "SHA256" => Sha256::digest(cert_der).to_vec(),
            "SHA512" => Sha512::digest(cert_der).to_vec(),
            other => {
                return Err(OperationError::system_failure(format!(
                    "unsupported CERTHASH_ALGO {}",
                    other
                )));
            }
        };
        Ok(base64::engine::general_purpose::STANDARD.encode(digest))
    }

    fn fan_out_added(&self, record: &CertRecord) {
        let publishers = self.publishers.read().expect("publisher lock poisoned");
        let event = PublishedCert {
            cert_id: record.id,
            issuer_id: record.issuer_id,
            serial: record.serial.clone(),
            subject: record.subject.clone(),
            cert_der: record.cert_der.clone(),
        };
        for publisher in publishers.iter() {
            if let Err(e) = publisher.certificate_added(&event) {
                warn!(
                    "publisher {} failed for certificate 0x{}: {}",
                    publisher.name(),
                    record.serial,
                    e
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // revocation
    // ------------------------------------------------------------------

    pub fn revoke_certificate(
        &self,
        serial: &[u8],
        reason: CrlReason,
        invalidity_time: Option<OffsetDateTime>,
    ) -> Result<CertRecord> {
        let ca_id = self.read_info().ident.id();
        let serial_str = serial_hex(serial);
        let rev_info =
            CertRevocationInfo::new(reason, OffsetDateTime::now_utc(), invalidity_time);

        let record = self
            .store
            .revoke_cert(ca_id, &serial_str, rev_info.clone())?;

        let publishers = self.publishers.read().expect("publisher lock poisoned");
        for publisher in publishers.iter() {
            if let Err(e) =
                publisher.certificate_status_changed(ca_id, &serial_str, record.revocation.as_ref())
            {
                warn!("publisher {} failed: {}", publisher.name(), e);
            }
        }

        info!("revoked certificate 0x{} reason {:?}", serial_str, reason);
        Ok(record)
    }

    /// 仅允许从 certificateHold 状态解除
    pub fn unsuspend_certificate(&self, serial: &[u8]) -> Result<CertRecord> {
        self.revoke_certificate(serial, CrlReason::RemoveFromCrl, None)
    }

    pub fn remove_certificate(&self, serial: &[u8]) -> Result<CertRecord> {
        let ca_id = self.read_info().ident.id();
        let serial_str = serial_hex(serial);
        let record = self.store.remove_cert(ca_id, &serial_str)?;

        let publishers = self.publishers.read().expect("publisher lock poisoned");
        for publisher in publishers.iter() {
            if let Err(e) = publisher.certificate_removed(ca_id, &serial_str) {
                warn!("publisher {} failed: {}", publisher.name(), e);
            }
        }
        Ok(record)
    }

    // ------------------------------------------------------------------
    // CA-level revocation
    // ------------------------------------------------------------------

    pub fn revoke_ca(&self, rev_info: CertRevocationInfo) -> Result<()> {
        {
            let mut info = self.info.write().expect("ca info lock poisoned");
            if info.revocation_info.is_some() {
                return Err(OperationError::not_permitted("CA is already revoked"));
            }
            info.revocation_info = Some(rev_info.clone());
        }
        let ca_id = self.read_info().ident.id();
        self.store.set_issuer_revocation(ca_id, Some(&rev_info))?;
        warn!("CA {} revoked, reason {:?}", ca_id, rev_info.reason);
        Ok(())
    }

    pub fn unrevoke_ca(&self) -> Result<()> {
        {
            let mut info = self.info.write().expect("ca info lock poisoned");
            if info.revocation_info.is_none() {
                return Err(OperationError::not_permitted("CA is not revoked"));
            }
            info.revocation_info = None;
        }
        let ca_id = self.read_info().ident.id();
        self.store.set_issuer_revocation(ca_id, None)?;
        info!("CA {} unrevoked", ca_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // CRL
    // ------------------------------------------------------------------

    /// 生成一张完整 CRL 并入库
    pub fn generate_crl(&self, on_demand: bool) -> Result<Vec<u8>> {
        let ca_info = self.read_info();
        let control = match (&ca_info.crl_control, on_demand) {
            (Some(control), _) => control.clone(),
            (None, true) => CrlControl::default(),
            (None, false) => {
                return Err(OperationError::crl_failure("CRL generation is not activated"));
            }
        };

        let signer = self.signer_pool.any().ok_or_else(|| {
            OperationError::crl_failure("CA does not have any signer for CRL generation")
        })?;

        let filter = CertListFilter {
            issuer_id: Some(ca_info.ident.id()),
            revoked_only: true,
            ..CertListFilter::default()
        };
        let records = self
            .store
            .list_certs(&filter, CertOrderBy::RevocationTimeSerial, 0);
        let mut entries: Vec<CrlEntry> =
            records.iter().filter_map(CrlEntry::from_record).collect();

        let crl_number = self.store.next_crl_number(ca_info.ident.id())?;
        let this_update = OffsetDateTime::now_utc();
        let next_update = control.overlap.add_to(control.interval.add_to(this_update));

        let crl_der = build_crl(
            &ca_info,
            signer.as_ref(),
            &mut entries,
            crl_number,
            this_update,
            next_update,
        )?;

        let crl_id = self.store.next_cert_id(&self.id_generator)?;
        self.store.add_crl(
            ca_info.ident.id(),
            crl_id,
            crl_number,
            crl_der.clone(),
            this_update,
            next_update,
        )?;

        let publishers = self.publishers.read().expect("publisher lock poisoned");
        for publisher in publishers.iter() {
            if let Err(e) = publisher.crl_added(ca_info.ident.id(), crl_number, &crl_der) {
                warn!("publisher {} failed for CRL {}: {}", publisher.name(), crl_number, e);
            }
        }

        info!(
            "generated CRL {} of CA {} with {} entries",
            crl_number,
            ca_info.ident.name(),
            records.len()
        );
        Ok(crl_der)
    }

    // ------------------------------------------------------------------
    // republish
    // ------------------------------------------------------------------

    /// 批量重发布；单证书失败不打断整批
    pub fn publish_certs(&self, limit: usize, stop: &AtomicBool) -> Result<PublishReport> {
        let ca_info = self.read_info();
        let filter = CertListFilter {
            issuer_id: Some(ca_info.ident.id()),
            ..CertListFilter::default()
        };
        let records = self.store.list_certs(&filter, CertOrderBy::Id, limit);

        let publishers = self.publishers.read().expect("publisher lock poisoned");
        let mut report = PublishReport::default();

        for record in &records {
            if stop.load(Ordering::Relaxed) {
                warn!("republish of CA {} interrupted", ca_info.ident.name());
                break;
            }

            let event = PublishedCert {
                cert_id: record.id,
                issuer_id: record.issuer_id,
                serial: record.serial.clone(),
                subject: record.subject.clone(),
                cert_der: record.cert_der.clone(),
            };

            let mut failed = false;
            for publisher in publishers.iter() {
                if let Err(e) = publisher.certificate_added(&event) {
                    error!(
                        "republish of 0x{} via {} failed: {}",
                        record.serial,
                        publisher.name(),
                        e
                    );
                    report.failures.push((
                        record.serial.clone(),
                        publisher.name().to_string(),
                        e.to_string(),
                    ));
                    failed = true;
                }
            }
            if !failed {
                report.published += 1;
            }
        }

        Ok(report)
    }
}

fn random_ca_serial(nbytes: usize) -> Result<Vec<u8>> {
    let nbytes = nbytes.clamp(8, 20);
    let mut bytes = vec![0u8; nbytes];
    getrandom::fill(&mut bytes)
        .map_err(|e| OperationError::system_failure(format!("random source failure: {}", e)))?;
    bytes[0] &= 0x7F;
    if bytes.iter().all(|&b| b == 0) {
        bytes[nbytes - 1] = 1;
    }
    Ok(bytes)
}

fn to_asn1_time(t: OffsetDateTime) -> Result<Time> {
    let system_time: std::time::SystemTime = t.into();
    Time::try_from(system_time)
        .map_err(|e| OperationError::system_failure(format!("invalid time: {}", e)))
}
