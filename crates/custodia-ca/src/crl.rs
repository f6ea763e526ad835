//! CRL 组装
//!
//! 条目按 (撤销时间, 序列号) 排序，带 CRLNumber 与 AKI 扩展。

use const_oid::db::rfc5280;
use der::{asn1::OctetString, Decode, Encode};
use time::OffsetDateTime;
use x509_cert::{
    crl::{CertificateList, RevokedCert, TbsCertList},
    ext::{pkix::AuthorityKeyIdentifier, Extension},
    serial_number::SerialNumber,
    time::Time,
    Version,
};

use custodia_core::{CertRevocationInfo, CrlReason, OperationError, Result};
use custodia_profile::extensions::encode_crl_number;

use crate::{ca_info::CaInfo, signer::ContentSigner, store::CertRecord};

/// 一条 CRL 条目
pub struct CrlEntry {
    pub serial: Vec<u8>,
    pub revocation: CertRevocationInfo,
}

impl CrlEntry {
    pub fn from_record(record: &CertRecord) -> Option<Self> {
        let revocation = record.revocation.clone()?;
        let serial = decode_serial_hex(&record.serial)?;
        Some(Self { serial, revocation })
    }
}

fn decode_serial_hex(serial: &str) -> Option<Vec<u8>> {
    let padded = if serial.len() % 2 == 1 {
        format!("0{}", serial)
    } else {
        serial.to_string()
    };
    hex::decode(padded).ok()
}

fn to_asn1_time(t: OffsetDateTime) -> Result<Time> {
    let system_time: std::time::SystemTime = t.into();
    Time::try_from(system_time)
        .map_err(|e| OperationError::crl_failure(format!("invalid CRL time: {}", e)))
}

fn reason_code_extension(reason: CrlReason) -> Result<Extension> {
    use x509_cert::ext::pkix::CrlReason as X509CrlReason;

    let mapped = match reason {
        CrlReason::Unspecified => X509CrlReason::Unspecified,
        CrlReason::KeyCompromise => X509CrlReason::KeyCompromise,
        CrlReason::CaCompromise => X509CrlReason::CaCompromise,
        CrlReason::AffiliationChanged => X509CrlReason::AffiliationChanged,
        CrlReason::Superseded => X509CrlReason::Superseded,
        CrlReason::CessationOfOperation => X509CrlReason::CessationOfOperation,
        CrlReason::CertificateHold => X509CrlReason::CertificateHold,
        CrlReason::RemoveFromCrl => X509CrlReason::RemoveFromCRL,
        CrlReason::PrivilegeWithdrawn => X509CrlReason::PrivilegeWithdrawn,
        CrlReason::AaCompromise => X509CrlReason::AaCompromise,
    };

    let encoded = mapped
        .to_der()
        .map_err(|e| OperationError::crl_failure(e.to_string()))?;
    Ok(Extension {
        extn_id: rfc5280::ID_CE_CRL_REASONS,
        critical: false,
        extn_value: OctetString::new(encoded)
            .map_err(|e| OperationError::crl_failure(e.to_string()))?,
    })
}

/// 组装并签名一张完整 CRL
pub fn build_crl(
    ca_info: &CaInfo,
    signer: &dyn ContentSigner,
    entries: &mut Vec<CrlEntry>,
    crl_number: i64,
    this_update: OffsetDateTime,
    next_update: OffsetDateTime,
) -> Result<Vec<u8>> {
    entries.sort_by(|a, b| {
        let time_a = a.revocation.revocation_time.unix_timestamp();
        let time_b = b.revocation.revocation_time.unix_timestamp();
        time_a.cmp(&time_b).then_with(|| a.serial.cmp(&b.serial))
    });

    let mut revoked = Vec::with_capacity(entries.len());
    for entry in entries.iter() {
        let serial = SerialNumber::new(&entry.serial)
            .map_err(|e| OperationError::crl_failure(format!("invalid serial: {}", e)))?;

        let mut crl_entry_extensions = vec![reason_code_extension(entry.revocation.reason)?];
        if let Some(invalidity) = entry.revocation.invalidity_time {
            let encoded = der::asn1::GeneralizedTime::from_unix_duration(
                std::time::Duration::from_secs(invalidity.unix_timestamp().max(0) as u64),
            )
            .and_then(|t| t.to_der())
            .map_err(|e| OperationError::crl_failure(e.to_string()))?;
            crl_entry_extensions.push(Extension {
                extn_id: rfc5280::ID_CE_INVALIDITY_DATE,
                critical: false,
                extn_value: OctetString::new(encoded)
                    .map_err(|e| OperationError::crl_failure(e.to_string()))?,
            });
        }

        revoked.push(RevokedCert {
            serial_number: serial,
            revocation_date: to_asn1_time(entry.revocation.revocation_time)?,
            crl_entry_extensions: Some(crl_entry_extensions),
        });
    }

    let aki = AuthorityKeyIdentifier {
        key_identifier: Some(
            OctetString::new(ca_info.cert.subject_key_id.clone())
                .map_err(|e| OperationError::crl_failure(e.to_string()))?,
        ),
        authority_cert_issuer: None,
        authority_cert_serial_number: None,
    };

    let crl_extensions = vec![
        Extension {
            extn_id: rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER,
            critical: false,
            extn_value: OctetString::new(
                aki.to_der()
                    .map_err(|e| OperationError::crl_failure(e.to_string()))?,
            )
            .map_err(|e| OperationError::crl_failure(e.to_string()))?,
        },
        Extension {
            extn_id: rfc5280::ID_CE_CRL_NUMBER,
            critical: false,
            extn_value: OctetString::new(
                encode_crl_number(crl_number)
                    .map_err(|e| OperationError::crl_failure(e.to_string()))?,
            )
            .map_err(|e| OperationError::crl_failure(e.to_string()))?,
        },
    ];

    let signature_algorithm = signer.algorithm().algorithm_identifier();

    let tbs = TbsCertList {
        version: Version::V2,
        signature: signature_algorithm.clone(),
        issuer: ca_info.cert.subject.clone(),
        this_update: to_asn1_time(this_update)?,
        next_update: Some(to_asn1_time(next_update)?),
        revoked_certificates: if revoked.is_empty() {
            None
        } else {
            Some(revoked)
        },
        crl_extensions: Some(crl_extensions),
    };

    let tbs_der = tbs
        .to_der()
        .map_err(|e| OperationError::crl_failure(format!("encode TbsCertList: {}", e)))?;
    let signature = signer
        .sign(&tbs_der)
        .map_err(|e| OperationError::crl_failure(format!("sign CRL: {}", e)))?;

    let crl = CertificateList {
        tbs_cert_list: tbs,
        signature_algorithm,
        signature: der::asn1::BitString::from_bytes(&signature)
            .map_err(|e| OperationError::crl_failure(e.to_string()))?,
    };

    crl.to_der()
        .map_err(|e| OperationError::crl_failure(format!("encode CRL: {}", e)))
}

/// 解析 CRL 的条目序列（测试用）
pub fn parse_crl_serials(crl_der: &[u8]) -> Result<Vec<Vec<u8>>> {
    let crl = CertificateList::from_der(crl_der)
        .map_err(|e| OperationError::crl_failure(format!("parse CRL: {}", e)))?;
    Ok(crl
        .tbs_cert_list
        .revoked_certificates
        .unwrap_or_default()
        .iter()
        .map(|r| r.serial_number.as_bytes().to_vec())
        .collect())
}
