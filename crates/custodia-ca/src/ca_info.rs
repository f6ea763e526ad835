//! CA 实例状态

use std::collections::BTreeMap;

use const_oid::db::rfc5280;
use der::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use x509_cert::{ext::pkix::name::GeneralName, name::Name, Certificate};

use custodia_core::{CertRevocationInfo, NameId, OperationError, Validity};
use custodia_profile::{CaUris, KeySpec, PublicCaInfo};

/// CA 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaStatus {
    Active,
    Inactive,
}

/// notAfter 超出 CA 有效期时 CA 侧的裁决方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidityMode {
    /// 一律拒绝
    #[default]
    Strict,
    /// 截断到 CA 的 notAfter
    Cutoff,
    /// 允许超出
    Lax,
}

/// CRL 生成控制
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrlControl {
    /// 完整 CRL 的生成间隔
    pub interval: Validity,
    /// nextUpdate 相对 thisUpdate 的余量
    pub overlap: Validity,
}

impl Default for CrlControl {
    fn default() -> Self {
        Self {
            interval: Validity::days(1),
            overlap: Validity::days(1),
        }
    }
}

/// 解析后的 CA 证书及其导出物
#[derive(Debug, Clone)]
pub struct CaCert {
    pub certificate: Certificate,
    pub der: Vec<u8>,
    pub subject: Name,
    pub subject_der: Vec<u8>,
    pub serial: Vec<u8>,
    pub subject_key_id: Vec<u8>,
    pub spki_der: Vec<u8>,
    pub subject_alt_name: Option<Vec<GeneralName>>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl CaCert {
    pub fn parse(der: &[u8]) -> Result<Self, OperationError> {
        let certificate = Certificate::from_der(der)
            .map_err(|e| OperationError::bad_request(format!("invalid CA certificate: {}", e)))?;
        let tbs = &certificate.tbs_certificate;

        let subject = tbs.subject.clone();
        let subject_der = subject
            .to_der()
            .map_err(|e| OperationError::system_failure(format!("encode subject: {}", e)))?;
        let serial = tbs.serial_number.as_bytes().to_vec();
        let spki_der = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| OperationError::system_failure(format!("encode SPKI: {}", e)))?;

        // SKI from the extension when present, else RFC 5280 method 1
        let mut subject_key_id = None;
        let mut subject_alt_name = None;
        if let Some(extensions) = &tbs.extensions {
            for extension in extensions {
                if extension.extn_id == rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER {
                    if let Ok(octet) =
                        der::asn1::OctetString::from_der(extension.extn_value.as_bytes())
                    {
                        subject_key_id = Some(octet.as_bytes().to_vec());
                    }
                } else if extension.extn_id == rfc5280::ID_CE_SUBJECT_ALT_NAME {
                    if let Ok(names) =
                        Vec::<GeneralName>::from_der(extension.extn_value.as_bytes())
                    {
                        subject_alt_name = Some(names);
                    }
                }
            }
        }
        let subject_key_id = match subject_key_id {
            Some(ski) => ski,
            None => {
                let key_bytes = tbs.subject_public_key_info.subject_public_key.raw_bytes();
                Sha1::digest(key_bytes).to_vec()
            }
        };

        let not_before = to_offset_date_time(&tbs.validity.not_before)?;
        let not_after = to_offset_date_time(&tbs.validity.not_after)?;

        Ok(Self {
            certificate,
            der: der.to_vec(),
            subject,
            subject_der,
            serial,
            subject_key_id,
            spki_der,
            subject_alt_name,
            not_before,
            not_after,
        })
    }

    /// SHA-1 指纹（hex 小写）
    pub fn sha1_fingerprint(&self) -> String {
        hex::encode(Sha1::digest(&self.der))
    }
}

pub(crate) fn to_offset_date_time(
    time: &x509_cert::time::Time,
) -> Result<OffsetDateTime, OperationError> {
    let system_time = match time {
        x509_cert::time::Time::UtcTime(t) => t.to_system_time(),
        x509_cert::time::Time::GeneralTime(t) => t.to_system_time(),
    };
    OffsetDateTime::from(system_time)
        .replace_nanosecond(0)
        .map_err(|e| OperationError::system_failure(format!("invalid certificate time: {}", e)))
}

/// 每个已启动 CA 的完整状态
#[derive(Clone)]
pub struct CaInfo {
    pub ident: NameId,
    pub cert: CaCert,
    pub cert_chain: Vec<Vec<u8>>,
    pub ca_uris: CaUris,
    pub max_validity: Validity,
    pub validity_mode: ValidityMode,
    /// BasicConstraints.pathLenConstraint；None 表示不受限
    pub path_len: Option<u8>,
    pub no_new_certificate_after: OffsetDateTime,
    pub revocation_info: Option<CertRevocationInfo>,
    /// CA 自身密钥的规格（服务端生成继承用）
    pub keyspec: KeySpec,
    pub extra_control: BTreeMap<String, String>,
    pub crl_control: Option<CrlControl>,
    /// CA 随机序列号的字节数
    pub serial_number_bytes: usize,
    pub status: CaStatus,
}

impl CaInfo {
    pub fn public_ca_info(&self) -> PublicCaInfo {
        PublicCaInfo {
            subject: self.cert.subject.clone(),
            subject_der: self.cert.subject_der.clone(),
            serial: self.cert.serial.clone(),
            subject_key_id: self.cert.subject_key_id.clone(),
            subject_alt_name: self.cert.subject_alt_name.clone(),
            ca_uris: self.ca_uris.clone(),
            spki_der: self.cert.spki_der.clone(),
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation_info.is_some()
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.cert.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.cert.not_after
    }
}
