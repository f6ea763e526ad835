//! 模板引擎的公共类型

use std::{collections::BTreeSet, fmt, str::FromStr};

use const_oid::ObjectIdentifier;
use der::{asn1::Any, Decode, Encode};
use pkcs8::spki::AlgorithmIdentifierOwned;
use serde::{Deserialize, Serialize};
use x509_cert::{ext::pkix::name::GeneralNames, name::Name};

use crate::error::ProfileError;

/// 证书级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertLevel {
    RootCa,
    SubCa,
    Cross,
    EndEntity,
}

/// 证书所属策略域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertDomain {
    #[default]
    Generic,
    /// CA/Browser Forum 基线要求
    CabForumBr,
}

/// notAfter 超出 CA 有效期时模板侧的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotAfterMode {
    /// 交给CA裁决
    #[default]
    ByCa,
    /// 一律拒绝
    Strict,
    /// 截断到CA的notAfter
    Cutoff,
}

/// notBefore 的取值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotBeforeMode {
    /// 使用请求时间（或当前时间）
    #[default]
    Current,
    /// 当天零点
    Midnight,
    /// 相对当前时间的固定偏移（秒）
    Offset(i64),
}

/// 服务端密钥生成控制
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeypairGenControl {
    /// 继承CA自身的密钥规格
    #[default]
    InheritCa,
    /// 禁止服务端生成
    Forbidden,
    /// 指定的密钥规格
    Explicit(KeySpec),
}

/// 椭圆曲线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    Secp256r1,
    Secp384r1,
}

impl EcCurve {
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            EcCurve::Secp256r1 => const_oid::db::rfc5912::SECP_256_R_1,
            EcCurve::Secp384r1 => const_oid::db::rfc5912::SECP_384_R_1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EcCurve::Secp256r1 => "secp256r1",
            EcCurve::Secp384r1 => "secp384r1",
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == const_oid::db::rfc5912::SECP_256_R_1 {
            Some(EcCurve::Secp256r1)
        } else if *oid == const_oid::db::rfc5912::SECP_384_R_1 {
            Some(EcCurve::Secp384r1)
        } else {
            None
        }
    }
}

/// 密钥规格，如 `RSA/2048`、`EC/secp256r1`、`ED25519`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpec {
    Rsa(u32),
    Ec(EcCurve),
    Ed25519,
}

impl KeySpec {
    /// 密钥算法 OID
    pub fn key_algorithm_oid(&self) -> ObjectIdentifier {
        match self {
            KeySpec::Rsa(_) => const_oid::db::rfc5912::RSA_ENCRYPTION,
            KeySpec::Ec(_) => const_oid::db::rfc5912::ID_EC_PUBLIC_KEY,
            KeySpec::Ed25519 => const_oid::db::rfc8410::ID_ED_25519,
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Rsa(bits) => write!(f, "RSA/{}", bits),
            KeySpec::Ec(curve) => write!(f, "EC/{}", curve.name()),
            KeySpec::Ed25519 => f.write_str("ED25519"),
        }
    }
}

impl FromStr for KeySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let upper = s.to_ascii_uppercase();
        if upper == "ED25519" {
            return Ok(KeySpec::Ed25519);
        }

        let (alg, rest) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid keyspec '{}'", s))?;

        match alg.to_ascii_uppercase().as_str() {
            "RSA" => {
                let bits: u32 = rest
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid RSA size '{}'", rest))?;
                if !(1024..=8192).contains(&bits) || bits % 256 != 0 {
                    return Err(format!("unsupported RSA size {}", bits));
                }
                Ok(KeySpec::Rsa(bits))
            }
            "EC" => match rest.trim().to_ascii_lowercase().as_str() {
                "secp256r1" | "p-256" | "prime256v1" => Ok(KeySpec::Ec(EcCurve::Secp256r1)),
                "secp384r1" | "p-384" => Ok(KeySpec::Ec(EcCurve::Secp384r1)),
                other => Err(format!("unsupported EC curve '{}'", other)),
            },
            other => Err(format!("unsupported key algorithm '{}'", other)),
        }
    }
}

/// 签名算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignAlgo {
    Ed25519,
    EcdsaSha256,
    EcdsaSha384,
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignAlgo {
    pub fn name(&self) -> &'static str {
        match self {
            SignAlgo::Ed25519 => "Ed25519",
            SignAlgo::EcdsaSha256 => "SHA256withECDSA",
            SignAlgo::EcdsaSha384 => "SHA384withECDSA",
            SignAlgo::RsaSha256 => "SHA256withRSA",
            SignAlgo::RsaSha384 => "SHA384withRSA",
            SignAlgo::RsaSha512 => "SHA512withRSA",
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        use const_oid::db::{rfc5912, rfc8410};
        match self {
            SignAlgo::Ed25519 => rfc8410::ID_ED_25519,
            SignAlgo::EcdsaSha256 => rfc5912::ECDSA_WITH_SHA_256,
            SignAlgo::EcdsaSha384 => rfc5912::ECDSA_WITH_SHA_384,
            SignAlgo::RsaSha256 => rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            SignAlgo::RsaSha384 => rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
            SignAlgo::RsaSha512 => rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
        }
    }

    /// 对应私钥的算法 OID
    pub fn key_algorithm_oid(&self) -> ObjectIdentifier {
        use const_oid::db::{rfc5912, rfc8410};
        match self {
            SignAlgo::Ed25519 => rfc8410::ID_ED_25519,
            SignAlgo::EcdsaSha256 | SignAlgo::EcdsaSha384 => rfc5912::ID_EC_PUBLIC_KEY,
            SignAlgo::RsaSha256 | SignAlgo::RsaSha384 | SignAlgo::RsaSha512 => {
                rfc5912::RSA_ENCRYPTION
            }
        }
    }

    /// 签名算法标识（RSA 系列带 NULL 参数）
    pub fn algorithm_identifier(&self) -> AlgorithmIdentifierOwned {
        let parameters = match self {
            SignAlgo::RsaSha256 | SignAlgo::RsaSha384 | SignAlgo::RsaSha512 => {
                let null_der = der::asn1::Null.to_der().expect("NULL encoding");
                Some(Any::from_der(&null_der).expect("NULL as Any"))
            }
            _ => None,
        };

        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters,
        }
    }
}

impl FromStr for SignAlgo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ED25519" => Ok(SignAlgo::Ed25519),
            "SHA256WITHECDSA" | "ECDSA-SHA256" => Ok(SignAlgo::EcdsaSha256),
            "SHA384WITHECDSA" | "ECDSA-SHA384" => Ok(SignAlgo::EcdsaSha384),
            "SHA256WITHRSA" | "RSA-SHA256" => Ok(SignAlgo::RsaSha256),
            "SHA384WITHRSA" | "RSA-SHA384" => Ok(SignAlgo::RsaSha384),
            "SHA512WITHRSA" | "RSA-SHA512" => Ok(SignAlgo::RsaSha512),
            other => Err(format!("unknown signature algorithm '{}'", other)),
        }
    }
}

/// 单个扩展的出现控制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionControl {
    pub critical: bool,
    pub required: bool,
    pub permitted_in_request: bool,
}

impl ExtensionControl {
    pub fn new(critical: bool, required: bool, permitted_in_request: bool) -> Self {
        Self {
            critical,
            required,
            permitted_in_request,
        }
    }
}

/// 密钥用途位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsageBit {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

impl KeyUsageBit {
    pub fn flag(&self) -> x509_cert::ext::pkix::KeyUsages {
        use x509_cert::ext::pkix::KeyUsages;
        match self {
            KeyUsageBit::DigitalSignature => KeyUsages::DigitalSignature,
            KeyUsageBit::ContentCommitment => KeyUsages::NonRepudiation,
            KeyUsageBit::KeyEncipherment => KeyUsages::KeyEncipherment,
            KeyUsageBit::DataEncipherment => KeyUsages::DataEncipherment,
            KeyUsageBit::KeyAgreement => KeyUsages::KeyAgreement,
            KeyUsageBit::KeyCertSign => KeyUsages::KeyCertSign,
            KeyUsageBit::CrlSign => KeyUsages::CRLSign,
            KeyUsageBit::EncipherOnly => KeyUsages::EncipherOnly,
            KeyUsageBit::DecipherOnly => KeyUsages::DecipherOnly,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyUsageBit::DigitalSignature => "digitalSignature",
            KeyUsageBit::ContentCommitment => "contentCommitment",
            KeyUsageBit::KeyEncipherment => "keyEncipherment",
            KeyUsageBit::DataEncipherment => "dataEncipherment",
            KeyUsageBit::KeyAgreement => "keyAgreement",
            KeyUsageBit::KeyCertSign => "keyCertSign",
            KeyUsageBit::CrlSign => "cRLSign",
            KeyUsageBit::EncipherOnly => "encipherOnly",
            KeyUsageBit::DecipherOnly => "decipherOnly",
        }
    }
}

impl FromStr for KeyUsageBit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "digitalSignature" => KeyUsageBit::DigitalSignature,
            "contentCommitment" | "nonRepudiation" => KeyUsageBit::ContentCommitment,
            "keyEncipherment" => KeyUsageBit::KeyEncipherment,
            "dataEncipherment" => KeyUsageBit::DataEncipherment,
            "keyAgreement" => KeyUsageBit::KeyAgreement,
            "keyCertSign" => KeyUsageBit::KeyCertSign,
            "cRLSign" | "crlSign" => KeyUsageBit::CrlSign,
            "encipherOnly" => KeyUsageBit::EncipherOnly,
            "decipherOnly" => KeyUsageBit::DecipherOnly,
            other => return Err(format!("unknown key usage '{}'", other)),
        })
    }
}

/// 密钥用途控制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsageControl {
    pub usage: KeyUsageBit,
    pub required: bool,
}

/// 扩展密钥用途控制
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtKeyUsageControl {
    pub usage: ObjectIdentifier,
    pub required: bool,
}

/// AuthorityInfoAccess 控制
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiaControl {
    pub include_ca_issuers: bool,
    pub include_ocsp: bool,
    pub ca_issuers_protocols: Option<BTreeSet<String>>,
    pub ocsp_protocols: Option<BTreeSet<String>>,
}

/// CRL 分发点协议白名单
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrlDpControl {
    pub protocols: Option<BTreeSet<String>>,
}

/// CA 对外公布的 URI 集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaUris {
    #[serde(default)]
    pub cacert_uris: Vec<String>,
    #[serde(default)]
    pub ocsp_uris: Vec<String>,
    #[serde(default)]
    pub crl_uris: Vec<String>,
    #[serde(default)]
    pub delta_crl_uris: Vec<String>,
}

impl CaUris {
    pub fn is_empty(&self) -> bool {
        self.cacert_uris.is_empty()
            && self.ocsp_uris.is_empty()
            && self.crl_uris.is_empty()
            && self.delta_crl_uris.is_empty()
    }
}

/// 扩展计算需要的 CA 公共信息
#[derive(Debug, Clone)]
pub struct PublicCaInfo {
    /// CA 证书主体
    pub subject: Name,
    /// 主体 DER
    pub subject_der: Vec<u8>,
    /// CA 证书序列号（大端字节）
    pub serial: Vec<u8>,
    /// CA 证书的 SubjectKeyIdentifier 值
    pub subject_key_id: Vec<u8>,
    /// CA 证书的 SubjectAltName（若有）
    pub subject_alt_name: Option<GeneralNames>,
    /// CA 公布的 URI
    pub ca_uris: CaUris,
    /// CA 公钥 SPKI 的 DER
    pub spki_der: Vec<u8>,
}

/// getSubject 的结果
#[derive(Debug, Clone)]
pub struct SubjectInfo {
    pub granted_subject: Name,
    pub warning: Option<String>,
}

/// 解析点分 OID 或常用扩展名
pub fn parse_oid(s: &str) -> Result<ObjectIdentifier, ProfileError> {
    if let Some(oid) = crate::oids::well_known_extension(s) {
        return Ok(oid);
    }
    ObjectIdentifier::from_str(s)
        .map_err(|_| ProfileError::config(format!("invalid OID '{}'", s)))
}
