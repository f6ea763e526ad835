//! 证书模板配置模型
//!
//! 模板以 JSON 配置，初始化时编译成 `Certprofile`。

use serde::{Deserialize, Serialize};

use custodia_core::Validity;

use crate::{
    serial::SerialNumberMode,
    types::{CertDomain, CertLevel, NotAfterMode},
};

/// 主体 RDN 规格
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdnConf {
    /// 属性类型：点分 OID 或常用名（CN、O、C 等）
    pub attr_type: String,
    /// 是否必须出现
    #[serde(default)]
    pub required: bool,
    /// 最多出现次数
    #[serde(default = "default_max_occurs")]
    pub max_occurs: u8,
    /// 固定值覆盖，忽略请求中的取值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

fn default_max_occurs() -> u8 {
    1
}

/// 扩展出现控制
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionControlConf {
    /// 点分 OID 或常用扩展名
    pub extn_type: String,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub permitted_in_request: bool,
}

/// 密钥用途配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsageConf {
    pub usage: String,
    #[serde(default)]
    pub required: bool,
}

/// 扩展密钥用途配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtKeyUsageConf {
    pub usage: String,
    #[serde(default)]
    pub required: bool,
}

/// AuthorityInfoAccess 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiaConf {
    #[serde(default)]
    pub include_ca_issuers: bool,
    #[serde(default)]
    pub include_ocsp: bool,
    /// caIssuers URI 允许的协议（空表示不限制）
    #[serde(default)]
    pub ca_issuers_protocols: Vec<String>,
    #[serde(default)]
    pub ocsp_protocols: Vec<String>,
}

/// CRL 分发点配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrlDpConf {
    #[serde(default)]
    pub protocols: Vec<String>,
}

/// 证书策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConf {
    pub policy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cps_uri: Option<String>,
}

/// 名称约束配置（dNSName 子树）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameConstraintsConf {
    #[serde(default)]
    pub permitted_dns: Vec<String>,
    #[serde(default)]
    pub excluded_dns: Vec<String>,
}

/// QC 声明配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcStatementsConf {
    /// etsi-qcs-QcCompliance
    #[serde(default)]
    pub compliance: bool,
    /// etsi-qcs-QcLimitValue: (currency, amount, exponent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_value: Option<QcLimitConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcLimitConf {
    pub currency: String,
    pub amount: u32,
    pub exponent: u8,
}

/// CCC 扩展配置，有且只有一个且必须 critical
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CccConf {
    pub extn_type: String,
    /// 预编码的 DER 值（hex）
    pub value: String,
}

/// 常量扩展配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstantExtensionConf {
    pub extn_type: String,
    #[serde(default)]
    pub critical: bool,
    /// 预编码的 DER 值（hex）
    pub value: String,
}

/// 服务端密钥生成配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum KeypairGenConf {
    #[default]
    InheritCa,
    Forbidden,
    Specified {
        keyspec: String,
    },
}

/// 完整的模板配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConf {
    pub cert_level: CertLevel,
    #[serde(default)]
    pub cert_domain: CertDomain,
    /// 仅支持 "v3"
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<Validity>,
    /// "current"、"midnight" 或带符号的秒偏移（如 "+300"）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(default)]
    pub not_after_mode: NotAfterMode,
    #[serde(default)]
    pub no_well_defined_expiration: bool,
    #[serde(default)]
    pub keypair_generation: KeypairGenConf,
    #[serde(default)]
    pub serial_number: SerialNumberMode,
    pub signature_algorithms: Vec<String>,
    /// SubCA/Cross 的 pathLenConstraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_len: Option<u8>,
    #[serde(default)]
    pub subject: Vec<RdnConf>,
    #[serde(default)]
    pub extensions: Vec<ExtensionControlConf>,
    #[serde(default)]
    pub key_usages: Vec<KeyUsageConf>,
    #[serde(default)]
    pub extended_key_usages: Vec<ExtKeyUsageConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_info_access: Option<AiaConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crl_distribution_points: Option<CrlDpConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshest_crl: Option<CrlDpConf>,
    #[serde(default)]
    pub certificate_policies: Vec<PolicyConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_constraints: Option<NameConstraintsConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc_statements: Option<QcStatementsConf>,
    /// 启用的 GM/T 0015 身份扩展（OID）
    #[serde(default)]
    pub gmt0015_extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ccc_extension: Option<CccConf>,
    #[serde(default)]
    pub constant_extensions: Vec<ConstantExtensionConf>,
    #[serde(default)]
    pub include_issuer_and_serial_in_aki: bool,
    /// SubjectInfoAccess 允许的 access method OID
    #[serde(default)]
    pub subject_info_access_modes: Vec<String>,
    /// 允许的公钥规格（空表示接受任何受支持规格）
    #[serde(default)]
    pub allowed_keyspecs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cert_size: Option<usize>,
}

fn default_version() -> String {
    "v3".to_string()
}

impl ProfileConf {
    /// 终端实体模板骨架：SKI/AKI/BasicConstraints/KeyUsage 必备，
    /// SAN 允许来自请求。
    pub fn end_entity(signature_algorithms: &[&str]) -> Self {
        Self {
            cert_level: CertLevel::EndEntity,
            cert_domain: CertDomain::Generic,
            version: default_version(),
            validity: Some(Validity::days(365)),
            not_before: None,
            not_after_mode: NotAfterMode::ByCa,
            no_well_defined_expiration: false,
            keypair_generation: KeypairGenConf::InheritCa,
            serial_number: SerialNumberMode::ByCa,
            signature_algorithms: signature_algorithms.iter().map(|s| s.to_string()).collect(),
            path_len: None,
            subject: vec![
                RdnConf {
                    attr_type: "CN".to_string(),
                    required: true,
                    max_occurs: 1,
                    value: None,
                },
                RdnConf {
                    attr_type: "O".to_string(),
                    required: false,
                    max_occurs: 1,
                    value: None,
                },
                RdnConf {
                    attr_type: "C".to_string(),
                    required: false,
                    max_occurs: 1,
                    value: None,
                },
            ],
            extensions: vec![
                ExtensionControlConf {
                    extn_type: "subjectKeyIdentifier".to_string(),
                    critical: false,
                    required: true,
                    permitted_in_request: false,
                },
                ExtensionControlConf {
                    extn_type: "authorityKeyIdentifier".to_string(),
                    critical: false,
                    required: true,
                    permitted_in_request: false,
                },
                ExtensionControlConf {
                    extn_type: "basicConstraints".to_string(),
                    critical: true,
                    required: true,
                    permitted_in_request: false,
                },
                ExtensionControlConf {
                    extn_type: "keyUsage".to_string(),
                    critical: true,
                    required: true,
                    permitted_in_request: true,
                },
                ExtensionControlConf {
                    extn_type: "subjectAltName".to_string(),
                    critical: false,
                    required: false,
                    permitted_in_request: true,
                },
            ],
            key_usages: vec![KeyUsageConf {
                usage: "digitalSignature".to_string(),
                required: true,
            }],
            extended_key_usages: Vec::new(),
            authority_info_access: None,
            crl_distribution_points: None,
            freshest_crl: None,
            certificate_policies: Vec::new(),
            name_constraints: None,
            qc_statements: None,
            gmt0015_extensions: Vec::new(),
            ccc_extension: None,
            constant_extensions: Vec::new(),
            include_issuer_and_serial_in_aki: false,
            subject_info_access_modes: Vec::new(),
            allowed_keyspecs: Vec::new(),
            max_cert_size: None,
        }
    }

    /// 下级 CA 模板骨架
    pub fn sub_ca(signature_algorithms: &[&str], path_len: Option<u8>) -> Self {
        let mut conf = Self::end_entity(signature_algorithms);
        conf.cert_level = CertLevel::SubCa;
        conf.validity = Some(Validity::years(10));
        conf.path_len = path_len;
        conf.key_usages = vec![
            KeyUsageConf {
                usage: "keyCertSign".to_string(),
                required: true,
            },
            KeyUsageConf {
                usage: "cRLSign".to_string(),
                required: true,
            },
        ];
        conf
    }
}
