//! 编译后的证书模板
//!
//! `Certprofile` 由 `ProfileConf` 初始化而来，初始化即完成全部配置校验；
//! 之后不可变，可被多个签发线程共享。

use std::collections::{BTreeMap, BTreeSet};

use const_oid::ObjectIdentifier;
use custodia_core::{NameId, Validity};
use der::Encode;
use pkcs8::spki::SubjectPublicKeyInfoOwned;
use time::OffsetDateTime;

use crate::{
    baseline::{self, BrPolicy},
    conf::{KeypairGenConf, ProfileConf, RdnConf},
    error::{ProfileError, Result},
    iso3166, keycheck, oids,
    serial::{self, SerialNumberMode},
    subject,
    types::{
        parse_oid, AiaControl, CertDomain, CertLevel, CrlDpControl, ExtKeyUsageControl,
        ExtensionControl, KeySpec, KeyUsageBit, KeyUsageControl, KeypairGenControl, NotAfterMode,
        NotBeforeMode, SignAlgo, SubjectInfo,
    },
};

/// 编译后的 RDN 规格
#[derive(Debug, Clone)]
pub(crate) struct RdnSpec {
    pub oid: ObjectIdentifier,
    pub required: bool,
    pub max_occurs: u8,
    pub fixed_value: Option<String>,
    pub label: String,
}

/// 不可变的证书模板
#[derive(Debug)]
pub struct Certprofile {
    ident: NameId,
    cert_level: CertLevel,
    cert_domain: CertDomain,
    validity: Option<Validity>,
    not_before_mode: NotBeforeMode,
    not_after_mode: NotAfterMode,
    no_well_defined_expiration: bool,
    keypair_gen: KeypairGenControl,
    serial_mode: SerialNumberMode,
    sign_algos: Vec<SignAlgo>,
    path_len: Option<u8>,
    pub(crate) subject_rdns: Vec<RdnSpec>,
    pub(crate) extension_controls: BTreeMap<ObjectIdentifier, ExtensionControl>,
    pub(crate) key_usages: Vec<KeyUsageControl>,
    pub(crate) ext_key_usages: Vec<ExtKeyUsageControl>,
    pub(crate) aia_control: Option<AiaControl>,
    pub(crate) crl_dp_control: Option<CrlDpControl>,
    pub(crate) freshest_crl_control: Option<CrlDpControl>,
    /// (policy oid, optional CPS uri)
    pub(crate) policies: Vec<(ObjectIdentifier, Option<String>)>,
    pub(crate) name_constraints: Option<(Vec<String>, Vec<String>)>,
    pub(crate) qc_statements: Option<crate::conf::QcStatementsConf>,
    pub(crate) gmt0015: BTreeSet<ObjectIdentifier>,
    /// (oid, precomputed DER value), 必为 critical
    pub(crate) ccc: Option<(ObjectIdentifier, Vec<u8>)>,
    pub(crate) constant_extensions: Vec<(ObjectIdentifier, Vec<u8>)>,
    pub(crate) include_issuer_and_serial_in_aki: bool,
    pub(crate) sia_modes: Vec<ObjectIdentifier>,
    allowed_keyspecs: Vec<KeySpec>,
    max_cert_size: Option<usize>,
}

impl Certprofile {
    /// 解析并校验配置，得到不可变模板
    pub fn initialize(ident: NameId, conf: ProfileConf) -> Result<Self> {
        if conf.version != "v3" {
            return Err(ProfileError::config(format!(
                "unsupported certificate version '{}'",
                conf.version
            )));
        }

        if conf.no_well_defined_expiration && conf.cert_level != CertLevel::EndEntity {
            return Err(ProfileError::config(
                "CA certificate is not allowed to have notAfter 99991231235959Z",
            ));
        }

        if conf.signature_algorithms.is_empty() {
            return Err(ProfileError::config("no signature algorithm specified"));
        }
        let mut sign_algos = Vec::with_capacity(conf.signature_algorithms.len());
        for name in &conf.signature_algorithms {
            sign_algos.push(name.parse::<SignAlgo>().map_err(ProfileError::Config)?);
        }

        let not_before_mode = parse_not_before(conf.not_before.as_deref())?;

        let keypair_gen = match &conf.keypair_generation {
            KeypairGenConf::InheritCa => KeypairGenControl::InheritCa,
            KeypairGenConf::Forbidden => KeypairGenControl::Forbidden,
            KeypairGenConf::Specified { keyspec } => KeypairGenControl::Explicit(
                keyspec.parse::<KeySpec>().map_err(ProfileError::Config)?,
            ),
        };

        let mut subject_rdns = Vec::with_capacity(conf.subject.len());
        for rdn in &conf.subject {
            subject_rdns.push(compile_rdn(rdn)?);
        }

        let mut extension_controls = BTreeMap::new();
        for control in &conf.extensions {
            let oid = parse_oid(&control.extn_type)?;
            let previous = extension_controls.insert(
                oid,
                ExtensionControl::new(
                    control.critical,
                    control.required,
                    control.permitted_in_request,
                ),
            );
            if previous.is_some() {
                return Err(ProfileError::config(format!(
                    "duplicated extension control for {}",
                    control.extn_type
                )));
            }
        }

        let mut key_usages = Vec::with_capacity(conf.key_usages.len());
        for ku in &conf.key_usages {
            let usage: KeyUsageBit = ku.usage.parse().map_err(ProfileError::Config)?;
            key_usages.push(KeyUsageControl {
                usage,
                required: ku.required,
            });
        }

        if conf.cert_level == CertLevel::EndEntity {
            for ku in &key_usages {
                if matches!(ku.usage, KeyUsageBit::KeyCertSign | KeyUsageBit::CrlSign) {
                    return Err(ProfileError::config(format!(
                        "key usage {} is not permitted in an end-entity profile",
                        ku.usage.name()
                    )));
                }
            }
        }

        let mut ext_key_usages = Vec::with_capacity(conf.extended_key_usages.len());
        for eku in &conf.extended_key_usages {
            ext_key_usages.push(ExtKeyUsageControl {
                usage: parse_eku(&eku.usage)?,
                required: eku.required,
            });
        }

        let aia_control = conf.authority_info_access.as_ref().map(|aia| AiaControl {
            include_ca_issuers: aia.include_ca_issuers,
            include_ocsp: aia.include_ocsp,
            ca_issuers_protocols: to_protocol_set(&aia.ca_issuers_protocols),
            ocsp_protocols: to_protocol_set(&aia.ocsp_protocols),
        });

        let crl_dp_control = conf.crl_distribution_points.as_ref().map(|dp| CrlDpControl {
            protocols: to_protocol_set(&dp.protocols),
        });
        let freshest_crl_control = conf.freshest_crl.as_ref().map(|dp| CrlDpControl {
            protocols: to_protocol_set(&dp.protocols),
        });

        let mut policies = Vec::with_capacity(conf.certificate_policies.len());
        for policy in &conf.certificate_policies {
            policies.push((parse_oid(&policy.policy_id)?, policy.cps_uri.clone()));
        }

        // CA/B BR end-entity certificates must carry the SubjectAltName
        if conf.cert_domain == CertDomain::CabForumBr && conf.cert_level == CertLevel::EndEntity {
            let san = extension_controls.get(&const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME);
            let permitted = san.map(|c| c.permitted_in_request).unwrap_or(false);
            if !permitted {
                return Err(ProfileError::config(
                    "SubjectAltName must be controlled and permitted in request \
                     for a CABForumBR end-entity profile",
                ));
            }
        }

        let name_constraints = conf
            .name_constraints
            .as_ref()
            .map(|nc| (nc.permitted_dns.clone(), nc.excluded_dns.clone()));
        if let Some((permitted, excluded)) = &name_constraints {
            if permitted.is_empty() && excluded.is_empty() {
                return Err(ProfileError::config(
                    "nameConstraints without permitted or excluded subtrees",
                ));
            }
        }

        let mut gmt0015 = BTreeSet::new();
        for oid_str in &conf.gmt0015_extensions {
            let oid = parse_oid(oid_str)?;
            if !oids::GMT0015_EXTENSIONS.contains(&oid) {
                return Err(ProfileError::config(format!(
                    "{} is not a GM/T 0015 identity extension",
                    oid
                )));
            }
            gmt0015.insert(oid);
        }

        let ccc = match &conf.ccc_extension {
            None => None,
            Some(ccc) => {
                let oid = parse_oid(&ccc.extn_type)?;
                let control = extension_controls.get(&oid).ok_or_else(|| {
                    ProfileError::config("CCC extension is not listed in the extension controls")
                })?;
                if !control.critical {
                    return Err(ProfileError::config("CCC extension must be critical"));
                }
                let value = hex::decode(&ccc.value)
                    .map_err(|_| ProfileError::config("CCC extension value is not valid hex"))?;
                Some((oid, value))
            }
        };

        let mut constant_extensions = Vec::with_capacity(conf.constant_extensions.len());
        let mut seen_constant = BTreeSet::new();
        for constant in &conf.constant_extensions {
            let oid = parse_oid(&constant.extn_type)?;
            if let Some((ccc_oid, _)) = &ccc {
                if oid == *ccc_oid {
                    return Err(ProfileError::config(
                        "CCC extension may not be listed twice",
                    ));
                }
            }
            if !seen_constant.insert(oid) {
                return Err(ProfileError::config(format!(
                    "duplicated constant extension {}",
                    oid
                )));
            }
            let value = hex::decode(&constant.value).map_err(|_| {
                ProfileError::config(format!("constant extension {} value is not valid hex", oid))
            })?;
            constant_extensions.push((oid, value));
        }

        let mut sia_modes = Vec::with_capacity(conf.subject_info_access_modes.len());
        for mode in &conf.subject_info_access_modes {
            sia_modes.push(parse_oid(mode)?);
        }

        let mut allowed_keyspecs = Vec::with_capacity(conf.allowed_keyspecs.len());
        for spec in &conf.allowed_keyspecs {
            allowed_keyspecs.push(spec.parse::<KeySpec>().map_err(ProfileError::Config)?);
        }

        Ok(Self {
            ident,
            cert_level: conf.cert_level,
            cert_domain: conf.cert_domain,
            validity: conf.validity,
            not_before_mode,
            not_after_mode: conf.not_after_mode,
            no_well_defined_expiration: conf.no_well_defined_expiration,
            keypair_gen,
            serial_mode: conf.serial_number,
            sign_algos,
            path_len: conf.path_len,
            subject_rdns,
            extension_controls,
            key_usages,
            ext_key_usages,
            aia_control,
            crl_dp_control,
            freshest_crl_control,
            policies,
            name_constraints,
            qc_statements: conf.qc_statements.clone(),
            gmt0015,
            ccc,
            constant_extensions,
            include_issuer_and_serial_in_aki: conf.include_issuer_and_serial_in_aki,
            sia_modes,
            allowed_keyspecs,
            max_cert_size: conf.max_cert_size,
        })
    }

    pub fn ident(&self) -> &NameId {
        &self.ident
    }

    pub fn cert_level(&self) -> CertLevel {
        self.cert_level
    }

    pub fn cert_domain(&self) -> CertDomain {
        self.cert_domain
    }

    pub fn validity(&self) -> Option<Validity> {
        self.validity
    }

    pub fn not_after_mode(&self) -> NotAfterMode {
        self.not_after_mode
    }

    pub fn has_no_well_defined_expiration_date(&self) -> bool {
        self.no_well_defined_expiration
    }

    pub fn keypair_gen_control(&self) -> &KeypairGenControl {
        &self.keypair_gen
    }

    pub fn serial_number_mode(&self) -> SerialNumberMode {
        self.serial_mode
    }

    pub fn signature_algorithms(&self) -> &[SignAlgo] {
        &self.sign_algos
    }

    pub fn path_len_basic_constraint(&self) -> Option<u8> {
        self.path_len
    }

    pub fn extension_controls(&self) -> &BTreeMap<ObjectIdentifier, ExtensionControl> {
        &self.extension_controls
    }

    pub fn max_cert_size(&self) -> Option<usize> {
        self.max_cert_size
    }

    /// 模板侧的 notBefore 取值
    pub fn not_before(&self, requested: Option<OffsetDateTime>, now: OffsetDateTime) -> OffsetDateTime {
        match self.not_before_mode {
            NotBeforeMode::Current => requested.unwrap_or(now),
            NotBeforeMode::Midnight => {
                let t = requested.unwrap_or(now);
                t.replace_time(time::Time::MIDNIGHT)
            }
            NotBeforeMode::Offset(seconds) => now + time::Duration::seconds(seconds),
        }
    }

    /// 模板驱动的序列号；`None` 表示交给 CA 生成
    pub fn generate_serial_number(
        &self,
        ca_subject_der: &[u8],
        request_spki_der: &[u8],
        ca_extra_control: &BTreeMap<String, String>,
    ) -> Result<Option<Vec<u8>>> {
        match self.serial_mode {
            SerialNumberMode::ByCa => Ok(None),
            SerialNumberMode::Random { bits } => serial::random_serial(bits).map(Some),
            SerialNumberMode::DerivedFromPublicKey => Ok(Some(serial::derived_serial(
                ca_subject_der,
                request_spki_der,
                ca_extra_control,
            ))),
        }
    }

    /// 公钥检查（含规范化与弱密钥拒绝）
    pub fn check_public_key(
        &self,
        spki: SubjectPublicKeyInfoOwned,
    ) -> Result<SubjectPublicKeyInfoOwned> {
        keycheck::check_public_key(&self.allowed_keyspecs, spki)
    }

    /// CA/B BR 策略标识（若配置了）
    pub(crate) fn br_policy(&self) -> Option<BrPolicy> {
        for (oid, _) in &self.policies {
            if let Some(policy) = BrPolicy::from_oid(oid) {
                return Some(policy);
            }
        }
        None
    }

    /// 主体模板化
    ///
    /// 归一化请求主体、应用模板规格、做策略域与国家代码检查，
    /// 非致命偏差以 warning 返回。
    pub fn subject(&self, requested: &x509_cert::name::Name) -> Result<SubjectInfo> {
        let cleaned = subject::remove_empty_rdns(requested);
        let entries = subject::name_entries(&cleaned);

        let mut granted: Vec<(ObjectIdentifier, String)> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for spec in &self.subject_rdns {
            let values: Vec<&String> = entries
                .iter()
                .filter(|(oid, _)| *oid == spec.oid)
                .map(|(_, v)| v)
                .collect();

            if let Some(fixed) = &spec.fixed_value {
                if let Some(first) = values.first() {
                    if *first != fixed {
                        warnings.push(format!("replaced value of subject:{}", spec.label));
                    }
                }
                granted.push((spec.oid, fixed.clone()));
                continue;
            }

            if values.is_empty() {
                if spec.required {
                    return Err(ProfileError::bad_template(format!(
                        "required subject attribute {} is absent",
                        spec.label
                    )));
                }
                continue;
            }

            if values.len() > spec.max_occurs as usize {
                warnings.push(format!("ignored extra values of subject:{}", spec.label));
            }
            for value in values.into_iter().take(spec.max_occurs as usize) {
                granted.push((spec.oid, value.clone()));
            }
        }

        // attributes the profile does not know are dropped with a warning
        let mut dropped = BTreeSet::new();
        for (oid, _) in &entries {
            if !self.subject_rdns.iter().any(|spec| spec.oid == *oid) && dropped.insert(*oid) {
                warnings.push(format!("removed subject attribute {}", oid));
            }
        }

        let granted_subject = subject::build_name(&granted)?;

        if self.cert_domain == CertDomain::CabForumBr {
            if self.cert_level == CertLevel::EndEntity {
                baseline::check_cabforum_subject(&granted_subject, self.br_policy())?;
            } else {
                for (oid, label) in [
                    (oids::DN_CN, "CN"),
                    (oids::DN_O, "O"),
                    (oids::DN_C, "C"),
                ] {
                    if !subject::contains_rdn(&granted_subject, &oid) {
                        return Err(ProfileError::bad_template(format!(
                            "missing {} in subject",
                            label
                        )));
                    }
                }
            }
        }

        check_country_codes(&granted_subject)?;

        let warning = if warnings.is_empty() {
            None
        } else {
            Some(warnings.join(", "))
        };

        Ok(SubjectInfo {
            granted_subject,
            warning,
        })
    }
}

fn check_country_codes(name: &x509_cert::name::Name) -> Result<()> {
    let country_attrs = [
        (oids::DN_C, "C"),
        (oids::DN_COUNTRY_OF_CITIZENSHIP, "countryOfCitizenship"),
        (oids::DN_COUNTRY_OF_RESIDENCE, "countryOfResidence"),
        (
            oids::DN_JURISDICTION_COUNTRY,
            "jurisdictionOfIncorporationCountryName",
        ),
    ];

    for (oid, label) in country_attrs {
        for value in subject::collect_values(name, &oid) {
            if !iso3166::is_valid_country_code(&value) {
                return Err(ProfileError::bad_template(format!(
                    "invalid country/area code '{}' in subject attribute {}",
                    value, label
                )));
            }
        }
    }
    Ok(())
}

fn compile_rdn(conf: &RdnConf) -> Result<RdnSpec> {
    let (oid, label) = match conf.attr_type.as_str() {
        "CN" | "commonName" => (oids::DN_CN, "CN"),
        "SURNAME" | "surname" => (oids::DN_SURNAME, "surname"),
        "SERIALNUMBER" | "serialNumber" => (oids::DN_SERIAL_NUMBER, "serialNumber"),
        "C" | "countryName" => (oids::DN_C, "C"),
        "L" | "localityName" => (oids::DN_L, "L"),
        "ST" | "stateOrProvinceName" => (oids::DN_ST, "ST"),
        "STREET" | "street" => (oids::DN_STREET, "street"),
        "O" | "organizationName" => (oids::DN_O, "O"),
        "OU" | "organizationalUnitName" => (oids::DN_OU, "OU"),
        "POSTALCODE" | "postalCode" => (oids::DN_POSTAL_CODE, "postalCode"),
        "GIVENNAME" | "givenName" => (oids::DN_GIVEN_NAME, "givenName"),
        other => {
            let oid = ObjectIdentifier::new(other)
                .map_err(|_| ProfileError::config(format!("unknown subject attribute '{}'", other)))?;
            return Ok(RdnSpec {
                oid,
                required: conf.required,
                max_occurs: conf.max_occurs.max(1),
                fixed_value: conf.value.clone(),
                label: other.to_string(),
            });
        }
    };

    Ok(RdnSpec {
        oid,
        required: conf.required,
        max_occurs: conf.max_occurs.max(1),
        fixed_value: conf.value.clone(),
        label: label.to_string(),
    })
}

fn parse_not_before(conf: Option<&str>) -> Result<NotBeforeMode> {
    let Some(s) = conf else {
        return Ok(NotBeforeMode::Current);
    };

    match s.trim() {
        "current" | "" => Ok(NotBeforeMode::Current),
        "midnight" => Ok(NotBeforeMode::Midnight),
        other => {
            let seconds: i64 = other.parse().map_err(|_| {
                ProfileError::config(format!("invalid notBefore specification '{}'", other))
            })?;
            Ok(NotBeforeMode::Offset(seconds))
        }
    }
}

fn parse_eku(s: &str) -> Result<ObjectIdentifier> {
    Ok(match s {
        "anyExtendedKeyUsage" => oids::XKU_ANY,
        "serverAuth" => oids::XKU_SERVER_AUTH,
        "clientAuth" => oids::XKU_CLIENT_AUTH,
        "codeSigning" => oids::XKU_CODE_SIGNING,
        "emailProtection" => oids::XKU_EMAIL_PROTECTION,
        "timeStamping" => oids::XKU_TIME_STAMPING,
        "ocspSigning" => oids::XKU_OCSP_SIGNING,
        other => ObjectIdentifier::new(other)
            .map_err(|_| ProfileError::config(format!("unknown extended key usage '{}'", other)))?,
    })
}

fn to_protocol_set(protocols: &[String]) -> Option<BTreeSet<String>> {
    if protocols.is_empty() {
        None
    } else {
        Some(protocols.iter().map(|p| p.to_lowercase()).collect())
    }
}

/// 编码主体 DER（常用于序列号派生）
pub fn encode_name(name: &x509_cert::name::Name) -> Result<Vec<u8>> {
    Ok(name.to_der()?)
}

#[cfg(test)]
mod tests {
    use crate::conf::{ExtensionControlConf, PolicyConf};

    use super::*;

    fn ident() -> NameId {
        NameId::new(1, "test-profile").unwrap()
    }

    fn requested(entries: &[(ObjectIdentifier, &str)]) -> x509_cert::name::Name {
        let owned: Vec<(ObjectIdentifier, String)> = entries
            .iter()
            .map(|(oid, v)| (*oid, v.to_string()))
            .collect();
        subject::build_name(&owned).unwrap()
    }

    #[test]
    fn test_initialize_minimal() {
        let profile =
            Certprofile::initialize(ident(), ProfileConf::end_entity(&["Ed25519"])).unwrap();
        assert_eq!(profile.cert_level(), CertLevel::EndEntity);
        assert_eq!(profile.signature_algorithms(), &[SignAlgo::Ed25519]);
        assert!(!profile.has_no_well_defined_expiration_date());
    }

    #[test]
    fn test_no_well_defined_expiration_rejected_for_ca() {
        let mut conf = ProfileConf::sub_ca(&["Ed25519"], Some(0));
        conf.no_well_defined_expiration = true;
        let err = Certprofile::initialize(ident(), conf).unwrap_err();
        assert!(matches!(err, ProfileError::Config(_)));
    }

    #[test]
    fn test_ee_profile_must_not_sign_certs() {
        let mut conf = ProfileConf::end_entity(&["Ed25519"]);
        conf.key_usages.push(crate::conf::KeyUsageConf {
            usage: "keyCertSign".to_string(),
            required: true,
        });
        assert!(Certprofile::initialize(ident(), conf).is_err());
    }

    #[test]
    fn test_unknown_signature_algorithm() {
        let conf = ProfileConf::end_entity(&["MD5withRSA"]);
        assert!(Certprofile::initialize(ident(), conf).is_err());
    }

    #[test]
    fn test_br_ee_requires_san_control() {
        let mut conf = ProfileConf::end_entity(&["Ed25519"]);
        conf.cert_domain = CertDomain::CabForumBr;
        conf.extensions.retain(|e| e.extn_type != "subjectAltName");
        assert!(Certprofile::initialize(ident(), conf).is_err());
    }

    #[test]
    fn test_ccc_must_be_critical() {
        let mut conf = ProfileConf::end_entity(&["Ed25519"]);
        conf.extensions.push(ExtensionControlConf {
            extn_type: "1.2.3.4.5".to_string(),
            critical: false,
            required: true,
            permitted_in_request: false,
        });
        conf.ccc_extension = Some(crate::conf::CccConf {
            extn_type: "1.2.3.4.5".to_string(),
            value: "0500".to_string(),
        });
        assert!(Certprofile::initialize(ident(), conf).is_err());
    }

    #[test]
    fn test_subject_template() {
        let profile =
            Certprofile::initialize(ident(), ProfileConf::end_entity(&["Ed25519"])).unwrap();

        let req = requested(&[
            (oids::DN_CN, "server.example.com"),
            (oids::DN_O, "Acme"),
            (oids::DN_OU, "dropped-unit"),
        ]);
        let info = profile.subject(&req).unwrap();
        assert_eq!(
            subject::common_name(&info.granted_subject).unwrap(),
            "server.example.com"
        );
        assert!(!subject::contains_rdn(&info.granted_subject, &oids::DN_OU));
        let warning = info.warning.unwrap();
        assert!(warning.contains("removed subject attribute"));
    }

    #[test]
    fn test_subject_missing_required() {
        let profile =
            Certprofile::initialize(ident(), ProfileConf::end_entity(&["Ed25519"])).unwrap();
        let req = requested(&[(oids::DN_O, "Acme")]);
        let err = profile.subject(&req).unwrap_err();
        assert!(matches!(err, ProfileError::BadTemplate(_)));
    }

    #[test]
    fn test_subject_bad_country() {
        let profile =
            Certprofile::initialize(ident(), ProfileConf::end_entity(&["Ed25519"])).unwrap();
        let req = requested(&[(oids::DN_CN, "x"), (oids::DN_C, "ZZ")]);
        let err = profile.subject(&req).unwrap_err();
        assert!(err.to_string().contains("invalid country/area code"));
    }

    #[test]
    fn test_br_policy_lookup() {
        let mut conf = ProfileConf::end_entity(&["Ed25519"]);
        conf.certificate_policies = vec![PolicyConf {
            policy_id: oids::BR_DOMAIN_VALIDATED.to_string(),
            cps_uri: None,
        }];
        let profile = Certprofile::initialize(ident(), conf).unwrap();
        assert_eq!(profile.br_policy(), Some(BrPolicy::DomainValidated));
    }

    #[test]
    fn test_not_before_modes() {
        let now = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
        let profile =
            Certprofile::initialize(ident(), ProfileConf::end_entity(&["Ed25519"])).unwrap();
        let req = Some(now + time::Duration::days(3));
        assert_eq!(profile.not_before(req, now), req.unwrap());
        assert_eq!(profile.not_before(None, now), now);

        let mut conf = ProfileConf::end_entity(&["Ed25519"]);
        conf.not_before = Some("midnight".to_string());
        let profile = Certprofile::initialize(ident(), conf).unwrap();
        let nb = profile.not_before(None, now);
        assert_eq!(nb.time(), time::Time::MIDNIGHT);
        assert_eq!(nb.date(), now.date());
    }
}
