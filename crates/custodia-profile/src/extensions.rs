//! 扩展计算
//!
//! 按固定顺序产出证书扩展集合，顺序稳定保证同一输入的编码可复现。

use std::collections::BTreeMap;

use const_oid::{db::rfc5280, ObjectIdentifier};
use der::{
    asn1::{Ia5String, OctetString, Uint},
    flagset::FlagSet,
    Any, Decode, Encode,
};
use sha1::{Digest, Sha1};
use x509_cert::{
    ext::{
        pkix::{
            certpolicy::{CertificatePolicies, PolicyInformation, PolicyQualifierInfo},
            constraints::name::GeneralSubtree,
            crl::dp::DistributionPoint,
            name::{DistributionPointName, GeneralName},
            AccessDescription, AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage,
            KeyUsage, KeyUsages, NameConstraints,
        },
        Extension,
    },
    name::Name,
    serial_number::SerialNumber,
};

use pkcs8::spki::SubjectPublicKeyInfoOwned;
use time::OffsetDateTime;

use crate::{
    baseline,
    error::{ProfileError, Result},
    oids,
    profile::Certprofile,
    subject,
    types::{CertDomain, CertLevel, ExtensionControl, PublicCaInfo},
};

/// 请求中携带的一个扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedExtension {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// extnValue 的内容 DER（不含外层 OCTET STRING）
    pub value: Vec<u8>,
}

impl RequestedExtension {
    pub fn new(oid: ObjectIdentifier, critical: bool, value: Vec<u8>) -> Self {
        Self {
            oid,
            critical,
            value,
        }
    }
}

/// 一个已计算的扩展值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionValue {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    pub value: Vec<u8>,
}

/// 顺序稳定的扩展集合
#[derive(Debug, Clone, Default)]
pub struct ExtensionValues {
    values: Vec<ExtensionValue>,
}

impl ExtensionValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, oid: ObjectIdentifier, critical: bool, value: Vec<u8>) -> Result<()> {
        if self.get(&oid).is_some() {
            return Err(ProfileError::config(format!(
                "extension {} is present twice",
                oid
            )));
        }
        self.values.push(ExtensionValue {
            oid,
            critical,
            value,
        });
        Ok(())
    }

    pub fn get(&self, oid: &ObjectIdentifier) -> Option<&ExtensionValue> {
        self.values.iter().find(|v| &v.oid == oid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 转成证书中的扩展序列
    pub fn to_extensions(&self) -> Result<Vec<Extension>> {
        let mut extensions = Vec::with_capacity(self.values.len());
        for value in &self.values {
            extensions.push(Extension {
                extn_id: value.oid,
                critical: value.critical,
                extn_value: OctetString::new(value.value.clone())?,
            });
        }
        Ok(extensions)
    }
}

fn add_or_require(
    values: &mut ExtensionValues,
    oid: ObjectIdentifier,
    control: &ExtensionControl,
    value: Option<Vec<u8>>,
) -> Result<()> {
    match value {
        Some(value) => values.add(oid, control.critical, value),
        None => {
            if control.required {
                Err(ProfileError::config(format!(
                    "could not add required extension {}",
                    oid
                )))
            } else {
                Ok(())
            }
        }
    }
}

fn assert_protocols(
    uris: &[String],
    protocols: &Option<std::collections::BTreeSet<String>>,
) -> Result<()> {
    let Some(protocols) = protocols else {
        return Ok(());
    };

    for uri in uris {
        let ok = protocols
            .iter()
            .any(|protocol| uri.to_lowercase().starts_with(&format!("{}:", protocol)));
        if !ok {
            return Err(ProfileError::config(format!(
                "URL '{}' does not have any of protocols {:?}",
                uri, protocols
            )));
        }
    }
    Ok(())
}

fn uri_general_names(uris: &[String]) -> Result<Vec<GeneralName>> {
    let mut names = Vec::with_capacity(uris.len());
    for uri in uris {
        let ia5 = Ia5String::new(uri)
            .map_err(|_| ProfileError::config(format!("invalid URI '{}'", uri)))?;
        names.push(GeneralName::UniformResourceIdentifier(ia5));
    }
    Ok(names)
}

fn distribution_points(uris: &[String]) -> Result<Vec<u8>> {
    let point = DistributionPoint {
        distribution_point: Some(DistributionPointName::FullName(uri_general_names(uris)?)),
        reasons: None,
        crl_issuer: None,
    };
    Ok(vec![point].to_der()?)
}

impl Certprofile {
    /// 计算证书扩展
    ///
    /// 顺序：SKI、AKI、IssuerAltName、AIA、CRLDP/FreshestCRL、
    /// BasicConstraints、KeyUsage、ExtendedKeyUsage、ocsp-nocheck、
    /// SubjectInfoAccess、CertificatePolicies、模板附加扩展、请求透传。
    #[allow(clippy::too_many_arguments)]
    pub fn extensions(
        &self,
        _requested_subject: &Name,
        granted_subject: &Name,
        requested: &[RequestedExtension],
        granted_spki: &SubjectPublicKeyInfoOwned,
        ca: &PublicCaInfo,
        _not_before: OffsetDateTime,
        _not_after: OffsetDateTime,
    ) -> Result<ExtensionValues> {
        let mut values = ExtensionValues::new();
        let mut controls = self.extension_controls.clone();

        // requested extensions that the controls do not allow are dropped
        let mut requested_map: BTreeMap<ObjectIdentifier, &RequestedExtension> = BTreeMap::new();
        for req in requested {
            let permitted = controls
                .get(&req.oid)
                .map(|c| c.permitted_in_request)
                .unwrap_or(true);
            if permitted {
                requested_map.insert(req.oid, req);
            }
        }

        // SubjectKeyIdentifier
        if let Some(control) = controls.remove(&rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER) {
            let ski = match requested_map.get(&rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER) {
                Some(req) if control.permitted_in_request => {
                    let octet = OctetString::from_der(&req.value).map_err(|_| {
                        ProfileError::bad_template("invalid SubjectKeyIdentifier in request")
                    })?;
                    octet.as_bytes().to_vec()
                }
                _ => {
                    let key_bytes = granted_spki.subject_public_key.raw_bytes();
                    Sha1::digest(key_bytes).to_vec()
                }
            };
            let encoded = OctetString::new(ski)?.to_der()?;
            add_or_require(
                &mut values,
                rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER,
                &control,
                Some(encoded),
            )?;
        }

        // AuthorityKeyIdentifier
        if let Some(control) = controls.remove(&rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER) {
            let value = if ca.subject_key_id.is_empty() {
                None
            } else {
                let aki = if self.include_issuer_and_serial_in_aki {
                    AuthorityKeyIdentifier {
                        key_identifier: Some(OctetString::new(ca.subject_key_id.clone())?),
                        authority_cert_issuer: Some(vec![GeneralName::DirectoryName(
                            ca.subject.clone(),
                        )]),
                        authority_cert_serial_number: Some(
                            SerialNumber::new(&ca.serial).map_err(|_| {
                                ProfileError::config("invalid CA certificate serial number")
                            })?,
                        ),
                    }
                } else {
                    AuthorityKeyIdentifier {
                        key_identifier: Some(OctetString::new(ca.subject_key_id.clone())?),
                        authority_cert_issuer: None,
                        authority_cert_serial_number: None,
                    }
                };
                Some(aki.to_der()?)
            };
            add_or_require(
                &mut values,
                rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER,
                &control,
                value,
            )?;
        }

        // IssuerAltName
        if let Some(control) = controls.remove(&rfc5280::ID_CE_ISSUER_ALT_NAME) {
            let value = match &ca.subject_alt_name {
                Some(names) => Some(names.to_der()?),
                None => None,
            };
            add_or_require(&mut values, rfc5280::ID_CE_ISSUER_ALT_NAME, &control, value)?;
        }

        // AuthorityInfoAccess
        if let Some(control) = controls.remove(&rfc5280::ID_PE_AUTHORITY_INFO_ACCESS) {
            let mut descriptions = Vec::new();
            if let Some(aia) = &self.aia_control {
                if aia.include_ca_issuers {
                    assert_protocols(&ca.ca_uris.cacert_uris, &aia.ca_issuers_protocols)?;
                    for name in uri_general_names(&ca.ca_uris.cacert_uris)? {
                        descriptions.push(AccessDescription {
                            access_method: rfc5280::ID_AD_CA_ISSUERS,
                            access_location: name,
                        });
                    }
                }
                if aia.include_ocsp {
                    assert_protocols(&ca.ca_uris.ocsp_uris, &aia.ocsp_protocols)?;
                    for name in uri_general_names(&ca.ca_uris.ocsp_uris)? {
                        descriptions.push(AccessDescription {
                            access_method: rfc5280::ID_AD_OCSP,
                            access_location: name,
                        });
                    }
                }
            }

            let value = if descriptions.is_empty() {
                None
            } else {
                Some(descriptions.to_der()?)
            };
            add_or_require(
                &mut values,
                rfc5280::ID_PE_AUTHORITY_INFO_ACCESS,
                &control,
                value,
            )?;
        }

        // CRLDistributionPoints
        if let Some(control) = controls.remove(&rfc5280::ID_CE_CRL_DISTRIBUTION_POINTS) {
            let value = if ca.ca_uris.crl_uris.is_empty() {
                None
            } else {
                if let Some(dp) = &self.crl_dp_control {
                    assert_protocols(&ca.ca_uris.crl_uris, &dp.protocols)?;
                }
                Some(distribution_points(&ca.ca_uris.crl_uris)?)
            };
            add_or_require(
                &mut values,
                rfc5280::ID_CE_CRL_DISTRIBUTION_POINTS,
                &control,
                value,
            )?;
        }

        // FreshestCRL
        if let Some(control) = controls.remove(&rfc5280::ID_CE_FRESHEST_CRL) {
            let value = if ca.ca_uris.delta_crl_uris.is_empty() {
                None
            } else {
                if let Some(dp) = &self.freshest_crl_control {
                    assert_protocols(&ca.ca_uris.delta_crl_uris, &dp.protocols)?;
                }
                Some(distribution_points(&ca.ca_uris.delta_crl_uris)?)
            };
            add_or_require(&mut values, rfc5280::ID_CE_FRESHEST_CRL, &control, value)?;
        }

        // BasicConstraints
        if let Some(control) = controls.remove(&rfc5280::ID_CE_BASIC_CONSTRAINTS) {
            let requested_bc = match requested_map.get(&rfc5280::ID_CE_BASIC_CONSTRAINTS) {
                Some(req) => Some(BasicConstraints::from_der(&req.value).map_err(|_| {
                    ProfileError::bad_template("invalid BasicConstraints in request")
                })?),
                None => None,
            };

            let bc = if self.cert_level() == CertLevel::EndEntity {
                if let Some(bc) = &requested_bc {
                    if bc.ca {
                        return Err(ProfileError::bad_template(
                            "could not enroll a CA certificate with an end-entity profile",
                        ));
                    }
                }
                BasicConstraints {
                    ca: false,
                    path_len_constraint: None,
                }
            } else {
                let mut path_len = self.path_len_basic_constraint();
                if let Some(bc) = &requested_bc {
                    if !bc.ca {
                        return Err(ProfileError::bad_template(
                            "could not enroll an end-entity certificate with a CA profile",
                        ));
                    }
                    if let Some(requested_len) = bc.path_len_constraint {
                        if path_len.map(|p| requested_len < p).unwrap_or(true) {
                            path_len = Some(requested_len);
                        }
                    }
                }
                BasicConstraints {
                    ca: true,
                    path_len_constraint: path_len,
                }
            };

            add_or_require(
                &mut values,
                rfc5280::ID_CE_BASIC_CONSTRAINTS,
                &control,
                Some(bc.to_der()?),
            )?;
        }

        // KeyUsage
        if let Some(control) = controls.remove(&rfc5280::ID_CE_KEY_USAGE) {
            let mut flags: Option<FlagSet<KeyUsages>> = None;
            for usage in &self.key_usages {
                if usage.required {
                    let flag = usage.usage.flag();
                    flags = Some(flags.map_or(flag.into(), |existing| existing | flag));
                }
            }

            if let Some(req) = requested_map.get(&rfc5280::ID_CE_KEY_USAGE) {
                let requested_usage = KeyUsage::from_der(&req.value)
                    .map_err(|_| ProfileError::bad_template("invalid KeyUsage in request"))?;
                for usage in all_key_usages() {
                    if !requested_usage.0.contains(usage) {
                        continue;
                    }
                    let known = self.key_usages.iter().find(|k| k.usage.flag() == usage);
                    match known {
                        Some(_) => {
                            flags = Some(flags.map_or(usage.into(), |existing| existing | usage));
                        }
                        None => {
                            return Err(ProfileError::bad_template(format!(
                                "requested key usage {:?} is not permitted by the profile",
                                usage
                            )));
                        }
                    }
                }
            }

            let value = flags.map(|flags| KeyUsage(flags).to_der()).transpose()?;
            add_or_require(&mut values, rfc5280::ID_CE_KEY_USAGE, &control, value)?;
        }

        // ExtendedKeyUsage
        if let Some(control) = controls.remove(&rfc5280::ID_CE_EXT_KEY_USAGE) {
            let mut usages: Vec<ObjectIdentifier> = Vec::new();
            for usage in &self.ext_key_usages {
                if usage.required {
                    usages.push(usage.usage);
                }
            }

            if let Some(req) = requested_map.get(&rfc5280::ID_CE_EXT_KEY_USAGE) {
                let requested_usage = ExtendedKeyUsage::from_der(&req.value).map_err(|_| {
                    ProfileError::bad_template("invalid ExtendedKeyUsage in request")
                })?;
                for usage in requested_usage.0 {
                    if usages.contains(&usage) {
                        continue;
                    }
                    if self.ext_key_usages.iter().any(|k| k.usage == usage) {
                        usages.push(usage);
                    } else {
                        return Err(ProfileError::bad_template(format!(
                            "requested extended key usage {} is not permitted by the profile",
                            usage
                        )));
                    }
                }
            }

            let mut control = control;
            if control.critical && usages.contains(&oids::XKU_ANY) {
                control.critical = false;
            }
            if !control.critical && usages.contains(&oids::XKU_TIME_STAMPING) {
                control.critical = true;
            }

            let value = if usages.is_empty() {
                None
            } else {
                Some(ExtendedKeyUsage(usages).to_der()?)
            };
            add_or_require(&mut values, rfc5280::ID_CE_EXT_KEY_USAGE, &control, value)?;
        }

        // ocsp-nocheck, only on explicit request
        if let Some(control) = controls.remove(&oids::OCSP_NOCHECK) {
            let value = if requested_map.contains_key(&oids::OCSP_NOCHECK) || control.required {
                Some(der::asn1::Null.to_der()?)
            } else {
                None
            };
            add_or_require(&mut values, oids::OCSP_NOCHECK, &control, value)?;
        }

        // SubjectInfoAccess, filtered by the permitted access methods
        if let Some(control) = controls.remove(&rfc5280::ID_PE_SUBJECT_INFO_ACCESS) {
            let value = match requested_map.get(&rfc5280::ID_PE_SUBJECT_INFO_ACCESS) {
                Some(req) => {
                    let descriptions: Vec<AccessDescription> = Vec::from_der(&req.value)
                        .map_err(|_| {
                            ProfileError::bad_template("invalid SubjectInfoAccess in request")
                        })?;
                    let filtered: Vec<AccessDescription> = descriptions
                        .into_iter()
                        .filter(|d| self.sia_modes.contains(&d.access_method))
                        .collect();
                    if filtered.is_empty() {
                        None
                    } else {
                        Some(filtered.to_der()?)
                    }
                }
                None => None,
            };
            add_or_require(
                &mut values,
                rfc5280::ID_PE_SUBJECT_INFO_ACCESS,
                &control,
                value,
            )?;
        }

        // CertificatePolicies
        if let Some(control) = controls.remove(&rfc5280::ID_CE_CERTIFICATE_POLICIES) {
            let value = if self.policies.is_empty() {
                None
            } else {
                let mut infos = Vec::with_capacity(self.policies.len());
                for (policy_id, cps_uri) in &self.policies {
                    let qualifiers = match cps_uri {
                        Some(uri) => {
                            let ia5 = Ia5String::new(uri).map_err(|_| {
                                ProfileError::config(format!("invalid CPS URI '{}'", uri))
                            })?;
                            Some(vec![PolicyQualifierInfo {
                                policy_qualifier_id: oids::QT_CPS,
                                qualifier: Some(Any::from_der(&ia5.to_der()?)?),
                            }])
                        }
                        None => None,
                    };
                    infos.push(PolicyInformation {
                        policy_identifier: *policy_id,
                        policy_qualifiers: qualifiers,
                    });
                }
                Some(CertificatePolicies(infos).to_der()?)
            };
            add_or_require(
                &mut values,
                rfc5280::ID_CE_CERTIFICATE_POLICIES,
                &control,
                value,
            )?;
        }

        // NameConstraints
        if let Some(control) = controls.remove(&rfc5280::ID_CE_NAME_CONSTRAINTS) {
            let value = match &self.name_constraints {
                Some((permitted, excluded)) => {
                    let nc = NameConstraints {
                        permitted_subtrees: dns_subtrees(permitted)?,
                        excluded_subtrees: dns_subtrees(excluded)?,
                    };
                    Some(nc.to_der()?)
                }
                None => None,
            };
            add_or_require(&mut values, rfc5280::ID_CE_NAME_CONSTRAINTS, &control, value)?;
        }

        // qcStatements
        if let Some(control) = controls.remove(&oids::QC_STATEMENTS) {
            let value = match &self.qc_statements {
                Some(conf) => Some(encode_qc_statements(conf)?),
                None => None,
            };
            add_or_require(&mut values, oids::QC_STATEMENTS, &control, value)?;
        }

        // GM/T 0015 identity extensions, value taken from the request
        for oid in self.gmt0015.clone() {
            if let Some(control) = controls.remove(&oid) {
                let value = match requested_map.get(&oid) {
                    Some(req) => {
                        let any = Any::from_der(&req.value).map_err(|_| {
                            ProfileError::bad_template(format!("invalid value of extension {}", oid))
                        })?;
                        if subject::attribute_string(&any).is_none() {
                            return Err(ProfileError::bad_template(format!(
                                "extension {} does not contain a text value",
                                oid
                            )));
                        }
                        Some(req.value.clone())
                    }
                    None => None,
                };
                add_or_require(&mut values, oid, &control, value)?;
            }
        }

        // CCC extension, constant and always critical
        if let Some((oid, ccc_value)) = &self.ccc {
            if let Some(control) = controls.remove(oid) {
                add_or_require(&mut values, *oid, &control, Some(ccc_value.clone()))?;
            }
        }

        // constant extensions
        for (oid, constant_value) in &self.constant_extensions {
            if let Some(control) = controls.remove(oid) {
                add_or_require(&mut values, *oid, &control, Some(constant_value.clone()))?;
            }
        }

        // remaining controls: pass the requested value through
        let leftover: Vec<ObjectIdentifier> = controls.keys().copied().collect();
        for oid in leftover {
            let control = controls[&oid];
            if control.permitted_in_request {
                if let Some(req) = requested_map.get(&oid) {
                    values.add(oid, control.critical, req.value.clone())?;
                    controls.remove(&oid);
                }
            }
        }

        // every required extension must have been produced
        let unfulfilled: Vec<String> = controls
            .iter()
            .filter(|(_, control)| control.required)
            .map(|(oid, _)| oid.to_string())
            .collect();
        if !unfulfilled.is_empty() {
            return Err(ProfileError::config(format!(
                "could not add required extensions {}",
                unfulfilled.join(", ")
            )));
        }

        // CA/B BR end-entity: the commonName must appear in the SAN
        if self.cert_domain() == CertDomain::CabForumBr
            && self.cert_level() == CertLevel::EndEntity
        {
            let san = values
                .get(&rfc5280::ID_CE_SUBJECT_ALT_NAME)
                .ok_or_else(|| {
                    ProfileError::bad_template("SubjectAltName is absent in the request")
                })?;
            baseline::check_cn_in_san(granted_subject, &san.value)?;
        }

        Ok(values)
    }
}

fn all_key_usages() -> [KeyUsages; 9] {
    [
        KeyUsages::DigitalSignature,
        KeyUsages::NonRepudiation,
        KeyUsages::KeyEncipherment,
        KeyUsages::DataEncipherment,
        KeyUsages::KeyAgreement,
        KeyUsages::KeyCertSign,
        KeyUsages::CRLSign,
        KeyUsages::EncipherOnly,
        KeyUsages::DecipherOnly,
    ]
}

fn dns_subtrees(domains: &[String]) -> Result<Option<Vec<GeneralSubtree>>> {
    if domains.is_empty() {
        return Ok(None);
    }

    let mut subtrees = Vec::with_capacity(domains.len());
    for domain in domains {
        let ia5 = Ia5String::new(domain)
            .map_err(|_| ProfileError::config(format!("invalid dNSName '{}'", domain)))?;
        subtrees.push(GeneralSubtree {
            base: GeneralName::DnsName(ia5),
            minimum: 0,
            maximum: None,
        });
    }
    Ok(Some(subtrees))
}

/// qcStatements ::= SEQUENCE OF QCStatement
fn encode_qc_statements(conf: &crate::conf::QcStatementsConf) -> Result<Vec<u8>> {
    use der::asn1::PrintableStringRef;

    let mut statements: Vec<Any> = Vec::new();

    if conf.compliance {
        // QCStatement with statementId only
        let seq = QcStatementDer {
            statement_id: oids::QCS_COMPLIANCE,
            statement_info: None,
        };
        statements.push(Any::from_der(&seq.to_der()?)?);
    }

    if let Some(limit) = &conf.limit_value {
        let currency = PrintableStringRef::new(&limit.currency)
            .map_err(|_| ProfileError::config("invalid QC limit currency"))?;
        let monetary = MonetaryValueDer {
            currency: Any::from_der(&currency.to_der()?)?,
            amount: limit.amount as i64,
            exponent: limit.exponent as i64,
        };
        let seq = QcStatementDer {
            statement_id: oids::QCS_LIMIT_VALUE,
            statement_info: Some(Any::from_der(&monetary.to_der()?)?),
        };
        statements.push(Any::from_der(&seq.to_der()?)?);
    }

    if statements.is_empty() {
        return Err(ProfileError::config("empty qcStatements configuration"));
    }

    Ok(statements.to_der()?)
}

#[derive(der::Sequence)]
struct QcStatementDer {
    statement_id: ObjectIdentifier,
    #[asn1(optional = "true")]
    statement_info: Option<Any>,
}

#[derive(der::Sequence)]
struct MonetaryValueDer {
    currency: Any,
    amount: i64,
    exponent: i64,
}

/// 编码 CRL 号（无符号整数）
pub fn encode_crl_number(number: i64) -> Result<Vec<u8>> {
    let bytes = number.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    Ok(Uint::new(&bytes[first..])?.to_der()?)
}
