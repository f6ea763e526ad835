//! CA/Browser Forum 基线要求检查
//!
//! 终端实体证书的主体字段矩阵与 SubjectAltName 规则。

use const_oid::ObjectIdentifier;
use der::Decode;
use x509_cert::{ext::pkix::name::GeneralName, name::Name};

use crate::{
    error::{ProfileError, Result},
    oids,
    subject::{common_name, contains_rdn},
};

/// 基线要求的三种验证策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrPolicy {
    DomainValidated,
    OrganizationValidated,
    IndividualValidated,
}

impl BrPolicy {
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == oids::BR_DOMAIN_VALIDATED {
            Some(BrPolicy::DomainValidated)
        } else if *oid == oids::BR_ORGANIZATION_VALIDATED {
            Some(BrPolicy::OrganizationValidated)
        } else if *oid == oids::BR_INDIVIDUAL_VALIDATED {
            Some(BrPolicy::IndividualValidated)
        } else {
            None
        }
    }
}

/// 终端实体主体的字段规则
///
/// street/L/ST/postalCode/C 的必须与禁止状态由 O/givenName/surname
/// 的出现情况与验证策略共同决定。
pub fn check_cabforum_subject(subject: &Name, policy: Option<BrPolicy>) -> Result<()> {
    let has_org = contains_rdn(subject, &oids::DN_O);
    let has_given_name = contains_rdn(subject, &oids::DN_GIVEN_NAME);
    let has_surname = contains_rdn(subject, &oids::DN_SURNAME);
    let has_identity = has_org || has_given_name || has_surname;

    if contains_rdn(subject, &oids::DN_STREET) && !has_identity {
        return Err(ProfileError::bad_template(
            "subject:street is prohibited if the subject:organizationName field, \
             subject:givenName, and subject:surname field are absent",
        ));
    }

    if contains_rdn(subject, &oids::DN_L) {
        if !has_identity {
            return Err(ProfileError::bad_template(
                "subject:localityName is prohibited if the subject:organizationName field, \
                 subject:givenName, and subject:surname field are absent",
            ));
        }
    } else if !contains_rdn(subject, &oids::DN_ST) && has_identity {
        return Err(ProfileError::bad_template(
            "subject:localityName is required if the subject:organizationName field, \
             subject:givenName field, or subject:surname field are present and the \
             subject:stateOrProvinceName field is absent",
        ));
    }

    if contains_rdn(subject, &oids::DN_ST) {
        if !has_identity {
            return Err(ProfileError::bad_template(
                "subject:stateOrProvinceName is prohibited if the subject:organizationName \
                 field, subject:givenName, and subject:surname field are absent",
            ));
        }
    } else if !contains_rdn(subject, &oids::DN_L) && has_identity {
        return Err(ProfileError::bad_template(
            "subject:stateOrProvinceName is required if the subject:organizationName field, \
             subject:givenName field, or subject:surname field are present and the \
             subject:localityName field is absent",
        ));
    }

    if contains_rdn(subject, &oids::DN_POSTAL_CODE) && !has_identity {
        return Err(ProfileError::bad_template(
            "subject:postalCode is prohibited if the subject:organizationName field, \
             subject:givenName, and subject:surname field are absent",
        ));
    }

    if !contains_rdn(subject, &oids::DN_C) && has_identity {
        return Err(ProfileError::bad_template(
            "subject:countryCode is required if the subject:organizationName field, \
             subject:givenName, and subject:surname field are present",
        ));
    }

    match policy {
        Some(BrPolicy::DomainValidated) => {
            let prohibited = [
                (oids::DN_O, "organizationName"),
                (oids::DN_GIVEN_NAME, "givenName"),
                (oids::DN_SURNAME, "surname"),
                (oids::DN_STREET, "street"),
                (oids::DN_L, "localityName"),
                (oids::DN_ST, "stateOrProvinceName"),
                (oids::DN_POSTAL_CODE, "postalCode"),
            ];
            for (oid, label) in prohibited {
                if contains_rdn(subject, &oid) {
                    return Err(ProfileError::bad_template(format!(
                        "subject {} is prohibited in domain validated certificate",
                        label
                    )));
                }
            }
        }
        Some(BrPolicy::OrganizationValidated) => {
            for (oid, label) in [(oids::DN_O, "organizationName"), (oids::DN_C, "countryName")] {
                if !contains_rdn(subject, &oid) {
                    return Err(ProfileError::bad_template(format!(
                        "subject {} is required in organization validated certificate",
                        label
                    )));
                }
            }
            if !(contains_rdn(subject, &oids::DN_L) || contains_rdn(subject, &oids::DN_ST)) {
                return Err(ProfileError::bad_template(
                    "at least one of subject:localityName and subject:stateOrProvinceName \
                     is required in organization validated certificate",
                ));
            }
        }
        Some(BrPolicy::IndividualValidated) => {
            if !contains_rdn(subject, &oids::DN_C) {
                return Err(ProfileError::bad_template(
                    "subject countryName is required in individual validated certificate",
                ));
            }
            if !(has_org || (has_given_name && has_surname)) {
                return Err(ProfileError::bad_template(
                    "at least one of subject:organizationName and (subject:givenName, \
                     subject:surName) is required in individual validated certificate",
                ));
            }
            if !(contains_rdn(subject, &oids::DN_L) || contains_rdn(subject, &oids::DN_ST)) {
                return Err(ProfileError::bad_template(
                    "at least one of subject:localityName and subject:stateOrProvinceName \
                     is required in individual validated certificate",
                ));
            }
        }
        None => {}
    }

    Ok(())
}

/// SubjectAltName 检查：CN 必须出现在 SAN 中，DNSName 不得含下划线、
/// 必须是可公开解析的域名。
pub fn check_cn_in_san(granted_subject: &Name, san_value: &[u8]) -> Result<()> {
    let cn = common_name(granted_subject);
    let mut cn_in_san = cn.is_none();
    let common_name = cn.unwrap_or_default();

    let names: Vec<GeneralName> = Vec::from_der(san_value)
        .map_err(|_| ProfileError::bad_template("invalid SubjectAltName encoding"))?;

    for name in &names {
        match name {
            GeneralName::DnsName(dns) => {
                let domain = dns.as_str();
                if !cn_in_san && domain == common_name {
                    cn_in_san = true;
                }

                if domain.contains('_') {
                    return Err(ProfileError::bad_template(format!(
                        "invalid DNSName {}",
                        domain
                    )));
                }

                if !is_valid_public_domain(domain) {
                    return Err(ProfileError::bad_template(format!(
                        "invalid DNSName {}",
                        domain
                    )));
                }
            }
            GeneralName::IpAddress(octets) => {
                let octets = octets.as_bytes();
                match octets.len() {
                    4 => {
                        let dotted = format!(
                            "{}.{}.{}.{}",
                            octets[0], octets[1], octets[2], octets[3]
                        );
                        if !cn_in_san && dotted == common_name {
                            cn_in_san = true;
                        }
                    }
                    16 => {
                        if !cn_in_san {
                            if let Some(expanded) = expand_ipv6(&common_name) {
                                if expanded[..] == octets[..] {
                                    cn_in_san = true;
                                }
                            }
                        }
                    }
                    _ => {
                        return Err(ProfileError::bad_template(format!(
                            "invalid IP address {}",
                            hex::encode(octets)
                        )));
                    }
                }
            }
            _ => {}
        }
    }

    if !cn_in_san {
        return Err(ProfileError::bad_template(
            "content of subject:commonName is not included in extension:SubjectAlternativeNames",
        ));
    }

    Ok(())
}

/// 公开域名的合理性检查
pub fn is_valid_public_domain(domain: &str) -> bool {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return false;
        }
    }

    // the TLD must be alphabetic and not a reserved one
    let tld = labels[labels.len() - 1].to_ascii_lowercase();
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }

    !matches!(
        tld.as_str(),
        "local" | "localhost" | "internal" | "test" | "invalid" | "onion" | "corp" | "home"
            | "lan"
    )
}

/// 把 `a:b:c:d:e:f:g:h` 形式的 IPv6 地址展开为 16 字节；
/// 只接受 CN 里使用的全写形式（7 个冒号）。
fn expand_ipv6(s: &str) -> Option<[u8; 16]> {
    let blocks: Vec<&str> = s.split(':').collect();
    if blocks.len() != 8 {
        return None;
    }

    let mut out = [0u8; 16];
    for (i, block) in blocks.iter().enumerate() {
        if block.is_empty() {
            continue;
        }
        if block.len() > 4 {
            return None;
        }
        let value = u16::from_str_radix(block, 16).ok()?;
        out[i * 2] = (value >> 8) as u8;
        out[i * 2 + 1] = (value & 0xFF) as u8;
    }
    Some(out)
}
