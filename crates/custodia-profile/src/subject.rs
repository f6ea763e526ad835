//! X.500 主体处理
//!
//! RDN 的取值、构造、规范化与模板化。

use const_oid::ObjectIdentifier;
use der::{
    asn1::{PrintableStringRef, SetOfVec, Utf8StringRef},
    Any, Decode, Encode, Tag, Tagged,
};
use x509_cert::{
    attr::AttributeTypeAndValue,
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

use crate::{
    error::{ProfileError, Result},
    oids,
};

/// 从属性值里取出字符串（UTF8String / PrintableString / IA5String）
pub fn attribute_string(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String => value
            .decode_as::<Utf8StringRef<'_>>()
            .ok()
            .map(|s| s.as_str().to_string()),
        Tag::PrintableString => value
            .decode_as::<PrintableStringRef<'_>>()
            .ok()
            .map(|s| s.as_str().to_string()),
        Tag::Ia5String => value
            .decode_as::<der::asn1::Ia5StringRef<'_>>()
            .ok()
            .map(|s| s.as_str().to_string()),
        _ => None,
    }
}

/// 收集主体中某个属性类型的全部取值（按出现顺序）
pub fn collect_values(name: &Name, oid: &ObjectIdentifier) -> Vec<String> {
    let mut values = Vec::new();
    for rdn in name.0.iter() {
        for atav in rdn.0.iter() {
            if &atav.oid == oid {
                if let Some(s) = attribute_string(&atav.value) {
                    values.push(s);
                }
            }
        }
    }
    values
}

/// 主体是否包含某属性类型
pub fn contains_rdn(name: &Name, oid: &ObjectIdentifier) -> bool {
    name.0
        .iter()
        .any(|rdn| rdn.0.iter().any(|atav| &atav.oid == oid))
}

/// 提取 commonName
pub fn common_name(name: &Name) -> Option<String> {
    collect_values(name, &oids::DN_CN).into_iter().next()
}

fn attribute_any(oid: &ObjectIdentifier, value: &str) -> Result<Any> {
    // C and other country attributes are PrintableString per RFC 5280
    let der = if *oid == oids::DN_C
        || *oid == oids::DN_COUNTRY_OF_CITIZENSHIP
        || *oid == oids::DN_COUNTRY_OF_RESIDENCE
        || *oid == oids::DN_SERIAL_NUMBER
    {
        PrintableStringRef::new(value)
            .map_err(|e| ProfileError::bad_template(format!("invalid attribute value: {}", e)))?
            .to_der()?
    } else {
        Utf8StringRef::new(value)
            .map_err(|e| ProfileError::bad_template(format!("invalid attribute value: {}", e)))?
            .to_der()?
    };

    Ok(Any::from_der(&der)?)
}

/// 按 (类型, 值) 序列构造主体，每个 RDN 单值
pub fn build_name(entries: &[(ObjectIdentifier, String)]) -> Result<Name> {
    let mut rdns = Vec::with_capacity(entries.len());

    for (oid, value) in entries {
        let atav = AttributeTypeAndValue {
            oid: *oid,
            value: attribute_any(oid, value)?,
        };

        let mut set = SetOfVec::new();
        set.insert(atav)
            .map_err(|e| ProfileError::bad_template(format!("invalid RDN: {}", e)))?;
        rdns.push(RelativeDistinguishedName(set));
    }

    Ok(RdnSequence(rdns))
}

/// 去掉值为空白的 RDN
pub fn remove_empty_rdns(name: &Name) -> Name {
    let rdns: Vec<RelativeDistinguishedName> = name
        .0
        .iter()
        .filter(|rdn| {
            rdn.0.iter().any(|atav| {
                attribute_string(&atav.value)
                    .map(|s| !s.trim().is_empty())
                    .unwrap_or(true)
            })
        })
        .cloned()
        .collect();

    RdnSequence(rdns)
}

/// 主体的可读形式，如 `CN=Example,O=Acme`
pub fn name_to_string(name: &Name) -> String {
    let mut parts = Vec::new();
    for rdn in name.0.iter() {
        for atav in rdn.0.iter() {
            let label = dn_label(&atav.oid);
            let value = attribute_string(&atav.value).unwrap_or_else(|| "#?".to_string());
            parts.push(format!("{}={}", label, value));
        }
    }
    parts.join(",")
}

/// 规范化形式：属性值小写、空白折叠，用于相等比较
pub fn canonicalize_name(name: &Name) -> String {
    let mut parts = Vec::new();
    for rdn in name.0.iter() {
        for atav in rdn.0.iter() {
            let value = attribute_string(&atav.value).unwrap_or_default();
            let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
            parts.push(format!("{}={}", atav.oid, collapsed.to_lowercase()));
        }
    }
    parts.join(";")
}

fn dn_label(oid: &ObjectIdentifier) -> String {
    let known = [
        (oids::DN_CN, "CN"),
        (oids::DN_SURNAME, "SURNAME"),
        (oids::DN_SERIAL_NUMBER, "SERIALNUMBER"),
        (oids::DN_C, "C"),
        (oids::DN_L, "L"),
        (oids::DN_ST, "ST"),
        (oids::DN_STREET, "STREET"),
        (oids::DN_O, "O"),
        (oids::DN_OU, "OU"),
        (oids::DN_POSTAL_CODE, "POSTALCODE"),
        (oids::DN_GIVEN_NAME, "GIVENNAME"),
    ];

    for (known_oid, label) in known {
        if *oid == known_oid {
            return label.to_string();
        }
    }
    oid.to_string()
}

/// 把名字解析回 (类型, 值) 序列，便于模板化处理
pub fn name_entries(name: &Name) -> Vec<(ObjectIdentifier, String)> {
    let mut entries = Vec::new();
    for rdn in name.0.iter() {
        for atav in rdn.0.iter() {
            if let Some(value) = attribute_string(&atav.value) {
                entries.push((atav.oid, value));
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_name() -> Name {
        build_name(&[
            (oids::DN_CN, "Example Server".to_string()),
            (oids::DN_O, "Acme Corp".to_string()),
            (oids::DN_C, "DE".to_string()),
        ])
        .unwrap()
    }

    #[test]
    fn test_build_and_read_back() {
        let name = sample_name();
        assert_eq!(common_name(&name).unwrap(), "Example Server");
        assert_eq!(collect_values(&name, &oids::DN_O), vec!["Acme Corp"]);
        assert!(contains_rdn(&name, &oids::DN_C));
        assert!(!contains_rdn(&name, &oids::DN_OU));
        assert_eq!(name_to_string(&name), "CN=Example Server,O=Acme Corp,C=DE");
    }

    #[test]
    fn test_canonicalize() {
        let a = build_name(&[(oids::DN_CN, "Example   Server".to_string())]).unwrap();
        let b = build_name(&[(oids::DN_CN, "example server".to_string())]).unwrap();
        assert_eq!(canonicalize_name(&a), canonicalize_name(&b));

        let c = build_name(&[(oids::DN_CN, "different".to_string())]).unwrap();
        assert_ne!(canonicalize_name(&a), canonicalize_name(&c));
    }

    #[test]
    fn test_remove_empty_rdns() {
        let name = build_name(&[
            (oids::DN_CN, "keep".to_string()),
            (oids::DN_O, "   ".to_string()),
        ])
        .unwrap();
        let cleaned = remove_empty_rdns(&name);
        assert!(contains_rdn(&cleaned, &oids::DN_CN));
        assert!(!contains_rdn(&cleaned, &oids::DN_O));
    }

    #[test]
    fn test_der_round_trip() {
        let name = sample_name();
        let der = name.to_der().unwrap();
        let back = Name::from_der(&der).unwrap();
        assert_eq!(canonicalize_name(&name), canonicalize_name(&back));
    }
}
