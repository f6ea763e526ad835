//! OID constants used by the profile engine that are not part of
//! `const_oid`'s bundled database, plus the distinguished-name attribute
//! arc spelled out explicitly.

use const_oid::ObjectIdentifier;

// ---------------------------------------------------------------------------
// Distinguished name attributes (2.5.4.*)
// ---------------------------------------------------------------------------

pub const DN_CN: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
pub const DN_SURNAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.4");
pub const DN_SERIAL_NUMBER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.5");
pub const DN_C: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
pub const DN_L: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
pub const DN_ST: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
pub const DN_STREET: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.9");
pub const DN_O: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
pub const DN_OU: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
pub const DN_POSTAL_CODE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.17");
pub const DN_GIVEN_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.42");

// pkcs-9 countries used by qualified certificates
pub const DN_COUNTRY_OF_CITIZENSHIP: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.9.4");
pub const DN_COUNTRY_OF_RESIDENCE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.9.5");
pub const DN_JURISDICTION_COUNTRY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.60.2.1.3");

// ---------------------------------------------------------------------------
// Extended key usage
// ---------------------------------------------------------------------------

pub const XKU_ANY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37.0");
pub const XKU_SERVER_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.1");
pub const XKU_CLIENT_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2");
pub const XKU_CODE_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");
pub const XKU_EMAIL_PROTECTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.4");
pub const XKU_TIME_STAMPING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.8");
pub const XKU_OCSP_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.9");

// ---------------------------------------------------------------------------
// Misc PKIX extensions
// ---------------------------------------------------------------------------

/// id-pkix-ocsp-nocheck
pub const OCSP_NOCHECK: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.5");

/// Certificate-policy qualifier id-qt-cps
pub const QT_CPS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.2.1");

/// qcStatements extension (RFC 3739)
pub const QC_STATEMENTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.1.3");

/// etsi-qcs-QcCompliance
pub const QCS_COMPLIANCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.4.0.1862.1.1");

/// etsi-qcs-QcLimitValue
pub const QCS_LIMIT_VALUE: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.4.0.1862.1.2");

// ---------------------------------------------------------------------------
// CA/Browser-Forum baseline requirements policy identifiers
// ---------------------------------------------------------------------------

pub const BR_DOMAIN_VALIDATED: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.140.1.2.1");
pub const BR_ORGANIZATION_VALIDATED: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.23.140.1.2.2");
pub const BR_INDIVIDUAL_VALIDATED: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.23.140.1.2.3");

// ---------------------------------------------------------------------------
// GM/T 0015 identity extensions
// ---------------------------------------------------------------------------

pub const GMT0015_IDENTITY_CODE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.156.10260.4.1.1");
pub const GMT0015_INSURANCE_NUMBER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.156.10260.4.1.2");
pub const GMT0015_IC_REGISTRATION_NUMBER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.156.10260.4.1.3");
pub const GMT0015_ORGANIZATION_CODE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.156.10260.4.1.4");
pub const GMT0015_TAXATION_NUMBER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.156.10260.4.1.5");

/// 全部 GM/T 0015 扩展
pub const GMT0015_EXTENSIONS: [ObjectIdentifier; 5] = [
    GMT0015_IDENTITY_CODE,
    GMT0015_INSURANCE_NUMBER,
    GMT0015_IC_REGISTRATION_NUMBER,
    GMT0015_ORGANIZATION_CODE,
    GMT0015_TAXATION_NUMBER,
];

/// 常用扩展的别名表，模板配置里可以用名字代替点分 OID
pub fn well_known_extension(name: &str) -> Option<ObjectIdentifier> {
    use const_oid::db::rfc5280 as ce;

    Some(match name {
        "subjectKeyIdentifier" => ce::ID_CE_SUBJECT_KEY_IDENTIFIER,
        "authorityKeyIdentifier" => ce::ID_CE_AUTHORITY_KEY_IDENTIFIER,
        "issuerAltName" => ce::ID_CE_ISSUER_ALT_NAME,
        "subjectAltName" => ce::ID_CE_SUBJECT_ALT_NAME,
        "authorityInfoAccess" => ce::ID_PE_AUTHORITY_INFO_ACCESS,
        "subjectInfoAccess" => ce::ID_PE_SUBJECT_INFO_ACCESS,
        "cRLDistributionPoints" => ce::ID_CE_CRL_DISTRIBUTION_POINTS,
        "freshestCRL" => ce::ID_CE_FRESHEST_CRL,
        "basicConstraints" => ce::ID_CE_BASIC_CONSTRAINTS,
        "keyUsage" => ce::ID_CE_KEY_USAGE,
        "extendedKeyUsage" => ce::ID_CE_EXT_KEY_USAGE,
        "certificatePolicies" => ce::ID_CE_CERTIFICATE_POLICIES,
        "nameConstraints" => ce::ID_CE_NAME_CONSTRAINTS,
        "ocspNoCheck" => OCSP_NOCHECK,
        "qcStatements" => QC_STATEMENTS,
        _ => return None,
    })
}
