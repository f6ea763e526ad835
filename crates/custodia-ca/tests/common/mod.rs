//! 集成测试共用的 CA 搭建工具
#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc};

use const_oid::db::rfc5280;
use der::{asn1::OctetString, Encode};
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use x509_cert::{
    ext::{
        pkix::{BasicConstraints, KeyUsage, KeyUsages},
        Extension,
    },
    serial_number::SerialNumber,
    time::{Time, Validity as X509Validity},
    Certificate, TbsCertificate, Version,
};

use custodia_core::{NameId, Validity};
use custodia_profile::{oids, subject::build_name, KeySpec};

use custodia_ca::{
    ca_info::{CaCert, CaInfo, CaStatus, CrlControl, ValidityMode},
    signer::ContentSigner,
    store::IssuerRecord,
    CertStore,
};

pub fn utc(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).unwrap()
}

pub fn asn1_time(t: OffsetDateTime) -> Time {
    let system_time: std::time::SystemTime = t.into();
    Time::try_from(system_time).unwrap()
}

/// 自签名 CA 证书
pub fn make_ca_cert(
    signer: &dyn ContentSigner,
    cn: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    path_len: Option<u8>,
) -> Vec<u8> {
    let subject = build_name(&[(oids::DN_CN, cn.to_string())]).unwrap();
    let spki = signer.public_key_info().unwrap();

    let ski = Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec();
    let basic_constraints = BasicConstraints {
        ca: true,
        path_len_constraint: path_len,
    };
    let key_usage = KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign);

    let extensions = vec![
        Extension {
            extn_id: rfc5280::ID_CE_BASIC_CONSTRAINTS,
            critical: true,
            extn_value: OctetString::new(basic_constraints.to_der().unwrap()).unwrap(),
        },
        Extension {
            extn_id: rfc5280::ID_CE_KEY_USAGE,
            critical: true,
            extn_value: OctetString::new(key_usage.to_der().unwrap()).unwrap(),
        },
        Extension {
            extn_id: rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER,
            critical: false,
            extn_value: OctetString::new(OctetString::new(ski).unwrap().to_der().unwrap())
                .unwrap(),
        },
    ];

    let signature_algorithm = signer.algorithm().algorithm_identifier();
    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x01]).unwrap(),
        signature: signature_algorithm.clone(),
        issuer: subject.clone(),
        validity: X509Validity {
            not_before: asn1_time(not_before),
            not_after: asn1_time(not_after),
        },
        subject,
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };

    let tbs_der = tbs.to_der().unwrap();
    let signature = signer.sign(&tbs_der).unwrap();

    Certificate {
        tbs_certificate: tbs,
        signature_algorithm,
        signature: der::asn1::BitString::from_bytes(&signature).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// 从 CA 证书搭一个 CaInfo
pub fn make_ca_info(
    ca_id: u32,
    ca_name: &str,
    cert_der: &[u8],
    max_validity: Validity,
    validity_mode: ValidityMode,
    path_len: Option<u8>,
) -> CaInfo {
    let cert = CaCert::parse(cert_der).unwrap();
    let no_new_certificate_after = cert.not_after;
    CaInfo {
        ident: NameId::new(ca_id, ca_name).unwrap(),
        cert,
        cert_chain: Vec::new(),
        ca_uris: Default::default(),
        max_validity,
        validity_mode,
        path_len,
        no_new_certificate_after,
        revocation_info: None,
        keyspec: KeySpec::Ed25519,
        extra_control: BTreeMap::new(),
        crl_control: Some(CrlControl::default()),
        serial_number_bytes: 16,
        status: CaStatus::Active,
    }
}

/// 在存储中注册签发者行
pub fn register_issuer(store: &Arc<CertStore>, info: &CaInfo) {
    store
        .add_issuer(IssuerRecord {
            id: info.ident.id(),
            subject: custodia_profile::subject::name_to_string(&info.cert.subject),
            not_before: info.cert.not_before.unix_timestamp(),
            sha1_fp: info.cert.sha1_fingerprint(),
            rev_info: None,
            cert_der: info.cert.der.clone(),
            crl_id: 0,
        })
        .unwrap();
}
