//! 签发端到端测试

mod common;

use std::sync::{atomic::AtomicBool, Arc};

use der::{Decode, Encode};
use time::Duration;
use x509_cert::{ext::pkix::name::GeneralName, Certificate};

use custodia_core::{CrlReason, ErrorCode, NameId, Validity, MAX_CERT_TIME};
use custodia_profile::{
    conf::{ExtensionControlConf, PolicyConf},
    oids,
    subject::build_name,
    CertDomain, Certprofile, NotAfterMode, ProfileConf, RequestedExtension,
};

use custodia_ca::{
    ca::CaInstance,
    ca_info::ValidityMode,
    crl::parse_crl_serials,
    keygen::{KeypairGenerator, SoftKeypairGenerator},
    signer::{ContentSigner, Ed25519Signer, SignerPool},
    store::{serial_hex, CertStore},
    template::{CertTemplateData, TemplateBuilder},
};

use common::*;

fn profile(conf: ProfileConf) -> Certprofile {
    Certprofile::initialize(NameId::new(100, "test-profile").unwrap(), conf).unwrap()
}

fn keypair_gens() -> Vec<Arc<dyn KeypairGenerator>> {
    vec![Arc::new(SoftKeypairGenerator::default())]
}

fn ed25519_request_key() -> pkcs8::spki::SubjectPublicKeyInfoOwned {
    SoftKeypairGenerator::default()
        .generate(&custodia_profile::KeySpec::Ed25519)
        .unwrap()
        .spki
}

struct Fixture {
    signer: Arc<dyn ContentSigner>,
    ca_cert_der: Vec<u8>,
}

impl Fixture {
    // CA valid 2024-01-01 .. 2034-01-01
    fn new() -> Self {
        let signer: Arc<dyn ContentSigner> = Arc::new(Ed25519Signer::generate().unwrap());
        let ca_cert_der = make_ca_cert(
            signer.as_ref(),
            "Test Issuing CA",
            utc(1_704_067_200),
            utc(2_019_686_400),
            Some(1),
        );
        Self { signer, ca_cert_der }
    }

    fn ca_info(&self, validity_mode: ValidityMode) -> custodia_ca::ca_info::CaInfo {
        make_ca_info(
            1,
            "test-ca",
            &self.ca_cert_der,
            Validity::years(20),
            validity_mode,
            Some(1),
        )
    }

    fn pool(&self) -> SignerPool {
        SignerPool::single(self.signer.clone())
    }

    fn instance(&self, validity_mode: ValidityMode) -> (Arc<CertStore>, CaInstance) {
        let store = Arc::new(CertStore::in_memory());
        let info = self.ca_info(validity_mode);
        register_issuer(&store, &info);
        let instance = CaInstance::new(
            info,
            store.clone(),
            self.pool(),
            keypair_gens(),
            Vec::new(),
            Arc::new(custodia_core::UniqueIdGenerator::new(9)),
        );
        (store, instance)
    }
}

// S1: 明确的 notBefore，validity 365 天
#[test]
fn test_validity_window_from_request() {
    let fixture = Fixture::new();
    let ca_info = fixture.ca_info(ValidityMode::Strict);
    let p = profile(ProfileConf::end_entity(&["Ed25519"]));

    // 2025-06-01T00:00:00Z
    let req_not_before = utc(1_748_736_000);
    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "s1.example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());
    template.not_before = Some(req_not_before);

    let granted = TemplateBuilder::new(&ca_info)
        .build(&p, &template, &fixture.pool(), &keypair_gens(), req_not_before)
        .unwrap();

    assert_eq!(granted.not_before, req_not_before);
    assert_eq!(granted.not_after, req_not_before + Duration::days(365));
    assert!(granted.warning.is_none());
}

// 请求的 notAfter 超出上限时截断并告警
#[test]
fn test_not_after_clamped_with_warning() {
    let fixture = Fixture::new();
    let ca_info = fixture.ca_info(ValidityMode::Strict);
    let p = profile(ProfileConf::end_entity(&["Ed25519"]));

    let now = utc(1_748_736_000);
    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "clamp.example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());
    template.not_before = Some(now);
    template.not_after = Some(now + Duration::days(700));

    let granted = TemplateBuilder::new(&ca_info)
        .build(&p, &template, &fixture.pool(), &keypair_gens(), now)
        .unwrap();

    assert_eq!(granted.not_after, now + Duration::days(365));
    assert!(granted.warning.unwrap().contains("notAfter modified"));
}

// 有效期模式矩阵：超出 CA notAfter 的各种组合
#[test]
fn test_validity_mode_matrix() {
    let fixture = Fixture::new();
    // close to the CA's notAfter so that profile validity crosses it
    let now = utc(2_019_686_400 - 86_400 * 30);
    let ca_not_after = utc(2_019_686_400);

    let build = |ca_mode: ValidityMode, profile_mode: NotAfterMode| {
        let ca_info = fixture.ca_info(ca_mode);
        let mut conf = ProfileConf::end_entity(&["Ed25519"]);
        conf.not_after_mode = profile_mode;
        let p = profile(conf);

        let mut template = CertTemplateData::new(
            build_name(&[(oids::DN_CN, "matrix.example.com".to_string())]).unwrap(),
            "test-profile",
        );
        template.public_key_info = Some(ed25519_request_key());
        template.not_before = Some(now);

        TemplateBuilder::new(&ca_info).build(&p, &template, &fixture.pool(), &keypair_gens(), now)
    };

    // strict CA refuses in every profile mode
    for profile_mode in [NotAfterMode::Strict, NotAfterMode::Cutoff, NotAfterMode::ByCa] {
        let err = build(ValidityMode::Strict, profile_mode).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotPermitted);
    }

    // strict profile refuses regardless of the CA mode
    for ca_mode in [ValidityMode::Cutoff, ValidityMode::Lax] {
        let err = build(ca_mode, NotAfterMode::Strict).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotPermitted);
    }

    // cutoff CA clamps
    for profile_mode in [NotAfterMode::Cutoff, NotAfterMode::ByCa] {
        let granted = build(ValidityMode::Cutoff, profile_mode).unwrap();
        assert_eq!(granted.not_after, ca_not_after);
    }

    // lax CA: cutoff profile clamps, byCA keeps
    let granted = build(ValidityMode::Lax, NotAfterMode::Cutoff).unwrap();
    assert_eq!(granted.not_after, ca_not_after);

    let granted = build(ValidityMode::Lax, NotAfterMode::ByCa).unwrap();
    assert_eq!(granted.not_after, now + Duration::days(365));
    assert!(granted.not_after > ca_not_after);
}

// 无明确过期时间的模板签出 9999-12-31
#[test]
fn test_no_well_defined_expiration() {
    let fixture = Fixture::new();
    let ca_info = fixture.ca_info(ValidityMode::Lax);
    let mut conf = ProfileConf::end_entity(&["Ed25519"]);
    conf.no_well_defined_expiration = true;
    conf.not_after_mode = NotAfterMode::ByCa;
    let p = profile(conf);

    let now = utc(1_748_736_000);
    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "forever.example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());
    template.not_before = Some(now);

    let granted = TemplateBuilder::new(&ca_info)
        .build(&p, &template, &fixture.pool(), &keypair_gens(), now)
        .unwrap();
    assert_eq!(granted.not_after, MAX_CERT_TIME);
}

// S4: SubCA pathLen 必须严格小于 CA 的
#[test]
fn test_sub_ca_path_len_rejected() {
    let fixture = Fixture::new();
    let ca_info = fixture.ca_info(ValidityMode::Strict); // CA pathLen = 1
    let p = profile(ProfileConf::sub_ca(&["Ed25519"], Some(2)));

    let now = utc(1_748_736_000);
    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "Sub CA".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());
    template.not_before = Some(now);

    let err = TemplateBuilder::new(&ca_info)
        .build(&p, &template, &fixture.pool(), &keypair_gens(), now)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotPermitted);
    assert!(err.message.contains("pathLenConstraint"));

    // pathLen 0 < 1 is fine
    let p = profile(ProfileConf::sub_ca(&["Ed25519"], Some(0)));
    TemplateBuilder::new(&ca_info)
        .build(&p, &template, &fixture.pool(), &keypair_gens(), now)
        .unwrap();
}

// 撤销的 CA 直接拒绝
#[test]
fn test_revoked_ca_refuses() {
    let fixture = Fixture::new();
    let mut ca_info = fixture.ca_info(ValidityMode::Strict);
    ca_info.revocation_info = Some(custodia_core::CertRevocationInfo::new(
        CrlReason::CaCompromise,
        utc(1_700_000_000),
        None,
    ));
    let p = profile(ProfileConf::end_entity(&["Ed25519"]));

    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "x.example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());

    let err = TemplateBuilder::new(&ca_info)
        .build(
            &p,
            &template,
            &fixture.pool(),
            &keypair_gens(),
            utc(1_748_736_000),
        )
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotPermitted);
    assert!(err.message.contains("CA is revoked"));
}

// 主体与 CA 相同 → ALREADY_ISSUED
#[test]
fn test_subject_equals_ca_rejected() {
    let fixture = Fixture::new();
    let ca_info = fixture.ca_info(ValidityMode::Strict);
    let p = profile(ProfileConf::end_entity(&["Ed25519"]));

    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "Test Issuing CA".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());

    let err = TemplateBuilder::new(&ca_info)
        .build(
            &p,
            &template,
            &fixture.pool(),
            &keypair_gens(),
            utc(1_748_736_000),
        )
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyIssued);
}

// S2: CABForumBR DV，CN 出现在 SAN
#[test]
fn test_br_domain_validated_end_to_end() {
    let fixture = Fixture::new();
    let (_store, instance) = fixture.instance(ValidityMode::Strict);

    let mut conf = ProfileConf::end_entity(&["Ed25519"]);
    conf.cert_domain = CertDomain::CabForumBr;
    conf.certificate_policies = vec![PolicyConf {
        policy_id: oids::BR_DOMAIN_VALIDATED.to_string(),
        cps_uri: None,
    }];
    conf.extensions.push(ExtensionControlConf {
        extn_type: "certificatePolicies".to_string(),
        critical: false,
        required: true,
        permitted_in_request: false,
    });
    let p = profile(conf);
    let p_ident = p.ident().clone();

    let san: Vec<GeneralName> = vec![GeneralName::DnsName(
        der::asn1::Ia5String::new("example.com").unwrap(),
    )];
    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());
    template.extensions = vec![RequestedExtension::new(
        const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME,
        false,
        san.to_der().unwrap(),
    )];

    let issued = instance
        .generate_certificate(&p, &p_ident, &template, None)
        .unwrap();

    let cert = Certificate::from_der(&issued.cert_der).unwrap();
    let extensions = cert.tbs_certificate.extensions.unwrap();
    assert!(extensions
        .iter()
        .any(|e| e.extn_id == const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME));
    assert!(extensions
        .iter()
        .any(|e| e.extn_id == const_oid::db::rfc5280::ID_CE_CERTIFICATE_POLICIES));
}

// S3: DV 域下请求带 O → BAD_CERT_TEMPLATE
#[test]
fn test_br_dv_rejects_organization() {
    let fixture = Fixture::new();
    let (_store, instance) = fixture.instance(ValidityMode::Strict);

    let mut conf = ProfileConf::end_entity(&["Ed25519"]);
    conf.cert_domain = CertDomain::CabForumBr;
    conf.certificate_policies = vec![PolicyConf {
        policy_id: oids::BR_DOMAIN_VALIDATED.to_string(),
        cps_uri: None,
    }];
    conf.extensions.push(ExtensionControlConf {
        extn_type: "certificatePolicies".to_string(),
        critical: false,
        required: false,
        permitted_in_request: false,
    });
    let p = profile(conf);
    let p_ident = p.ident().clone();

    let san: Vec<GeneralName> = vec![GeneralName::DnsName(
        der::asn1::Ia5String::new("example.com").unwrap(),
    )];
    let mut template = CertTemplateData::new(
        build_name(&[
            (oids::DN_CN, "example.com".to_string()),
            (oids::DN_O, "Acme".to_string()),
        ])
        .unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());
    template.extensions = vec![RequestedExtension::new(
        const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME,
        false,
        san.to_der().unwrap(),
    )];

    let err = instance
        .generate_certificate(&p, &p_ident, &template, None)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BadCertTemplate);
    assert!(err.message.contains("domain validated"));
}

// S8: 服务端生成 EC 密钥，CA 自身是 Ed25519
#[test]
fn test_server_keygen_ec() {
    let fixture = Fixture::new();
    let (_store, instance) = fixture.instance(ValidityMode::Strict);

    let mut conf = ProfileConf::end_entity(&["Ed25519"]);
    conf.keypair_generation = custodia_profile::conf::KeypairGenConf::Specified {
        keyspec: "EC/secp256r1".to_string(),
    };
    let p = profile(conf);
    let p_ident = p.ident().clone();

    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "keygen.example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.server_keygen = true;

    let issued = instance
        .generate_certificate(&p, &p_ident, &template, None)
        .unwrap();

    let private_key = issued.private_key_der.expect("server generated key");
    assert!(!private_key.is_empty());

    let cert = Certificate::from_der(&issued.cert_der).unwrap();
    assert_eq!(
        cert.tbs_certificate.subject_public_key_info.algorithm.oid,
        const_oid::db::rfc5912::ID_EC_PUBLIC_KEY
    );
}

// 同一 (issuer, serial) 的重复签发是幂等的
#[test]
fn test_issuance_idempotent_on_serial() {
    let fixture = Fixture::new();
    let (_store, instance) = fixture.instance(ValidityMode::Strict);

    let mut conf = ProfileConf::end_entity(&["Ed25519"]);
    conf.serial_number = custodia_profile::SerialNumberMode::DerivedFromPublicKey;
    let p = profile(conf);
    let p_ident = p.ident().clone();

    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "idem.example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());

    let first = instance
        .generate_certificate(&p, &p_ident, &template, None)
        .unwrap();
    let second = instance
        .generate_certificate(&p, &p_ident, &template, None)
        .unwrap();

    assert_eq!(first.serial, second.serial);
    assert_eq!(first.cert_der, second.cert_der);
    assert!(second.warning.unwrap().contains("already issued"));
}

// 撤销/解除暂停/移除流程
#[test]
fn test_revocation_lifecycle() {
    let fixture = Fixture::new();
    let (store, instance) = fixture.instance(ValidityMode::Strict);
    let p = profile(ProfileConf::end_entity(&["Ed25519"]));
    let p_ident = p.ident().clone();

    let mut template = CertTemplateData::new(
        build_name(&[(oids::DN_CN, "lifecycle.example.com".to_string())]).unwrap(),
        "test-profile",
    );
    template.public_key_info = Some(ed25519_request_key());
    let issued = instance
        .generate_certificate(&p, &p_ident, &template, None)
        .unwrap();

    // hold then unsuspend
    instance
        .revoke_certificate(&issued.serial, CrlReason::CertificateHold, None)
        .unwrap();
    let record = instance.unsuspend_certificate(&issued.serial).unwrap();
    assert!(record.revocation.is_none());

    // definitive revocation, then a further revoke fails
    instance
        .revoke_certificate(&issued.serial, CrlReason::KeyCompromise, None)
        .unwrap();
    let err = instance
        .revoke_certificate(&issued.serial, CrlReason::Superseded, None)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotPermitted);

    // removal deletes the row
    instance.remove_certificate(&issued.serial).unwrap();
    assert!(store.cert(1, &serial_hex(&issued.serial)).is_none());
}

// CRL 条目按 (撤销时间, 序列号) 排序
#[test]
fn test_crl_generation_and_ordering() {
    let fixture = Fixture::new();
    let (store, instance) = fixture.instance(ValidityMode::Strict);
    let p = profile(ProfileConf::end_entity(&["Ed25519"]));
    let p_ident = p.ident().clone();

    let mut serials = Vec::new();
    for i in 0..3 {
        let mut template = CertTemplateData::new(
            build_name(&[(oids::DN_CN, format!("crl{}.example.com", i))]).unwrap(),
            "test-profile",
        );
        template.public_key_info = Some(ed25519_request_key());
        let issued = instance
            .generate_certificate(&p, &p_ident, &template, None)
            .unwrap();
        serials.push(issued.serial);
    }

    // craft distinct revocation times directly in the store
    let times = [300i64, 100, 200];
    for (serial, &t) in serials.iter().zip(times.iter()) {
        store
            .revoke_cert(
                1,
                &serial_hex(serial),
                custodia_core::CertRevocationInfo::new(
                    CrlReason::KeyCompromise,
                    utc(1_700_000_000 + t),
                    None,
                ),
            )
            .unwrap();
    }

    let crl_der = instance.generate_crl(true).unwrap();
    let crl_serials = parse_crl_serials(&crl_der).unwrap();
    assert_eq!(crl_serials.len(), 3);

    // expected order: revocation times 100, 200, 300
    let expected = vec![serials[1].clone(), serials[2].clone(), serials[0].clone()];
    let normalize =
        |s: &Vec<u8>| -> String { serial_hex(s) };
    assert_eq!(
        crl_serials.iter().map(normalize).collect::<Vec<_>>(),
        expected.iter().map(normalize).collect::<Vec<_>>()
    );

    // CRL number advances and the latest CRL is retrievable by id
    let second = instance.generate_crl(true).unwrap();
    assert_ne!(crl_der, second);
    assert_eq!(store.current_crl_number(1), 2);
    let latest = store.latest_crl(1).unwrap();
    assert_eq!(latest.crl_number, 2);
    assert_eq!(store.crl(latest.crl_id).unwrap().crl_der, second);
    assert_eq!(store.cert_count(1), 3);
}

// 批量重发布：单个发布器失败不打断整批
#[test]
fn test_publish_certs_reports_failures() {
    use std::sync::Mutex;

    use custodia_ca::publisher::{CertPublisher, PublishedCert, PublisherError};

    struct FlakyPublisher {
        seen: Mutex<Vec<String>>,
        fail_serials: Mutex<Vec<String>>,
    }

    impl CertPublisher for FlakyPublisher {
        fn name(&self) -> &str {
            "flaky"
        }

        fn certificate_added(&self, cert: &PublishedCert) -> Result<(), PublisherError> {
            if self.fail_serials.lock().unwrap().contains(&cert.serial) {
                return Err(PublisherError("injected failure".to_string()));
            }
            self.seen.lock().unwrap().push(cert.serial.clone());
            Ok(())
        }

        fn certificate_status_changed(
            &self,
            _issuer_id: u32,
            _serial: &str,
            _revocation: Option<&custodia_core::CertRevocationInfo>,
        ) -> Result<(), PublisherError> {
            Ok(())
        }

        fn certificate_removed(
            &self,
            _issuer_id: u32,
            _serial: &str,
        ) -> Result<(), PublisherError> {
            Ok(())
        }

        fn crl_added(
            &self,
            _issuer_id: u32,
            _crl_number: i64,
            _crl_der: &[u8],
        ) -> Result<(), PublisherError> {
            Ok(())
        }
    }

    let fixture = Fixture::new();
    let (_store, instance) = fixture.instance(ValidityMode::Strict);
    let p = profile(ProfileConf::end_entity(&["Ed25519"]));
    let p_ident = p.ident().clone();

    let mut serials = Vec::new();
    for i in 0..3 {
        let mut template = CertTemplateData::new(
            build_name(&[(oids::DN_CN, format!("pub{}.example.com", i))]).unwrap(),
            "test-profile",
        );
        template.public_key_info = Some(ed25519_request_key());
        let issued = instance
            .generate_certificate(&p, &p_ident, &template, None)
            .unwrap();
        serials.push(serial_hex(&issued.serial));
    }

    // one certificate fails at the publisher, the rest go through
    let publisher = Arc::new(FlakyPublisher {
        seen: Mutex::new(Vec::new()),
        fail_serials: Mutex::new(vec![serials[1].clone()]),
    });
    instance.set_publishers(vec![publisher.clone() as Arc<dyn CertPublisher>]);

    let stop = AtomicBool::new(false);
    let report = instance.publish_certs(0, &stop).unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, serials[1]);
    assert_eq!(report.failures[0].1, "flaky");
    assert_eq!(publisher.seen.lock().unwrap().len(), 2);
}
