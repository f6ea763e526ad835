//! 状态解析与刷新管道的端到端测试

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

use der::{Decode, Encode};
use time::{Duration, OffsetDateTime};

use custodia_core::{CertRevocationInfo, CrlReason};
use custodia_ocsp::{
    CertStatus, CertStatusRow, CertStatusStore, CrlInfo, HashAlgo, IssuerDigestRow, IssuerRow,
    OcspStoreConf, OcspStoreError, RequestIssuer, SourceError, StatusSource,
    UnknownCertBehaviour,
};

// ---------------------------------------------------------------------------
// test fixtures
// ---------------------------------------------------------------------------

fn utc(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).unwrap()
}

/// 构造一张仅用于指纹匹配的签发者证书（签名为占位）
fn issuer_cert_der(cn: &str, not_before: OffsetDateTime) -> Vec<u8> {
    use der::asn1::{BitString, SetOfVec, Utf8StringRef};
    use x509_cert::attr::AttributeTypeAndValue;
    use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

    let cn_atav = AttributeTypeAndValue {
        oid: const_oid::ObjectIdentifier::new_unwrap("2.5.4.3"),
        value: der::Any::from_der(&Utf8StringRef::new(cn).unwrap().to_der().unwrap()).unwrap(),
    };
    let mut set = SetOfVec::new();
    set.insert(cn_atav).unwrap();
    let name = RdnSequence(vec![RelativeDistinguishedName(set)]);

    let mut seed = [0u8; 32];
    seed[..cn.len().min(32)].copy_from_slice(&cn.as_bytes()[..cn.len().min(32)]);
    let verifying = ed25519_dalek::SigningKey::from_bytes(&seed).verifying_key();

    let spki = pkcs8::spki::SubjectPublicKeyInfoOwned {
        algorithm: pkcs8::spki::AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc8410::ID_ED_25519,
            parameters: None,
        },
        subject_public_key: BitString::from_bytes(&verifying.to_bytes()).unwrap(),
    };

    let to_time = |t: OffsetDateTime| {
        x509_cert::time::Time::try_from(std::time::SystemTime::from(t)).unwrap()
    };

    let tbs = x509_cert::TbsCertificate {
        version: x509_cert::Version::V3,
        serial_number: x509_cert::serial_number::SerialNumber::new(&[1]).unwrap(),
        signature: pkcs8::spki::AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc8410::ID_ED_25519,
            parameters: None,
        },
        issuer: name.clone(),
        validity: x509_cert::time::Validity {
            not_before: to_time(not_before),
            not_after: to_time(not_before + Duration::days(3650)),
        },
        subject: name,
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };

    x509_cert::Certificate {
        tbs_certificate: tbs,
        signature_algorithm: pkcs8::spki::AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc8410::ID_ED_25519,
            parameters: None,
        },
        signature: BitString::from_bytes(&[0u8; 64]).unwrap(),
    }
    .to_der()
    .unwrap()
}

fn request_issuer(cert_der: &[u8]) -> RequestIssuer {
    RequestIssuer::from_issuer_cert(HashAlgo::Sha1, cert_der).unwrap()
}

fn sha1_hex(data: &[u8]) -> String {
    use sha1::Digest;
    hex::encode(sha1::Sha1::digest(data))
}

#[derive(Default)]
struct FakeSource {
    issuers: Mutex<Vec<IssuerRow>>,
    certs: Mutex<HashMap<(u32, String), CertStatusRow>>,
    crls: Mutex<Vec<CrlInfo>>,
    missing_certhash_algo: bool,
    full_loads: AtomicUsize,
}

impl FakeSource {
    fn with_issuer(cert_der: Vec<u8>, rev_info: Option<String>, crl_id: i64) -> Self {
        let source = Self::default();
        source.issuers.lock().unwrap().push(IssuerRow {
            id: 1,
            not_before: 0,
            rev_info,
            sha1_fp: sha1_hex(&cert_der),
            cert_der,
            crl_id,
        });
        source
    }

    fn put_cert(&self, issuer_id: u32, serial_hex: &str, row: CertStatusRow) {
        self.certs
            .lock()
            .unwrap()
            .insert((issuer_id, serial_hex.to_string()), row);
    }
}

impl StatusSource for FakeSource {
    fn issuer_digests(&self) -> Result<Vec<IssuerDigestRow>, SourceError> {
        Ok(self
            .issuers
            .lock()
            .unwrap()
            .iter()
            .map(|row| IssuerDigestRow {
                id: row.id,
                rev_info: row.rev_info.clone(),
                sha1_fp: row.sha1_fp.clone(),
            })
            .collect())
    }

    fn issuers(&self) -> Result<Vec<IssuerRow>, SourceError> {
        self.full_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.issuers.lock().unwrap().clone())
    }

    fn crl_infos(&self) -> Result<Vec<CrlInfo>, SourceError> {
        Ok(self.crls.lock().unwrap().clone())
    }

    fn cert_status(
        &self,
        issuer_id: u32,
        serial_hex: &str,
        include_cert_hash: bool,
        include_invalidity: bool,
    ) -> Result<Option<CertStatusRow>, SourceError> {
        Ok(self
            .certs
            .lock()
            .unwrap()
            .get(&(issuer_id, serial_hex.to_string()))
            .map(|row| {
                let mut row = row.clone();
                if !include_cert_hash {
                    row.cert_hash = None;
                }
                if !include_invalidity {
                    row.invalidity_time = None;
                }
                row
            }))
    }

    fn dbschema(&self, name: &str) -> Result<Option<String>, SourceError> {
        if name == "CERTHASH_ALGO" && !self.missing_certhash_algo {
            Ok(Some("SHA256".to_string()))
        } else {
            Ok(None)
        }
    }
}

fn good_row() -> CertStatusRow {
    CertStatusRow {
        not_before: utc(1_600_000_000).unix_timestamp(),
        not_after: utc(1_900_000_000).unix_timestamp(),
        revoked: false,
        reason: 0,
        rev_time: 0,
        invalidity_time: None,
        cert_hash: Some("aGFzaGJ5dGVz".to_string()),
        crl_id: 0,
    }
}

fn revoked_row(reason: CrlReason, rev_time: i64) -> CertStatusRow {
    CertStatusRow {
        revoked: true,
        reason: reason.code(),
        rev_time,
        ..good_row()
    }
}

// ---------------------------------------------------------------------------
// status resolution
// ---------------------------------------------------------------------------

#[test]
fn test_non_positive_serial_is_unknown() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));
    let store = CertStatusStore::new(OcspStoreConf::new("s"), source).unwrap();

    for serial in [&[][..], &[0x00][..], &[0x80][..]] {
        let info = store
            .get_cert_status(utc(1_700_000_000), &request_issuer(&cert), serial, false, false, false)
            .unwrap()
            .unwrap();
        assert_eq!(info.status, CertStatus::Unknown);
    }
}

#[test]
fn test_unknown_issuer_is_none() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let other = issuer_cert_der("Somebody Else", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert, None, 0));
    let store = CertStatusStore::new(OcspStoreConf::new("s"), source).unwrap();

    assert!(!store.knows_issuer(&request_issuer(&other)));
    let result = store
        .get_cert_status(utc(1_700_000_000), &request_issuer(&other), &[0x01], false, false, false)
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_good_revoked_unknown() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));
    source.put_cert(1, "ab", good_row());
    source.put_cert(1, "cd", revoked_row(CrlReason::KeyCompromise, 1_650_000_000));

    let store = CertStatusStore::new(OcspStoreConf::new("s"), source).unwrap();
    let req = request_issuer(&cert);
    let now = utc(1_700_000_000);

    let info = store
        .get_cert_status(now, &req, &[0xAB], false, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(info.status, CertStatus::Good);

    let info = store
        .get_cert_status(now, &req, &[0xCD], false, false, false)
        .unwrap()
        .unwrap();
    match &info.status {
        CertStatus::Revoked(rev) => {
            assert_eq!(rev.reason, CrlReason::KeyCompromise);
            assert_eq!(rev.revocation_time, utc(1_650_000_000));
        }
        other => panic!("expected revoked, got {:?}", other),
    }

    let info = store
        .get_cert_status(now, &req, &[0x77], false, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(info.status, CertStatus::Unknown);
}

#[test]
fn test_cert_hash_attached_on_request() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));
    source.put_cert(1, "ab", good_row());

    let store = CertStatusStore::new(OcspStoreConf::new("s"), source).unwrap();
    let req = request_issuer(&cert);
    let now = utc(1_700_000_000);

    let info = store
        .get_cert_status(now, &req, &[0xAB], true, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(info.cert_hash_algo, Some(HashAlgo::Sha256));
    assert_eq!(info.cert_hash.unwrap(), b"hashbytes".to_vec());

    let info = store
        .get_cert_status(now, &req, &[0xAB], false, false, false)
        .unwrap()
        .unwrap();
    assert!(info.cert_hash.is_none());
}

// S7: CRL 将在 5 分钟内过期
#[test]
fn test_expired_crl() {
    let now = utc(1_700_000_000);
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 7));
    source.crls.lock().unwrap().push(CrlInfo {
        crl_id: 7,
        crl_number: 1,
        this_update: now - Duration::days(1),
        next_update: Some(now + Duration::minutes(3)),
    });
    source.put_cert(1, "ab", good_row());

    let mut conf = OcspStoreConf::new("s");
    conf.ignore_expired_crls = true;
    let store = CertStatusStore::new(conf, source.clone()).unwrap();
    let req = request_issuer(&cert);

    let info = store
        .get_cert_status(now, &req, &[0xAB], false, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(info.status, CertStatus::CrlExpired);

    // without the flag the CRL times surface as thisUpdate/nextUpdate
    let mut conf = OcspStoreConf::new("s2");
    conf.ignore_expired_crls = false;
    let store = CertStatusStore::new(conf, source).unwrap();
    let info = store
        .get_cert_status(now, &req, &[0xAB], false, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(info.status, CertStatus::Good);
    assert_eq!(info.this_update, now - Duration::days(1));
}

#[test]
fn test_ignore_flags() {
    let now = utc(1_700_000_000);
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));

    let mut not_yet_valid = good_row();
    not_yet_valid.not_before = (now + Duration::days(1)).unix_timestamp();
    source.put_cert(1, "01", not_yet_valid);

    let mut expired = good_row();
    expired.not_after = (now - Duration::days(1)).unix_timestamp();
    source.put_cert(1, "02", expired);

    let mut conf = OcspStoreConf::new("s");
    conf.ignore_not_yet_valid_cert = true;
    conf.ignore_expired_cert = true;
    let store = CertStatusStore::new(conf, source).unwrap();
    let req = request_issuer(&cert);

    for serial in [&[0x01][..], &[0x02][..]] {
        let info = store
            .get_cert_status(now, &req, serial, false, false, false)
            .unwrap()
            .unwrap();
        assert_eq!(info.status, CertStatus::Ignore);
    }
}

#[test]
fn test_archive_cutoff() {
    let issuer_not_before = utc(1_500_000_000);
    let cert = issuer_cert_der("OCSP CA", issuer_not_before);

    // negative retention: the CA's notBefore
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));
    source.put_cert(1, "ab", good_row());
    let mut conf = OcspStoreConf::new("s");
    conf.retention_interval_days = Some(-1);
    let store = CertStatusStore::new(conf, source).unwrap();
    let info = store
        .get_cert_status(utc(1_700_000_000), &request_issuer(&cert), &[0xAB], false, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(info.archive_cutoff.unwrap(), issuer_not_before);

    // positive retention: min(notBefore, now - retention)
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));
    source.put_cert(1, "ab", good_row());
    let mut conf = OcspStoreConf::new("s");
    conf.retention_interval_days = Some(30);
    let store = CertStatusStore::new(conf, source).unwrap();
    let info = store
        .get_cert_status(utc(1_700_000_000), &request_issuer(&cert), &[0xAB], false, false, false)
        .unwrap()
        .unwrap();
    // the 30-day horizon is later than the CA's notBefore
    assert_eq!(info.archive_cutoff.unwrap(), issuer_not_before);
}

// S5 + 全组合的 CA 撤销继承表
#[test]
fn test_ca_revocation_inheritance_table() {
    let ca_rev_time = utc(1_714_521_600); // 2024-05-01
    let now = utc(1_717_200_000); // 2024-06-01
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));

    let ca_rev = CertRevocationInfo::new(CrlReason::Superseded, ca_rev_time, None);
    let make_store = |behaviour: UnknownCertBehaviour| {
        let source = Arc::new(FakeSource::with_issuer(
            cert.clone(),
            Some(ca_rev.to_encoded()),
            0,
        ));
        // S5: serial 0xAB good in the store
        source.put_cert(1, "ab", good_row());
        // revoked before the CA revocation
        source.put_cert(1, "b1", revoked_row(CrlReason::KeyCompromise, ca_rev_time.unix_timestamp() - 1000));
        // revoked after the CA revocation
        source.put_cert(1, "b2", revoked_row(CrlReason::KeyCompromise, ca_rev_time.unix_timestamp() + 1000));

        let mut conf = OcspStoreConf::new("s");
        conf.unknown_cert_behaviour = behaviour;
        CertStatusStore::new(conf, source).unwrap()
    };

    let req = request_issuer(&cert);
    let store = make_store(UnknownCertBehaviour::Unknown);

    // good -> replaced by caCompromise at the CA's revocation time
    let info = store
        .get_cert_status(now, &req, &[0xAB], false, false, true)
        .unwrap()
        .unwrap();
    match &info.status {
        CertStatus::Revoked(rev) => {
            assert_eq!(rev.reason, CrlReason::CaCompromise);
            assert_eq!(rev.revocation_time, ca_rev_time);
        }
        other => panic!("expected inherited revocation, got {:?}", other),
    }

    // without inheritance the underlying status survives
    let info = store
        .get_cert_status(now, &req, &[0xAB], false, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(info.status, CertStatus::Good);

    // unknown stays unknown under unknownCertBehaviour=unknown
    let info = store
        .get_cert_status(now, &req, &[0x77], false, false, true)
        .unwrap()
        .unwrap();
    assert_eq!(info.status, CertStatus::Unknown);

    // unknown is replaced under unknownCertBehaviour=good
    let store_good = make_store(UnknownCertBehaviour::Good);
    let info = store_good
        .get_cert_status(now, &req, &[0x77], false, false, true)
        .unwrap()
        .unwrap();
    assert!(matches!(info.status, CertStatus::Revoked(_)));

    // revoked earlier than the CA keeps its own revocation
    let info = store
        .get_cert_status(now, &req, &[0xB1], false, false, true)
        .unwrap()
        .unwrap();
    match &info.status {
        CertStatus::Revoked(rev) => assert_eq!(rev.reason, CrlReason::KeyCompromise),
        other => panic!("unexpected {:?}", other),
    }

    // revoked later than the CA is replaced
    let info = store
        .get_cert_status(now, &req, &[0xB2], false, false, true)
        .unwrap()
        .unwrap();
    match &info.status {
        CertStatus::Revoked(rev) => {
            assert_eq!(rev.reason, CrlReason::CaCompromise);
            assert_eq!(rev.revocation_time, ca_rev_time);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_ca_compromise_info_reused_unchanged() {
    let ca_rev_time = utc(1_714_521_600);
    let invalidity = utc(1_714_000_000);
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));

    let ca_rev = CertRevocationInfo::new(CrlReason::CaCompromise, ca_rev_time, Some(invalidity));
    let source = Arc::new(FakeSource::with_issuer(
        cert.clone(),
        Some(ca_rev.to_encoded()),
        0,
    ));
    source.put_cert(1, "ab", good_row());

    let store = CertStatusStore::new(OcspStoreConf::new("s"), source).unwrap();
    let info = store
        .get_cert_status(utc(1_717_200_000), &request_issuer(&cert), &[0xAB], false, false, true)
        .unwrap()
        .unwrap();

    match &info.status {
        CertStatus::Revoked(rev) => {
            assert_eq!(rev.reason, CrlReason::CaCompromise);
            assert_eq!(rev.invalidity_time, Some(invalidity));
        }
        other => panic!("unexpected {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// refresh pipeline
// ---------------------------------------------------------------------------

#[test]
fn test_fast_path_skips_full_reload() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert, None, 0));
    let store = CertStatusStore::new(OcspStoreConf::new("s"), source.clone()).unwrap();

    assert_eq!(source.full_loads.load(Ordering::SeqCst), 1);

    // unchanged issuers: the digest comparison avoids the full reload
    store.update_issuer_store(true).unwrap();
    assert_eq!(source.full_loads.load(Ordering::SeqCst), 1);

    // a revocation change forces the slow path
    {
        let mut issuers = source.issuers.lock().unwrap();
        issuers[0].rev_info = Some(
            CertRevocationInfo::new(CrlReason::CaCompromise, utc(1_700_000_000), None)
                .to_encoded(),
        );
    }
    store.update_issuer_store(true).unwrap();
    assert_eq!(source.full_loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_duplicate_issuers_abort_update() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));
    let store = CertStatusStore::new(OcspStoreConf::new("s"), source.clone()).unwrap();
    assert_eq!(store.issuer_store().size(), 1);

    // a second issuer with the same subject and key makes lookups ambiguous
    {
        let mut issuers = source.issuers.lock().unwrap();
        let mut duplicate = issuers[0].clone();
        duplicate.id = 2;
        issuers.push(duplicate);
    }

    let err = store.update_issuer_store(true).unwrap_err();
    assert!(matches!(err, OcspStoreError::Update(_)));
    // the previous snapshot stays valid
    assert_eq!(store.issuer_store().size(), 1);
    assert!(store.knows_issuer(&request_issuer(&cert)));
}

#[test]
fn test_issuer_filter() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let fp = sha1_hex(&cert);
    let source = Arc::new(FakeSource::with_issuer(cert.clone(), None, 0));

    let mut conf = OcspStoreConf::new("s");
    conf.exclude_issuer_fps = Some(vec![fp]);
    let store = CertStatusStore::new(conf, source).unwrap();
    assert_eq!(store.issuer_store().size(), 0);
    assert!(!store.knows_issuer(&request_issuer(&cert)));
}

#[test]
fn test_missing_certhash_algo_fails_init() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let mut source = FakeSource::with_issuer(cert, None, 0);
    source.missing_certhash_algo = true;

    let err = CertStatusStore::new(OcspStoreConf::new("s"), Arc::new(source)).unwrap_err();
    assert!(matches!(err, OcspStoreError::Config(_)));
}

#[test]
fn test_updater_lifecycle() {
    let cert = issuer_cert_der("OCSP CA", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert, None, 0));
    let mut conf = OcspStoreConf::new("s");
    conf.update_interval_secs = 1;
    let store = CertStatusStore::new(conf, source).unwrap();

    store.start_updater();
    // a second start is a no-op
    store.start_updater();
    assert!(store.is_initialized());

    // close stops and joins the background thread
    store.close();
    store.close();
}

// 快照原子性：读方看到的 ids 与 issuers 永远同代
#[test]
fn test_snapshot_atomicity_under_refresh() {
    let cert_a = issuer_cert_der("CA Alpha", utc(1_500_000_000));
    let cert_b = issuer_cert_der("CA Beta", utc(1_500_000_000));
    let source = Arc::new(FakeSource::with_issuer(cert_a.clone(), None, 0));
    let store = CertStatusStore::new(OcspStoreConf::new("s"), source.clone()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = stop.clone();
    let reader_store = store.clone();
    let reader = thread::spawn(move || {
        while !reader_stop.load(Ordering::Relaxed) {
            let snapshot = reader_store.issuer_store().snapshot();
            assert_eq!(snapshot.ids.len(), snapshot.issuers.len());
            for issuer in &snapshot.issuers {
                assert!(snapshot.ids.contains(&issuer.id()));
            }
        }
    });

    let row_b = IssuerRow {
        id: 2,
        not_before: 0,
        rev_info: None,
        sha1_fp: sha1_hex(&cert_b),
        cert_der: cert_b,
        crl_id: 0,
    };

    for round in 0..200 {
        {
            let mut issuers = source.issuers.lock().unwrap();
            if round % 2 == 0 {
                issuers.push(row_b.clone());
            } else {
                issuers.retain(|row| row.id != 2);
            }
        }
        store.update_issuer_store(true).unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();

    let generation = store.issuer_store().generation();
    assert!(generation >= 200);
}
