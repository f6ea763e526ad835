//! 证书存储
//!
//! 按逻辑表（issuer / cert / crl / crl_info / system_event / dbschema /
//! publish_queue）组织的进程内存储，支持 JSON 快照持久化。
//! 一次操作即一个原子边界。

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use custodia_core::{
    CertRevocationInfo, CrlReason, OperationError, Result, SystemEvent, UniqueIdGenerator,
};

/// 保留的 DBSCHEMA 键，不允许修改
const RESERVED_DBSCHEMA: [&str; 3] = ["VERSION", "VENDOR", "X500NAME_MAXLEN"];

/// 序列号的统一存储形式：小写 hex，无前导零
pub fn serial_hex(serial: &[u8]) -> String {
    let stripped: Vec<u8> = serial
        .iter()
        .copied()
        .skip_while(|&b| b == 0)
        .collect();
    if stripped.is_empty() {
        "0".to_string()
    } else {
        let mut s = hex::encode(stripped);
        if s.starts_with('0') {
            s = s.trim_start_matches('0').to_string();
        }
        s
    }
}

/// 签发者记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerRecord {
    pub id: u32,
    pub subject: String,
    pub not_before: i64,
    /// SHA-1 指纹（hex）
    pub sha1_fp: String,
    /// 撤销信息的紧凑编码
    pub rev_info: Option<String>,
    #[serde(with = "bytes_hex")]
    pub cert_der: Vec<u8>,
    pub crl_id: i64,
}

/// 证书记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertRecord {
    pub id: i64,
    pub issuer_id: u32,
    pub serial: String,
    pub subject: String,
    pub not_before: i64,
    pub not_after: i64,
    pub revocation: Option<CertRevocationInfo>,
    pub profile_id: u32,
    pub requestor_id: Option<u32>,
    #[serde(with = "bytes_hex")]
    pub cert_der: Vec<u8>,
    /// base64 编码的证书哈希（算法见 DBSCHEMA CERTHASH_ALGO）
    pub cert_hash: String,
    pub crl_id: i64,
}

/// CRL 元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlInfoRecord {
    pub crl_id: i64,
    pub ca_id: u32,
    pub crl_number: i64,
    pub this_update: i64,
    pub next_update: i64,
}

/// CRL 本体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlRecord {
    pub crl_id: i64,
    pub ca_id: u32,
    pub crl_number: i64,
    #[serde(with = "bytes_hex")]
    pub crl_der: Vec<u8>,
}

/// 待发布队列条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishQueueEntry {
    pub ca_id: u32,
    pub cert_id: i64,
}

/// 证书列表过滤
#[derive(Debug, Clone, Default)]
pub struct CertListFilter {
    pub issuer_id: Option<u32>,
    pub profile_id: Option<u32>,
    pub revoked_only: bool,
    pub not_after_min: Option<i64>,
}

/// 证书列表排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertOrderBy {
    #[default]
    Id,
    /// (撤销时间, 序列号)，CRL 条目顺序
    RevocationTimeSerial,
    NotAfter,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    issuers: BTreeMap<u32, IssuerRecord>,
    /// (issuer_id, serial_hex) -> record；快照里存为记录列表
    #[serde(with = "cert_table")]
    certs: BTreeMap<(u32, String), CertRecord>,
    crls: BTreeMap<i64, CrlRecord>,
    crl_infos: BTreeMap<i64, CrlInfoRecord>,
    next_crl_numbers: BTreeMap<u32, i64>,
    system_events: BTreeMap<String, SystemEvent>,
    dbschema: BTreeMap<String, String>,
    publish_queue: Vec<PublishQueueEntry>,
}

/// 权威证书/撤销存储
pub struct CertStore {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl CertStore {
    /// 纯内存存储
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables {
                dbschema: default_dbschema(),
                ..Tables::default()
            }),
            snapshot_path: None,
        }
    }

    /// 带 JSON 快照的存储；文件存在则装载
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| OperationError::database_failure(format!("read snapshot: {}", e)))?;
            serde_json::from_str(&json)
                .map_err(|e| OperationError::database_failure(format!("parse snapshot: {}", e)))?
        } else {
            Tables {
                dbschema: default_dbschema(),
                ..Tables::default()
            }
        };

        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
        })
    }

    fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let json = serde_json::to_string(tables)
            .map_err(|e| OperationError::database_failure(format!("encode snapshot: {}", e)))?;
        std::fs::write(path, json)
            .map_err(|e| OperationError::database_failure(format!("write snapshot: {}", e)))
    }

    // ------------------------------------------------------------------
    // issuer
    // ------------------------------------------------------------------

    pub fn add_issuer(&self, record: IssuerRecord) -> Result<()> {
        let mut tables = self.write();
        if tables.issuers.contains_key(&record.id) {
            return Err(OperationError::bad_request(format!(
                "issuer {} already exists",
                record.id
            )));
        }
        tables.issuers.insert(record.id, record);
        self.persist(&tables)
    }

    pub fn issuer(&self, id: u32) -> Option<IssuerRecord> {
        self.read().issuers.get(&id).cloned()
    }

    pub fn issuers(&self) -> Vec<IssuerRecord> {
        self.read().issuers.values().cloned().collect()
    }

    pub fn set_issuer_revocation(
        &self,
        id: u32,
        rev_info: Option<&CertRevocationInfo>,
    ) -> Result<()> {
        let mut tables = self.write();
        let issuer = tables
            .issuers
            .get_mut(&id)
            .ok_or_else(|| OperationError::bad_request(format!("unknown issuer {}", id)))?;
        issuer.rev_info = rev_info.map(|r| r.to_encoded());
        self.persist(&tables)
    }

    pub fn remove_issuer(&self, id: u32) -> Result<()> {
        let mut tables = self.write();
        tables.issuers.remove(&id);
        tables.certs.retain(|(issuer_id, _), _| *issuer_id != id);
        tables.crl_infos.retain(|_, info| info.ca_id != id);
        tables.crls.retain(|_, crl| crl.ca_id != id);
        tables.publish_queue.retain(|entry| entry.ca_id != id);
        self.persist(&tables)
    }

    // ------------------------------------------------------------------
    // cert
    // ------------------------------------------------------------------

    /// 入库；(issuer, serial) 冲突时失败
    pub fn add_cert(&self, record: CertRecord) -> Result<()> {
        let mut tables = self.write();
        let key = (record.issuer_id, record.serial.clone());
        if tables.certs.contains_key(&key) {
            return Err(OperationError::already_issued(format!(
                "certificate with serial 0x{} already issued by issuer {}",
                record.serial, record.issuer_id
            )));
        }
        tables.certs.insert(key, record);
        self.persist(&tables)
    }

    pub fn cert(&self, issuer_id: u32, serial: &str) -> Option<CertRecord> {
        self.read()
            .certs
            .get(&(issuer_id, serial.to_string()))
            .cloned()
    }

    pub fn cert_count(&self, issuer_id: u32) -> usize {
        self.read()
            .certs
            .keys()
            .filter(|(id, _)| *id == issuer_id)
            .count()
    }

    /// 撤销状态迁移
    ///
    /// good -> revoked(reason)；certificateHold -> removeFromCRL 解除暂停；
    /// certificateHold -> 其他原因可改写；其余一律拒绝。
    pub fn revoke_cert(
        &self,
        issuer_id: u32,
        serial: &str,
        rev_info: CertRevocationInfo,
    ) -> Result<CertRecord> {
        let mut tables = self.write();
        let record = tables
            .certs
            .get_mut(&(issuer_id, serial.to_string()))
            .ok_or_else(|| {
                OperationError::bad_request(format!("unknown certificate with serial 0x{}", serial))
            })?;

        match &record.revocation {
            None => {
                if rev_info.reason == CrlReason::RemoveFromCrl {
                    return Err(OperationError::not_permitted(
                        "could not unsuspend certificate that is not on hold",
                    ));
                }
                record.revocation = Some(rev_info);
            }
            Some(current) if current.reason.is_hold() => {
                if rev_info.reason == CrlReason::RemoveFromCrl {
                    record.revocation = None;
                } else {
                    record.revocation = Some(rev_info);
                }
            }
            Some(_) => {
                return Err(OperationError::not_permitted(format!(
                    "certificate with serial 0x{} is already revoked",
                    serial
                )));
            }
        }

        let result = record.clone();
        self.persist(&tables)?;
        Ok(result)
    }

    pub fn remove_cert(&self, issuer_id: u32, serial: &str) -> Result<CertRecord> {
        let mut tables = self.write();
        let record = tables
            .certs
            .remove(&(issuer_id, serial.to_string()))
            .ok_or_else(|| {
                OperationError::bad_request(format!("unknown certificate with serial 0x{}", serial))
            })?;
        self.persist(&tables)?;
        Ok(record)
    }

    pub fn list_certs(
        &self,
        filter: &CertListFilter,
        order_by: CertOrderBy,
        limit: usize,
    ) -> Vec<CertRecord> {
        let tables = self.read();
        let mut records: Vec<CertRecord> = tables
            .certs
            .values()
            .filter(|record| {
                if let Some(issuer_id) = filter.issuer_id {
                    if record.issuer_id != issuer_id {
                        return false;
                    }
                }
                if let Some(profile_id) = filter.profile_id {
                    if record.profile_id != profile_id {
                        return false;
                    }
                }
                if filter.revoked_only && record.revocation.is_none() {
                    return false;
                }
                if let Some(min) = filter.not_after_min {
                    if record.not_after < min {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        match order_by {
            CertOrderBy::Id => records.sort_by_key(|r| r.id),
            CertOrderBy::NotAfter => records.sort_by_key(|r| (r.not_after, r.id)),
            CertOrderBy::RevocationTimeSerial => records.sort_by(|a, b| {
                let time_a = a
                    .revocation
                    .as_ref()
                    .map(|r| r.revocation_time.unix_timestamp())
                    .unwrap_or(i64::MAX);
                let time_b = b
                    .revocation
                    .as_ref()
                    .map(|r| r.revocation_time.unix_timestamp())
                    .unwrap_or(i64::MAX);
                time_a.cmp(&time_b).then_with(|| a.serial.cmp(&b.serial))
            }),
        }

        if limit > 0 {
            records.truncate(limit);
        }
        records
    }

    // ------------------------------------------------------------------
    // crl
    // ------------------------------------------------------------------

    /// 预留并提交下一个 CRL 号
    pub fn next_crl_number(&self, ca_id: u32) -> Result<i64> {
        let mut tables = self.write();
        let next = tables.next_crl_numbers.entry(ca_id).or_insert(1);
        let number = *next;
        *next += 1;
        self.persist(&tables)?;
        Ok(number)
    }

    pub fn current_crl_number(&self, ca_id: u32) -> i64 {
        self.read()
            .next_crl_numbers
            .get(&ca_id)
            .copied()
            .unwrap_or(1)
            - 1
    }

    /// 存储一张新 CRL 并更新元数据；签发者行指向最新 CRL
    pub fn add_crl(
        &self,
        ca_id: u32,
        crl_id: i64,
        crl_number: i64,
        crl_der: Vec<u8>,
        this_update: OffsetDateTime,
        next_update: OffsetDateTime,
    ) -> Result<()> {
        let mut tables = self.write();
        tables.crls.insert(
            crl_id,
            CrlRecord {
                crl_id,
                ca_id,
                crl_number,
                crl_der,
            },
        );
        tables.crl_infos.insert(
            crl_id,
            CrlInfoRecord {
                crl_id,
                ca_id,
                crl_number,
                this_update: this_update.unix_timestamp(),
                next_update: next_update.unix_timestamp(),
            },
        );
        if let Some(issuer) = tables.issuers.get_mut(&ca_id) {
            issuer.crl_id = crl_id;
        }
        self.persist(&tables)
    }

    pub fn crl(&self, crl_id: i64) -> Option<CrlRecord> {
        self.read().crls.get(&crl_id).cloned()
    }

    pub fn latest_crl(&self, ca_id: u32) -> Option<CrlRecord> {
        let tables = self.read();
        tables
            .crls
            .values()
            .filter(|crl| crl.ca_id == ca_id)
            .max_by_key(|crl| crl.crl_number)
            .cloned()
    }

    pub fn crl_infos(&self) -> Vec<CrlInfoRecord> {
        self.read().crl_infos.values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // system events
    // ------------------------------------------------------------------

    pub fn system_event(&self, name: &str) -> Option<SystemEvent> {
        self.read().system_events.get(name).cloned()
    }

    pub fn change_system_event(&self, event: SystemEvent) -> Result<()> {
        let mut tables = self.write();
        tables.system_events.insert(event.name.clone(), event);
        self.persist(&tables)
    }

    pub fn delete_system_event(&self, name: &str) -> Result<()> {
        let mut tables = self.write();
        tables.system_events.remove(name);
        self.persist(&tables)
    }

    // ------------------------------------------------------------------
    // dbschema
    // ------------------------------------------------------------------

    pub fn dbschema(&self, name: &str) -> Option<String> {
        self.read().dbschema.get(name).cloned()
    }

    pub fn dbschemas(&self) -> BTreeMap<String, String> {
        let mut all = self.read().dbschema.clone();
        for reserved in RESERVED_DBSCHEMA {
            all.remove(reserved);
        }
        all
    }

    pub fn set_dbschema(&self, name: &str, value: &str) -> Result<()> {
        if RESERVED_DBSCHEMA.contains(&name) {
            return Err(OperationError::not_permitted(format!(
                "modification of reserved DBSCHEMA {} is not allowed",
                name
            )));
        }
        let mut tables = self.write();
        tables
            .dbschema
            .insert(name.to_string(), value.to_string());
        self.persist(&tables)
    }

    pub fn remove_dbschema(&self, name: &str) -> Result<()> {
        if RESERVED_DBSCHEMA.contains(&name) {
            return Err(OperationError::not_permitted(format!(
                "modification of reserved DBSCHEMA {} is not allowed",
                name
            )));
        }
        let mut tables = self.write();
        tables.dbschema.remove(name);
        self.persist(&tables)
    }

    // ------------------------------------------------------------------
    // publish queue
    // ------------------------------------------------------------------

    pub fn enqueue_publish(&self, ca_id: u32, cert_id: i64) -> Result<()> {
        let mut tables = self.write();
        tables.publish_queue.push(PublishQueueEntry { ca_id, cert_id });
        self.persist(&tables)
    }

    pub fn drain_publish_queue(&self, ca_id: u32) -> Result<Vec<PublishQueueEntry>> {
        let mut tables = self.write();
        let (drained, kept): (Vec<_>, Vec<_>) = tables
            .publish_queue
            .drain(..)
            .partition(|entry| entry.ca_id == ca_id);
        tables.publish_queue = kept;
        self.persist(&tables)?;
        Ok(drained)
    }

    /// 为指定 CA 生成一个新的证书行 ID
    pub fn next_cert_id(&self, id_generator: &UniqueIdGenerator) -> Result<i64> {
        id_generator
            .next_id()
            .map_err(|e| OperationError::system_failure(e.to_string()))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("cert store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("cert store lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// OCSP 状态数据源：证书存储自身即可充当副本库
// ---------------------------------------------------------------------------

impl custodia_ocsp::StatusSource for CertStore {
    fn issuer_digests(&self) -> std::result::Result<Vec<custodia_ocsp::IssuerDigestRow>, custodia_ocsp::SourceError> {
        Ok(self
            .issuers()
            .into_iter()
            .map(|issuer| custodia_ocsp::IssuerDigestRow {
                id: issuer.id,
                rev_info: issuer.rev_info,
                sha1_fp: issuer.sha1_fp,
            })
            .collect())
    }

    fn issuers(&self) -> std::result::Result<Vec<custodia_ocsp::IssuerRow>, custodia_ocsp::SourceError> {
        Ok(self
            .issuers()
            .into_iter()
            .map(|issuer| custodia_ocsp::IssuerRow {
                id: issuer.id,
                not_before: issuer.not_before,
                rev_info: issuer.rev_info,
                sha1_fp: issuer.sha1_fp,
                cert_der: issuer.cert_der,
                crl_id: issuer.crl_id,
            })
            .collect())
    }

    fn crl_infos(&self) -> std::result::Result<Vec<custodia_ocsp::CrlInfo>, custodia_ocsp::SourceError> {
        let mut infos = Vec::new();
        for record in self.crl_infos() {
            let this_update = OffsetDateTime::from_unix_timestamp(record.this_update)
                .map_err(|e| custodia_ocsp::SourceError(e.to_string()))?;
            let next_update = OffsetDateTime::from_unix_timestamp(record.next_update)
                .map_err(|e| custodia_ocsp::SourceError(e.to_string()))?;
            infos.push(custodia_ocsp::CrlInfo {
                crl_id: record.crl_id,
                crl_number: record.crl_number,
                this_update,
                next_update: Some(next_update),
            });
        }
        Ok(infos)
    }

    fn cert_status(
        &self,
        issuer_id: u32,
        serial_hex: &str,
        include_cert_hash: bool,
        include_invalidity: bool,
    ) -> std::result::Result<Option<custodia_ocsp::CertStatusRow>, custodia_ocsp::SourceError> {
        let Some(record) = self.cert(issuer_id, serial_hex) else {
            return Ok(None);
        };

        let (revoked, reason, rev_time, invalidity_time) = match &record.revocation {
            Some(rev) => (
                true,
                rev.reason.code(),
                rev.revocation_time.unix_timestamp(),
                if include_invalidity {
                    rev.invalidity_time.map(|t| t.unix_timestamp())
                } else {
                    None
                },
            ),
            None => (false, 0, 0, None),
        };

        Ok(Some(custodia_ocsp::CertStatusRow {
            not_before: record.not_before,
            not_after: record.not_after,
            revoked,
            reason,
            rev_time,
            invalidity_time,
            cert_hash: include_cert_hash.then_some(record.cert_hash),
            crl_id: record.crl_id,
        }))
    }

    fn dbschema(&self, name: &str) -> std::result::Result<Option<String>, custodia_ocsp::SourceError> {
        Ok(self.dbschema(name))
    }
}

fn default_dbschema() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("VERSION".to_string(), "9".to_string()),
        ("VENDOR".to_string(), "CUSTODIA".to_string()),
        ("X500NAME_MAXLEN".to_string(), "350".to_string()),
        ("CERTHASH_ALGO".to_string(), "SHA256".to_string()),
    ])
}

/// 证书表的 serde 表示：JSON 不支持元组键，按记录列表存取
mod cert_table {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::CertRecord;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<(u32, String), CertRecord>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let records: Vec<&CertRecord> = map.values().collect();
        records.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(u32, String), CertRecord>, D::Error> {
        let records = Vec::<CertRecord>::deserialize(deserializer)?;
        Ok(records
            .into_iter()
            .map(|record| ((record.issuer_id, record.serial.clone()), record))
            .collect())
    }
}

/// 证书 DER 的 serde 表示：hex 字符串，快照可读且紧凑
mod bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(reason: CrlReason, at: i64) -> CertRevocationInfo {
        CertRevocationInfo::new(
            reason,
            OffsetDateTime::from_unix_timestamp(at).unwrap(),
            None,
        )
    }

    fn cert(issuer: u32, id: i64, serial: &str) -> CertRecord {
        CertRecord {
            id,
            issuer_id: issuer,
            serial: serial.to_string(),
            subject: format!("CN=c{}", id),
            not_before: 0,
            not_after: 10_000,
            revocation: None,
            profile_id: 1,
            requestor_id: None,
            cert_der: vec![0x30, 0x00],
            cert_hash: "aGFzaA==".to_string(),
            crl_id: 0,
        }
    }

    #[test]
    fn test_serial_hex() {
        assert_eq!(serial_hex(&[0x00, 0xAB]), "ab");
        assert_eq!(serial_hex(&[0x01, 0x00]), "100");
        assert_eq!(serial_hex(&[0x00]), "0");
        assert_eq!(serial_hex(&[0x0F, 0xFF]), "fff");
    }

    #[test]
    fn test_add_cert_duplicate() {
        let store = CertStore::in_memory();
        store.add_cert(cert(1, 1, "ab")).unwrap();
        let err = store.add_cert(cert(1, 2, "ab")).unwrap_err();
        assert_eq!(err.code, custodia_core::ErrorCode::AlreadyIssued);

        // same serial under another issuer is fine
        store.add_cert(cert(2, 3, "ab")).unwrap();
    }

    #[test]
    fn test_revocation_transitions() {
        let store = CertStore::in_memory();
        store.add_cert(cert(1, 1, "01")).unwrap();

        // unsuspend of a good certificate is not permitted
        let err = store
            .revoke_cert(1, "01", rev(CrlReason::RemoveFromCrl, 100))
            .unwrap_err();
        assert_eq!(err.code, custodia_core::ErrorCode::NotPermitted);

        // good -> hold
        store
            .revoke_cert(1, "01", rev(CrlReason::CertificateHold, 100))
            .unwrap();

        // hold -> definitive revocation
        store
            .revoke_cert(1, "01", rev(CrlReason::KeyCompromise, 200))
            .unwrap();

        // revoking a definitively revoked certificate fails
        let err = store
            .revoke_cert(1, "01", rev(CrlReason::Superseded, 300))
            .unwrap_err();
        assert_eq!(err.code, custodia_core::ErrorCode::NotPermitted);
    }

    #[test]
    fn test_unsuspend() {
        let store = CertStore::in_memory();
        store.add_cert(cert(1, 1, "01")).unwrap();
        store
            .revoke_cert(1, "01", rev(CrlReason::CertificateHold, 100))
            .unwrap();
        let record = store
            .revoke_cert(1, "01", rev(CrlReason::RemoveFromCrl, 200))
            .unwrap();
        assert!(record.revocation.is_none());
    }

    #[test]
    fn test_crl_number_sequence() {
        let store = CertStore::in_memory();
        assert_eq!(store.next_crl_number(1).unwrap(), 1);
        assert_eq!(store.next_crl_number(1).unwrap(), 2);
        assert_eq!(store.next_crl_number(2).unwrap(), 1);
        assert_eq!(store.current_crl_number(1), 2);
    }

    #[test]
    fn test_list_certs_crl_order() {
        let store = CertStore::in_memory();
        for (id, serial) in [(1, "0a"), (2, "03"), (3, "0b")] {
            store.add_cert(cert(1, id, serial)).unwrap();
        }
        store
            .revoke_cert(1, "0b", rev(CrlReason::KeyCompromise, 100))
            .unwrap();
        store
            .revoke_cert(1, "0a", rev(CrlReason::KeyCompromise, 100))
            .unwrap();
        store
            .revoke_cert(1, "03", rev(CrlReason::Superseded, 50))
            .unwrap();

        let filter = CertListFilter {
            issuer_id: Some(1),
            revoked_only: true,
            ..CertListFilter::default()
        };
        let records = store.list_certs(&filter, CertOrderBy::RevocationTimeSerial, 0);
        let serials: Vec<&str> = records.iter().map(|r| r.serial.as_str()).collect();
        // ordered by (revocation time, serial)
        assert_eq!(serials, vec!["03", "0a", "0b"]);
    }

    #[test]
    fn test_dbschema_reserved() {
        let store = CertStore::in_memory();
        assert!(store.set_dbschema("VERSION", "10").is_err());
        assert!(store.remove_dbschema("VENDOR").is_err());
        store.set_dbschema("CUSTOM", "x").unwrap();
        assert_eq!(store.dbschema("CUSTOM").unwrap(), "x");

        // reserved names are hidden from the unreserved listing
        assert!(!store.dbschemas().contains_key("VERSION"));
        assert!(store.dbschemas().contains_key("CUSTOM"));
    }

    #[test]
    fn test_system_events() {
        let store = CertStore::in_memory();
        assert!(store.system_event("LOCK").is_none());
        store
            .change_system_event(SystemEvent::new("LOCK", "me", 100))
            .unwrap();
        assert_eq!(store.system_event("LOCK").unwrap().owner, "me");
        store.delete_system_event("LOCK").unwrap();
        assert!(store.system_event("LOCK").is_none());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = CertStore::open(&path).unwrap();
            store
                .add_issuer(IssuerRecord {
                    id: 1,
                    subject: "CN=CA".to_string(),
                    not_before: 0,
                    sha1_fp: "ff".to_string(),
                    rev_info: None,
                    cert_der: vec![0x30, 0x00],
                    crl_id: 0,
                })
                .unwrap();
            store.add_cert(cert(1, 7, "ab")).unwrap();
            store
                .revoke_cert(1, "ab", rev(CrlReason::CertificateHold, 42))
                .unwrap();
        }

        let store = CertStore::open(&path).unwrap();
        let record = store.cert(1, "ab").unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(
            record.revocation.as_ref().unwrap().reason,
            CrlReason::CertificateHold
        );
        assert_eq!(store.issuer(1).unwrap().subject, "CN=CA");
    }

    #[test]
    fn test_publish_queue() {
        let store = CertStore::in_memory();
        store.enqueue_publish(1, 10).unwrap();
        store.enqueue_publish(2, 20).unwrap();
        store.enqueue_publish(1, 11).unwrap();

        let drained = store.drain_publish_queue(1).unwrap();
        assert_eq!(drained.len(), 2);
        assert!(store.drain_publish_queue(1).unwrap().is_empty());
        assert_eq!(store.drain_publish_queue(2).unwrap().len(), 1);
    }
}
