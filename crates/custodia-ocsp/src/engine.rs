//! 状态引擎与刷新管道
//!
//! 查询路径只读当前快照；后台任务周期性地从数据源重建快照并原子替换。

use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration as StdDuration,
};

use base64::Engine as _;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

use custodia_core::{CertRevocationInfo, CrlReason};

use crate::{
    issuer::{HashAlgo, IssuerEntry, RequestIssuer},
    source::{SourceError, StatusSource},
    status::{CertStatus, CertStatusInfo, CrlInfo, UnknownCertBehaviour},
    store::IssuerStore,
};

/// CRL 视作过期的提前量
const CRL_EXPIRY_MARGIN: Duration = Duration::minutes(5);

/// 后台刷新的最大随机抖动（秒）
const MAX_REFRESH_JITTER_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum OcspStoreError {
    #[error("initialization of CertStore is still in process")]
    NotInitialized,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("issuer store update failed: {0}")]
    Update(String),
}

/// 状态存储配置
#[derive(Debug, Clone)]
pub struct OcspStoreConf {
    pub name: String,
    /// 后台刷新周期（秒）
    pub update_interval_secs: u64,
    /// 归档截止：None 不输出；负值表示永远保留（用 CA 的 notBefore）
    pub retention_interval_days: Option<i64>,
    pub include_crl_id: bool,
    pub ignore_expired_crls: bool,
    pub ignore_not_yet_valid_cert: bool,
    pub ignore_expired_cert: bool,
    pub unknown_cert_behaviour: UnknownCertBehaviour,
    /// 只接受这些 SHA-1 指纹的签发者（小写 hex）；None 表示全部
    pub include_issuer_fps: Option<Vec<String>>,
    pub exclude_issuer_fps: Option<Vec<String>>,
}

impl OcspStoreConf {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            update_interval_secs: 300,
            retention_interval_days: None,
            include_crl_id: false,
            ignore_expired_crls: false,
            ignore_not_yet_valid_cert: false,
            ignore_expired_cert: false,
            unknown_cert_behaviour: UnknownCertBehaviour::Unknown,
            include_issuer_fps: None,
            exclude_issuer_fps: None,
        }
    }

    fn includes_issuer(&self, sha1_fp: &str) -> bool {
        let fp = sha1_fp.to_lowercase();
        if let Some(excludes) = &self.exclude_issuer_fps {
            if excludes.iter().any(|e| e.to_lowercase() == fp) {
                return false;
            }
        }
        match &self.include_issuer_fps {
            Some(includes) => includes.iter().any(|i| i.to_lowercase() == fp),
            None => true,
        }
    }
}

struct UpdaterHandle {
    stop: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

/// OCSP 证书状态存储
pub struct CertStatusStore {
    conf: OcspStoreConf,
    source: Arc<dyn StatusSource>,
    issuer_store: IssuerStore,
    cert_hash_algo: HashAlgo,
    initialized: AtomicBool,
    update_in_process: AtomicBool,
    update_lock: Mutex<()>,
    updater: Mutex<Option<UpdaterHandle>>,
}

impl std::fmt::Debug for CertStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertStatusStore")
            .field("conf", &self.conf)
            .field("cert_hash_algo", &self.cert_hash_algo)
            .field("initialized", &self.initialized)
            .field("update_in_process", &self.update_in_process)
            .finish()
    }
}

impl CertStatusStore {
    /// 建立存储并做首次装载
    ///
    /// DBSCHEMA 缺少 CERTHASH_ALGO 时初始化失败。
    pub fn new(conf: OcspStoreConf, source: Arc<dyn StatusSource>) -> Result<Arc<Self>, OcspStoreError> {
        let algo_name = source
            .dbschema("CERTHASH_ALGO")?
            .ok_or_else(|| {
                OcspStoreError::Config(
                    "column with NAME='CERTHASH_ALGO' is not defined in table DBSCHEMA"
                        .to_string(),
                )
            })?;
        let cert_hash_algo = HashAlgo::from_str(&algo_name).map_err(OcspStoreError::Config)?;

        let store = Arc::new(Self {
            conf,
            source,
            issuer_store: IssuerStore::new(),
            cert_hash_algo,
            initialized: AtomicBool::new(false),
            update_in_process: AtomicBool::new(false),
            update_lock: Mutex::new(()),
            updater: Mutex::new(None),
        });

        store.update_issuer_store(true)?;
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.conf.name
    }

    pub fn issuer_store(&self) -> &IssuerStore {
        &self.issuer_store
    }

    pub fn cert_hash_algo(&self) -> HashAlgo {
        self.cert_hash_algo
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn knows_issuer(&self, req: &RequestIssuer) -> bool {
        self.issuer_store.knows_issuer(req)
    }

    pub fn issuer_cert(&self, req: &RequestIssuer) -> Option<Vec<u8>> {
        self.issuer_store
            .issuer_for_fp(req)
            .map(|issuer| issuer.cert_der().to_vec())
    }

    // ------------------------------------------------------------------
    // refresh
    // ------------------------------------------------------------------

    /// 刷新签发者索引
    ///
    /// `force` 为假时已有刷新在跑就直接返回；为真则等它结束后再刷。
    pub fn update_issuer_store(&self, force: bool) -> Result<(), OcspStoreError> {
        let _guard = if force {
            self.update_lock.lock().expect("update lock poisoned")
        } else {
            match self.update_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => return Ok(()),
            }
        };

        self.update_in_process.store(true, Ordering::SeqCst);
        let result = self.update_issuer_store_locked();
        self.initialized.store(true, Ordering::SeqCst);
        self.update_in_process.store(false, Ordering::SeqCst);
        result
    }

    fn update_issuer_store_locked(&self) -> Result<(), OcspStoreError> {
        let crl_infos: HashMap<i64, CrlInfo> = self
            .source
            .crl_infos()?
            .into_iter()
            .map(|info| (info.crl_id, info))
            .collect();

        if self.is_initialized() && !self.issuers_changed()? {
            // fast path: issuers unchanged, refresh the CRL metadata only;
            // the swap still replaces the whole snapshot in one step
            let snapshot = self.issuer_store.snapshot();
            self.issuer_store
                .set(snapshot.issuers.clone(), crl_infos)
                .map_err(OcspStoreError::Update)?;
            return Ok(());
        }

        // slow path: reload every issuer from the source
        let rows = self.source.issuers()?;
        let mut entries: Vec<Arc<IssuerEntry>> = Vec::with_capacity(rows.len());

        for row in rows {
            if !self.conf.includes_issuer(&row.sha1_fp) {
                continue;
            }

            let revocation = row
                .rev_info
                .as_deref()
                .and_then(CertRevocationInfo::from_encoded);
            let entry = IssuerEntry::from_cert(row.id, row.cert_der, revocation, row.crl_id)
                .map_err(OcspStoreError::Update)?;

            // two issuers sharing (subject, key) would make lookups ambiguous
            let (name_hash, key_hash) = entry.encoded_hashes(HashAlgo::Sha1);
            let probe = RequestIssuer::new(HashAlgo::Sha1, name_hash, key_hash);
            if entries.iter().any(|existing| existing.matches(&probe)) {
                return Err(OcspStoreError::Update(
                    "found at least two issuers with the same subject and key".to_string(),
                ));
            }

            entries.push(Arc::new(entry));
        }

        let count = entries.len();
        self.issuer_store
            .set(entries, crl_infos)
            .map_err(OcspStoreError::Update)?;
        info!("updated store {} with {} issuers", self.conf.name, count);
        Ok(())
    }

    fn issuers_changed(&self) -> Result<bool, OcspStoreError> {
        let digests = self.source.issuer_digests()?;
        let snapshot = self.issuer_store.snapshot();

        let filtered: Vec<_> = digests
            .into_iter()
            .filter(|digest| self.conf.includes_issuer(&digest.sha1_fp))
            .collect();

        if filtered.len() != snapshot.ids.len() {
            return Ok(true);
        }

        for digest in &filtered {
            if !snapshot.ids.contains(&digest.id) {
                return Ok(true);
            }
            let entry = snapshot
                .issuers
                .iter()
                .find(|issuer| issuer.id() == digest.id)
                .expect("ids and issuers are of the same generation");

            let current = entry.revocation_info().map(|r| r.to_encoded());
            if current != digest.rev_info {
                return Ok(true);
            }
        }

        Ok(false)
    }

    // ------------------------------------------------------------------
    // background updater
    // ------------------------------------------------------------------

    /// 启动后台刷新任务；返回前不阻塞
    pub fn start_updater(self: &Arc<Self>) {
        let mut updater = self.updater.lock().expect("updater lock poisoned");
        if updater.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let store = Arc::downgrade(self);
        let interval = self.conf.update_interval_secs.max(1);
        let initial = interval + refresh_jitter();

        let join = thread::spawn(move || {
            let mut remaining = initial;
            loop {
                if stop_clone.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(StdDuration::from_secs(1));
                remaining = remaining.saturating_sub(1);
                if remaining > 0 {
                    continue;
                }
                remaining = interval;

                let Some(store) = store.upgrade() else {
                    return;
                };
                if let Err(e) = store.update_issuer_store(false) {
                    // failures are logged and retried on the next tick
                    error!("error while updating store {}: {}", store.conf.name, e);
                }
            }
        });

        *updater = Some(UpdaterHandle { stop, join });
    }

    /// 停止后台任务并等待退出
    pub fn close(&self) {
        let mut updater = self.updater.lock().expect("updater lock poisoned");
        if let Some(handle) = updater.take() {
            handle.stop.store(true, Ordering::Relaxed);
            let _ = handle.join.join();
        }
    }

    // ------------------------------------------------------------------
    // status resolution
    // ------------------------------------------------------------------

    /// 解析 (签发者指纹, 序列号) 的状态
    ///
    /// 未命中签发者时返回 `None`，调用方据此判定"不归我管"。
    #[allow(clippy::too_many_arguments)]
    pub fn get_cert_status(
        &self,
        time: OffsetDateTime,
        req_issuer: &RequestIssuer,
        serial: &[u8],
        include_cert_hash: bool,
        include_invalidity: bool,
        inherit_ca_revocation: bool,
    ) -> Result<Option<CertStatusInfo>, OcspStoreError> {
        if !is_positive_serial(serial) {
            return Ok(Some(CertStatusInfo::unknown(
                OffsetDateTime::now_utc(),
                None,
            )));
        }

        if !self.is_initialized() {
            return Err(OcspStoreError::NotInitialized);
        }

        let snapshot = self.issuer_store.snapshot();
        let Some(issuer) = snapshot.issuers.iter().find(|i| i.matches(req_issuer)) else {
            return Ok(None);
        };

        let mut crl_info = None;
        if issuer.crl_id() != 0 {
            crl_info = snapshot.crl_infos.get(&issuer.crl_id());
            if self.conf.ignore_expired_crls {
                if let Some(info) = crl_info {
                    if crl_is_expired(info, time) {
                        return Ok(Some(CertStatusInfo::crl_expired(time)));
                    }
                }
            }
        }

        let serial_str = serial_hex(serial);
        let row = self.source.cert_status(
            issuer.id(),
            &serial_str,
            include_cert_hash,
            include_invalidity,
        )?;

        let mut row_crl_id = 0;
        let mut unknown = true;
        let mut ignore = false;
        let mut revocation = None;
        let mut cert_hash = None;

        if let Some(row) = row {
            unknown = false;
            row_crl_id = row.crl_id;

            if self.conf.ignore_not_yet_valid_cert
                && row.not_before != 0
                && time.unix_timestamp() < row.not_before
            {
                ignore = true;
            }
            if !ignore
                && self.conf.ignore_expired_cert
                && row.not_after != 0
                && time.unix_timestamp() > row.not_after
            {
                ignore = true;
            }

            if !ignore {
                if include_cert_hash {
                    cert_hash = row.cert_hash.as_deref().and_then(|b64| {
                        base64::engine::general_purpose::STANDARD.decode(b64).ok()
                    });
                }

                if row.revoked {
                    let reason =
                        CrlReason::from_code(row.reason).unwrap_or(CrlReason::Unspecified);
                    let rev_time = OffsetDateTime::from_unix_timestamp(row.rev_time)
                        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
                    let invalidity = row
                        .invalidity_time
                        .filter(|&t| t != 0 && t != row.rev_time)
                        .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok());
                    revocation = Some(CertRevocationInfo::new(reason, rev_time, invalidity));
                }
            }
        }

        if row_crl_id == 0 {
            row_crl_id = issuer.crl_id();
        }
        if crl_info.is_none() && row_crl_id != 0 {
            crl_info = snapshot.crl_infos.get(&row_crl_id);
        }

        let (this_update, next_update) = match crl_info {
            Some(info) => {
                if self.conf.ignore_expired_crls && crl_is_expired(info, time) {
                    return Ok(Some(CertStatusInfo::crl_expired(time)));
                }
                (info.this_update, info.next_update)
            }
            None => (OffsetDateTime::now_utc(), None),
        };

        let mut status_info = if unknown {
            CertStatusInfo::unknown(this_update, next_update)
        } else if ignore {
            CertStatusInfo::ignore(this_update, next_update)
        } else if let Some(revocation) = revocation {
            CertStatusInfo::revoked(revocation, this_update, next_update)
        } else {
            CertStatusInfo::good(this_update, next_update)
        };

        if let Some(hash) = cert_hash {
            status_info = status_info.with_cert_hash(self.cert_hash_algo, hash);
        }

        if self.conf.include_crl_id {
            if let Some(info) = crl_info {
                status_info.crl_id = Some(info.crl_id);
            }
        }

        if let Some(retention) = self.conf.retention_interval_days {
            if retention != 0 {
                let cutoff = if retention < 0 {
                    // expired certificates remain in the status store forever
                    issuer.not_before()
                } else {
                    let horizon = OffsetDateTime::now_utc() - Duration::days(retention);
                    issuer.not_before().min(horizon)
                };
                status_info.archive_cutoff = Some(cutoff);
            }
        }

        if !inherit_ca_revocation {
            return Ok(Some(status_info));
        }
        let Some(ca_rev_info) = issuer.revocation_info() else {
            return Ok(Some(status_info));
        };

        let replaced = match &status_info.status {
            CertStatus::Good => true,
            CertStatus::Unknown | CertStatus::Ignore => {
                self.conf.unknown_cert_behaviour == UnknownCertBehaviour::Good
            }
            CertStatus::Revoked(revocation) => {
                revocation.revocation_time > ca_rev_info.revocation_time
            }
            CertStatus::CrlExpired => false,
        };

        if replaced {
            let new_rev_info = if ca_rev_info.reason == CrlReason::CaCompromise {
                ca_rev_info.clone()
            } else {
                CertRevocationInfo::new(
                    CrlReason::CaCompromise,
                    ca_rev_info.revocation_time,
                    ca_rev_info.invalidity_time,
                )
            };

            let mut replaced_info = CertStatusInfo::revoked(
                new_rev_info,
                status_info.this_update,
                status_info.next_update,
            );
            replaced_info.cert_hash = status_info.cert_hash.clone();
            replaced_info.cert_hash_algo = status_info.cert_hash_algo;
            replaced_info.archive_cutoff = status_info.archive_cutoff;
            replaced_info.crl_id = status_info.crl_id;
            status_info = replaced_info;
        }

        Ok(Some(status_info))
    }
}

impl Drop for CertStatusStore {
    fn drop(&mut self) {
        if let Ok(updater) = self.updater.lock() {
            if let Some(handle) = updater.as_ref() {
                handle.stop.store(true, Ordering::Relaxed);
            }
        }
    }
}

fn crl_is_expired(info: &CrlInfo, time: OffsetDateTime) -> bool {
    match info.next_update {
        Some(next_update) => next_update < time + CRL_EXPIRY_MARGIN,
        None => false,
    }
}

/// DER 有符号大端整数是否为正
fn is_positive_serial(serial: &[u8]) -> bool {
    if serial.is_empty() {
        return false;
    }
    if serial[0] & 0x80 != 0 {
        return false;
    }
    serial.iter().any(|&b| b != 0)
}

fn serial_hex(serial: &[u8]) -> String {
    let stripped: Vec<u8> = serial.iter().copied().skip_while(|&b| b == 0).collect();
    if stripped.is_empty() {
        return "0".to_string();
    }
    let s = hex::encode(stripped);
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn refresh_jitter() -> u64 {
    let mut bytes = [0u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        warn!("random source failure, refresh jitter disabled");
        return 0;
    }
    u64::from_be_bytes(bytes) % MAX_REFRESH_JITTER_SECS
}
