//! CA 管理器
//!
//! 持有全部注册表（CA、模板、签名器、发布器、请求者、密钥生成器），
//! 负责集群主锁、系统启停与配置导入导出。
//! 子组件只拿短生命周期的借用句柄，状态的所有权集中在这里。

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    thread,
    time::Duration as StdDuration,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info};

use custodia_core::{
    event::{EVENT_CA_CHANGE, EVENT_LOCK},
    CertRevocationInfo, CrlReason, NameId, OperationError, Result, SystemEvent,
    UniqueIdGenerator, Validity,
};
use custodia_profile::{CaUris, Certprofile, ProfileConf, SignAlgo};

use crate::{
    ca::{CaInstance, IssuedCertificate},
    ca_info::{CaCert, CaInfo, CaStatus, CrlControl, ValidityMode},
    keygen::{KeypairGenerator, SoftKeypairGenerator},
    publisher::{CertPublisher, LogPublisher},
    signer::{ContentSigner, EcdsaP256Signer, Ed25519Signer, RsaSigner, SignerPool},
    store::{CertStore, IssuerRecord},
    template::CertTemplateData,
};

/// 从属节点轮询 CA_CHANGE 的周期（秒）
const SLAVE_POLL_SECONDS: u64 = 300;

/// 系统整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaSystemStatus {
    Uninitialized,
    Initializing,
    StartedAsMaster,
    StartedAsSlave,
    LockFailed,
    Error,
}

/// 管理器配置
#[derive(Debug, Clone)]
pub struct CaManagerConfig {
    /// 主节点模式；从节点只读配置并跟随重启
    pub master: bool,
    pub shard_id: u8,
    /// 实例标识令牌文件；不存在则写入一个新的 UUID
    pub lock_file: PathBuf,
    /// 证书存储快照；None 则纯内存
    pub snapshot_file: Option<PathBuf>,
    /// 从属节点轮询周期（秒），默认 300
    pub slave_poll_seconds: u64,
}

impl CaManagerConfig {
    pub fn new(master: bool, shard_id: u8, lock_file: impl Into<PathBuf>) -> Self {
        Self {
            master,
            shard_id,
            lock_file: lock_file.into(),
            snapshot_file: None,
            slave_poll_seconds: SLAVE_POLL_SECONDS,
        }
    }
}

// ---------------------------------------------------------------------------
// configuration entries (the exportable object graph)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaEntry {
    pub name: String,
    pub id: u32,
    /// CA 证书 DER（hex）
    pub cert: String,
    #[serde(default)]
    pub cert_chain: Vec<String>,
    #[serde(default)]
    pub ca_uris: CaUris,
    pub max_validity: Validity,
    #[serde(default)]
    pub validity_mode: ValidityMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_len: Option<u8>,
    pub keyspec: String,
    #[serde(default)]
    pub extra_control: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crl_control: Option<CrlControl>,
    #[serde(default = "default_serial_bytes")]
    pub serial_number_bytes: usize,
    pub status: CaStatus,
    pub signer_names: Vec<String>,
}

fn default_serial_bytes() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerEntry {
    pub name: String,
    pub algorithm: String,
    /// PKCS#8 私钥 DER（hex）
    pub private_key: String,
}

impl SignerEntry {
    /// 生成一个新的软签名器条目
    pub fn generate(name: impl Into<String>, algorithm: SignAlgo) -> Result<Self> {
        let (private_key, algorithm_name) = match algorithm {
            SignAlgo::Ed25519 => {
                let signer = Ed25519Signer::generate()
                    .map_err(|e| OperationError::system_failure(e.to_string()))?;
                (signer.to_pkcs8_der().map_err(to_system_failure)?, "Ed25519")
            }
            SignAlgo::EcdsaSha256 => {
                use p256::pkcs8::EncodePrivateKey;
                let secret = crate::keygen::random_p256_secret()
                    .map_err(|e| OperationError::system_failure(e.to_string()))?;
                let der = secret
                    .to_pkcs8_der()
                    .map_err(|e| OperationError::system_failure(e.to_string()))?;
                (der.as_bytes().to_vec(), "SHA256withECDSA")
            }
            other => {
                return Err(OperationError::bad_request(format!(
                    "signer generation for {} is not supported",
                    other.name()
                )));
            }
        };

        Ok(Self {
            name: name.into(),
            algorithm: algorithm_name.to_string(),
            private_key: hex::encode(private_key),
        })
    }
}

fn to_system_failure(e: crate::signer::SignerError) -> OperationError {
    OperationError::system_failure(e.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEntry {
    pub name: String,
    pub id: u32,
    pub conf: ProfileConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestorEntry {
    pub name: String,
    pub id: u32,
    /// 认证证书 DER（hex），None 表示尚未绑定凭证
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherEntry {
    pub name: String,
    pub id: u32,
    /// 目前支持 "log"
    pub publisher_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeypairGenEntry {
    pub name: String,
    /// 目前支持 "software"
    pub generator_type: String,
}

/// 完整配置包，导出/导入的载体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaConfBundle {
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
    #[serde(default)]
    pub signers: Vec<SignerEntry>,
    #[serde(default)]
    pub requestors: Vec<RequestorEntry>,
    #[serde(default)]
    pub publishers: Vec<PublisherEntry>,
    #[serde(default)]
    pub keypair_gens: Vec<KeypairGenEntry>,
    #[serde(default)]
    pub cas: Vec<CaEntry>,
    #[serde(default)]
    pub ca_aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub ca_has_profiles: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub ca_has_publishers: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub ca_has_requestors: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub dbschemas: BTreeMap<String, String>,
}

impl CaConfBundle {
    fn next_object_id(&self) -> u32 {
        let mut max = 0;
        for profile in &self.profiles {
            max = max.max(profile.id);
        }
        for requestor in &self.requestors {
            max = max.max(requestor.id);
        }
        for publisher in &self.publishers {
            max = max.max(publisher.id);
        }
        for ca in &self.cas {
            max = max.max(ca.id);
        }
        max + 1
    }
}

// ---------------------------------------------------------------------------
// runtime state
// ---------------------------------------------------------------------------

struct Runtime {
    cas: HashMap<String, Arc<CaInstance>>,
    profiles: HashMap<String, Arc<Certprofile>>,
    signers: HashMap<String, Arc<dyn ContentSigner>>,
    publishers: HashMap<String, Arc<dyn CertPublisher>>,
    keypair_gens: HashMap<String, Arc<dyn KeypairGenerator>>,
    failed_cas: BTreeSet<String>,
}

impl Runtime {
    fn empty() -> Self {
        Self {
            cas: HashMap::new(),
            profiles: HashMap::new(),
            signers: HashMap::new(),
            publishers: HashMap::new(),
            keypair_gens: HashMap::new(),
            failed_cas: BTreeSet::new(),
        }
    }
}

struct ManagerState {
    status: CaSystemStatus,
    conf: CaConfBundle,
    runtime: Runtime,
    last_start_time: OffsetDateTime,
}

struct WatcherHandle {
    stop: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

/// 顶层 CA 管理器
pub struct CaManager {
    config: CaManagerConfig,
    instance_id: String,
    store: Arc<CertStore>,
    id_generator: Arc<UniqueIdGenerator>,
    state: Arc<RwLock<ManagerState>>,
    restart_lock: Mutex<()>,
    locked_by_me: AtomicBool,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl CaManager {
    pub fn new(config: CaManagerConfig) -> Result<Arc<Self>> {
        let store = match &config.snapshot_file {
            Some(path) => Arc::new(CertStore::open(path)?),
            None => Arc::new(CertStore::in_memory()),
        };
        Self::with_store(config, store)
    }

    /// 使用外部给定的存储，集群场景下主从共享同一数据库
    pub fn with_store(config: CaManagerConfig, store: Arc<CertStore>) -> Result<Arc<Self>> {
        let instance_id = read_or_create_instance_id(&config.lock_file)?;

        Ok(Arc::new(Self {
            id_generator: Arc::new(UniqueIdGenerator::new(config.shard_id)),
            config,
            instance_id,
            store,
            state: Arc::new(RwLock::new(ManagerState {
                status: CaSystemStatus::Uninitialized,
                conf: CaConfBundle::default(),
                runtime: Runtime::empty(),
                last_start_time: OffsetDateTime::UNIX_EPOCH,
            })),
            restart_lock: Mutex::new(()),
            locked_by_me: AtomicBool::new(false),
            watcher: Mutex::new(None),
        }))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn store(&self) -> &Arc<CertStore> {
        &self.store
    }

    pub fn status(&self) -> CaSystemStatus {
        self.state.read().expect("manager lock poisoned").status
    }

    /// 最近一次成功启动的时间
    pub fn last_start_time(&self) -> OffsetDateTime {
        self.state
            .read()
            .expect("manager lock poisoned")
            .last_start_time
    }

    pub fn is_master(&self) -> bool {
        self.config.master
    }

    // ------------------------------------------------------------------
    // cluster lock
    // ------------------------------------------------------------------

    fn lock_ca(&self) -> Result<()> {
        if let Some(lock) = self.store.system_event(EVENT_LOCK) {
            if lock.owner != self.instance_id {
                let locked_at = OffsetDateTime::from_unix_timestamp(lock.event_time)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH);
                return Err(OperationError::not_permitted(format!(
                    "could not lock CA, it has been locked by {} since {}. In general this \
                     indicates that another CA software in master mode is accessing the \
                     database or the last shutdown of CA software in master mode is abnormal. \
                     If you know what you do, you can unlock it with the unlock command",
                    lock.owner, locked_at
                )));
            }
            info!("CA has been locked by me, re-lock it");
        }

        self.store.change_system_event(SystemEvent::new(
            EVENT_LOCK,
            self.instance_id.clone(),
            OffsetDateTime::now_utc().unix_timestamp(),
        ))?;
        self.locked_by_me.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// 破坏性解锁，仅主节点
    pub fn unlock(&self) -> Result<()> {
        if !self.config.master {
            return Err(OperationError::not_permitted("could not unlock CA in slave mode"));
        }
        self.store.delete_system_event(EVENT_LOCK)?;
        info!("unlocked CA");
        Ok(())
    }

    // ------------------------------------------------------------------
    // start / restart
    // ------------------------------------------------------------------

    pub fn start(self: &Arc<Self>) -> Result<()> {
        let result = {
            let _guard = self.restart_lock.lock().expect("restart lock poisoned");
            self.start_inner()
        };

        if result.is_ok() && !self.config.master {
            self.start_slave_watcher();
        }
        result
    }

    fn start_inner(&self) -> Result<()> {
        {
            let mut state = self.state.write().expect("manager lock poisoned");
            state.status = CaSystemStatus::Initializing;
        }

        if self.config.master {
            if let Err(e) = self.lock_ca() {
                let mut state = self.state.write().expect("manager lock poisoned");
                state.status = CaSystemStatus::LockFailed;
                return Err(e);
            }
        }

        let result = self.build_runtime();

        let mut state = self.state.write().expect("manager lock poisoned");
        match result {
            Ok(runtime) => {
                let failed = runtime.failed_cas.clone();
                state.runtime = runtime;
                state.status = if self.config.master {
                    CaSystemStatus::StartedAsMaster
                } else {
                    CaSystemStatus::StartedAsSlave
                };
                state.last_start_time = OffsetDateTime::now_utc();
                drop(state);

                let successful = self.successful_ca_names();
                let inactive = self.inactive_ca_names();
                info!(
                    "started CA system: successful CAs {:?}, failed CAs {:?}, inactive CAs {:?}",
                    successful, failed, inactive
                );
                Ok(())
            }
            Err(e) => {
                state.status = CaSystemStatus::Error;
                error!("could not start CA system: {}", e);
                Err(e)
            }
        }
    }

    /// 拆除全部 CA 并按持久配置重建
    pub fn restart_ca_system(&self) -> Result<()> {
        let _guard = self.restart_lock.lock().expect("restart lock poisoned");
        {
            let mut state = self.state.write().expect("manager lock poisoned");
            state.runtime = Runtime::empty();
        }
        let result = self.start_inner();
        if result.is_ok() && self.config.master {
            self.notify_ca_change()?;
        }
        result
    }

    /// 更新 CA_CHANGE 事件时间戳，通知从属节点重启
    pub fn notify_ca_change(&self) -> Result<()> {
        self.store.change_system_event(SystemEvent::new(
            EVENT_CA_CHANGE,
            self.instance_id.clone(),
            OffsetDateTime::now_utc().unix_timestamp(),
        ))?;
        info!("notified the change of CA system");
        Ok(())
    }

    fn build_runtime(&self) -> Result<Runtime> {
        let conf = {
            let state = self.state.read().expect("manager lock poisoned");
            state.conf.clone()
        };

        let mut runtime = Runtime::empty();

        for entry in &conf.profiles {
            let ident = NameId::new(entry.id, &entry.name)
                .map_err(|e| OperationError::bad_request(e.to_string()))?;
            match Certprofile::initialize(ident, entry.conf.clone()) {
                Ok(profile) => {
                    runtime
                        .profiles
                        .insert(entry.name.clone(), Arc::new(profile));
                }
                Err(e) => {
                    return Err(OperationError::system_failure(format!(
                        "could not initialize profile {}: {}",
                        entry.name, e
                    )));
                }
            }
        }

        for entry in &conf.signers {
            let signer = build_signer(entry)?;
            runtime.signers.insert(entry.name.clone(), signer);
        }

        for entry in &conf.publishers {
            let publisher = build_publisher(entry)?;
            runtime.publishers.insert(entry.name.clone(), publisher);
        }

        for entry in &conf.keypair_gens {
            let generator = build_keypair_gen(entry)?;
            runtime.keypair_gens.insert(entry.name.clone(), generator);
        }

        for entry in &conf.cas {
            if entry.status == CaStatus::Inactive {
                continue;
            }
            match self.build_ca_instance(&conf, &runtime, entry) {
                Ok(instance) => {
                    runtime.cas.insert(entry.name.clone(), Arc::new(instance));
                }
                Err(e) => {
                    error!("could not start CA {}: {}", entry.name, e);
                    runtime.failed_cas.insert(entry.name.clone());
                }
            }
        }

        Ok(runtime)
    }

    fn build_ca_instance(
        &self,
        conf: &CaConfBundle,
        runtime: &Runtime,
        entry: &CaEntry,
    ) -> Result<CaInstance> {
        let cert_der = hex::decode(&entry.cert)
            .map_err(|_| OperationError::bad_request("CA certificate is not valid hex"))?;
        let cert = CaCert::parse(&cert_der)?;

        let mut signers = Vec::new();
        for name in &entry.signer_names {
            let signer = runtime.signers.get(name).ok_or_else(|| {
                OperationError::system_failure(format!("unknown signer {}", name))
            })?;
            signers.push(signer.clone());
        }
        if signers.is_empty() {
            return Err(OperationError::system_failure("CA has no signer"));
        }

        let keyspec = entry
            .keyspec
            .parse()
            .map_err(|e: String| OperationError::bad_request(e))?;

        let mut cert_chain = Vec::new();
        for link in &entry.cert_chain {
            cert_chain.push(hex::decode(link).map_err(|_| {
                OperationError::bad_request("CA certificate chain is not valid hex")
            })?);
        }

        // issuer row and persisted CA revocation
        let revocation_info = match self.store.issuer(entry.id) {
            Some(issuer) => issuer
                .rev_info
                .as_deref()
                .and_then(CertRevocationInfo::from_encoded),
            None => {
                self.store.add_issuer(IssuerRecord {
                    id: entry.id,
                    subject: custodia_profile::subject::name_to_string(&cert.subject),
                    not_before: cert.not_before.unix_timestamp(),
                    sha1_fp: cert.sha1_fingerprint(),
                    rev_info: None,
                    cert_der: cert_der.clone(),
                    crl_id: 0,
                })?;
                None
            }
        };

        let publishers: Vec<Arc<dyn CertPublisher>> = conf
            .ca_has_publishers
            .get(&entry.name)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| runtime.publishers.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default();

        let keypair_gens: Vec<Arc<dyn KeypairGenerator>> =
            runtime.keypair_gens.values().cloned().collect();

        let ident = NameId::new(entry.id, &entry.name)
            .map_err(|e| OperationError::bad_request(e.to_string()))?;

        let no_new_certificate_after = cert.not_after;
        let info = CaInfo {
            ident,
            cert,
            cert_chain,
            ca_uris: entry.ca_uris.clone(),
            max_validity: entry.max_validity,
            validity_mode: entry.validity_mode,
            path_len: entry.path_len,
            no_new_certificate_after,
            revocation_info,
            keyspec,
            extra_control: entry.extra_control.clone(),
            crl_control: entry.crl_control.clone(),
            serial_number_bytes: entry.serial_number_bytes,
            status: entry.status,
        };

        Ok(CaInstance::new(
            info,
            self.store.clone(),
            SignerPool::new(signers),
            keypair_gens,
            publishers,
            self.id_generator.clone(),
        ))
    }

    // ------------------------------------------------------------------
    // slave watcher
    // ------------------------------------------------------------------

    fn start_slave_watcher(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock().expect("watcher lock poisoned");
        if watcher.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let manager = Arc::downgrade(self);
        let poll = self.config.slave_poll_seconds.max(1);

        let join = thread::spawn(move || {
            let mut elapsed = 0u64;
            loop {
                if stop_clone.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(StdDuration::from_secs(1));
                elapsed += 1;
                if elapsed < poll {
                    continue;
                }
                elapsed = 0;

                let Some(manager) = manager.upgrade() else {
                    return;
                };

                let event = manager.store.system_event(EVENT_CA_CHANGE);
                let changed_at = event.map(|e| e.event_time).unwrap_or(0);
                let last_start = {
                    let state = manager.state.read().expect("manager lock poisoned");
                    state.last_start_time.unix_timestamp()
                };

                if changed_at > last_start {
                    info!("received event to restart CA");
                    if let Err(e) = manager.restart_ca_system() {
                        error!("slave restart failed: {}", e);
                    }
                } else {
                    tracing::debug!("received no event to restart CA");
                }
            }
        });

        *watcher = Some(WatcherHandle { stop, join });
    }

    pub fn close(&self) {
        let mut watcher = self.watcher.lock().expect("watcher lock poisoned");
        if let Some(handle) = watcher.take() {
            handle.stop.store(true, Ordering::Relaxed);
            let _ = handle.join.join();
        }
    }

    // ------------------------------------------------------------------
    // registry management
    // ------------------------------------------------------------------

    pub fn add_profile(&self, name: &str, conf: ProfileConf) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if state.conf.profiles.iter().any(|p| p.name == name) {
            return Err(OperationError::bad_request(format!(
                "profile {} already exists",
                name
            )));
        }

        let id = state.conf.next_object_id();
        let ident =
            NameId::new(id, name).map_err(|e| OperationError::bad_request(e.to_string()))?;
        let profile = Certprofile::initialize(ident, conf.clone())
            .map_err(|e| OperationError::bad_request(format!("invalid profile: {}", e)))?;

        state.conf.profiles.push(ProfileEntry {
            name: name.to_string(),
            id,
            conf,
        });
        state.runtime.profiles.insert(name.to_string(), Arc::new(profile));
        Ok(())
    }

    pub fn remove_profile(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        let before = state.conf.profiles.len();
        state.conf.profiles.retain(|p| p.name != name);
        if state.conf.profiles.len() == before {
            return Err(OperationError::bad_request(format!(
                "unknown profile {}",
                name
            )));
        }
        state.runtime.profiles.remove(name);
        for profiles in state.conf.ca_has_profiles.values_mut() {
            profiles.remove(name);
        }
        Ok(())
    }

    pub fn add_signer(&self, entry: SignerEntry) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if state.conf.signers.iter().any(|s| s.name == entry.name) {
            return Err(OperationError::bad_request(format!(
                "signer {} already exists",
                entry.name
            )));
        }
        let signer = build_signer(&entry)?;
        state.runtime.signers.insert(entry.name.clone(), signer);
        state.conf.signers.push(entry);
        Ok(())
    }

    pub fn add_publisher(&self, entry: PublisherEntry) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if state.conf.publishers.iter().any(|p| p.name == entry.name) {
            return Err(OperationError::bad_request(format!(
                "publisher {} already exists",
                entry.name
            )));
        }
        let publisher = build_publisher(&entry)?;
        state.runtime.publishers.insert(entry.name.clone(), publisher);
        state.conf.publishers.push(entry);
        Ok(())
    }

    pub fn add_keypair_gen(&self, entry: KeypairGenEntry) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if state.conf.keypair_gens.iter().any(|k| k.name == entry.name) {
            return Err(OperationError::bad_request(format!(
                "keypair generator {} already exists",
                entry.name
            )));
        }
        let generator = build_keypair_gen(&entry)?;
        state.runtime.keypair_gens.insert(entry.name.clone(), generator);
        state.conf.keypair_gens.push(entry);
        Ok(())
    }

    pub fn add_requestor(&self, name: &str, cert: Option<Vec<u8>>) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if state.conf.requestors.iter().any(|r| r.name == name) {
            return Err(OperationError::bad_request(format!(
                "requestor {} already exists",
                name
            )));
        }
        let id = state.conf.next_object_id();
        state.conf.requestors.push(RequestorEntry {
            name: name.to_string(),
            id,
            cert: cert.map(hex::encode),
        });
        Ok(())
    }

    pub fn add_ca(&self, entry: CaEntry) -> Result<()> {
        {
            let state = self.state.read().expect("manager lock poisoned");
            if state.conf.cas.iter().any(|c| c.name == entry.name) {
                return Err(OperationError::bad_request(format!(
                    "CA {} already exists",
                    entry.name
                )));
            }
            for ca in &state.conf.cas {
                if ca.id == entry.id {
                    return Err(OperationError::bad_request(format!(
                        "CA id {} already exists",
                        entry.id
                    )));
                }
            }
        }

        // validate and activate immediately when the system is running
        let instance = {
            let state = self.state.read().expect("manager lock poisoned");
            if entry.status == CaStatus::Active
                && matches!(
                    state.status,
                    CaSystemStatus::StartedAsMaster | CaSystemStatus::StartedAsSlave
                )
            {
                Some(self.build_ca_instance(&state.conf, &state.runtime, &entry)?)
            } else {
                CaCert::parse(&hex::decode(&entry.cert).map_err(|_| {
                    OperationError::bad_request("CA certificate is not valid hex")
                })?)?;
                None
            }
        };

        let mut state = self.state.write().expect("manager lock poisoned");
        if let Some(instance) = instance {
            state
                .runtime
                .cas
                .insert(entry.name.clone(), Arc::new(instance));
        }
        state.conf.cas.push(entry);
        Ok(())
    }

    pub fn remove_ca(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        let before = state.conf.cas.len();
        state.conf.cas.retain(|c| c.name != name);
        if state.conf.cas.len() == before {
            return Err(OperationError::bad_request(format!("unknown CA {}", name)));
        }
        state.runtime.cas.remove(name);
        state.conf.ca_has_profiles.remove(name);
        state.conf.ca_has_publishers.remove(name);
        state.conf.ca_has_requestors.remove(name);
        state.conf.ca_aliases.retain(|_, ca| ca != name);
        Ok(())
    }

    pub fn set_ca_alias(&self, alias: &str, ca_name: &str) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if !state.conf.cas.iter().any(|c| c.name == ca_name) {
            return Err(OperationError::bad_request(format!("unknown CA {}", ca_name)));
        }
        state
            .conf
            .ca_aliases
            .insert(alias.to_string(), ca_name.to_string());
        Ok(())
    }

    pub fn add_ca_profile(&self, ca_name: &str, profile_name: &str) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if !state.conf.cas.iter().any(|c| c.name == ca_name) {
            return Err(OperationError::bad_request(format!("unknown CA {}", ca_name)));
        }
        if !state.conf.profiles.iter().any(|p| p.name == profile_name) {
            return Err(OperationError::bad_request(format!(
                "unknown profile {}",
                profile_name
            )));
        }
        state
            .conf
            .ca_has_profiles
            .entry(ca_name.to_string())
            .or_default()
            .insert(profile_name.to_string());
        Ok(())
    }

    pub fn add_ca_publisher(&self, ca_name: &str, publisher_name: &str) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if !state.conf.cas.iter().any(|c| c.name == ca_name) {
            return Err(OperationError::bad_request(format!("unknown CA {}", ca_name)));
        }
        if !state
            .conf
            .publishers
            .iter()
            .any(|p| p.name == publisher_name)
        {
            return Err(OperationError::bad_request(format!(
                "unknown publisher {}",
                publisher_name
            )));
        }
        state
            .conf
            .ca_has_publishers
            .entry(ca_name.to_string())
            .or_default()
            .insert(publisher_name.to_string());

        // refresh the live instance's fan-out list
        if let Some(instance) = state.runtime.cas.get(ca_name) {
            let publishers: Vec<Arc<dyn CertPublisher>> = state
                .conf
                .ca_has_publishers
                .get(ca_name)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(|n| state.runtime.publishers.get(n).cloned())
                        .collect()
                })
                .unwrap_or_default();
            instance.set_publishers(publishers);
        }
        Ok(())
    }

    pub fn add_ca_requestor(&self, ca_name: &str, requestor_name: &str) -> Result<()> {
        let mut state = self.state.write().expect("manager lock poisoned");
        if !state.conf.cas.iter().any(|c| c.name == ca_name) {
            return Err(OperationError::bad_request(format!("unknown CA {}", ca_name)));
        }
        if !state
            .conf
            .requestors
            .iter()
            .any(|r| r.name == requestor_name)
        {
            return Err(OperationError::bad_request(format!(
                "unknown requestor {}",
                requestor_name
            )));
        }
        state
            .conf
            .ca_has_requestors
            .entry(ca_name.to_string())
            .or_default()
            .insert(requestor_name.to_string());
        Ok(())
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    pub fn ca_names(&self) -> Vec<String> {
        let state = self.state.read().expect("manager lock poisoned");
        state.conf.cas.iter().map(|c| c.name.clone()).collect()
    }

    pub fn successful_ca_names(&self) -> Vec<String> {
        let state = self.state.read().expect("manager lock poisoned");
        state.runtime.cas.keys().cloned().collect()
    }

    pub fn failed_ca_names(&self) -> Vec<String> {
        let state = self.state.read().expect("manager lock poisoned");
        state.runtime.failed_cas.iter().cloned().collect()
    }

    pub fn inactive_ca_names(&self) -> Vec<String> {
        let state = self.state.read().expect("manager lock poisoned");
        state
            .conf
            .cas
            .iter()
            .filter(|c| c.status == CaStatus::Inactive)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn profile_names(&self) -> Vec<String> {
        let state = self.state.read().expect("manager lock poisoned");
        state.conf.profiles.iter().map(|p| p.name.clone()).collect()
    }

    fn resolve_ca(&self, name_or_alias: &str) -> Result<Arc<CaInstance>> {
        let state = self.state.read().expect("manager lock poisoned");
        let name = state
            .conf
            .ca_aliases
            .get(name_or_alias)
            .cloned()
            .unwrap_or_else(|| name_or_alias.to_string());
        state
            .runtime
            .cas
            .get(&name)
            .cloned()
            .ok_or_else(|| OperationError::bad_request(format!("unknown CA {}", name_or_alias)))
    }

    pub fn ca(&self, name_or_alias: &str) -> Result<Arc<CaInstance>> {
        self.resolve_ca(name_or_alias)
    }

    // ------------------------------------------------------------------
    // operations
    // ------------------------------------------------------------------

    /// 签发证书；模板必须已绑定到该 CA
    pub fn generate_certificate(
        &self,
        ca_name: &str,
        template: &CertTemplateData,
        requestor: Option<&str>,
    ) -> Result<IssuedCertificate> {
        let ca = self.resolve_ca(ca_name)?;
        let ca_real_name = ca.ident().name().to_string();

        let (profile, profile_ident, requestor_id) = {
            let state = self.state.read().expect("manager lock poisoned");

            let linked = state
                .conf
                .ca_has_profiles
                .get(&ca_real_name)
                .map(|profiles| profiles.contains(&template.profile_name))
                .unwrap_or(false);
            if !linked {
                return Err(OperationError::unknown_cert_profile(format!(
                    "profile {} is not bound to CA {}",
                    template.profile_name, ca_real_name
                )));
            }

            let profile = state
                .runtime
                .profiles
                .get(&template.profile_name)
                .cloned()
                .ok_or_else(|| {
                    OperationError::unknown_cert_profile(format!(
                        "unknown cert profile {}",
                        template.profile_name
                    ))
                })?;

            let requestor_id = match requestor {
                Some(name) => {
                    let entry = state
                        .conf
                        .requestors
                        .iter()
                        .find(|r| r.name == name)
                        .ok_or_else(|| {
                            OperationError::not_permitted(format!("unknown requestor {}", name))
                        })?;
                    let permitted = state
                        .conf
                        .ca_has_requestors
                        .get(&ca_real_name)
                        .map(|names| names.contains(name))
                        .unwrap_or(false);
                    if !permitted {
                        return Err(OperationError::not_permitted(format!(
                            "requestor {} is not permitted to request from CA {}",
                            name, ca_real_name
                        )));
                    }
                    Some(entry.id)
                }
                None => None,
            };

            let ident = profile.ident().clone();
            (profile, ident, requestor_id)
        };

        ca.generate_certificate(&profile, &profile_ident, template, requestor_id)
    }

    pub fn revoke_certificate(
        &self,
        ca_name: &str,
        serial: &[u8],
        reason: CrlReason,
        invalidity_time: Option<OffsetDateTime>,
    ) -> Result<()> {
        let ca = self.resolve_ca(ca_name)?;
        ca.revoke_certificate(serial, reason, invalidity_time)?;
        Ok(())
    }

    pub fn unsuspend_certificate(&self, ca_name: &str, serial: &[u8]) -> Result<()> {
        let ca = self.resolve_ca(ca_name)?;
        ca.unsuspend_certificate(serial)?;
        Ok(())
    }

    pub fn remove_certificate(&self, ca_name: &str, serial: &[u8]) -> Result<()> {
        let ca = self.resolve_ca(ca_name)?;
        ca.remove_certificate(serial)?;
        Ok(())
    }

    pub fn generate_crl(&self, ca_name: &str) -> Result<Vec<u8>> {
        let ca = self.resolve_ca(ca_name)?;
        ca.generate_crl(true)
    }

    pub fn revoke_ca(&self, ca_name: &str, rev_info: CertRevocationInfo) -> Result<()> {
        let ca = self.resolve_ca(ca_name)?;
        ca.revoke_ca(rev_info)
    }

    pub fn unrevoke_ca(&self, ca_name: &str) -> Result<()> {
        let ca = self.resolve_ca(ca_name)?;
        ca.unrevoke_ca()
    }

    // ------------------------------------------------------------------
    // configuration import / export
    // ------------------------------------------------------------------

    /// 导出完整配置
    pub fn export_conf(&self) -> CaConfBundle {
        let state = self.state.read().expect("manager lock poisoned");
        let mut bundle = state.conf.clone();
        bundle.dbschemas = self.store.dbschemas();
        bundle
    }

    /// 导入配置
    ///
    /// `replace` 为真时整体替换，否则按名字合并（已存在的跳过）。
    /// 任何校验失败都保持当前状态不变。
    pub fn import_conf(&self, bundle: CaConfBundle, replace: bool) -> Result<()> {
        // validate the staged configuration completely before committing
        let staged = {
            let state = self.state.read().expect("manager lock poisoned");
            let mut staged = if replace {
                bundle.clone()
            } else {
                let mut merged = state.conf.clone();
                merge_bundle(&mut merged, bundle.clone());
                merged
            };
            staged.dbschemas.clear();
            staged
        };

        validate_bundle(&staged)?;

        for (name, value) in &bundle.dbschemas {
            // reserved names fail here before anything is committed
            if matches!(name.as_str(), "VERSION" | "VENDOR" | "X500NAME_MAXLEN") {
                continue;
            }
            self.store.set_dbschema(name, value)?;
        }

        {
            let mut state = self.state.write().expect("manager lock poisoned");
            state.conf = staged;
        }
        self.restart_ca_system()
    }
}

impl Drop for CaManager {
    fn drop(&mut self) {
        // only signal; joining here could deadlock if the last handle
        // is dropped from the watcher thread itself
        if let Ok(watcher) = self.watcher.lock() {
            if let Some(handle) = watcher.as_ref() {
                handle.stop.store(true, Ordering::Relaxed);
            }
        }
    }
}

fn merge_bundle(target: &mut CaConfBundle, incoming: CaConfBundle) {
    for profile in incoming.profiles {
        if !target.profiles.iter().any(|p| p.name == profile.name) {
            target.profiles.push(profile);
        }
    }
    for signer in incoming.signers {
        if !target.signers.iter().any(|s| s.name == signer.name) {
            target.signers.push(signer);
        }
    }
    for requestor in incoming.requestors {
        if !target.requestors.iter().any(|r| r.name == requestor.name) {
            target.requestors.push(requestor);
        }
    }
    for publisher in incoming.publishers {
        if !target.publishers.iter().any(|p| p.name == publisher.name) {
            target.publishers.push(publisher);
        }
    }
    for keypair_gen in incoming.keypair_gens {
        if !target.keypair_gens.iter().any(|k| k.name == keypair_gen.name) {
            target.keypair_gens.push(keypair_gen);
        }
    }
    for ca in incoming.cas {
        if !target.cas.iter().any(|c| c.name == ca.name) {
            target.cas.push(ca);
        }
    }
    for (alias, ca) in incoming.ca_aliases {
        target.ca_aliases.entry(alias).or_insert(ca);
    }
    for (ca, profiles) in incoming.ca_has_profiles {
        target.ca_has_profiles.entry(ca).or_default().extend(profiles);
    }
    for (ca, publishers) in incoming.ca_has_publishers {
        target
            .ca_has_publishers
            .entry(ca)
            .or_default()
            .extend(publishers);
    }
    for (ca, requestors) in incoming.ca_has_requestors {
        target
            .ca_has_requestors
            .entry(ca)
            .or_default()
            .extend(requestors);
    }
}

fn validate_bundle(bundle: &CaConfBundle) -> Result<()> {
    let mut ids = BTreeSet::new();
    for profile in &bundle.profiles {
        let ident = NameId::new(profile.id, &profile.name)
            .map_err(|e| OperationError::bad_request(e.to_string()))?;
        Certprofile::initialize(ident, profile.conf.clone()).map_err(|e| {
            OperationError::bad_request(format!("invalid profile {}: {}", profile.name, e))
        })?;
        if !ids.insert(profile.id) {
            return Err(OperationError::bad_request(format!(
                "duplicated object id {}",
                profile.id
            )));
        }
    }
    for signer in &bundle.signers {
        build_signer(signer)?;
    }
    for ca in &bundle.cas {
        if !ids.insert(ca.id) {
            return Err(OperationError::bad_request(format!(
                "duplicated object id {}",
                ca.id
            )));
        }
        let cert = hex::decode(&ca.cert)
            .map_err(|_| OperationError::bad_request("CA certificate is not valid hex"))?;
        CaCert::parse(&cert)?;
        for signer_name in &ca.signer_names {
            if !bundle.signers.iter().any(|s| &s.name == signer_name) {
                return Err(OperationError::bad_request(format!(
                    "CA {} references unknown signer {}",
                    ca.name, signer_name
                )));
            }
        }
    }
    for (ca, profiles) in &bundle.ca_has_profiles {
        if !bundle.cas.iter().any(|c| &c.name == ca) {
            return Err(OperationError::bad_request(format!("unknown CA {}", ca)));
        }
        for profile in profiles {
            if !bundle.profiles.iter().any(|p| &p.name == profile) {
                return Err(OperationError::bad_request(format!(
                    "unknown profile {}",
                    profile
                )));
            }
        }
    }
    Ok(())
}

fn build_signer(entry: &SignerEntry) -> Result<Arc<dyn ContentSigner>> {
    let algorithm: SignAlgo = entry
        .algorithm
        .parse()
        .map_err(|e: String| OperationError::bad_request(e))?;
    let key_der = hex::decode(&entry.private_key)
        .map_err(|_| OperationError::bad_request("signer key is not valid hex"))?;

    let signer: Arc<dyn ContentSigner> = match algorithm {
        SignAlgo::Ed25519 => Arc::new(
            Ed25519Signer::from_pkcs8_der(&key_der).map_err(to_system_failure)?,
        ),
        SignAlgo::EcdsaSha256 => Arc::new(
            EcdsaP256Signer::from_pkcs8_der(&key_der).map_err(to_system_failure)?,
        ),
        SignAlgo::RsaSha256 | SignAlgo::RsaSha384 | SignAlgo::RsaSha512 => Arc::new(
            RsaSigner::from_pkcs8_der(&key_der, algorithm).map_err(to_system_failure)?,
        ),
        other => {
            return Err(OperationError::bad_request(format!(
                "unsupported signer algorithm {}",
                other.name()
            )));
        }
    };
    Ok(signer)
}

fn build_publisher(entry: &PublisherEntry) -> Result<Arc<dyn CertPublisher>> {
    match entry.publisher_type.as_str() {
        "log" => Ok(Arc::new(LogPublisher::new(entry.name.clone()))),
        other => Err(OperationError::bad_request(format!(
            "unsupported publisher type {}",
            other
        ))),
    }
}

fn build_keypair_gen(entry: &KeypairGenEntry) -> Result<Arc<dyn KeypairGenerator>> {
    match entry.generator_type.as_str() {
        "software" => Ok(Arc::new(SoftKeypairGenerator::new(entry.name.clone()))),
        other => Err(OperationError::bad_request(format!(
            "unsupported keypair generator type {}",
            other
        ))),
    }
}

fn read_or_create_instance_id(path: &PathBuf) -> Result<String> {
    if path.exists() {
        let id = std::fs::read_to_string(path)
            .map_err(|e| OperationError::system_failure(format!("read lock file: {}", e)))?;
        let id = id.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OperationError::system_failure(format!("create lock dir: {}", e)))?;
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(path, &id)
        .map_err(|e| OperationError::system_failure(format!("write lock file: {}", e)))?;
    info!("created new CA instance id {}", id);
    Ok(id)
}
