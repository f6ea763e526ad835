//! 签发者索引
//!
//! 不可变快照加原子替换：读方拿到的 (issuers, ids, crl_infos)
//! 永远来自同一代，绝不会混用两代数据。

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crate::{
    issuer::{IssuerEntry, RequestIssuer},
    status::CrlInfo,
};

/// 一代完整的索引数据
pub struct IssuerSnapshot {
    pub issuers: Vec<Arc<IssuerEntry>>,
    pub ids: BTreeSet<u32>,
    pub crl_infos: HashMap<i64, CrlInfo>,
}

impl IssuerSnapshot {
    pub fn empty() -> Self {
        Self {
            issuers: Vec::new(),
            ids: BTreeSet::new(),
            crl_infos: HashMap::new(),
        }
    }
}

/// 快照式签发者存储
pub struct IssuerStore {
    snapshot: RwLock<Arc<IssuerSnapshot>>,
    generation: AtomicU64,
}

impl Default for IssuerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IssuerStore {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IssuerSnapshot::empty())),
            generation: AtomicU64::new(0),
        }
    }

    /// 整体替换快照；同一 ID 重复直接拒绝
    pub fn set(
        &self,
        issuers: Vec<Arc<IssuerEntry>>,
        crl_infos: HashMap<i64, CrlInfo>,
    ) -> Result<(), String> {
        let mut ids = BTreeSet::new();
        for issuer in &issuers {
            if !ids.insert(issuer.id()) {
                return Err(format!("issuer with the same id {} duplicated", issuer.id()));
            }
        }

        let next = Arc::new(IssuerSnapshot {
            issuers,
            ids,
            crl_infos,
        });

        let mut guard = self.snapshot.write().expect("issuer store lock poisoned");
        *guard = next;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// 当前快照；持有期间数据不变
    pub fn snapshot(&self) -> Arc<IssuerSnapshot> {
        self.snapshot
            .read()
            .expect("issuer store lock poisoned")
            .clone()
    }

    /// 快照代数，随每次替换递增
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.snapshot().ids.len()
    }

    pub fn issuer_for_id(&self, id: u32) -> Option<Arc<IssuerEntry>> {
        self.snapshot()
            .issuers
            .iter()
            .find(|issuer| issuer.id() == id)
            .cloned()
    }

    /// 线性扫描按请求指纹匹配
    pub fn issuer_for_fp(&self, req: &RequestIssuer) -> Option<Arc<IssuerEntry>> {
        self.snapshot()
            .issuers
            .iter()
            .find(|issuer| issuer.matches(req))
            .cloned()
    }

    pub fn knows_issuer(&self, req: &RequestIssuer) -> bool {
        self.issuer_for_fp(req).is_some()
    }

    pub fn crl_info(&self, crl_id: i64) -> Option<CrlInfo> {
        self.snapshot().crl_infos.get(&crl_id).cloned()
    }
}
