//! 名称标识注册表
//!
//! CA、证书模板、发布器、请求者等对象统一使用 `(id, name)` 对标识。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 名称的最大长度
const MAX_NAME_LEN: usize = 64;

/// 注册表错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// 名称已被占用
    #[error("name '{0}' is already registered")]
    DuplicateName(String),

    /// ID已被占用
    #[error("id {0} is already registered")]
    DuplicateId(u32),

    /// 名称不合法
    #[error("invalid name: {0}")]
    BadName(String),

    /// 未找到条目
    #[error("no entry for '{0}'")]
    NotFound(String),
}

/// 稳定的 `(id, name)` 标识对
///
/// 名称在构造时规范化为小写，并限制字符集与长度。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameId {
    id: u32,
    name: String,
}

impl NameId {
    pub fn new(id: u32, name: &str) -> Result<Self, RegistryError> {
        let name = normalize_name(name)?;
        Ok(Self { id, name })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for NameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (id={})", self.name, self.id)
    }
}

fn normalize_name(name: &str) -> Result<String, RegistryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::BadName("name must not be blank".to_string()));
    }

    if trimmed.len() > MAX_NAME_LEN {
        return Err(RegistryError::BadName(format!(
            "name longer than {} characters: '{}'",
            MAX_NAME_LEN, trimmed
        )));
    }

    let lower = trimmed.to_lowercase();
    for c in lower.chars() {
        let ok = c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | ':');
        if !ok {
            return Err(RegistryError::BadName(format!(
                "character '{}' not permitted in name '{}'",
                c, trimmed
            )));
        }
    }

    Ok(lower)
}

/// 双向 `id ↔ name` 注册表，两个方向都要求唯一
#[derive(Debug, Default, Clone)]
pub struct NameIdRegistry {
    by_id: HashMap<u32, NameId>,
    by_name: HashMap<String, u32>,
}

impl NameIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一个新条目，任一方向冲突即失败
    pub fn insert(&mut self, entry: NameId) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&entry.id()) {
            return Err(RegistryError::DuplicateId(entry.id()));
        }
        if self.by_name.contains_key(entry.name()) {
            return Err(RegistryError::DuplicateName(entry.name().to_string()));
        }

        self.by_name.insert(entry.name().to_string(), entry.id());
        self.by_id.insert(entry.id(), entry);
        Ok(())
    }

    /// 名称查 ID（大小写不敏感）
    pub fn name_to_id(&self, name: &str) -> Option<u32> {
        self.by_name.get(&name.trim().to_lowercase()).copied()
    }

    /// ID查名称
    pub fn id_to_name(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(|e| e.name())
    }

    pub fn get(&self, name: &str) -> Option<&NameId> {
        self.name_to_id(name).and_then(|id| self.by_id.get(&id))
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<NameId> {
        let id = self.by_name.remove(&name.trim().to_lowercase())?;
        self.by_id.remove(&id)
    }

    pub fn remove_by_id(&mut self, id: u32) -> Option<NameId> {
        let entry = self.by_id.remove(&id)?;
        self.by_name.remove(entry.name());
        Some(entry)
    }

    pub fn names(&self) -> Vec<&str> {
        self.by_name.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_normalization() {
        let entry = NameId::new(1, "  MyCA  ").unwrap();
        assert_eq!(entry.name(), "myca");

        assert!(NameId::new(1, "").is_err());
        assert!(NameId::new(1, "with space").is_err());
        assert!(NameId::new(1, "with/slash").is_err());
        assert!(NameId::new(1, &"x".repeat(65)).is_err());
        assert!(NameId::new(1, "ok-name_1.v2:x").is_ok());
    }

    #[test]
    fn test_registry_round_trip() {
        let mut reg = NameIdRegistry::new();
        reg.insert(NameId::new(1, "ca1").unwrap()).unwrap();
        reg.insert(NameId::new(2, "ca2").unwrap()).unwrap();

        assert_eq!(reg.name_to_id("ca1"), Some(1));
        assert_eq!(reg.name_to_id("CA1"), Some(1));
        assert_eq!(reg.id_to_name(2), Some("ca2"));
        assert_eq!(reg.name_to_id("missing"), None);
    }

    #[test]
    fn test_registry_duplicates() {
        let mut reg = NameIdRegistry::new();
        reg.insert(NameId::new(1, "ca1").unwrap()).unwrap();

        let err = reg.insert(NameId::new(1, "other").unwrap()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(1));

        let err = reg.insert(NameId::new(2, "CA1").unwrap()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("ca1".to_string()));
    }

    #[test]
    fn test_registry_remove() {
        let mut reg = NameIdRegistry::new();
        reg.insert(NameId::new(7, "gone").unwrap()).unwrap();

        let removed = reg.remove_by_name("GONE").unwrap();
        assert_eq!(removed.id(), 7);
        assert!(reg.is_empty());
        assert_eq!(reg.name_to_id("gone"), None);
    }
}
