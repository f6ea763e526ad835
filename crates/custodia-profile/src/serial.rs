//! 模板驱动的序列号生成

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProfileError, Result};

/// 序列号生成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum SerialNumberMode {
    /// 由 CA 生成随机序列号
    #[default]
    ByCa,
    /// 模板生成指定位数的随机序列号
    Random { bits: u16 },
    /// 由 CA 主体与请求公钥决定的确定性序列号
    DerivedFromPublicKey,
}

/// 随机序列号，最高位清零保证为正
pub fn random_serial(bits: u16) -> Result<Vec<u8>> {
    if !(64..=159).contains(&bits) {
        return Err(ProfileError::config(format!(
            "serial number size of {} bits is out of range [64, 159]",
            bits
        )));
    }

    let nbytes = bits.div_ceil(8) as usize;
    let mut bytes = vec![0u8; nbytes];
    getrandom::fill(&mut bytes)
        .map_err(|e| ProfileError::config(format!("random source failure: {}", e)))?;

    bytes[0] &= 0x7F;
    if bytes.iter().all(|&b| b == 0) {
        bytes[nbytes - 1] = 1;
    }
    Ok(bytes)
}

/// 确定性序列号：SHA-256(CA 主体 DER ‖ 请求 SPKI DER ‖ 附加控制项)，截断到 159 位
pub fn derived_serial(
    ca_subject_der: &[u8],
    request_spki_der: &[u8],
    extra_control: &BTreeMap<String, String>,
) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(ca_subject_der);
    hasher.update(request_spki_der);
    for (key, value) in extra_control {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }

    let digest = hasher.finalize();
    let mut bytes = digest[..20].to_vec();
    bytes[0] &= 0x7F;
    if bytes.iter().all(|&b| b == 0) {
        bytes[19] = 1;
    }
    bytes
}
