//! 签发者条目
//!
//! 请求里的签发者以 (名称哈希, 公钥哈希) 标识；
//! 各算法的哈希按需计算并缓存。

use std::{collections::HashMap, str::FromStr, sync::RwLock};

use der::{Decode, Encode};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use time::OffsetDateTime;
use x509_cert::Certificate;

use custodia_core::CertRevocationInfo;

/// 支持的哈希算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgo {
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgo::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgo::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgo::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgo::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "SHA1",
            HashAlgo::Sha256 => "SHA256",
            HashAlgo::Sha384 => "SHA384",
            HashAlgo::Sha512 => "SHA512",
        }
    }
}

impl FromStr for HashAlgo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(HashAlgo::Sha1),
            "SHA256" => Ok(HashAlgo::Sha256),
            "SHA384" => Ok(HashAlgo::Sha384),
            "SHA512" => Ok(HashAlgo::Sha512),
            other => Err(format!("unknown hash algorithm '{}'", other)),
        }
    }
}

/// OCSP 请求中的签发者标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIssuer {
    pub hash_algo: HashAlgo,
    pub name_hash: Vec<u8>,
    pub key_hash: Vec<u8>,
}

impl RequestIssuer {
    pub fn new(hash_algo: HashAlgo, name_hash: Vec<u8>, key_hash: Vec<u8>) -> Self {
        Self {
            hash_algo,
            name_hash,
            key_hash,
        }
    }

    /// 从签发者证书推导请求标识（客户端视角）
    pub fn from_issuer_cert(hash_algo: HashAlgo, cert_der: &[u8]) -> Result<Self, String> {
        let cert = Certificate::from_der(cert_der).map_err(|e| e.to_string())?;
        let name_der = cert
            .tbs_certificate
            .subject
            .to_der()
            .map_err(|e| e.to_string())?;
        let key_bytes = cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes();
        Ok(Self {
            hash_algo,
            name_hash: hash_algo.hash(&name_der),
            key_hash: hash_algo.hash(key_bytes),
        })
    }
}

/// 内存签发者条目
pub struct IssuerEntry {
    id: u32,
    cert_der: Vec<u8>,
    /// 证书主体的 DER，即其签发证书的 issuer 名称
    subject_der: Vec<u8>,
    /// SPKI 公钥位串内容
    spki_key_bytes: Vec<u8>,
    sha1_fp: String,
    not_before: OffsetDateTime,
    revocation_info: Option<CertRevocationInfo>,
    crl_id: i64,
    /// 各算法的 (名称哈希, 公钥哈希) 缓存
    hashes: RwLock<HashMap<HashAlgo, (Vec<u8>, Vec<u8>)>>,
}

impl IssuerEntry {
    pub fn from_cert(
        id: u32,
        cert_der: Vec<u8>,
        revocation_info: Option<CertRevocationInfo>,
        crl_id: i64,
    ) -> Result<Self, String> {
        let cert = Certificate::from_der(&cert_der)
            .map_err(|e| format!("invalid issuer certificate: {}", e))?;
        let subject_der = cert
            .tbs_certificate
            .subject
            .to_der()
            .map_err(|e| e.to_string())?;
        let spki_key_bytes = cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
            .to_vec();

        let not_before = match &cert.tbs_certificate.validity.not_before {
            x509_cert::time::Time::UtcTime(t) => OffsetDateTime::from(t.to_system_time()),
            x509_cert::time::Time::GeneralTime(t) => OffsetDateTime::from(t.to_system_time()),
        };

        let sha1_fp = hex::encode(Sha1::digest(&cert_der));

        Ok(Self {
            id,
            cert_der,
            subject_der,
            spki_key_bytes,
            sha1_fp,
            not_before,
            revocation_info,
            crl_id,
            hashes: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn sha1_fingerprint(&self) -> &str {
        &self.sha1_fp
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn revocation_info(&self) -> Option<&CertRevocationInfo> {
        self.revocation_info.as_ref()
    }

    pub fn crl_id(&self) -> i64 {
        self.crl_id
    }

    /// 指定算法的 (名称哈希, 公钥哈希)，惰性计算
    pub fn encoded_hashes(&self, algo: HashAlgo) -> (Vec<u8>, Vec<u8>) {
        {
            let cache = self.hashes.read().expect("issuer hash cache poisoned");
            if let Some(hashes) = cache.get(&algo) {
                return hashes.clone();
            }
        }

        let computed = (
            algo.hash(&self.subject_der),
            algo.hash(&self.spki_key_bytes),
        );
        let mut cache = self.hashes.write().expect("issuer hash cache poisoned");
        cache.entry(algo).or_insert_with(|| computed.clone());
        computed
    }

    /// 请求标识是否命中本签发者
    pub fn matches(&self, req: &RequestIssuer) -> bool {
        let (name_hash, key_hash) = self.encoded_hashes(req.hash_algo);
        name_hash == req.name_hash && key_hash == req.key_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_algo_parse() {
        assert_eq!("SHA1".parse::<HashAlgo>().unwrap(), HashAlgo::Sha1);
        assert_eq!("sha-256".parse::<HashAlgo>().unwrap(), HashAlgo::Sha256);
        assert_eq!("SHA512".parse::<HashAlgo>().unwrap(), HashAlgo::Sha512);
        assert!("MD5".parse::<HashAlgo>().is_err());
    }

    #[test]
    fn test_hash_lengths() {
        assert_eq!(HashAlgo::Sha1.hash(b"x").len(), 20);
        assert_eq!(HashAlgo::Sha256.hash(b"x").len(), 32);
        assert_eq!(HashAlgo::Sha384.hash(b"x").len(), 48);
        assert_eq!(HashAlgo::Sha512.hash(b"x").len(), 64);
    }
}
