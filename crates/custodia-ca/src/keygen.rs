//! 服务端密钥生成
//!
//! 生成 PKCS#8 私钥并从私钥派生 SubjectPublicKeyInfo。
//! 每种算法一个派生分支，新增算法只需补一个分支。

use der::{
    asn1::{BitString, Null, OctetString},
    Any, Decode, Encode,
};
use pkcs8::{spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned}, PrivateKeyInfo};
use thiserror::Error;

use custodia_profile::{EcCurve, KeySpec};

#[derive(Debug, Error)]
pub enum KeygenError {
    #[error("keypair generation failed: {0}")]
    Backend(String),

    #[error("unsupported keyspec {0}")]
    Unsupported(String),

    #[error("invalid key material: {0}")]
    Key(String),
}

/// 一次服务端密钥生成的结果
#[derive(Debug)]
pub struct GeneratedKeypair {
    pub keyspec: KeySpec,
    /// PKCS#8 PrivateKeyInfo DER
    pub private_key_der: Vec<u8>,
    pub spki: SubjectPublicKeyInfoOwned,
}

/// 密钥对生成器
pub trait KeypairGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, keyspec: &KeySpec) -> bool;

    fn generate(&self, keyspec: &KeySpec) -> Result<GeneratedKeypair, KeygenError>;
}

/// 纯软件实现，支持 RSA、EC/secp256r1 与 Ed25519
pub struct SoftKeypairGenerator {
    name: String,
}

impl SoftKeypairGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SoftKeypairGenerator {
    fn default() -> Self {
        Self::new("software")
    }
}

impl KeypairGenerator for SoftKeypairGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, keyspec: &KeySpec) -> bool {
        match keyspec {
            KeySpec::Rsa(bits) => (2048..=4096).contains(bits),
            KeySpec::Ec(EcCurve::Secp256r1) => true,
            KeySpec::Ec(EcCurve::Secp384r1) => false,
            KeySpec::Ed25519 => true,
        }
    }

    fn generate(&self, keyspec: &KeySpec) -> Result<GeneratedKeypair, KeygenError> {
        if !self.supports(keyspec) {
            return Err(KeygenError::Unsupported(keyspec.to_string()));
        }

        let private_key_der = match keyspec {
            KeySpec::Rsa(bits) => {
                use rsa::pkcs8::EncodePrivateKey;
                let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, *bits as usize)
                    .map_err(|e| KeygenError::Backend(format!("RSA generation failed: {}", e)))?;
                key.to_pkcs8_der()
                    .map_err(|e| KeygenError::Key(e.to_string()))?
                    .as_bytes()
                    .to_vec()
            }
            KeySpec::Ec(EcCurve::Secp256r1) => {
                use p256::pkcs8::EncodePrivateKey;
                let secret = random_p256_secret()?;
                secret
                    .to_pkcs8_der()
                    .map_err(|e| KeygenError::Key(e.to_string()))?
                    .as_bytes()
                    .to_vec()
            }
            KeySpec::Ed25519 => {
                use ed25519_dalek::pkcs8::EncodePrivateKey;
                let mut seed = [0u8; 32];
                getrandom::fill(&mut seed)
                    .map_err(|e| KeygenError::Backend(format!("random source failure: {}", e)))?;
                ed25519_dalek::SigningKey::from_bytes(&seed)
                    .to_pkcs8_der()
                    .map_err(|e| KeygenError::Key(e.to_string()))?
                    .as_bytes()
                    .to_vec()
            }
            KeySpec::Ec(other) => {
                return Err(KeygenError::Unsupported(format!("EC/{}", other.name())));
            }
        };

        let spki = derive_spki_from_private(&private_key_der)?;
        Ok(GeneratedKeypair {
            keyspec: *keyspec,
            private_key_der,
            spki,
        })
    }
}

/// 从 PKCS#8 私钥派生公钥 SPKI
///
/// RSA 从模数与公开指数重建；EC 取嵌入的公钥点；
/// Ed25519 优先取嵌入公钥，否则从种子重新计算。
pub fn derive_spki_from_private(
    private_key_der: &[u8],
) -> Result<SubjectPublicKeyInfoOwned, KeygenError> {
    let pki = PrivateKeyInfo::try_from(private_key_der)
        .map_err(|e| KeygenError::Key(format!("invalid PKCS#8: {}", e)))?;

    let oid = pki.algorithm.oid;
    if oid == const_oid::db::rfc5912::RSA_ENCRYPTION {
        let rsa_key = pkcs1::RsaPrivateKey::from_der(pki.private_key)
            .map_err(|e| KeygenError::Key(format!("invalid RSA private key: {}", e)))?;
        let public = pkcs1::RsaPublicKey {
            modulus: rsa_key.modulus,
            public_exponent: rsa_key.public_exponent,
        };
        rsa_spki(
            &public
                .to_der()
                .map_err(|e| KeygenError::Key(e.to_string()))?,
        )
    } else if oid == const_oid::db::rfc5912::ID_EC_PUBLIC_KEY {
        let ec_key = sec1::EcPrivateKey::from_der(pki.private_key)
            .map_err(|e| KeygenError::Key(format!("invalid EC private key: {}", e)))?;
        let point = ec_key
            .public_key
            .ok_or_else(|| KeygenError::Key("EC private key without public point".to_string()))?;

        let curve_oid = pki
            .algorithm
            .parameters_oid()
            .map_err(|_| KeygenError::Key("EC key without named curve".to_string()))?;
        let curve = EcCurve::from_oid(&curve_oid)
            .ok_or_else(|| KeygenError::Key(format!("unsupported EC curve {}", curve_oid)))?;
        ec_spki(curve, point)
    } else if oid == const_oid::db::rfc8410::ID_ED_25519 {
        if let Some(public) = pki.public_key {
            if public.len() != 32 {
                return Err(KeygenError::Key(format!(
                    "invalid Ed25519 public key length {}",
                    public.len()
                )));
            }
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(public);
            return ed25519_spki(&bytes);
        }

        let seed = ed25519_seed_from_private_field(pki.private_key)?;
        let verifying = ed25519_dalek::SigningKey::from_bytes(&seed).verifying_key();
        ed25519_spki(&verifying.to_bytes())
    } else {
        Err(KeygenError::Unsupported(format!("key algorithm {}", oid)))
    }
}

/// RSA SPKI（PKCS#1 公钥 + NULL 参数）
pub fn rsa_spki(pkcs1_der: &[u8]) -> Result<SubjectPublicKeyInfoOwned, KeygenError> {
    let null_der = Null.to_der().map_err(|e| KeygenError::Key(e.to_string()))?;
    Ok(SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::RSA_ENCRYPTION,
            parameters: Some(
                Any::from_der(&null_der).map_err(|e| KeygenError::Key(e.to_string()))?,
            ),
        },
        subject_public_key: BitString::from_bytes(pkcs1_der)
            .map_err(|e| KeygenError::Key(e.to_string()))?,
    })
}

/// EC SPKI（命名曲线参数 + 未压缩点）
pub fn ec_spki(curve: EcCurve, point: &[u8]) -> Result<SubjectPublicKeyInfoOwned, KeygenError> {
    let curve_der = curve
        .oid()
        .to_der()
        .map_err(|e| KeygenError::Key(e.to_string()))?;
    Ok(SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::ID_EC_PUBLIC_KEY,
            parameters: Some(
                Any::from_der(&curve_der).map_err(|e| KeygenError::Key(e.to_string()))?,
            ),
        },
        subject_public_key: BitString::from_bytes(point)
            .map_err(|e| KeygenError::Key(e.to_string()))?,
    })
}

/// Ed25519 SPKI
pub fn ed25519_spki(public: &[u8; 32]) -> Result<SubjectPublicKeyInfoOwned, KeygenError> {
    Ok(SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc8410::ID_ED_25519,
            parameters: None,
        },
        subject_public_key: BitString::from_bytes(public)
            .map_err(|e| KeygenError::Key(e.to_string()))?,
    })
}

/// 从 PKCS#8 取 Ed25519 种子
pub fn ed25519_seed_from_pkcs8(private_key_der: &[u8]) -> Result<[u8; 32], KeygenError> {
    let pki = PrivateKeyInfo::try_from(private_key_der)
        .map_err(|e| KeygenError::Key(format!("invalid PKCS#8: {}", e)))?;
    if pki.algorithm.oid != const_oid::db::rfc8410::ID_ED_25519 {
        return Err(KeygenError::Key("not an Ed25519 key".to_string()));
    }
    ed25519_seed_from_private_field(pki.private_key)
}

// RFC 8410: privateKey is an OCTET STRING wrapping the 32-byte seed
fn ed25519_seed_from_private_field(private_key: &[u8]) -> Result<[u8; 32], KeygenError> {
    let inner = OctetString::from_der(private_key)
        .map_err(|e| KeygenError::Key(format!("invalid Ed25519 private key: {}", e)))?;
    let bytes = inner.as_bytes();
    if bytes.len() != 32 {
        return Err(KeygenError::Key(format!(
            "invalid Ed25519 seed length {}",
            bytes.len()
        )));
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(bytes);
    Ok(seed)
}

/// 随机 P-256 私钥
pub fn random_p256_secret() -> Result<p256::SecretKey, KeygenError> {
    // rejection sampling: the scalar must be in [1, n)
    for _ in 0..64 {
        let mut bytes = [0u8; 32];
        getrandom::fill(&mut bytes)
            .map_err(|e| KeygenError::Backend(format!("random source failure: {}", e)))?;
        if let Ok(secret) = p256::SecretKey::from_slice(&bytes) {
            return Ok(secret);
        }
    }
    Err(KeygenError::Backend(
        "could not sample a P-256 scalar".to_string(),
    ))
}
