//! 内容签名器
//!
//! 签名器只负责对 TBS 字节做签名；算法选择由模板允许列表驱动。

use std::sync::Arc;

use ed25519_dalek::Signer as _;
use pkcs8::spki::SubjectPublicKeyInfoOwned;
use rsa::signature::{SignatureEncoding, Signer as _};
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

use custodia_profile::SignAlgo;

use crate::keygen;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Backend(String),

    #[error("invalid key material: {0}")]
    Key(String),
}

/// 按算法签名 TBS 字节的签名器
pub trait ContentSigner: Send + Sync {
    fn algorithm(&self) -> SignAlgo;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;

    /// 签名器公钥的 SPKI
    fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned, SignerError>;
}

/// Ed25519 软签名器
pub struct Ed25519Signer {
    key: ed25519_dalek::SigningKey,
}

impl Ed25519Signer {
    pub fn generate() -> Result<Self, SignerError> {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed)
            .map_err(|e| SignerError::Backend(format!("random source failure: {}", e)))?;
        Ok(Self {
            key: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, SignerError> {
        let seed = keygen::ed25519_seed_from_pkcs8(der)
            .map_err(|e| SignerError::Key(e.to_string()))?;
        Ok(Self {
            key: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, SignerError> {
        use ed25519_dalek::pkcs8::EncodePrivateKey;
        Ok(self
            .key
            .to_pkcs8_der()
            .map_err(|e| SignerError::Key(e.to_string()))?
            .as_bytes()
            .to_vec())
    }
}

impl ContentSigner for Ed25519Signer {
    fn algorithm(&self) -> SignAlgo {
        SignAlgo::Ed25519
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }

    fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned, SignerError> {
        keygen::ed25519_spki(&self.key.verifying_key().to_bytes())
            .map_err(|e| SignerError::Key(e.to_string()))
    }
}

/// ECDSA P-256 / SHA-256 软签名器
pub struct EcdsaP256Signer {
    key: p256::ecdsa::SigningKey,
}

impl EcdsaP256Signer {
    pub fn generate() -> Result<Self, SignerError> {
        let secret = keygen::random_p256_secret()
            .map_err(|e| SignerError::Backend(e.to_string()))?;
        Ok(Self {
            key: p256::ecdsa::SigningKey::from(&secret),
        })
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, SignerError> {
        use p256::pkcs8::DecodePrivateKey;
        let secret = p256::SecretKey::from_pkcs8_der(der)
            .map_err(|e| SignerError::Key(e.to_string()))?;
        Ok(Self {
            key: p256::ecdsa::SigningKey::from(&secret),
        })
    }
}

impl ContentSigner for EcdsaP256Signer {
    fn algorithm(&self) -> SignAlgo {
        SignAlgo::EcdsaSha256
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        let signature: p256::ecdsa::Signature = self.key.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned, SignerError> {
        use p256::elliptic_curve::sec1::ToEncodedPoint;
        let point = self.key.verifying_key().to_encoded_point(false);
        keygen::ec_spki(custodia_profile::EcCurve::Secp256r1, point.as_bytes())
            .map_err(|e| SignerError::Key(e.to_string()))
    }
}

/// RSA PKCS#1 v1.5 软签名器
pub struct RsaSigner {
    key: rsa::RsaPrivateKey,
    algorithm: SignAlgo,
}

impl RsaSigner {
    pub fn new(key: rsa::RsaPrivateKey, algorithm: SignAlgo) -> Result<Self, SignerError> {
        match algorithm {
            SignAlgo::RsaSha256 | SignAlgo::RsaSha384 | SignAlgo::RsaSha512 => {
                Ok(Self { key, algorithm })
            }
            other => Err(SignerError::Key(format!(
                "{} is not an RSA signature algorithm",
                other.name()
            ))),
        }
    }

    pub fn generate(bits: usize, algorithm: SignAlgo) -> Result<Self, SignerError> {
        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| SignerError::Backend(format!("RSA generation failed: {}", e)))?;
        Self::new(key, algorithm)
    }

    pub fn from_pkcs8_der(der: &[u8], algorithm: SignAlgo) -> Result<Self, SignerError> {
        use rsa::pkcs8::DecodePrivateKey;
        let key = rsa::RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| SignerError::Key(e.to_string()))?;
        Self::new(key, algorithm)
    }
}

impl ContentSigner for RsaSigner {
    fn algorithm(&self) -> SignAlgo {
        self.algorithm
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        let signature = match self.algorithm {
            SignAlgo::RsaSha256 => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(self.key.clone());
                signer.sign(message).to_vec()
            }
            SignAlgo::RsaSha384 => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha384>::new(self.key.clone());
                signer.sign(message).to_vec()
            }
            SignAlgo::RsaSha512 => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha512>::new(self.key.clone());
                signer.sign(message).to_vec()
            }
            _ => unreachable!("constructor rejects non-RSA algorithms"),
        };
        Ok(signature)
    }

    fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned, SignerError> {
        use rsa::pkcs1::EncodeRsaPublicKey;
        let public = rsa::RsaPublicKey::from(&self.key);
        let pkcs1 = public
            .to_pkcs1_der()
            .map_err(|e| SignerError::Key(e.to_string()))?;
        keygen::rsa_spki(pkcs1.as_bytes()).map_err(|e| SignerError::Key(e.to_string()))
    }
}

/// CA 持有的签名器池
///
/// 按模板允许列表的顺序选第一个可用的签名器。
#[derive(Clone, Default)]
pub struct SignerPool {
    signers: Vec<Arc<dyn ContentSigner>>,
}

impl SignerPool {
    pub fn new(signers: Vec<Arc<dyn ContentSigner>>) -> Self {
        Self { signers }
    }

    pub fn single(signer: Arc<dyn ContentSigner>) -> Self {
        Self {
            signers: vec![signer],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// 允许列表为空表示接受任何签名器
    pub fn signer_for(&self, allowed: &[SignAlgo]) -> Option<Arc<dyn ContentSigner>> {
        if allowed.is_empty() {
            return self.signers.first().cloned();
        }

        for algo in allowed {
            if let Some(signer) = self.signers.iter().find(|s| s.algorithm() == *algo) {
                return Some(signer.clone());
            }
        }
        None
    }

    pub fn any(&self) -> Option<Arc<dyn ContentSigner>> {
        self.signers.first().cloned()
    }
}
