//! Custodia CA - 签发核心
//!
//! 按模板与 CA 策略构建待签名证书、落库、生成 CRL，
//! 并提供带集群主锁的 CA 管理器。

pub mod ca;
pub mod ca_info;
pub mod crl;
pub mod keygen;
pub mod manager;
pub mod publisher;
pub mod signer;
pub mod store;
pub mod template;

pub use ca::{CaInstance, IssuedCertificate};
pub use ca_info::{CaCert, CaInfo, CaStatus, CrlControl, ValidityMode};
pub use keygen::{GeneratedKeypair, KeypairGenerator, SoftKeypairGenerator};
pub use manager::{CaConfBundle, CaEntry, CaManager, CaManagerConfig, CaSystemStatus};
pub use publisher::{CertPublisher, LogPublisher, PublishedCert, PublisherError};
pub use signer::{ContentSigner, Ed25519Signer, EcdsaP256Signer, RsaSigner, SignerError, SignerPool};
pub use store::{CertListFilter, CertOrderBy, CertRecord, CertStore, IssuerRecord};
pub use template::{CertTemplateData, GrantedCertTemplate, TemplateBuilder};
