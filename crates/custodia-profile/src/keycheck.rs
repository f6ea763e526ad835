//! 公钥检查
//!
//! 将请求公钥规范化为 RFC 3279 形式，校验算法与密钥规格，
//! 并拒绝弱 RSA 模数。

use der::{asn1::BitString, Any, Decode, Encode, Tag, Tagged};
use pkcs8::spki::SubjectPublicKeyInfoOwned;

use crate::{
    error::{ProfileError, Result},
    roca,
    types::{EcCurve, KeySpec},
};

/// RSA 模数的绝对下限（位）
const MIN_RSA_BITS: usize = 1024;

/// 从 SPKI 推导密钥规格
pub fn keyspec_of(spki: &SubjectPublicKeyInfoOwned) -> Result<KeySpec> {
    let key_bytes = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| ProfileError::bad_template("public key has unused bits"))?;

    let oid = spki.algorithm.oid;
    if oid == const_oid::db::rfc5912::RSA_ENCRYPTION {
        let rsa = pkcs1::RsaPublicKey::from_der(key_bytes)
            .map_err(|_| ProfileError::bad_template("invalid format of RSA public key"))?;
        let modulus = strip_leading_zeros(rsa.modulus.as_bytes());
        let bits = modulus_bits(modulus);
        if bits < MIN_RSA_BITS {
            return Err(ProfileError::bad_template(format!(
                "RSA modulus of {} bits is too small",
                bits
            )));
        }
        // keyspec granularity is a multiple of 256 bits
        let rounded = bits.div_ceil(256) * 256;
        Ok(KeySpec::Rsa(rounded as u32))
    } else if oid == const_oid::db::rfc5912::ID_EC_PUBLIC_KEY {
        let params = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or_else(|| ProfileError::bad_template("EC key without curve parameters"))?;
        let curve_oid = decode_oid_param(params)?;
        let curve = EcCurve::from_oid(&curve_oid).ok_or_else(|| {
            ProfileError::bad_template(format!("unsupported EC curve {}", curve_oid))
        })?;
        if key_bytes.is_empty() {
            return Err(ProfileError::bad_template("empty EC public key"));
        }
        Ok(KeySpec::Ec(curve))
    } else if oid == const_oid::db::rfc8410::ID_ED_25519 {
        if key_bytes.len() != 32 {
            return Err(ProfileError::bad_template(format!(
                "invalid Ed25519 public key length {}",
                key_bytes.len()
            )));
        }
        Ok(KeySpec::Ed25519)
    } else {
        Err(ProfileError::bad_template(format!(
            "unsupported key algorithm {}",
            oid
        )))
    }
}

/// 规范化到 RFC 3279 形式
///
/// RSA 带显式 NULL 参数；EC 必须使用命名曲线；Ed25519 不带参数。
pub fn canonicalize_rfc3279(spki: SubjectPublicKeyInfoOwned) -> Result<SubjectPublicKeyInfoOwned> {
    let oid = spki.algorithm.oid;
    let mut spki = spki;

    if oid == const_oid::db::rfc5912::RSA_ENCRYPTION {
        let null_der = der::asn1::Null.to_der()?;
        spki.algorithm.parameters = Some(Any::from_der(&null_der)?);
    } else if oid == const_oid::db::rfc5912::ID_EC_PUBLIC_KEY {
        let params = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or_else(|| ProfileError::bad_template("EC key without curve parameters"))?;
        // only the named-curve form survives canonicalization
        decode_oid_param(params)?;
    } else if oid == const_oid::db::rfc8410::ID_ED_25519 {
        spki.algorithm.parameters = None;
    }

    Ok(spki)
}

/// 完整公钥检查：规范化、规格白名单、弱密钥拒绝
pub fn check_public_key(
    allowed: &[KeySpec],
    spki: SubjectPublicKeyInfoOwned,
) -> Result<SubjectPublicKeyInfoOwned> {
    let spki = canonicalize_rfc3279(spki)?;
    let keyspec = keyspec_of(&spki)?;

    if let KeySpec::Rsa(_) = keyspec {
        let key_bytes = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| ProfileError::bad_template("public key has unused bits"))?;
        let rsa = pkcs1::RsaPublicKey::from_der(key_bytes)
            .map_err(|_| ProfileError::bad_template("invalid format of RSA public key"))?;
        let modulus = strip_leading_zeros(rsa.modulus.as_bytes());
        if roca::is_affected(modulus) {
            return Err(ProfileError::bad_template("RSA public key is too weak"));
        }
    }

    if !allowed.is_empty() && !allowed.contains(&keyspec) {
        return Err(ProfileError::bad_template(format!(
            "key of spec {} is not permitted",
            keyspec
        )));
    }

    Ok(spki)
}

fn decode_oid_param(params: &Any) -> Result<const_oid::ObjectIdentifier> {
    if params.tag() != Tag::ObjectIdentifier {
        return Err(ProfileError::bad_template(
            "EC curve parameters are not a named curve",
        ));
    }
    params
        .decode_as::<const_oid::ObjectIdentifier>()
        .map_err(|_| ProfileError::bad_template("invalid EC curve parameters"))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let mut idx = 0;
    while idx < bytes.len() && bytes[idx] == 0 {
        idx += 1;
    }
    &bytes[idx..]
}

fn modulus_bits(modulus: &[u8]) -> usize {
    match modulus.first() {
        None => 0,
        Some(&first) => (modulus.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
    }
}

/// 构造 SPKI（供测试与密钥派生使用）
pub fn spki_from_parts(
    algorithm: pkcs8::spki::AlgorithmIdentifierOwned,
    key_bytes: &[u8],
) -> Result<SubjectPublicKeyInfoOwned> {
    Ok(SubjectPublicKeyInfoOwned {
        algorithm,
        subject_public_key: BitString::from_bytes(key_bytes)?,
    })
}
