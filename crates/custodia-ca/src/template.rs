//! 签发模板构建
//!
//! 把请求、模板与 CA 状态合成为最终的待签名模板。
//! 各项检查的先后顺序决定错误的优先级，不要调整。

use std::sync::Arc;

use pkcs8::spki::SubjectPublicKeyInfoOwned;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use x509_cert::name::Name;

use custodia_core::{OperationError, Result, MAX_CERT_TIME};
use custodia_profile::{
    subject as subject_util, CertLevel, Certprofile, KeypairGenControl, NotAfterMode,
    ProfileError, RequestedExtension,
};

use crate::{
    ca_info::{CaInfo, ValidityMode},
    keygen::KeypairGenerator,
    signer::{ContentSigner, SignerPool},
};

/// 签发请求
#[derive(Clone)]
pub struct CertTemplateData {
    pub subject: Name,
    pub public_key_info: Option<SubjectPublicKeyInfoOwned>,
    /// 无公钥时是否由服务端生成密钥对
    pub server_keygen: bool,
    pub extensions: Vec<RequestedExtension>,
    pub not_before: Option<OffsetDateTime>,
    pub not_after: Option<OffsetDateTime>,
    pub profile_name: String,
    pub for_cross_cert: bool,
    pub cert_req_id: Option<u64>,
}

impl CertTemplateData {
    pub fn new(subject: Name, profile_name: impl Into<String>) -> Self {
        Self {
            subject,
            public_key_info: None,
            server_keygen: false,
            extensions: Vec::new(),
            not_before: None,
            not_after: None,
            profile_name: profile_name.into(),
            for_cross_cert: false,
            cert_req_id: None,
        }
    }
}

/// 合成后的待签名模板
pub struct GrantedCertTemplate {
    pub cert_req_id: Option<u64>,
    pub requested_subject: Name,
    pub granted_subject: Name,
    pub spki: SubjectPublicKeyInfoOwned,
    /// 服务端生成时的 PKCS#8 私钥
    pub private_key_der: Option<Vec<u8>>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub signer: Arc<dyn ContentSigner>,
    pub warning: Option<String>,
    pub requested_extensions: Vec<RequestedExtension>,
}

impl std::fmt::Debug for GrantedCertTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantedCertTemplate")
            .field("cert_req_id", &self.cert_req_id)
            .field("requested_subject", &self.requested_subject)
            .field("granted_subject", &self.granted_subject)
            .field("spki", &self.spki)
            .field("private_key_der", &self.private_key_der)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("signer", &"<dyn ContentSigner>")
            .field("warning", &self.warning)
            .field("requested_extensions", &self.requested_extensions)
            .finish()
    }
}

/// 模板构建器
pub struct TemplateBuilder<'a> {
    ca_info: &'a CaInfo,
}

impl<'a> TemplateBuilder<'a> {
    pub fn new(ca_info: &'a CaInfo) -> Self {
        Self { ca_info }
    }

    pub fn build(
        &self,
        profile: &Certprofile,
        template: &CertTemplateData,
        signer_pool: &SignerPool,
        keypair_generators: &[Arc<dyn KeypairGenerator>],
        now: OffsetDateTime,
    ) -> Result<GrantedCertTemplate> {
        let ca_info = self.ca_info;

        if ca_info.is_revoked() {
            return Err(OperationError::not_permitted("CA is revoked"));
        }

        let signer = signer_pool
            .signer_for(profile.signature_algorithms())
            .ok_or_else(|| {
                OperationError::system_failure(
                    "CA does not support any signature algorithm restricted by the cert profile",
                )
            })?;

        match profile.cert_level() {
            CertLevel::RootCa => {
                return Err(OperationError::not_permitted(
                    "CA is not allowed to generate Root CA certificate",
                ));
            }
            CertLevel::SubCa | CertLevel::Cross => {
                let requested_path_len = profile.path_len_basic_constraint();
                let allowed = match (requested_path_len, ca_info.path_len) {
                    (None, None) => true,
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    (Some(requested), Some(ca)) => requested < ca,
                };
                if !allowed {
                    return Err(OperationError::not_permitted(
                        "invalid BasicConstraints.pathLenConstraint",
                    ));
                }
            }
            CertLevel::EndEntity => {}
        }

        let requested_subject = if template.for_cross_cert {
            template.subject.clone()
        } else {
            subject_util::remove_empty_rdns(&template.subject)
        };

        // notBefore too far in the past is clamped (client clocks drift)
        let mut granted_not_before = profile.not_before(template.not_before, now);
        let ten_minutes_before = now - Duration::minutes(10);
        if granted_not_before < ten_minutes_before {
            granted_not_before = ten_minutes_before;
        }

        if granted_not_before > ca_info.no_new_certificate_after {
            return Err(OperationError::not_permitted(format!(
                "CA is not permitted to issue certificate after {}",
                ca_info.no_new_certificate_after
            )));
        }

        if granted_not_before < ca_info.not_before() {
            granted_not_before = ca_info.not_before();
        }

        let mut private_key_der = None;
        let granted_spki = if let Some(spki) = &template.public_key_info {
            spki.clone()
        } else if template.server_keygen {
            let keyspec = match profile.keypair_gen_control() {
                KeypairGenControl::Forbidden => {
                    return Err(OperationError::bad_cert_template("no public key is specified"));
                }
                KeypairGenControl::InheritCa => ca_info.keyspec,
                KeypairGenControl::Explicit(spec) => *spec,
            };

            let generator = keypair_generators
                .iter()
                .find(|g| g.supports(&keyspec))
                .ok_or_else(|| {
                    OperationError::system_failure(format!(
                        "found no keypair generator for keyspec {}",
                        keyspec
                    ))
                })?;

            let generated = generator.generate(&keyspec).map_err(|e| {
                warn!("keypair generation failed: {}", e);
                OperationError::system_failure(format!(
                    "error generating keypair {} using generator {}",
                    keyspec,
                    generator.name()
                ))
            })?;
            info!(
                "generated keypair {} with generator {}",
                keyspec,
                generator.name()
            );

            private_key_der = Some(generated.private_key_der);
            generated.spki
        } else {
            return Err(OperationError::bad_cert_template("no public key is specified"));
        };

        let granted_spki = profile
            .check_public_key(granted_spki)
            .map_err(map_profile_error)?;

        let mut warnings: Vec<String> = Vec::new();

        let subject_info = profile
            .subject(&requested_subject)
            .map_err(map_profile_error)?;

        // for cross certificates the requested subject survives untouched
        let granted_subject = if template.for_cross_cert {
            requested_subject.clone()
        } else {
            if let Some(warning) = subject_info.warning {
                warnings.push(warning);
            }
            subject_info.granted_subject
        };

        if subject_util::canonicalize_name(&granted_subject)
            == subject_util::canonicalize_name(&ca_info.cert.subject)
        {
            return Err(OperationError::already_issued(
                "certificate with the same subject as CA is not allowed",
            ));
        }

        let granted_not_after = if profile.has_no_well_defined_expiration_date() {
            MAX_CERT_TIME
        } else {
            let validity = match profile.validity() {
                Some(validity) if validity <= ca_info.max_validity => validity,
                _ => ca_info.max_validity,
            };

            let mut max_not_after = validity.add_to(granted_not_before);
            if max_not_after > MAX_CERT_TIME {
                max_not_after = MAX_CERT_TIME;
            }

            let mut granted = match template.not_after {
                Some(requested) => {
                    if requested > max_not_after {
                        warnings.push("notAfter modified".to_string());
                        max_not_after
                    } else {
                        requested
                    }
                }
                None => max_not_after,
            };

            if granted > ca_info.not_after() {
                let ca_mode = ca_info.validity_mode;
                let profile_mode = profile.not_after_mode();

                if profile_mode == NotAfterMode::Strict {
                    return Err(OperationError::not_permitted(
                        "notAfter outside of CA's validity is not permitted by the CertProfile",
                    ));
                }

                match ca_mode {
                    ValidityMode::Strict => {
                        return Err(OperationError::not_permitted(
                            "notAfter outside of CA's validity is not permitted by the CA",
                        ));
                    }
                    ValidityMode::Cutoff => {
                        granted = ca_info.not_after();
                    }
                    ValidityMode::Lax => {
                        if profile_mode == NotAfterMode::Cutoff {
                            granted = ca_info.not_after();
                        }
                    }
                }
            }

            granted
        };

        let warning = if warnings.is_empty() {
            None
        } else {
            Some(warnings.join(", "))
        };

        Ok(GrantedCertTemplate {
            cert_req_id: template.cert_req_id,
            requested_subject,
            granted_subject,
            spki: granted_spki,
            private_key_der,
            not_before: granted_not_before,
            not_after: granted_not_after,
            signer,
            warning,
            requested_extensions: template.extensions.clone(),
        })
    }
}

/// 模板错误映射到操作错误码
pub(crate) fn map_profile_error(err: ProfileError) -> OperationError {
    match err {
        ProfileError::BadTemplate(message) => OperationError::bad_cert_template(message),
        ProfileError::Config(message) => OperationError::system_failure(message),
        ProfileError::Encoding(e) => OperationError::system_failure(e.to_string()),
    }
}
