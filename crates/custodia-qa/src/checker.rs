//! 重算比对检查器

use der::Decode;
use time::OffsetDateTime;
use x509_cert::{name::Name, Certificate};

use custodia_profile::{Certprofile, PublicCaInfo, RequestedExtension};

/// 一条检查结论
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// 稳定的条目编号，如 `X509.EXT.2.5.29.15`
    pub code: String,
    pub description: String,
    pub failed: bool,
    pub message: Option<String>,
}

impl ValidationIssue {
    fn ok(code: &str, description: &str) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            failed: false,
            message: None,
        }
    }

    fn failure(code: &str, description: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            failed: true,
            message: Some(message.into()),
        }
    }
}

/// 按模板检查一张已签发的证书
pub struct ExtensionsChecker<'a> {
    profile: &'a Certprofile,
}

impl<'a> ExtensionsChecker<'a> {
    pub fn new(profile: &'a Certprofile) -> Self {
        Self { profile }
    }

    /// 对比证书扩展与模板重算结果
    ///
    /// `requested_subject` 与 `requested_extensions` 是签发时请求的原貌。
    pub fn check(
        &self,
        cert_der: &[u8],
        ca: &PublicCaInfo,
        requested_subject: &Name,
        requested_extensions: &[RequestedExtension],
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let cert = match Certificate::from_der(cert_der) {
            Ok(cert) => cert,
            Err(e) => {
                issues.push(ValidationIssue::failure(
                    "X509.ENCODING",
                    "certificate encoding",
                    format!("could not parse certificate: {}", e),
                ));
                return issues;
            }
        };
        let tbs = &cert.tbs_certificate;

        // version
        if tbs.version != x509_cert::Version::V3 {
            issues.push(ValidationIssue::failure(
                "X509.VERSION",
                "certificate version",
                format!("expected v3, got {:?}", tbs.version),
            ));
        } else {
            issues.push(ValidationIssue::ok("X509.VERSION", "certificate version"));
        }

        // the granted subject must equal what the profile would grant
        match self.profile.subject(requested_subject) {
            Ok(subject_info) => {
                let expected =
                    custodia_profile::subject::canonicalize_name(&subject_info.granted_subject);
                let actual = custodia_profile::subject::canonicalize_name(&tbs.subject);
                if expected == actual {
                    issues.push(ValidationIssue::ok("X509.SUBJECT", "granted subject"));
                } else {
                    issues.push(ValidationIssue::failure(
                        "X509.SUBJECT",
                        "granted subject",
                        format!("expected '{}', got '{}'", expected, actual),
                    ));
                }
            }
            Err(e) => {
                issues.push(ValidationIssue::failure(
                    "X509.SUBJECT",
                    "granted subject",
                    format!("profile rejects the requested subject: {}", e),
                ));
            }
        }

        let (not_before, not_after) = validity_of(&cert);

        // recompute the full extension set
        let expected = match self.profile.extensions(
            requested_subject,
            &tbs.subject,
            requested_extensions,
            &tbs.subject_public_key_info,
            ca,
            not_before,
            not_after,
        ) {
            Ok(values) => values,
            Err(e) => {
                issues.push(ValidationIssue::failure(
                    "X509.EXTENSIONS",
                    "extension recomputation",
                    format!("profile rejects the request: {}", e),
                ));
                return issues;
            }
        };

        let empty = Vec::new();
        let actual = tbs.extensions.as_ref().unwrap_or(&empty);

        for expected_value in expected.iter() {
            let code = format!("X509.EXT.{}", expected_value.oid);
            let description = format!("extension {}", expected_value.oid);

            let Some(actual_ext) = actual.iter().find(|e| e.extn_id == expected_value.oid)
            else {
                issues.push(ValidationIssue::failure(
                    &code,
                    &description,
                    "extension is absent",
                ));
                continue;
            };

            if actual_ext.critical != expected_value.critical {
                issues.push(ValidationIssue::failure(
                    &code,
                    &description,
                    format!(
                        "criticality mismatch: expected {}, got {}",
                        expected_value.critical, actual_ext.critical
                    ),
                ));
                continue;
            }

            if actual_ext.extn_value.as_bytes() != expected_value.value.as_slice() {
                issues.push(ValidationIssue::failure(
                    &code,
                    &description,
                    format!(
                        "value mismatch: expected {}, got {}",
                        hex::encode(&expected_value.value),
                        hex::encode(actual_ext.extn_value.as_bytes())
                    ),
                ));
                continue;
            }

            issues.push(ValidationIssue::ok(&code, &description));
        }

        // extensions the profile would not have produced
        for actual_ext in actual {
            if expected.get(&actual_ext.extn_id).is_none() {
                issues.push(ValidationIssue::failure(
                    &format!("X509.EXT.{}", actual_ext.extn_id),
                    &format!("extension {}", actual_ext.extn_id),
                    "unexpected extension",
                ));
            }
        }

        issues
    }
}

fn validity_of(cert: &Certificate) -> (OffsetDateTime, OffsetDateTime) {
    let validity = &cert.tbs_certificate.validity;
    let not_before = match &validity.not_before {
        x509_cert::time::Time::UtcTime(t) => OffsetDateTime::from(t.to_system_time()),
        x509_cert::time::Time::GeneralTime(t) => OffsetDateTime::from(t.to_system_time()),
    };
    let not_after = match &validity.not_after {
        x509_cert::time::Time::UtcTime(t) => OffsetDateTime::from(t.to_system_time()),
        x509_cert::time::Time::GeneralTime(t) => OffsetDateTime::from(t.to_system_time()),
    };
    (not_before, not_after)
}

/// 汇总是否全部通过
pub fn all_passed(issues: &[ValidationIssue]) -> bool {
    issues.iter().all(|issue| !issue.failed)
}
