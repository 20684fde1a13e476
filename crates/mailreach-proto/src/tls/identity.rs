//! Server identity checks against certificate names.

use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::CertificateFailure;

/// Names a certificate claims, as used for hostname matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateNames {
    /// `dNSName` entries of the subject alternative name extension.
    pub dns: Vec<String>,
    /// Common names of the subject.
    pub common_names: Vec<String>,
}

impl CertificateNames {
    /// Extracts names from a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateFailure> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertificateFailure::Malformed(e.to_string()))?;

        let mut names = Self::default();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    names.dns.push((*dns).to_string());
                }
            }
        }
        names.common_names = cert
            .subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok())
            .map(str::to_string)
            .collect();
        Ok(names)
    }

    /// Names consulted for matching: DNS entries when any exist, the common
    /// names otherwise.
    #[must_use]
    pub fn candidates(&self) -> &[String] {
        if self.dns.is_empty() {
            &self.common_names
        } else {
            &self.dns
        }
    }

    /// Returns true if any candidate name matches `host`.
    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        self.candidates().iter().any(|name| host_matches(host, name))
    }
}

/// Checks the end-entity certificate `der` against `host`.
pub fn check_identity(host: &str, der: &[u8]) -> Result<(), CertificateFailure> {
    let names = CertificateNames::from_der(der)?;
    if names.matches(host) {
        Ok(())
    } else {
        Err(CertificateFailure::HostnameMismatch {
            host: strip_port(host).to_string(),
            names: names.candidates().to_vec(),
        })
    }
}

/// Removes a trailing `:port` (and IPv6 brackets) from `host`.
#[must_use]
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}

/// Matches `host` against a certificate name.
///
/// Comparison is case-insensitive. A pattern may carry exactly one wildcard,
/// and only as the whole leftmost label (`*.example.com`); it then matches a
/// single label, so `a.b.example.com` and `example.com` do not match.
#[must_use]
pub fn host_matches(host: &str, pattern: &str) -> bool {
    let host = strip_port(host);
    if let Some(domain) = pattern.strip_prefix("*.") {
        if domain.contains('*') || domain.is_empty() {
            return false;
        }
        return match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(domain),
            None => false,
        };
    }
    !pattern.contains('*') && host.eq_ignore_ascii_case(pattern)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_wildcard_matches_single_label() {
        assert!(host_matches("mail.example.com", "*.example.com"));
        assert!(!host_matches("example.com", "*.example.com"));
        assert!(!host_matches("a.b.example.com", "*.example.com"));
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        assert!(host_matches("IMAP.Example.COM", "imap.example.com"));
        assert!(!host_matches("imap.example.org", "imap.example.com"));
    }

    #[test]
    fn test_port_is_stripped() {
        assert!(host_matches("mail.example.com:993", "*.example.com"));
        assert!(host_matches("imap.example.com:143", "imap.example.com"));
        assert_eq!(strip_port("[::1]:993"), "::1");
        assert_eq!(strip_port("::1"), "::1");
    }

    #[test]
    fn test_misplaced_wildcards_never_match() {
        assert!(!host_matches("mail.example.com", "mail.*.com"));
        assert!(!host_matches("mail.example.com", "m*.example.com"));
        assert!(!host_matches("a.b.example.com", "*.*.example.com"));
        assert!(!host_matches("mail.example.com", "*"));
    }

    #[test]
    fn test_common_name_used_only_without_dns_names() {
        let names = CertificateNames {
            dns: vec!["imap.example.com".into()],
            common_names: vec!["mail.example.com".into()],
        };
        assert!(names.matches("imap.example.com"));
        assert!(!names.matches("mail.example.com"));

        let cn_only = CertificateNames {
            dns: Vec::new(),
            common_names: vec!["*.example.com".into()],
        };
        assert!(cn_only.matches("pop.example.com"));
    }

    #[test]
    fn test_garbage_der_is_malformed() {
        assert!(matches!(
            check_identity("mail.example.com", b"not a certificate"),
            Err(CertificateFailure::Malformed(_))
        ));
    }

    proptest! {
        #[test]
        fn wildcard_accepts_any_single_label(label in "[a-z0-9]{1,20}") {
            let host = format!("{label}.example.com");
            prop_assert!(host_matches(&host, "*.example.com"));
        }

        #[test]
        fn wildcard_rejects_deeper_names(a in "[a-z0-9]{1,10}", b in "[a-z0-9]{1,10}") {
            let host = format!("{a}.{b}.example.com");
            prop_assert!(!host_matches(&host, "*.example.com"));
        }

        #[test]
        fn exact_names_match_themselves(name in "[a-z]{1,10}(\\.[a-z]{1,10}){1,3}", port in 1u16..) {
            let with_port = format!("{name}:{port}");
            prop_assert!(host_matches(&name, &name));
            prop_assert!(host_matches(&with_port, &name));
        }
    }
}
