//! POP3 capabilities (RFC 2449).

/// One CAPA entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pop3Capability {
    /// `TOP`
    Top,
    /// `USER`: USER/PASS login is allowed.
    User,
    /// `STLS` (RFC 2595)
    Stls,
    /// `PIPELINING`
    Pipelining,
    /// `UIDL`
    Uidl,
    /// `RESP-CODES`
    RespCodes,
    /// One mechanism from a `SASL` or `AUTH` line, upper-cased.
    Sasl(String),
    /// Anything else, keyword only.
    Other(String),
}

impl Pop3Capability {
    /// Parses one CAPA line. SASL lines list several mechanisms.
    #[must_use]
    pub fn parse_line(line: &str) -> Vec<Self> {
        let mut words = line.split_ascii_whitespace();
        let Some(keyword) = words.next() else {
            return Vec::new();
        };
        let keyword = keyword.to_ascii_uppercase();
        match keyword.as_str() {
            "TOP" => vec![Self::Top],
            "USER" => vec![Self::User],
            "STLS" => vec![Self::Stls],
            "PIPELINING" => vec![Self::Pipelining],
            "UIDL" => vec![Self::Uidl],
            "RESP-CODES" => vec![Self::RespCodes],
            "SASL" | "AUTH" => words.map(|m| Self::Sasl(m.to_ascii_uppercase())).collect(),
            _ => vec![Self::Other(keyword)],
        }
    }
}

/// The capability set of a POP3 connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pop3Capabilities {
    list: Vec<Pop3Capability>,
}

impl Pop3Capabilities {
    /// Builds the set from the lines of a CAPA response.
    #[must_use]
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            list: lines
                .into_iter()
                .flat_map(Pop3Capability::parse_line)
                .collect(),
        }
    }

    /// What is assumed of a server that does not understand CAPA.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            list: vec![Pop3Capability::User],
        }
    }

    /// Returns true if nothing is known yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Returns true if `cap` was advertised.
    #[must_use]
    pub fn has(&self, cap: &Pop3Capability) -> bool {
        self.list.contains(cap)
    }

    /// Returns true if the SASL mechanism was advertised.
    #[must_use]
    pub fn has_sasl(&self, mechanism: &str) -> bool {
        self.list
            .iter()
            .any(|c| matches!(c, Pop3Capability::Sasl(m) if m.eq_ignore_ascii_case(mechanism)))
    }

    /// Iterates over the advertised capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Pop3Capability> {
        self.list.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capa_response() {
        let caps = Pop3Capabilities::from_lines([
            "TOP",
            "user",
            "SASL CRAM-MD5 plain",
            "RESP-CODES",
            "PIPELINING",
            "EXPIRE 60",
        ]);
        assert!(caps.has(&Pop3Capability::User));
        assert!(caps.has(&Pop3Capability::Pipelining));
        assert!(!caps.has(&Pop3Capability::Stls));
        assert!(caps.has_sasl("PLAIN"));
        assert!(caps.has_sasl("cram-md5"));
        assert!(caps.has(&Pop3Capability::Other("EXPIRE".into())));
    }

    #[test]
    fn test_legacy_server_allows_user_only() {
        let caps = Pop3Capabilities::legacy();
        assert!(caps.has(&Pop3Capability::User));
        assert_eq!(caps.iter().count(), 1);
    }

    #[test]
    fn test_blank_line_ignored() {
        assert!(Pop3Capability::parse_line("   ").is_empty());
    }
}
