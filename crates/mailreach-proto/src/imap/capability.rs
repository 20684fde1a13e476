//! IMAP server capabilities.

use std::fmt;

/// One advertised server capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1` (RFC 3501)
    Imap4Rev1,
    /// IDLE command support (RFC 2177)
    Idle,
    /// STARTTLS support
    StartTls,
    /// LOGIN disabled
    LoginDisabled,
    /// Initial client response on AUTHENTICATE (RFC 4959)
    SaslIr,
    /// LITERAL+ extension (RFC 7888)
    LiteralPlus,
    /// AUTH mechanism, upper-cased
    Auth(String),
    /// Unknown capability
    Unknown(String),
}

impl Capability {
    /// Parses a capability atom.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IDLE" => Self::Idle,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            "SASL-IR" => Self::SaslIr,
            "LITERAL+" => Self::LiteralPlus,
            _ => match upper.strip_prefix("AUTH=") {
                Some(mechanism) => Self::Auth(mechanism.to_string()),
                None => Self::Unknown(s.to_string()),
            },
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap4Rev1 => write!(f, "IMAP4rev1"),
            Self::Idle => write!(f, "IDLE"),
            Self::StartTls => write!(f, "STARTTLS"),
            Self::LoginDisabled => write!(f, "LOGINDISABLED"),
            Self::SaslIr => write!(f, "SASL-IR"),
            Self::LiteralPlus => write!(f, "LITERAL+"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// The capability set of a connection.
///
/// Empty until the server announces it, and cleared whenever it may have
/// changed (after STARTTLS or authentication).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    list: Vec<Capability>,
}

impl Capabilities {
    /// Parses whitespace-separated atoms.
    #[must_use]
    pub fn parse(atoms: &str) -> Self {
        Self {
            list: atoms.split_ascii_whitespace().map(Capability::parse).collect(),
        }
    }

    /// Returns true if nothing is known yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Returns true if `cap` was advertised.
    #[must_use]
    pub fn has(&self, cap: &Capability) -> bool {
        self.list.contains(cap)
    }

    /// Returns true if `AUTH=<mechanism>` was advertised.
    #[must_use]
    pub fn has_auth(&self, mechanism: &str) -> bool {
        self.list
            .iter()
            .any(|c| matches!(c, Capability::Auth(m) if m.eq_ignore_ascii_case(mechanism)))
    }

    /// Iterates over the advertised capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.list.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_atoms() {
        assert_eq!(Capability::parse("imap4rev1"), Capability::Imap4Rev1);
        assert_eq!(Capability::parse("SASL-IR"), Capability::SaslIr);
        assert_eq!(Capability::parse("LOGINDISABLED"), Capability::LoginDisabled);
        assert_eq!(
            Capability::parse("auth=cram-md5"),
            Capability::Auth("CRAM-MD5".into())
        );
        assert_eq!(
            Capability::parse("X-GM-EXT-1"),
            Capability::Unknown("X-GM-EXT-1".into())
        );
    }

    #[test]
    fn test_capability_set() {
        let caps = Capabilities::parse("IMAP4rev1 STARTTLS AUTH=PLAIN AUTH=GSSAPI IDLE");
        assert!(caps.has(&Capability::StartTls));
        assert!(caps.has(&Capability::Idle));
        assert!(caps.has_auth("plain"));
        assert!(caps.has_auth("GSSAPI"));
        assert!(!caps.has_auth("CRAM-MD5"));
        assert!(!caps.has(&Capability::LoginDisabled));
        assert_eq!(caps.iter().count(), 5);
    }

    #[test]
    fn test_display_round_trips_auth() {
        assert_eq!(Capability::Auth("PLAIN".into()).to_string(), "AUTH=PLAIN");
        assert!(Capabilities::default().is_empty());
    }
}
