//! Parsing of IMAP server responses.
//!
//! Only the parts this layer acts on are decoded: status responses and
//! their codes, capability lists, mailbox size updates, FETCH flag updates
//! and SEARCH results. Anything else is kept as text, and FETCH responses
//! keep their raw bytes for the caller.

use super::capability::Capabilities;
use crate::{Error, Result};

/// Status keyword of a status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server greeting (pre-authenticated).
    PreAuth,
    /// Server is closing connection.
    Bye,
}

impl Status {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::PreAuth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

/// Bracketed response code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    /// Text must be shown to the user.
    Alert,
    /// Capabilities piggy-backed on a status response.
    Capability(Capabilities),
    /// Mailbox UID validity.
    UidValidity(u32),
    /// Next UID to be assigned.
    UidNext(u32),
    /// First unseen message.
    Unseen(u32),
    /// Mailbox is read-only.
    ReadOnly,
    /// Mailbox is read-write.
    ReadWrite,
    /// Any other code, verbatim.
    Other(String),
}

impl Code {
    fn parse(text: &str) -> Self {
        let (name, arg) = text.split_once(' ').unwrap_or((text, ""));
        let number = || arg.trim().parse::<u32>().ok();
        match name.to_ascii_uppercase().as_str() {
            "ALERT" => Self::Alert,
            "CAPABILITY" => Self::Capability(Capabilities::parse(arg)),
            "UIDVALIDITY" => number().map_or_else(|| Self::Other(text.into()), Self::UidValidity),
            "UIDNEXT" => number().map_or_else(|| Self::Other(text.into()), Self::UidNext),
            "UNSEEN" => number().map_or_else(|| Self::Other(text.into()), Self::Unseen),
            "READ-ONLY" => Self::ReadOnly,
            "READ-WRITE" => Self::ReadWrite,
            _ => Self::Other(text.to_string()),
        }
    }
}

/// Status, optional code and human-readable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    /// Status keyword.
    pub status: Status,
    /// Response code, if any.
    pub code: Option<Code>,
    /// Remaining text.
    pub text: String,
}

impl StatusText {
    fn parse(status: Status, rest: &str) -> Self {
        if let Some(inner) = rest.strip_prefix('[')
            && let Some((code, text)) = inner.split_once(']')
        {
            return Self {
                status,
                code: Some(Code::parse(code)),
                text: text.trim_start().to_string(),
            };
        }
        Self {
            status,
            code: None,
            text: rest.to_string(),
        }
    }
}

/// Untagged (`*`) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// OK, NO, BAD, PREAUTH or BYE.
    Status(StatusText),
    /// CAPABILITY listing.
    Capability(Capabilities),
    /// Message count.
    Exists(u32),
    /// Recent count.
    Recent(u32),
    /// Message removed.
    Expunge(u32),
    /// FETCH data.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// FLAGS item, when present.
        flags: Option<Vec<String>>,
        /// The whole response, literals included.
        raw: Vec<u8>,
    },
    /// SEARCH hits.
    Search(Vec<u32>),
    /// Flags defined in the mailbox.
    Flags(Vec<String>),
    /// Anything else.
    Other(String),
}

/// A parsed server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `+` continuation request.
    Continuation(String),
    /// Completion of a tagged command.
    Tagged {
        /// Command tag.
        tag: String,
        /// Completion status.
        status: StatusText,
    },
    /// Untagged data or status.
    Untagged(Untagged),
}

/// Parses one complete response as returned by the framed reader.
pub fn parse(raw: &[u8]) -> Result<Response> {
    let first_line_end = raw
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(raw.len());
    let line = String::from_utf8_lossy(&raw[..first_line_end]);
    let line = line.as_ref();

    if let Some(rest) = line.strip_prefix('+') {
        return Ok(Response::Continuation(rest.trim_start().to_string()));
    }

    if let Some(rest) = line.strip_prefix("* ") {
        return Ok(Response::Untagged(parse_untagged(rest, raw)?));
    }

    let (tag, rest) = line
        .split_once(' ')
        .ok_or_else(|| malformed(line))?;
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = Status::parse(word).ok_or_else(|| malformed(line))?;
    Ok(Response::Tagged {
        tag: tag.to_string(),
        status: StatusText::parse(status, text),
    })
}

fn parse_untagged(rest: &str, raw: &[u8]) -> Result<Untagged> {
    let (word, tail) = rest.split_once(' ').unwrap_or((rest, ""));

    if let Ok(number) = word.parse::<u32>() {
        let (kind, _) = tail.split_once(' ').unwrap_or((tail, ""));
        return Ok(match kind.to_ascii_uppercase().as_str() {
            "EXISTS" => Untagged::Exists(number),
            "RECENT" => Untagged::Recent(number),
            "EXPUNGE" => Untagged::Expunge(number),
            "FETCH" => Untagged::Fetch {
                seq: number,
                flags: fetch_flags(tail),
                raw: raw.to_vec(),
            },
            _ => Untagged::Other(rest.to_string()),
        });
    }

    if let Some(status) = Status::parse(word) {
        return Ok(Untagged::Status(StatusText::parse(status, tail)));
    }

    Ok(match word.to_ascii_uppercase().as_str() {
        "CAPABILITY" => Untagged::Capability(Capabilities::parse(tail)),
        "SEARCH" => Untagged::Search(
            tail.split_ascii_whitespace()
                .map(|n| n.parse().map_err(|_| malformed(rest)))
                .collect::<Result<_>>()?,
        ),
        "FLAGS" => Untagged::Flags(parenthesized(tail).unwrap_or_default()),
        _ => Untagged::Other(rest.to_string()),
    })
}

/// Extracts the FLAGS item from the first line of a FETCH response.
fn fetch_flags(line: &str) -> Option<Vec<String>> {
    let upper = line.to_ascii_uppercase();
    let start = upper.find("FLAGS (")? + "FLAGS ".len();
    parenthesized(&line[start..])
}

fn parenthesized(text: &str) -> Option<Vec<String>> {
    let inner = text.trim_start().strip_prefix('(')?;
    let end = inner.find(')')?;
    Some(inner[..end].split_ascii_whitespace().map(str::to_string).collect())
}

fn malformed(line: &str) -> Error {
    Error::Protocol(format!("malformed response: {line}"))
}
