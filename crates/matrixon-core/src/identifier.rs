// =============================================================================
// Matrixon Homeserver Core - Matrix Identifier Parsing
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   Parses the <sigil><localpart>[:<serverpart>] Matrix Common Identifier 
//   grammar shared by user, room, and event ids.
//
// Performance Targets:
//   • Regex compiled once per process via OnceLock
//
// Architecture:
//   • Sigil dispatch is a plain match, not a generic parser combinator
// =============================================================================

//! Matrix Common Identifier parsing (§4.4): `<sigil><localpart>[:<serverpart>]`.

use std::fmt;
use std::sync::OnceLock;

fn hostname_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^(\[[0-9a-fA-F:.]+\]|[0-9]{1,3}(\.[0-9]{1,3}){3}|[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*)$")
            .expect("hostname pattern is a valid regex")
    })
}

/// True if `host` looks like a DNS name, a literal IPv4 address, or a
/// bracketed literal IPv6 address.
pub fn is_valid_host(host: &str) -> bool {
    !host.is_empty() && hostname_pattern().is_match(host)
}

/// The leading character of a Common Identifier, or `None` for a bare
/// localpart accepted by legacy endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    User,
    Room,
    Event,
    Alias,
    GroupOrThird,
    None,
}

impl Sigil {
    fn from_char(c: char) -> Option<Sigil> {
        match c {
            '@' => Some(Sigil::User),
            '!' => Some(Sigil::Room),
            '$' => Some(Sigil::Event),
            '#' => Some(Sigil::Alias),
            '+' => Some(Sigil::GroupOrThird),
            _ => None,
        }
    }

    fn to_char(self) -> Option<char> {
        match self {
            Sigil::User => Some('@'),
            Sigil::Room => Some('!'),
            Sigil::Event => Some('$'),
            Sigil::Alias => Some('#'),
            Sigil::GroupOrThird => Some('+'),
            Sigil::None => None,
        }
    }
}

/// A parsed `hostname[:port]` server part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPart {
    pub host: String,
    pub port: Option<u16>,
}

/// A fully parsed Matrix Common Identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonId {
    pub sigil: Sigil,
    pub local: String,
    pub server: Option<ServerPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("empty identifier")]
    Empty,
    #[error("empty localpart")]
    EmptyLocal,
    #[error("empty server part")]
    EmptyServer,
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid host: {0}")]
    InvalidHost(String),
}

/// Parse a Common Identifier. A string with no recognized sigil is
/// treated as a bare localpart (`sigil = Sigil::None`), matching legacy
/// endpoints that accept a plain localpart.
pub fn parse(input: &str) -> Result<CommonId, IdentifierError> {
    if input.is_empty() {
        return Err(IdentifierError::Empty);
    }

    let mut chars = input.chars();
    let first = chars.next().expect("checked non-empty above");
    let (sigil, rest) = match Sigil::from_char(first) {
        Some(sigil) => (sigil, &input[first.len_utf8()..]),
        None => (Sigil::None, input),
    };

    let (local, server) = match rest.split_once(':') {
        Some((local, server)) => (local, Some(parse_server_part(server)?)),
        None => (rest, None),
    };

    if local.is_empty() {
        return Err(IdentifierError::EmptyLocal);
    }

    Ok(CommonId {
        sigil,
        local: local.to_string(),
        server,
    })
}

fn parse_server_part(input: &str) -> Result<ServerPart, IdentifierError> {
    if input.is_empty() {
        return Err(IdentifierError::EmptyServer);
    }
    let (host, port) = match input.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            let port: u16 = port
                .parse()
                .map_err(|_| IdentifierError::InvalidPort(port.to_string()))?;
            (host, Some(port))
        }
        _ => (input, None),
    };
    if !is_valid_host(host) {
        return Err(IdentifierError::InvalidHost(host.to_string()));
    }
    Ok(ServerPart {
        host: host.to_string(),
        port,
    })
}

impl fmt::Display for ServerPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Recompose a parsed identifier back into its string form. Round-trips
/// every well-formed input byte-for-byte: an omitted port stays omitted.
pub fn recompose(id: &CommonId) -> String {
    let mut out = String::new();
    if let Some(c) = id.sigil.to_char() {
        out.push(c);
    }
    out.push_str(&id.local);
    if let Some(server) = &id.server {
        out.push(':');
        out.push_str(&server.to_string());
    }
    out
}

/// Compare a parsed server part against a bare host string, normalizing
/// hostname case and substituting the default port (443 for https, 80
/// for http) when one side omits it.
pub fn server_part_equals(a: &ServerPart, host_string: &str, default_scheme_https: bool) -> bool {
    let b = match parse_server_part(host_string) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let default_port = if default_scheme_https { 443 } else { 80 };
    a.host.eq_ignore_ascii_case(&b.host) && a.port.unwrap_or(default_port) == b.port.unwrap_or(default_port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_user_id_with_server() {
        let id = parse("@alice:example.org").unwrap();
        assert_eq!(id.sigil, Sigil::User);
        assert_eq!(id.local, "alice");
        assert_eq!(id.server.unwrap().host, "example.org");
    }

    #[test]
    fn parses_a_server_with_port() {
        let id = parse("!roomid:example.org:8448").unwrap();
        let server = id.server.unwrap();
        assert_eq!(server.host, "example.org");
        assert_eq!(server.port, Some(8448));
    }

    #[test]
    fn accepts_bare_localparts() {
        let id = parse("alice").unwrap();
        assert_eq!(id.sigil, Sigil::None);
        assert_eq!(id.local, "alice");
        assert!(id.server.is_none());
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(parse(""), Err(IdentifierError::Empty));
    }

    #[test]
    fn rejects_empty_localpart() {
        assert_eq!(parse("@:example.org"), Err(IdentifierError::EmptyLocal));
    }

    #[test]
    fn recompose_round_trips_every_shape() {
        for input in [
            "@alice:example.org",
            "!roomid:example.org:8448",
            "$eventid:example.org",
            "#alias:example.org",
            "alice",
        ] {
            let id = parse(input).unwrap();
            assert_eq!(recompose(&id), input);
        }
    }

    #[test]
    fn server_part_equals_substitutes_default_https_port() {
        let a = parse_server_part("example.org").unwrap();
        assert!(server_part_equals(&a, "example.org:443", true));
        assert!(!server_part_equals(&a, "example.org:8448", true));
    }

    #[test]
    fn server_part_equals_is_case_insensitive_on_host() {
        let a = parse_server_part("Example.ORG:8448").unwrap();
        assert!(server_part_equals(&a, "example.org:8448", true));
    }

    #[test]
    fn rejects_a_host_with_invalid_characters() {
        let err = parse_server_part("exa mple.org").unwrap_err();
        assert!(matches!(err, IdentifierError::InvalidHost(_)));
    }

    #[test]
    fn accepts_ipv4_and_bracketed_ipv6_literals() {
        assert!(is_valid_host("192.168.0.1"));
        assert!(is_valid_host("[::1]"));
        assert!(!is_valid_host(""));
    }
}
