use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::ProtocolError;

const ABSOLUTE_FMT: &str = "%y%m%d%H%M%S";

/// A parsed request from a client, independent of the framing and control
/// byte that carried it (those are validated in `wire::frame` and at parse
/// time below, but don't otherwise affect the shape of this type).
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Get(GetSpec),
    Set(SetSpec),
    Del(DelSpec),
    Keys(KeysSpec),
    Clear,
}

impl Command {
    /// `set`/`del`/`clear` mutate the engine and must be applied in the
    /// order they arrive on one connection; `get`/`keys` may run
    /// concurrently with each other and with in-flight writes (spec §4.7).
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set(_) | Command::Del(_) | Command::Clear)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GetSpec {
    Keys(Vec<String>),
    Tag { pattern: String, tags: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DelSpec {
    Keys(Vec<String>),
    Tag { pattern: String, tags: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeysSpec {
    pub pattern: Option<String>,
    pub tags: Vec<String>,
}

/// One `set` request. The wire grammar allows batching several key/value
/// pairs under one shared policy in a single frame (spec §4.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetSpec {
    pub pairs: Vec<(String, Vec<u8>)>,
    pub absolute: Option<DateTime<Utc>>,
    pub sliding: Option<std::time::Duration>,
    pub notify: bool,
    pub tag: Option<String>,
    pub interned: bool,
}

fn tokenize(payload: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::MalformedCommand("payload is not valid utf-8".into()))?;
    Ok(text.split_ascii_whitespace().map(str::to_string).collect())
}

fn require_nonempty(key: &str) -> Result<(), ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

/// Parses a decoded frame payload into a `Command`. The control byte isn't
/// consulted here: tokenization is uniform across verbs, and the control
/// byte's job is purely to pin the wire shape of the reply (spec §4.2).
pub fn parse(payload: &[u8]) -> Result<Command, ProtocolError> {
    let tokens = tokenize(payload)?;
    let (verb, rest) = tokens
        .split_first()
        .ok_or_else(|| ProtocolError::MalformedCommand("empty command".into()))?;

    match verb.as_str() {
        "get" => parse_get(rest),
        "set" => parse_set(rest),
        "del" => parse_del(rest),
        "keys" => parse_keys(rest),
        "clear" => {
            if !rest.is_empty() {
                return Err(ProtocolError::MalformedCommand("clear takes no arguments".into()));
            }
            Ok(Command::Clear)
        },
        other => Err(ProtocolError::MalformedCommand(format!("unknown verb {other}"))),
    }
}

fn parse_get(rest: &[String]) -> Result<Command, ProtocolError> {
    // `get -t PATTERN TAG...` is distinguished from `get KEY...` by a
    // literal `-t` as the first token.
    if rest.first().map(String::as_str) == Some("-t") {
        let pattern = rest
            .get(1)
            .ok_or_else(|| ProtocolError::MalformedCommand("get -t missing pattern".into()))?
            .clone();
        let tags: Vec<String> = rest[2..].to_vec();
        if tags.is_empty() {
            return Err(ProtocolError::MalformedCommand("get -t requires at least one tag".into()));
        }
        return Ok(Command::Get(GetSpec::Tag { pattern, tags }));
    }

    if rest.is_empty() {
        return Err(ProtocolError::MalformedCommand("get requires at least one key".into()));
    }
    for k in rest {
        require_nonempty(k)?;
    }
    Ok(Command::Get(GetSpec::Keys(rest.to_vec())))
}

fn parse_del(rest: &[String]) -> Result<Command, ProtocolError> {
    // `del PATTERN -t TAG...` is distinguished from `del KEY...` by a
    // literal `-t` as the SECOND token, since the pattern occupies the
    // first slot.
    if rest.get(1).map(String::as_str) == Some("-t") {
        let pattern = rest[0].clone();
        let tags: Vec<String> = rest[2..].to_vec();
        if tags.is_empty() {
            return Err(ProtocolError::MalformedCommand("del -t requires at least one tag".into()));
        }
        return Ok(Command::Del(DelSpec::Tag { pattern, tags }));
    }

    if rest.is_empty() {
        return Err(ProtocolError::MalformedCommand("del requires at least one key".into()));
    }
    for k in rest {
        require_nonempty(k)?;
    }
    Ok(Command::Del(DelSpec::Keys(rest.to_vec())))
}

fn parse_keys(rest: &[String]) -> Result<Command, ProtocolError> {
    // `-t` may follow an optional leading PATTERN: `keys [PATTERN] [-t TAG...]`.
    if let Some(flag_idx) = rest.iter().position(|t| t == "-t") {
        let pattern = match flag_idx {
            0 => None,
            1 => Some(rest[0].clone()),
            _ => return Err(ProtocolError::MalformedCommand("keys takes at most one pattern".into())),
        };
        let tags: Vec<String> = rest[flag_idx + 1..].to_vec();
        if tags.is_empty() {
            return Err(ProtocolError::MalformedCommand("keys -t requires at least one tag".into()));
        }
        return Ok(Command::Keys(KeysSpec { pattern, tags }));
    }

    match rest.len() {
        0 => Ok(Command::Keys(KeysSpec { pattern: None, tags: Vec::new() })),
        1 => Ok(Command::Keys(KeysSpec { pattern: Some(rest[0].clone()), tags: Vec::new() })),
        _ => Err(ProtocolError::MalformedCommand("keys takes at most one pattern".into())),
    }
}

fn parse_set(rest: &[String]) -> Result<Command, ProtocolError> {
    let mut absolute = None;
    let mut sliding = None;
    let mut notify = false;
    let mut tag = None;
    let mut interned = false;
    let mut i = 0;

    // Flags come first, then alternating key/base64-value pairs.
    while i < rest.len() {
        match rest[i].as_str() {
            "-a" => {
                let raw = rest
                    .get(i + 1)
                    .ok_or_else(|| ProtocolError::MalformedCommand("-a requires a timestamp".into()))?;
                absolute = Some(parse_absolute(raw)?);
                i += 2;
            },
            "-s" => {
                let raw = rest
                    .get(i + 1)
                    .ok_or_else(|| ProtocolError::MalformedCommand("-s requires seconds".into()))?;
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| ProtocolError::MalformedCommand("-s requires an integer".into()))?;
                sliding = Some(std::time::Duration::from_secs(secs));
                i += 2;
            },
            "-c" => {
                notify = true;
                i += 1;
            },
            "-t" => {
                let t = rest
                    .get(i + 1)
                    .ok_or_else(|| ProtocolError::MalformedCommand("-t requires a tag".into()))?;
                tag = Some(t.clone());
                i += 2;
            },
            "-i" => {
                interned = true;
                i += 1;
            },
            _ => break,
        }
    }

    if absolute.is_some() && sliding.is_some() {
        return Err(ProtocolError::MalformedCommand(
            "set cannot combine -a and -s".into(),
        ));
    }
    if interned && (absolute.is_some() || sliding.is_some() || notify) {
        return Err(ProtocolError::MalformedCommand(
            "set -i cannot combine with -a, -s, or -c".into(),
        ));
    }

    let remainder = &rest[i..];
    if remainder.is_empty() || remainder.len() % 2 != 0 {
        return Err(ProtocolError::MalformedCommand(
            "set requires one or more key/value pairs".into(),
        ));
    }

    let mut pairs = Vec::with_capacity(remainder.len() / 2);
    for pair in remainder.chunks(2) {
        let key = &pair[0];
        require_nonempty(key)?;
        let value = BASE64.decode(pair[1].as_bytes()).map_err(|_| ProtocolError::BadBase64)?;
        if value.is_empty() {
            return Err(ProtocolError::InvalidArgument("value must not be empty".into()));
        }
        pairs.push((key.clone(), value));
    }

    Ok(Command::Set(SetSpec { pairs, absolute, sliding, notify, tag, interned }))
}

fn parse_absolute(raw: &str) -> Result<DateTime<Utc>, ProtocolError> {
    let naive = chrono::NaiveDateTime::parse_from_str(raw, ABSOLUTE_FMT)
        .map_err(|_| ProtocolError::InvalidArgument(format!("bad timestamp {raw}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub fn format_absolute(at: &DateTime<Utc>) -> String {
    at.format(ABSOLUTE_FMT).to_string()
}

/// Encodes a `set` request body, for use by the client façade.
pub fn encode_set(spec: &SetSpec) -> Bytes {
    let mut out = String::from("set");
    if let Some(at) = &spec.absolute {
        out.push_str(" -a ");
        out.push_str(&format_absolute(at));
    }
    if let Some(ttl) = &spec.sliding {
        out.push_str(" -s ");
        out.push_str(&ttl.as_secs().to_string());
    }
    if spec.notify {
        out.push_str(" -c");
    }
    if let Some(tag) = &spec.tag {
        out.push_str(" -t ");
        out.push_str(tag);
    }
    if spec.interned {
        out.push_str(" -i");
    }
    for (key, value) in &spec.pairs {
        out.push(' ');
        out.push_str(key);
        out.push(' ');
        out.push_str(&BASE64.encode(value));
    }
    Bytes::from(out.into_bytes())
}

pub fn encode_get(spec: &GetSpec) -> Bytes {
    let mut out = String::from("get");
    match spec {
        GetSpec::Keys(keys) => {
            for k in keys {
                out.push(' ');
                out.push_str(k);
            }
        },
        GetSpec::Tag { pattern, tags } => {
            out.push_str(" -t ");
            out.push_str(pattern);
            for t in tags {
                out.push(' ');
                out.push_str(t);
            }
        },
    }
    Bytes::from(out.into_bytes())
}

pub fn encode_del(spec: &DelSpec) -> Bytes {
    let mut out = String::from("del");
    match spec {
        DelSpec::Keys(keys) => {
            for k in keys {
                out.push(' ');
                out.push_str(k);
            }
        },
        DelSpec::Tag { pattern, tags } => {
            out.push(' ');
            out.push_str(pattern);
            out.push_str(" -t");
            for t in tags {
                out.push(' ');
                out.push_str(t);
            }
        },
    }
    Bytes::from(out.into_bytes())
}

pub fn encode_keys(spec: &KeysSpec) -> Bytes {
    let mut out = String::from("keys");
    if let Some(pattern) = &spec.pattern {
        out.push(' ');
        out.push_str(pattern);
    }
    if !spec.tags.is_empty() {
        out.push_str(" -t");
        for t in &spec.tags {
            out.push(' ');
            out.push_str(t);
        }
    }
    Bytes::from(out.into_bytes())
}

/// A `get` reply: base64-encoded values space-separated, in request order
/// with absent keys omitted (spec §4.2 — the reply carries no key names;
/// the caller matches values back up using the keys it asked for, modulo
/// omissions).
pub fn encode_value_list(values: &[Vec<u8>]) -> Bytes {
    let mut out = BytesMut::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b" ");
        }
        out.extend_from_slice(BASE64.encode(value).as_bytes());
    }
    out.freeze()
}

pub fn decode_value_list(payload: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    tokenize(payload)?
        .iter()
        .map(|tok| BASE64.decode(tok.as_bytes()).map_err(|_| ProtocolError::BadBase64))
        .collect()
}

pub fn encode_keylist(keys: &[String]) -> Bytes {
    Bytes::from(keys.join(" ").into_bytes())
}

pub fn decode_keylist(payload: &[u8]) -> Result<Vec<String>, ProtocolError> {
    tokenize(payload)
}

/// A host-originated, unprompted notification that `key` left the cache
/// (correlation id 0; spec §4.1, §5).
pub fn encode_expire_notification(key: &str) -> Bytes {
    Bytes::from(format!("expire {key}").into_bytes())
}

pub fn decode_expire_notification(payload: &[u8]) -> Result<String, ProtocolError> {
    let tokens = tokenize(payload)?;
    if tokens.len() != 2 || tokens[0] != "expire" {
        return Err(ProtocolError::MalformedCommand("malformed expire notification".into()));
    }
    Ok(tokens[1].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_get() {
        let cmd = parse(b"get foo bar").unwrap();
        assert_eq!(cmd, Command::Get(GetSpec::Keys(vec!["foo".into(), "bar".into()])));
    }

    #[test]
    fn parses_tagged_get() {
        let cmd = parse(b"get -t user:.* admin").unwrap();
        assert_eq!(
            cmd,
            Command::Get(GetSpec::Tag { pattern: "user:.*".into(), tags: vec!["admin".into()] })
        );
    }

    #[test]
    fn parses_tagged_del() {
        let cmd = parse(b"del user:.* -t admin stale").unwrap();
        assert_eq!(
            cmd,
            Command::Del(DelSpec::Tag {
                pattern: "user:.*".into(),
                tags: vec!["admin".into(), "stale".into()]
            })
        );
    }

    #[test]
    fn parses_set_with_flags() {
        let value = BASE64.encode(b"hello");
        let payload = format!("set -s 30 -c -t mytag foo {value}");
        let cmd = parse(payload.as_bytes()).unwrap();
        match cmd {
            Command::Set(spec) => {
                assert_eq!(spec.sliding, Some(std::time::Duration::from_secs(30)));
                assert!(spec.notify);
                assert_eq!(spec.tag.as_deref(), Some("mytag"));
                assert_eq!(spec.pairs, vec![("foo".to_string(), b"hello".to_vec())]);
            },
            _ => panic!("expected Set"),
        }
    }

    #[test]
    fn rejects_interned_with_notify() {
        let value = BASE64.encode(b"hello");
        let payload = format!("set -i -c foo {value}");
        let err = parse(payload.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedCommand(_)));
    }

    #[test]
    fn rejects_empty_value() {
        let payload = "set foo ".to_string();
        let err = parse(payload.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedCommand(_)));
    }

    #[test]
    fn round_trips_value_list_encoding() {
        let values = vec![vec![1, 2, 3], vec![4, 5]];
        let encoded = encode_value_list(&values);
        let decoded = decode_value_list(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trips_expire_notification() {
        let encoded = encode_expire_notification("user:1");
        assert_eq!(decode_expire_notification(&encoded).unwrap(), "user:1");
    }

    #[test]
    fn parses_keys_with_no_args() {
        assert_eq!(
            parse(b"keys").unwrap(),
            Command::Keys(KeysSpec { pattern: None, tags: Vec::new() })
        );
    }

    #[test]
    fn parses_keys_with_pattern_and_tags() {
        assert_eq!(
            parse(b"keys user:.* -t admin stale").unwrap(),
            Command::Keys(KeysSpec {
                pattern: Some("user:.*".into()),
                tags: vec!["admin".into(), "stale".into()]
            })
        );
    }
}
