use bytes::Bytes;

use crate::engine::Engine;
use crate::error::ProtocolError;
use crate::types::Policy;
use crate::types::entry::SubscriberId;
use crate::wire::command::{self, Command, DelSpec, GetSpec};

/// Parses one command payload and applies it to the engine, returning the
/// reply payload for verbs that have one (`get`, `keys`) or `None` for
/// verbs that don't (spec §4.7).
pub fn handle(
    engine: &Engine,
    subscriber: SubscriberId,
    payload: &[u8],
) -> Result<Option<Bytes>, ProtocolError> {
    dispatch(engine, subscriber, command::parse(payload)?)
}

/// Applies an already-parsed command to the engine. Split out from `handle`
/// so the host session loop can parse a frame once, then decide whether to
/// run it inline (writes, to preserve per-connection ordering) or spawned
/// (reads, which may run concurrently) without parsing twice.
pub fn dispatch(
    engine: &Engine,
    subscriber: SubscriberId,
    command: Command,
) -> Result<Option<Bytes>, ProtocolError> {
    match command {
        Command::Get(spec) => {
            let keys = resolve_get_keys(engine, spec)?;
            let values: Vec<Vec<u8>> =
                keys.iter().filter_map(|k| engine.get(k)).map(|v| v.to_vec()).collect();
            Ok(Some(command::encode_value_list(&values)))
        },
        Command::Set(spec) => {
            let policy = if spec.interned {
                Policy::Interned
            } else if let Some(at) = spec.absolute {
                Policy::AbsoluteAt(at)
            } else if let Some(ttl) = spec.sliding {
                Policy::Sliding(ttl)
            } else {
                Policy::NoExpiration
            };

            for (key, value) in spec.pairs {
                engine.add(key, Bytes::from(value), policy.clone(), spec.tag.clone(), spec.notify, Some(subscriber));
            }
            Ok(None)
        },
        Command::Del(spec) => {
            let keys = match spec {
                DelSpec::Keys(keys) => keys,
                DelSpec::Tag { pattern, tags } => engine.select_keys(Some(&pattern), &tags)?,
            };
            for key in keys {
                engine.remove(&key);
            }
            Ok(None)
        },
        Command::Keys(spec) => {
            let keys = engine.select_keys(spec.pattern.as_deref(), &spec.tags)?;
            Ok(Some(command::encode_keylist(&keys)))
        },
        Command::Clear => {
            engine.clear();
            Ok(None)
        },
    }
}

fn resolve_get_keys(engine: &Engine, spec: GetSpec) -> Result<Vec<String>, ProtocolError> {
    match spec {
        GetSpec::Keys(keys) => Ok(keys),
        GetSpec::Tag { pattern, tags } => engine.select_keys(Some(&pattern), &tags),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    #[test]
    fn set_then_get_round_trips() {
        let (engine, _rx) = Engine::new(0.0, None);
        handle(&engine, 1, b"set foo aGVsbG8=").unwrap();
        let reply = handle(&engine, 1, b"get foo").unwrap().unwrap();
        assert_eq!(command::decode_value_list(&reply).unwrap(), vec![b"hello".to_vec()]);
    }

    #[test]
    fn keys_lists_live_entries() {
        let (engine, _rx) = Engine::new(0.0, None);
        handle(&engine, 1, b"set foo aGVsbG8=").unwrap();
        let reply = handle(&engine, 1, b"keys").unwrap().unwrap();
        assert_eq!(command::decode_keylist(&reply).unwrap(), vec!["foo".to_string()]);
    }

    #[test]
    fn clear_drops_everything() {
        let (engine, _rx) = Engine::new(0.0, None);
        handle(&engine, 1, b"set foo aGVsbG8=").unwrap();
        handle(&engine, 1, b"clear").unwrap();
        let reply = handle(&engine, 1, b"keys").unwrap().unwrap();
        assert!(reply.is_empty());
    }
}
