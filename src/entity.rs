use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::command::CmdLine;

/// The value stored at a key.
///
/// The keyspace core never looks inside the payloads: it reports the
/// discriminator for TYPE and re-serializes a payload into the command
/// line that would recreate it (undo pre-images, AOF rewriting). All
/// richer operations belong to the data-structure command layers.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    String(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    ZSet(BTreeMap<Vec<u8>, f64>),
}

impl Entity {
    pub fn type_name(&self) -> &'static str {
        match self {
            Entity::String(_) => "string",
            Entity::List(_) => "list",
            Entity::Hash(_) => "hash",
            Entity::Set(_) => "set",
            Entity::ZSet(_) => "zset",
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Entity::String(data) => Some(data),
            _ => None,
        }
    }

    /// The command line that recreates this entity under `key`.
    pub fn to_cmdline(&self, key: &[u8]) -> CmdLine {
        let mut line: CmdLine = Vec::new();
        match self {
            Entity::String(data) => {
                line.push(b"SET".to_vec());
                line.push(key.to_vec());
                line.push(data.clone());
            }
            Entity::List(items) => {
                line.push(b"RPUSH".to_vec());
                line.push(key.to_vec());
                line.extend(items.iter().cloned());
            }
            Entity::Hash(fields) => {
                line.push(b"HSET".to_vec());
                line.push(key.to_vec());
                for (field, value) in fields {
                    line.push(field.clone());
                    line.push(value.clone());
                }
            }
            Entity::Set(members) => {
                line.push(b"SADD".to_vec());
                line.push(key.to_vec());
                line.extend(members.iter().cloned());
            }
            Entity::ZSet(members) => {
                line.push(b"ZADD".to_vec());
                line.push(key.to_vec());
                for (member, score) in members {
                    line.push(score.to_string().into_bytes());
                    line.push(member.clone());
                }
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_discriminators() {
        assert_eq!(Entity::String(b"v".to_vec()).type_name(), "string");
        assert_eq!(Entity::List(VecDeque::new()).type_name(), "list");
        assert_eq!(Entity::Hash(HashMap::new()).type_name(), "hash");
        assert_eq!(Entity::Set(HashSet::new()).type_name(), "set");
        assert_eq!(Entity::ZSet(BTreeMap::new()).type_name(), "zset");
    }

    #[test]
    fn string_reserializes_as_set() {
        let entity = Entity::String(b"value".to_vec());
        assert_eq!(
            entity.to_cmdline(b"k"),
            vec![b"SET".to_vec(), b"k".to_vec(), b"value".to_vec()]
        );
    }

    #[test]
    fn list_reserializes_in_order() {
        let entity = Entity::List(VecDeque::from(vec![b"a".to_vec(), b"b".to_vec()]));
        assert_eq!(
            entity.to_cmdline(b"l"),
            vec![
                b"RPUSH".to_vec(),
                b"l".to_vec(),
                b"a".to_vec(),
                b"b".to_vec()
            ]
        );
    }

    #[test]
    fn zset_reserializes_score_member_pairs() {
        let mut members = BTreeMap::new();
        members.insert(b"alice".to_vec(), 1.5);
        let entity = Entity::ZSet(members);
        assert_eq!(
            entity.to_cmdline(b"z"),
            vec![
                b"ZADD".to_vec(),
                b"z".to_vec(),
                b"1.5".to_vec(),
                b"alice".to_vec()
            ]
        );
    }
}
