//! Serialization of `Value`s into `CapData`: a JSON body plus the list of
//! identities it names.
//!
//! The body is `#` followed by JSON. Object references become `"$<n>"`,
//! where `n` indexes `slots`; a string that itself starts with `$`, `!` or
//! `#` gets one extra leading `!`. Each distinct vref appears in `slots`
//! once, in first-use order.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use crate::error::{VatError, VatResult};
use crate::object::{ObjectRef, Value};

const BODY_PREFIX: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapData {
    pub body: String,
    pub slots: Vec<String>,
}

impl CapData {
    /// What the size policy counts.
    pub fn size(&self) -> usize {
        self.body.len() + self.slots.iter().map(String::len).sum::<usize>()
    }
}

/// The identity table a serializer consults. The vat implements this; tests
/// may supply their own.
pub trait SlotConverter {
    fn val_to_slot(&self, obj: &ObjectRef) -> VatResult<String>;
    fn slot_to_val(&self, vref: &str) -> VatResult<ObjectRef>;
}

pub fn serialize(value: &Value, conv: &dyn SlotConverter) -> VatResult<CapData> {
    let mut slots = IndexSet::new();
    let json = encode(value, conv, &mut slots)?;
    Ok(CapData {
        body: format!("{BODY_PREFIX}{json}"),
        slots: slots.into_iter().collect(),
    })
}

pub fn deserialize(data: &CapData, conv: &dyn SlotConverter) -> VatResult<Value> {
    let json = data
        .body
        .strip_prefix(BODY_PREFIX)
        .ok_or_else(|| VatError::Marshal(format!("unrecognized body {:?}", data.body)))?;
    let json: Json = serde_json::from_str(json)?;
    decode(&json, &data.slots, conv)
}

fn encode(
    value: &Value,
    conv: &dyn SlotConverter,
    slots: &mut IndexSet<String>,
) -> VatResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Str(s) => {
            if s.starts_with(['$', '!', '#']) {
                Json::String(format!("!{s}"))
            } else {
                Json::String(s.clone())
            }
        }
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|v| encode(v, conv, slots))
                .collect::<VatResult<_>>()?,
        ),
        Value::Record(fields) => {
            let mut map = Map::new();
            for (k, v) in fields {
                map.insert(k.clone(), encode(v, conv, slots)?);
            }
            Json::Object(map)
        }
        Value::Object(obj) => {
            let (index, _) = slots.insert_full(conv.val_to_slot(obj)?);
            Json::String(format!("${index}"))
        }
    })
}

fn decode(json: &Json, slots: &[String], conv: &dyn SlotConverter) -> VatResult<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Int(
            n.as_i64()
                .ok_or_else(|| VatError::Marshal(format!("unsupported number {n}")))?,
        ),
        Json::String(s) => {
            if let Some(escaped) = s.strip_prefix('!') {
                Value::Str(escaped.to_owned())
            } else if let Some(index) = s.strip_prefix('$') {
                let vref = index
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| slots.get(i))
                    .ok_or_else(|| VatError::Marshal(format!("bad slot reference {s:?}")))?;
                Value::Object(conv.slot_to_val(vref)?)
            } else {
                Value::Str(s.clone())
            }
        }
        Json::Array(items) => Value::List(
            items
                .iter()
                .map(|v| decode(v, slots, conv))
                .collect::<VatResult<_>>()?,
        ),
        Json::Object(map) => {
            let mut fields = IndexMap::with_capacity(map.len());
            for (k, v) in map {
                fields.insert(k.clone(), decode(v, slots, conv)?);
            }
            Value::Record(fields)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Presence, Remotable};
    use std::cell::RefCell;

    /// Hands out import vrefs for presences and `o+N` for remotables.
    #[derive(Default)]
    struct Table {
        remotables: RefCell<Vec<Remotable>>,
    }

    impl SlotConverter for Table {
        fn val_to_slot(&self, obj: &ObjectRef) -> VatResult<String> {
            match obj {
                ObjectRef::Presence(p) => Ok(p.vref().to_owned()),
                ObjectRef::Remotable(r) => {
                    let mut table = self.remotables.borrow_mut();
                    let index = match table.iter().position(|x| ObjectRef::from(x.clone()) == *obj) {
                        Some(i) => i,
                        None => {
                            table.push(r.clone());
                            table.len() - 1
                        }
                    };
                    Ok(format!("o+{index}"))
                }
                _ => Err(VatError::Marshal("not in table".to_owned())),
            }
        }

        fn slot_to_val(&self, vref: &str) -> VatResult<ObjectRef> {
            if let Some(i) = vref.strip_prefix("o+") {
                let i: usize = i.parse().map_err(|_| VatError::Marshal(vref.to_owned()))?;
                return Ok(self.remotables.borrow()[i].clone().into());
            }
            Ok(Presence::new(vref).into())
        }
    }

    #[test]
    fn strings_that_look_like_refs_are_escaped() {
        let table = Table::default();
        let value = Value::List(vec!["$0".into(), "!bang".into(), "plain".into()]);
        let data = serialize(&value, &table).unwrap();
        assert_eq!(data.body, r##"#["!$0","!!bang","plain"]"##);
        assert!(data.slots.is_empty());
        assert_eq!(deserialize(&data, &table).unwrap(), value);
    }

    #[test]
    fn repeated_references_share_a_slot() {
        let table = Table::default();
        let r = Remotable::new("counter");
        let p = Presence::new("o-5");
        let value = Value::record([
            ("a", Value::from(r.clone())),
            ("b", Value::from(p)),
            ("c", Value::from(r.clone())),
        ]);
        let data = serialize(&value, &table).unwrap();
        assert_eq!(data.slots, vec!["o+0".to_owned(), "o-5".to_owned()]);
        assert_eq!(data.body, r##"#{"a":"$0","b":"$1","c":"$0"}"##);

        let back = deserialize(&data, &table).unwrap();
        match back {
            Value::Record(fields) => {
                assert_eq!(fields["a"], Value::from(r));
                assert_eq!(fields["b"].as_object().and_then(|o| o.vref_key()).as_deref(), Some("o-5"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let table = Table::default();
        let no_prefix = CapData {
            body: "[1]".to_owned(),
            slots: vec![],
        };
        assert!(matches!(deserialize(&no_prefix, &table), Err(VatError::Marshal(_))));
        let dangling = CapData {
            body: r#"#"$3""#.to_owned(),
            slots: vec![],
        };
        assert!(matches!(deserialize(&dangling, &table), Err(VatError::Marshal(_))));
        let float = CapData {
            body: "#1.5".to_owned(),
            slots: vec![],
        };
        assert!(deserialize(&float, &table).is_err());
    }
}
