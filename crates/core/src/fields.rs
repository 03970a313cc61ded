//! Text field accumulation with bracket expansion.
//!
//! Field names follow the HTML JSON form encoding conventions:
//! `pet[species]` nests into an object, `list[2]` into an array, `tags[]`
//! appends, and a repeated plain name turns into an array of values. Names
//! that do not parse are stored verbatim as a single key.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Array indices above this are treated as object keys, so a short field
/// name cannot force a huge allocation.
pub const MAX_ARRAY_INDEX: usize = 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Key {
    Name(String),
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Step {
    key: Key,
    append: bool,
}

impl Step {
    fn new(key: Key) -> Self {
        Self { key, append: false }
    }
}

/// Decoded non-file fields, in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldMap(Map<String, Value>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one `name=value` pair.
    pub fn append(&mut self, name: &str, value: &str) {
        let steps = parse_path(name);
        let mut root = Value::Object(std::mem::take(&mut self.0));
        apply(&mut root, &steps, value);
        if let Value::Object(map) = root {
            self.0 = map;
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn parse_path(name: &str) -> Vec<Step> {
    let verbatim = || vec![Step::new(Key::Name(name.to_string()))];

    let first_len = name.find('[').unwrap_or(name.len());
    if first_len == 0 {
        return verbatim();
    }

    let mut steps = vec![Step::new(Key::Name(name[..first_len].to_string()))];
    let mut rest = &name[first_len..];

    while !rest.is_empty() {
        if rest.starts_with("[]") {
            if rest.len() != 2 {
                return verbatim();
            }
            if let Some(tail) = steps.last_mut() {
                tail.append = true;
            }
            break;
        }
        if !rest.starts_with('[') {
            return verbatim();
        }
        let Some(close) = rest.find(']') else {
            return verbatim();
        };
        let inner = &rest[1..close];
        let key = if inner.bytes().all(|b| b.is_ascii_digit()) {
            match inner.parse::<usize>() {
                Ok(i) if i <= MAX_ARRAY_INDEX => Key::Index(i),
                _ => Key::Name(inner.to_string()),
            }
        } else {
            Key::Name(inner.to_string())
        };
        steps.push(Step::new(key));
        rest = &rest[close + 1..];
    }

    steps
}

fn apply(context: &mut Value, steps: &[Step], value: &str) {
    let Some((step, rest)) = steps.split_first() else {
        return;
    };
    let current = slot(context, &step.key);
    match rest.first() {
        None => set_last(current, step.append, value),
        Some(next) => {
            prepare(current, matches!(next.key, Key::Index(_)));
            apply(current, rest, value);
        }
    }
}

/// The value stored under `key` in a container, created as `Null` if absent.
fn slot<'a>(context: &'a mut Value, key: &Key) -> &'a mut Value {
    let converted = match (key, &mut *context) {
        (Key::Name(_), Value::Array(items)) => {
            Some(Value::Object(array_to_object(std::mem::take(items))))
        }
        _ => None,
    };
    if let Some(object) = converted {
        *context = object;
    }

    match (context, key) {
        (Value::Array(items), Key::Index(i)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Null);
            }
            &mut items[*i]
        }
        (Value::Object(map), key) => map.entry(key.to_string()).or_insert(Value::Null),
        (other, _) => other,
    }
}

fn set_last(current: &mut Value, append: bool, value: &str) {
    match &mut *current {
        Value::Null => {
            let value = Value::String(value.to_string());
            *current = if append { Value::Array(vec![value]) } else { value };
        }
        Value::Array(items) => items.push(Value::String(value.to_string())),
        Value::Object(map) => {
            let inner = map.entry(String::new()).or_insert(Value::Null);
            set_last(inner, false, value);
        }
        scalar => {
            let old = std::mem::take(scalar);
            *scalar = Value::Array(vec![old, Value::String(value.to_string())]);
        }
    }
}

/// Make `current` a container able to hold the next step.
fn prepare(current: &mut Value, next_is_array: bool) {
    let replacement = match &mut *current {
        Value::Null if next_is_array => Some(Value::Array(Vec::new())),
        Value::Null => Some(Value::Object(Map::new())),
        Value::Object(_) => None,
        Value::Array(_) if next_is_array => None,
        Value::Array(items) => Some(Value::Object(array_to_object(std::mem::take(items)))),
        scalar => {
            let mut map = Map::new();
            map.insert(String::new(), std::mem::take(scalar));
            Some(Value::Object(map))
        }
    };
    if let Some(value) = replacement {
        *current = value;
    }
}

fn array_to_object(items: Vec<Value>) -> Map<String, Value> {
    items
        .into_iter()
        .enumerate()
        .filter(|(_, item)| !item.is_null())
        .map(|(i, item)| (i.to_string(), item))
        .collect()
}
