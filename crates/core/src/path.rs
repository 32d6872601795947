//! Field paths addressing nodes inside a document tree.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::PathError;

/// A path of map keys / sequence indices from the document root.
///
/// The dotted form (`metadata.labels`) is what configs and name resolvers use;
/// [`FieldPath::to_pointer`] renders the RFC 6901 form used in patches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root() -> Self { Self(Vec::new()) }

    /// Parse a dotted path. The empty string is the root.
    pub fn parse(dotted: &str) -> Self {
        let s = dotted.strip_prefix('.').unwrap_or(dotted);
        if s.is_empty() { return Self::root(); }
        Self(s.split('.').map(str::to_string).collect())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse an RFC 6901 pointer (`""` or `/a/b~1c`).
    pub fn from_pointer(pointer: &str) -> Option<Self> {
        if pointer.is_empty() { return Some(Self::root()); }
        let rest = pointer.strip_prefix('/')?;
        Some(Self(rest.split('/').map(|s| s.replace("~1", "/").replace("~0", "~")).collect()))
    }

    pub fn segments(&self) -> &[String] { &self.0 }
    pub fn is_root(&self) -> bool { self.0.is_empty() }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut next = self.0.clone();
        next.push(segment.into());
        Self(next)
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool { self.0.starts_with(&prefix.0) }

    pub fn to_pointer(&self) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            out.push('/');
            out.push_str(&escape_segment(seg));
        }
        out
    }

    /// Node at this path, if present.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut cur = root;
        for seg in &self.0 {
            cur = match cur {
                Value::Object(map) => map.get(seg)?,
                Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut cur = root;
        for seg in &self.0 {
            cur = match cur {
                Value::Object(map) => map.get_mut(seg)?,
                Value::Array(items) => items.get_mut(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Set the node at this path, creating intermediate maps (and replacing
    /// `null` placeholders) along the way. Sequence segments must address an
    /// existing element or the position right after the last one.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        let Some((last, parents)) = self.0.split_last() else {
            *root = value;
            return Ok(());
        };
        let mut cur = root;
        for seg in parents {
            if cur.is_null() { *cur = Value::Object(Map::new()); }
            cur = match cur {
                Value::Object(map) => map.entry(seg.clone()).or_insert_with(|| Value::Object(Map::new())),
                Value::Array(items) => {
                    let idx = self.index(seg)?;
                    items.get_mut(idx).ok_or_else(|| PathError::OutOfBounds { path: self.to_string(), index: idx })?
                }
                _ => return Err(PathError::NotAContainer { path: self.to_string() }),
            };
        }
        if cur.is_null() { *cur = Value::Object(Map::new()); }
        match cur {
            Value::Object(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::Array(items) => {
                let idx = self.index(last)?;
                if idx < items.len() {
                    items[idx] = value;
                } else if idx == items.len() {
                    items.push(value);
                } else {
                    return Err(PathError::OutOfBounds { path: self.to_string(), index: idx });
                }
                Ok(())
            }
            _ => Err(PathError::NotAContainer { path: self.to_string() }),
        }
    }

    /// Remove and return the node at this path. Removing the root is not
    /// supported and yields `None`.
    pub fn remove(&self, root: &mut Value) -> Option<Value> {
        let (last, parents) = self.0.split_last()?;
        let parent = FieldPath(parents.to_vec()).get_mut(root)?;
        match parent {
            Value::Object(map) => map.remove(last),
            Value::Array(items) => {
                let idx = last.parse::<usize>().ok()?;
                (idx < items.len()).then(|| items.remove(idx))
            }
            _ => None,
        }
    }

    fn index(&self, seg: &str) -> Result<usize, PathError> {
        seg.parse::<usize>().map_err(|_| PathError::BadIndex { path: self.to_string(), segment: seg.to_string() })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0.join(".")) }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self { FieldPath::parse(s) }
}

pub(crate) fn escape_segment(seg: &str) -> std::borrow::Cow<'_, str> {
    if seg.contains('~') || seg.contains('/') {
        std::borrow::Cow::Owned(seg.replace('~', "~0").replace('/', "~1"))
    } else {
        std::borrow::Cow::Borrowed(seg)
    }
}
