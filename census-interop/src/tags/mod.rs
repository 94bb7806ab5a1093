// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Tags are key/value string pairs propagated alongside a request to label it,
//! for example as metrics dimensions. A [`TagContext`] is an immutable set of
//! tags with unique keys; equality ignores insertion order.

use faststr::FastStr;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

pub use binary::{BinaryFormat, TagContextBinarySerializer, TagContextError};

mod binary;

/// Longest allowed key or value, in bytes.
pub const MAX_LENGTH: usize = 255;

/// Tag key of the operation the caller performs.
pub const OPERATION_KEY: &str = "operation";
/// Tag key of the project the caller belongs to.
pub const PROJECT_KEY: &str = "project";
/// Tag key carrying the full name of the invoked RPC method.
pub const METHOD_KEY: &str = "method";

/// Invalid tag key or value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    /// Keys must not be empty.
    #[error("tag key is empty")]
    EmptyKey,
    /// Keys and values are capped at [`MAX_LENGTH`] bytes.
    #[error("tag {0} is longer than {MAX_LENGTH} bytes: {1} bytes")]
    TooLong(&'static str, usize),
    /// Only printable ASCII is allowed.
    #[error("tag {0} contains a non-printable character: {1:?}")]
    NonPrintable(&'static str, String),
}

fn validate(kind: &'static str, s: &str) -> Result<(), TagError> {
    if s.len() > MAX_LENGTH {
        return Err(TagError::TooLong(kind, s.len()));
    }
    if !s.bytes().all(|b| (b' '..=b'~').contains(&b)) {
        return Err(TagError::NonPrintable(kind, s.to_owned()));
    }
    Ok(())
}

/// A validated tag key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagKey(FastStr);

impl TagKey {
    /// Creates a key, rejecting empty, overlong or non-printable input.
    pub fn new(name: impl Into<FastStr>) -> Result<Self, TagError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TagError::EmptyKey);
        }
        validate("key", &name)?;
        Ok(Self(name))
    }

    /// Wraps a constant known to be a valid key.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(!name.is_empty() && validate("key", name).is_ok());
        Self(FastStr::from_static_str(name))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A validated tag value. May be empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TagValue(FastStr);

impl TagValue {
    /// Creates a value, rejecting overlong or non-printable input.
    pub fn new(value: impl Into<FastStr>) -> Result<Self, TagError> {
        let value = value.into();
        validate("value", &value)?;
        Ok(Self(value))
    }

    /// Wraps a constant known to be a valid value.
    pub(crate) fn from_static(value: &'static str) -> Self {
        debug_assert!(validate("value", value).is_ok());
        Self(FastStr::from_static_str(value))
    }

    /// The value as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialOrd for TagKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for TagKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl Borrow<str> for TagKey {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single key/value pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// tag key
    pub key: TagKey,
    /// tag value
    pub value: TagValue,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag{{key={}, value={}}}", self.key, self.value)
    }
}

/// An immutable set of tags with unique keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagContext {
    tags: BTreeMap<TagKey, TagValue>,
}

impl TagContext {
    /// The empty context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts a builder from an empty context.
    pub fn builder() -> TagContextBuilder {
        TagContextBuilder::default()
    }

    /// Starts a builder seeded with the tags of this context.
    pub fn to_builder(&self) -> TagContextBuilder {
        TagContextBuilder { tags: self.tags.clone() }
    }

    /// Looks up the value for `key`.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns true if the context has no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterates tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TagKey, &TagValue)> {
        self.tags.iter()
    }

    /// Copies the tags out, in key order.
    pub fn to_tags(&self) -> Vec<Tag> {
        self.tags.iter().map(|(key, value)| Tag { key: key.clone(), value: value.clone() }).collect()
    }
}

impl fmt::Display for TagContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, tag) in self.to_tags().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{tag}")?;
        }
        f.write_str("]")
    }
}

/// Builds a [`TagContext`]. Putting an existing key replaces its value.
#[derive(Clone, Debug, Default)]
pub struct TagContextBuilder {
    tags: BTreeMap<TagKey, TagValue>,
}

impl TagContextBuilder {
    /// Adds or replaces a tag.
    pub fn put(mut self, key: TagKey, value: TagValue) -> Self {
        self.tags.insert(key, value);
        self
    }

    /// Validates and adds a tag from raw strings.
    pub fn put_str(self, key: impl Into<FastStr>, value: impl Into<FastStr>) -> Result<Self, TagError> {
        Ok(self.put(TagKey::new(key)?, TagValue::new(value)?))
    }

    /// Removes a tag, if present.
    pub fn remove(mut self, key: &TagKey) -> Self {
        self.tags.remove(key);
        self
    }

    /// Finishes the context.
    pub fn build(self) -> TagContext {
        TagContext { tags: self.tags }
    }
}
