//! Generic ordered document tree
//!
//! Every format store converts its native syntax into this representation:
//! ```text
//! TreeBranch = [TreeItem { key, value }, ...]   (ordered, keys unique)
//! Value      = Null | Scalar | TreeBranch | [Value, ...]
//! Scalar     = Str | Int(i64) | Float(f64) | Bool
//! ```
//!
//! Item order is preserved end-to-end: it drives both the MAC input order and
//! the order a store writes the document back out in.

use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};

use crate::error::TreesealError;

/// Type tag of a scalar leaf, persisted next to its ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Str,
    Int,
    Float,
    Bool,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Str => "str",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
        }
    }
}

impl FromStr for ScalarKind {
    type Err = TreesealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" => Ok(ScalarKind::Str),
            "int" => Ok(ScalarKind::Int),
            "float" => Ok(ScalarKind::Float),
            "bool" => Ok(ScalarKind::Bool),
            other => Err(TreesealError::Parse(format!("unknown scalar type: {other:?}"))),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Str(_) => ScalarKind::Str,
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::Float(_) => ScalarKind::Float,
            Scalar::Bool(_) => ScalarKind::Bool,
        }
    }

    /// Canonical text form, the bytes that get encrypted and MAC'd.
    ///
    /// Floats use Rust's shortest round-trip representation.
    pub fn to_plaintext(&self) -> String {
        match self {
            Scalar::Str(s) => s.clone(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }

    /// Inverse of [`Scalar::to_plaintext`]. Returns `None` when `text` is not
    /// a valid value of `kind`.
    pub fn from_plaintext(kind: ScalarKind, text: &str) -> Option<Self> {
        match kind {
            ScalarKind::Str => Some(Scalar::Str(text.to_owned())),
            ScalarKind::Int => text.parse().ok().map(Scalar::Int),
            ScalarKind::Float => text.parse().ok().map(Scalar::Float),
            ScalarKind::Bool => match text {
                "true" => Some(Scalar::Bool(true)),
                "false" => Some(Scalar::Bool(false)),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Native null. Never encrypted, still covered by the MAC.
    Null,
    Scalar(Scalar),
    Branch(TreeBranch),
    Sequence(Vec<Value>),
}

impl Value {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Value::Null | Value::Scalar(_))
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_branch(&self) -> Option<&TreeBranch> {
        match self {
            Value::Branch(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::Str(s.to_owned()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::Str(s))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Scalar(Scalar::Int(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Scalar(Scalar::Float(f))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<TreeBranch> for Value {
    fn from(b: TreeBranch) -> Self {
        Value::Branch(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Sequence(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeItem {
    pub key: String,
    pub value: Value,
}

/// An ordered mapping with unique keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeBranch {
    items: Vec<TreeItem>,
}

impl TreeBranch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced item keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.items.iter_mut().find(|item| item.key == key) {
            Some(item) => Some(std::mem::replace(&mut item.value, value)),
            None => {
                self.items.push(TreeItem { key, value });
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.iter().find(|i| i.key == key).map(|i| &i.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.items
            .iter_mut()
            .find(|i| i.key == key)
            .map(|i| &mut i.value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.items.iter().position(|i| i.key == key)?;
        Some(self.items.remove(pos).value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.iter().any(|i| i.key == key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TreeItem> {
        self.items.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up the value at `path`. The root path addresses no value.
    pub fn get_path(&self, path: &TreePath) -> Option<&Value> {
        let mut segments = path.segments().iter();
        let first = match segments.next()? {
            PathSegment::Key(k) => self.get(k)?,
            PathSegment::Index(_) => return None,
        };
        segments.try_fold(first, |value, segment| match (value, segment) {
            (Value::Branch(b), PathSegment::Key(k)) => b.get(k),
            (Value::Sequence(s), PathSegment::Index(i)) => s.get(*i),
            _ => None,
        })
    }

    /// Visit every leaf (null or scalar) depth-first in document order.
    pub fn for_each_leaf<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&TreePath, &'a Value),
    {
        visit_branch(self, &TreePath::root(), f);
    }

    /// Paths of every leaf, in traversal order.
    pub fn leaf_paths(&self) -> Vec<TreePath> {
        let mut paths = Vec::new();
        self.for_each_leaf(&mut |path, _| paths.push(path.clone()));
        paths
    }

    /// Build a new tree with the same shape, replacing every leaf with the
    /// output of `f`. Leaves are visited in the same order as
    /// [`TreeBranch::for_each_leaf`]; the first error aborts the walk.
    pub fn map_leaves<E, F>(&self, f: &mut F) -> Result<TreeBranch, E>
    where
        F: FnMut(&TreePath, &Value) -> Result<Value, E>,
    {
        map_branch(self, &TreePath::root(), f)
    }
}

fn visit_branch<'a, F>(branch: &'a TreeBranch, path: &TreePath, f: &mut F)
where
    F: FnMut(&TreePath, &'a Value),
{
    for item in &branch.items {
        visit_value(&item.value, &path.child_key(&item.key), f);
    }
}

fn visit_value<'a, F>(value: &'a Value, path: &TreePath, f: &mut F)
where
    F: FnMut(&TreePath, &'a Value),
{
    match value {
        Value::Branch(b) => visit_branch(b, path, f),
        Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                visit_value(v, &path.child_index(i), f);
            }
        }
        leaf => f(path, leaf),
    }
}

fn map_branch<E, F>(branch: &TreeBranch, path: &TreePath, f: &mut F) -> Result<TreeBranch, E>
where
    F: FnMut(&TreePath, &Value) -> Result<Value, E>,
{
    let mut items = Vec::with_capacity(branch.items.len());
    for item in &branch.items {
        let value = map_value(&item.value, &path.child_key(&item.key), f)?;
        items.push(TreeItem {
            key: item.key.clone(),
            value,
        });
    }
    Ok(TreeBranch { items })
}

fn map_value<E, F>(value: &Value, path: &TreePath, f: &mut F) -> Result<Value, E>
where
    F: FnMut(&TreePath, &Value) -> Result<Value, E>,
{
    match value {
        Value::Branch(b) => Ok(Value::Branch(map_branch(b, path, f)?)),
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for (i, v) in seq.iter().enumerate() {
                out.push(map_value(v, &path.child_index(i), f)?);
            }
            Ok(Value::Sequence(out))
        }
        leaf => f(path, leaf),
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TreeBranch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut branch = TreeBranch::new();
        for (k, v) in iter {
            branch.insert(k, v);
        }
        branch
    }
}

impl IntoIterator for TreeBranch {
    type Item = TreeItem;
    type IntoIter = std::vec::IntoIter<TreeItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a TreeBranch {
    type Item = &'a TreeItem;
    type IntoIter = std::slice::Iter<'a, TreeItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a value, rendered as `servers[0].host` or `["a.b"].c`.
///
/// The rendering is unambiguous: keys outside `[A-Za-z0-9_-]` are quoted, so
/// `a.b` (two keys) and `["a.b"]` (one key) never collide. The rendered form
/// is the additional authenticated data of a leaf's ciphertext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TreePath(Vec<PathSegment>);

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_owned()));
        TreePath(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        TreePath(segments)
    }

    /// Mapping keys along the path, skipping sequence indices.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|s| match s {
            PathSegment::Key(k) => Some(k.as_str()),
            PathSegment::Index(_) => None,
        })
    }
}

impl From<Vec<PathSegment>> for TreePath {
    fn from(segments: Vec<PathSegment>) -> Self {
        TreePath(segments)
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if is_plain_key(k) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(k)?;
                }
                PathSegment::Key(k) => {
                    f.write_str("[\"")?;
                    for c in k.chars() {
                        if c == '"' || c == '\\' {
                            f.write_str("\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                    f.write_str("\"]")?;
                }
                PathSegment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = TreesealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TreesealError::Parse(format!("invalid path: {s:?}"));
        let mut chars = s.chars().peekable();
        let mut segments = Vec::new();

        while let Some(&c) = chars.peek() {
            match c {
                '[' => {
                    chars.next();
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        let key = read_quoted(&mut chars).ok_or_else(bad)?;
                        segments.push(PathSegment::Key(key));
                    } else {
                        let mut digits = String::new();
                        loop {
                            match chars.next() {
                                Some(']') => break,
                                Some(d) if d.is_ascii_digit() => digits.push(d),
                                _ => return Err(bad()),
                            }
                        }
                        let index = digits.parse().map_err(|_| bad())?;
                        segments.push(PathSegment::Index(index));
                    }
                }
                '.' if !segments.is_empty() => {
                    chars.next();
                    segments.push(PathSegment::Key(read_plain(&mut chars).ok_or_else(bad)?));
                }
                _ if segments.is_empty() => {
                    segments.push(PathSegment::Key(read_plain(&mut chars).ok_or_else(bad)?));
                }
                _ => return Err(bad()),
            }
        }

        Ok(TreePath(segments))
    }
}

fn read_plain(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut key = String::new();
    while let Some(&c) = chars.peek() {
        if c == '.' || c == '[' {
            break;
        }
        key.push(c);
        chars.next();
    }
    is_plain_key(&key).then_some(key)
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut key = String::new();
    loop {
        match chars.next()? {
            '\\' => match chars.next()? {
                e @ ('"' | '\\') => key.push(e),
                _ => return None,
            },
            '"' => break,
            c => key.push(c),
        }
    }
    (chars.next()? == ']').then_some(key)
}
