//! Store paths
//!
//! A path is a sequence of object keys and array indices. Text form accepts
//! both `report.widgets[0].text` and `report.widgets.0.text`; numeric dotted
//! segments are read as indices.

use crate::errors::StoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(_) => None,
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The store root
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidPath(text.to_string());
        let mut segments = Vec::new();
        let mut rest = text.trim();

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(invalid)?;
                let index = after[..close].trim().parse::<usize>().map_err(|_| invalid())?;
                segments.push(Segment::Index(index));
                rest = &after[close + 1..];
            } else {
                let rest_start = rest.strip_prefix('.').unwrap_or(rest);
                if rest_start.len() != rest.len() && segments.is_empty() {
                    return Err(invalid());
                }
                let end = rest_start.find(['.', '[']).unwrap_or(rest_start.len());
                let name = &rest_start[..end];
                if name.is_empty() {
                    return Err(invalid());
                }
                match name.parse::<usize>() {
                    Ok(index) => segments.push(Segment::Index(index)),
                    Err(_) => segments.push(Segment::Key(name.to_string())),
                }
                rest = &rest_start[end..];
            }
        }

        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, segment: impl Into<Segment>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    pub fn concat(&self, other: &Path) -> Path {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Path(segments)
    }

    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    pub fn last_key(&self) -> Option<&str> {
        self.last().and_then(Segment::as_key)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.last().and_then(Segment::as_index)
    }

    pub fn first_key(&self) -> Option<&str> {
        self.0.first().and_then(Segment::as_key)
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// One path is a prefix of the other
    pub fn overlaps(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Same path with the segment at `position` replaced
    pub fn with_segment(&self, position: usize, segment: Segment) -> Path {
        let mut segments = self.0.clone();
        if let Some(slot) = segments.get_mut(position) {
            *slot = segment;
        }
        Path(segments)
    }

    /// Any segment is the object key `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|s| s.as_key() == Some(key))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(k) if i == 0 => write!(f, "{}", k)?,
                Segment::Key(k) => write!(f, ".{}", k)?,
                Segment::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Path::parse(&text).map_err(serde::de::Error::custom)
    }
}
