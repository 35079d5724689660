use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One element of a hierarchical path, optionally carrying key=value attributes.
///
/// Attributes are a mapping with unique keys; two elements are equal iff their
/// name and attribute sets are equal (order of attributes does not matter).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathElem {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key: BTreeMap<String, String>,
}

impl PathElem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: BTreeMap::new(),
        }
    }

    pub fn with_key(name: impl Into<String>, key: BTreeMap<String, String>) -> Self {
        Self { name: name.into(), key }
    }
}

impl fmt::Display for PathElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.key {
            write!(f, "[{k}={v}]")?;
        }
        Ok(())
    }
}

/// An ordered sequence of path elements. Path equality is structural.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub elem: Vec<PathElem>,
    /// The origin declared on this specific path, if any (e.g. "openconfig").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// The target declared on this specific path, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Path {
    pub fn new(elem: Vec<PathElem>) -> Self {
        Self {
            elem,
            origin: None,
            target: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elem.is_empty()
    }

    /// Concatenates `prefix` in front of `self`, producing the effective path
    /// used for resolution. Origin/target are not carried by the element
    /// concatenation; they are resolved separately (see `gnmid-resolver`).
    pub fn prefixed_by(&self, prefix: &Path) -> Path {
        let mut elem = prefix.elem.clone();
        elem.extend(self.elem.iter().cloned());
        Path {
            elem,
            origin: self.origin.clone(),
            target: self.target.clone(),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.elem.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

/// A path plus the two scalars that select a backing data source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub path: Path,
    pub origin: String,
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_by_concatenates_elements() {
        let prefix = Path::new(vec![PathElem::new("a")]);
        let path = Path::new(vec![PathElem::new("b"), PathElem::new("c")]);
        let full = path.prefixed_by(&prefix);
        assert_eq!(full.to_string(), "a/b/c");
    }
}
