use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Immutable name shared between the structure side and tree nodes.
///
/// Structure lookups hand out names on every call, so cloning is a refcount
/// bump rather than a copy.
#[derive(Debug, Clone, Eq)]
pub struct SharedStr(Arc<str>);

impl PartialEq for SharedStr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Deref for SharedStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SharedStr {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for SharedStr {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for SharedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
