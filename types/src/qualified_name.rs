//! Types to represent qualified class and interface names.
use std::fmt;
use std::hash::{Hash, Hasher};

const SEPARATOR: &str = ".";

/// The fully qualified, dot-separated name of a class or interface.
///
/// The declared casing is preserved for display and mangling, but BASIC names
/// are case-insensitive: equality and hashing operate on the canonical
/// lowercase form.
#[derive(Clone, Eq)]
pub struct QualifiedName {
    value: String,
}

impl QualifiedName {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self { value: value.into() }
    }

    /// Builds a qualified name from the active namespace path and an
    /// unqualified identifier.
    pub fn qualify(namespace: &[String], name: &str) -> Self {
        if namespace.is_empty() {
            return Self::new(name);
        }

        let mut value = namespace.join(SEPARATOR);

        value.push_str(SEPARATOR);
        value.push_str(name);
        Self { value }
    }

    /// The canonical lowercase form used for lookups.
    pub fn canonical(&self) -> String {
        self.value.to_ascii_lowercase()
    }

    /// The final identifier of the path.
    pub fn tail(&self) -> &str {
        self.value.split(SEPARATOR).last().unwrap()
    }

    pub fn as_str(&self) -> &str {
        self.value.as_str()
    }
}

impl PartialEq for QualifiedName {
    fn eq(&self, other: &Self) -> bool {
        self.value.eq_ignore_ascii_case(&other.value)
    }
}

impl Hash for QualifiedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.value.bytes() {
            byte.to_ascii_lowercase().hash(state);
        }
    }
}

impl From<&str> for QualifiedName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl fmt::Debug for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "QualifiedName({})", self.value)
    }
}
