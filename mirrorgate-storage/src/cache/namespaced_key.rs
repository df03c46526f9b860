//! Cache keys scoped to a namespace.
//!
//! Every key the accessor hands to a cache tier is built here, so a tier that
//! is shared with other applications only ever sees `"{namespace}:{key}"`.

use std::fmt;

use mirrorgate_core::DocumentKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedKey(String);

impl NamespacedKey {
    pub fn new(namespace: &str, key: &DocumentKey) -> Self {
        Self(format!("{}{}", Self::prefix(namespace), key.as_str()))
    }

    /// The prefix shared by every key in `namespace`.
    pub fn prefix(namespace: &str) -> String {
        format!("{}:", namespace)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespacedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
