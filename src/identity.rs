//! Record identity and reference field values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between scope and local id in the qualified textual form.
pub const SCOPE_SEPARATOR: char = '_';

/// Composite identity `(scope, local id)` of a record within its kind.
///
/// Kinds with a bare identity (agencies) use an empty scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopedId {
    pub scope: String,
    pub id: String,
}

impl ScopedId {
    pub fn new(scope: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            id: id.into(),
        }
    }

    /// Identity for kinds whose id is not scoped.
    pub fn bare(id: impl Into<String>) -> Self {
        Self::new(String::new(), id)
    }

    pub fn is_bare(&self) -> bool {
        self.scope.is_empty()
    }

    /// Split a qualified `scope_id` string, returning `None` when there is no
    /// separator or either side is empty.
    pub fn split_qualified(raw: &str) -> Option<(&str, &str)> {
        let (scope, id) = raw.split_once(SCOPE_SEPARATOR)?;
        if scope.is_empty() || id.is_empty() {
            return None;
        }
        Some((scope, id))
    }

    /// True if `literal` names this identity, either by local id or qualified form.
    pub fn matches_text(&self, literal: &str) -> bool {
        self.id == literal || (!self.is_bare() && self.to_string() == literal)
    }
}

impl fmt::Display for ScopedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}{}{}", self.scope, SCOPE_SEPARATOR, self.id)
        }
    }
}

/// Value of a cross-reference field.
///
/// A reference starts out as the raw textual id read from the feed and becomes
/// `Resolved` once the target record is known to exist in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    Unresolved(String),
    Resolved(ScopedId),
}

impl EntityRef {
    pub fn resolved(&self) -> Option<&ScopedId> {
        match self {
            EntityRef::Resolved(id) => Some(id),
            EntityRef::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, EntityRef::Resolved(_))
    }

    /// Textual form, suitable for re-resolution.
    pub fn as_text(&self) -> String {
        match self {
            EntityRef::Unresolved(raw) => raw.clone(),
            EntityRef::Resolved(id) => id.to_string(),
        }
    }

    pub fn matches_text(&self, literal: &str) -> bool {
        match self {
            EntityRef::Unresolved(raw) => raw == literal,
            EntityRef::Resolved(id) => id.matches_text(literal),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Unresolved(raw) => write!(f, "?{}", raw),
            EntityRef::Resolved(id) => write!(f, "{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality_uses_both_components() {
        assert_eq!(ScopedId::new("A1", "42"), ScopedId::new("A1", "42"));
        assert_ne!(ScopedId::new("A1", "42"), ScopedId::new("A2", "42"));
        assert_ne!(ScopedId::new("A1", "42"), ScopedId::new("A1", "43"));
    }

    #[test]
    fn test_display_and_split() {
        let id = ScopedId::new("A1", "R_5");
        assert_eq!(id.to_string(), "A1_R_5");
        assert_eq!(ScopedId::split_qualified("A1_R_5"), Some(("A1", "R_5")));
        assert_eq!(ScopedId::split_qualified("plain"), None);
        assert_eq!(ScopedId::split_qualified("_x"), None);
        assert_eq!(ScopedId::bare("A1").to_string(), "A1");
    }

    #[test]
    fn test_matches_text() {
        let id = ScopedId::new("A1", "S1");
        assert!(id.matches_text("S1"));
        assert!(id.matches_text("A1_S1"));
        assert!(!id.matches_text("S2"));

        let unresolved = EntityRef::Unresolved("S9".to_string());
        assert!(unresolved.matches_text("S9"));
        assert!(!unresolved.is_resolved());
    }
}
