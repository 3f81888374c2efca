//! Job ID generation and resolution
//!
//! IDs are UUIDv7 strings: time-ordered, unique per process lifetime and
//! across restarts, never reused.
//! Example: `01927f3a-6c1e-7b2a-9f4d-0c8e5a2b1d34`

use serde::{Deserialize, Serialize};

/// Opaque job identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 chars, for compact display
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// ID resolution for partial matches
pub struct IdResolver<'a> {
    ids: Vec<&'a JobId>,
}

impl<'a> IdResolver<'a> {
    pub fn new(ids: impl IntoIterator<Item = &'a JobId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Resolve a partial reference to a full ID
    ///
    /// Returns:
    /// - Ok(Some(id)) on an exact match or a single prefix match
    /// - Ok(None) if no matches
    /// - Err with candidates if ambiguous
    pub fn resolve(&self, reference: &str) -> Result<Option<JobId>, Vec<JobId>> {
        if let Some(exact) = self.ids.iter().find(|id| id.as_str() == reference) {
            return Ok(Some((*exact).clone()));
        }

        let matches: Vec<JobId> = self
            .ids
            .iter()
            .filter(|id| id.as_str().starts_with(reference))
            .map(|id| (*id).clone())
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            _ => Err(matches),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_generate_time_ordered() {
        let a = JobId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = JobId::generate();
        assert!(a < b);
    }

    #[test]
    fn test_short() {
        let id = JobId::from("01927f3a-6c1e-7b2a-9f4d-0c8e5a2b1d34");
        assert_eq!(id.short(), "01927f3a");
        assert_eq!(JobId::from("abc").short(), "abc");
    }

    #[test]
    fn test_serde_transparent() {
        let id = JobId::from("job-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"job-1\"");
    }

    #[test]
    fn test_id_resolver_exact_and_prefix() {
        let ids = vec![JobId::from("0192aaaa-one"), JobId::from("0192bbbb-two")];
        let resolver = IdResolver::new(&ids);

        assert_eq!(resolver.resolve("0192aaaa-one").unwrap(), Some(ids[0].clone()));
        assert_eq!(resolver.resolve("0192b").unwrap(), Some(ids[1].clone()));
    }

    #[test]
    fn test_id_resolver_exact_beats_prefix() {
        let ids = vec![JobId::from("abc"), JobId::from("abcd")];
        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("abc").unwrap(), Some(ids[0].clone()));
    }

    #[test]
    fn test_id_resolver_ambiguous() {
        let ids = vec![
            JobId::from("0192aaaa-one"),
            JobId::from("0192aaab-two"),
            JobId::from("0192aaac-three"),
        ];
        let resolver = IdResolver::new(&ids);
        let candidates = resolver.resolve("0192aaa").unwrap_err();
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn test_id_resolver_no_match() {
        let ids = vec![JobId::from("0192aaaa-one")];
        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("ffff").unwrap(), None);
    }
}
