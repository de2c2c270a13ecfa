use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::{DenylistEntry, EligibilityConfig};

/// Shape shared by the pristine allow-list and the exclusion document.
#[derive(Deserialize, Debug)]
struct SubjectList {
    ids: Vec<String>,
}

fn read_subject_list(path: &Path) -> Result<HashSet<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read subject list: {}", path.display()))?;
    let list: SubjectList = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse subject list JSON from {}", path.display()))?;
    Ok(list.ids.into_iter().map(|id| id.trim().to_string()).collect())
}

/// Decides which subjects may enter a cumulative table for the first time.
#[derive(Debug, Clone, Default)]
pub struct Eligibility {
    pristine: HashSet<String>,
    excluded: HashSet<String>,
    denylist: Vec<DenylistEntry>,
}

impl Eligibility {
    pub fn new(pristine: HashSet<String>, excluded: HashSet<String>, denylist: Vec<DenylistEntry>) -> Self {
        Self { pristine, excluded, denylist }
    }

    /// Loads the allow-list and optional exclusion list. Any failure here is fatal to the run.
    pub fn load(config: &EligibilityConfig) -> Result<Self> {
        let pristine = read_subject_list(&config.allow_list).context("Cannot determine subject eligibility")?;
        info!("Loaded {} pristine subject IDs from {}", pristine.len(), config.allow_list.display());
        let excluded = match &config.exclusion_list {
            Some(path) => {
                let ids = read_subject_list(path).context("Cannot determine subject exclusions")?;
                info!("Loaded {} excluded subject IDs from {}", ids.len(), path.display());
                ids
            }
            None => HashSet::new(),
        };
        for entry in &config.denylist {
            info!("Denylisted subject {}: {}", entry.id, entry.reason);
        }
        Ok(Self::new(pristine, excluded, config.denylist.clone()))
    }

    pub fn is_denylisted(&self, subject_id: &str) -> bool {
        let subject_id = subject_id.trim();
        self.denylist.iter().any(|e| e.id.trim() == subject_id)
    }

    /// Known subjects are always eligible; first-time subjects must be pristine,
    /// not excluded and not denylisted. Ids compare with surrounding whitespace ignored.
    pub fn is_eligible(&self, subject_id: &str, already_present: bool) -> bool {
        if already_present {
            return true;
        }
        let subject_id = subject_id.trim();
        self.pristine.contains(subject_id) && !self.excluded.contains(subject_id) && !self.is_denylisted(subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eligibility() -> Eligibility {
        Eligibility::new(
            ids(&["p1", "p2", "blocked", "x1"]),
            ids(&["x1"]),
            vec![DenylistEntry { id: "blocked".to_string(), reason: "test".to_string() }],
        )
    }

    #[test]
    fn test_new_subjects_need_allow_list() {
        let e = eligibility();
        assert!(e.is_eligible("p1", false));
        assert!(!e.is_eligible("stranger", false));
        assert!(!e.is_eligible("x1", false));
        assert!(!e.is_eligible("blocked", false));
    }

    #[test]
    fn test_padded_ids_match() {
        let e = eligibility();
        assert!(e.is_eligible(" p2", false));
        assert!(e.is_eligible("p1 ", false));
        assert!(!e.is_eligible(" x1", false));
        assert!(e.is_denylisted("blocked "));
    }

    #[test]
    fn test_known_subjects_always_eligible() {
        let e = eligibility();
        assert!(e.is_eligible("stranger", true));
        assert!(e.is_eligible("x1", true));
    }

    #[test]
    fn test_load_documents() {
        let dir = tempfile::tempdir().unwrap();
        let allow = dir.path().join("pristine_subjects.json");
        let exclude = dir.path().join("excluded.json");
        fs::write(&allow, r#"{"ids": ["a", "b", "c"]}"#).unwrap();
        fs::write(&exclude, r#"{"ids": ["b"]}"#).unwrap();
        let config = EligibilityConfig { allow_list: allow, exclusion_list: Some(exclude), denylist: vec![] };
        let e = Eligibility::load(&config).unwrap();
        assert!(e.is_eligible("a", false));
        assert!(!e.is_eligible("b", false));
    }

    #[test]
    fn test_load_missing_or_malformed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = EligibilityConfig {
            allow_list: dir.path().join("nope.json"),
            exclusion_list: None,
            denylist: vec![],
        };
        assert!(Eligibility::load(&missing).is_err());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"subjects": []}"#).unwrap();
        let malformed = EligibilityConfig { allow_list: bad, exclusion_list: None, denylist: vec![] };
        assert!(Eligibility::load(&malformed).is_err());
    }
}
