use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The RDoC behavioral battery, one cumulative table per task.
pub const DEFAULT_TASKS: [&str; 12] = [
    "ax_cpt",
    "cued_task_switching",
    "flanker",
    "go_nogo",
    "n_back",
    "operation_only_span",
    "operation_span",
    "simple_span",
    "spatial_task_switching",
    "stop_signal",
    "stroop",
    "visual_search",
];

#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub description: Option<String>,
    pub new_data_dir: PathBuf,
    pub old_data_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,
    #[serde(default = "default_exclude_suffixes")]
    pub new_data_exclude_suffixes: Vec<String>,
    #[serde(default = "default_tasks")]
    pub tasks: Vec<String>,
    pub eligibility: EligibilityConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EligibilityConfig {
    pub allow_list: PathBuf,
    #[serde(default)]
    pub exclusion_list: Option<PathBuf>,
    #[serde(default = "default_denylist")]
    pub denylist: Vec<DenylistEntry>,
}

/// A subject removed from every table, old and new, regardless of any allow-list.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DenylistEntry {
    pub id: String,
    pub reason: String,
}

/// Column roles. `attention_checks` lists the trailing attention-check columns
/// in output order; the default writes mean_rt before mean_accuracy so that
/// accuracy sits next to `session`. Earlier rounds wrote accuracy first.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    pub identifier: String,
    pub timestamp: String,
    pub feedback: String,
    pub attention_checks: Vec<String>,
    pub session: String,
    pub reviewer_comment: String,
    pub annotation_columns: Vec<String>,
    pub retired_columns: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            identifier: "sub_id".to_string(),
            timestamp: "date_time".to_string(),
            feedback: "proportion_feedback".to_string(),
            attention_checks: vec![
                "attention_check_mean_rt".to_string(),
                "attention_check_mean_accuracy".to_string(),
            ],
            session: "session".to_string(),
            reviewer_comment: "notes".to_string(),
            annotation_columns: vec!["notes".to_string(), "checked".to_string(), "follow_up".to_string()],
            retired_columns: vec![
                "attention_check accuracy".to_string(),
                "attention_check_mean_response_time".to_string(),
            ],
        }
    }
}

fn default_exclude_suffixes() -> Vec<String> {
    vec!["_screener_time_averaged.csv".to_string()]
}

fn default_tasks() -> Vec<String> {
    DEFAULT_TASKS.iter().map(|t| t.to_string()).collect()
}

fn default_denylist() -> Vec<DenylistEntry> {
    vec![DenylistEntry {
        id: "665368b3a0704ee687e448a0".to_string(),
        reason: "participant permanently withdrawn from the behavioral matrix".to_string(),
    }]
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open run configuration file: {}", path.display()))?;
        let config: RunConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse run configuration YAML from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            bail!("Run configuration lists no tasks");
        }
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.trim().is_empty() {
                bail!("Run configuration contains an empty task name");
            }
            if !seen.insert(task.as_str()) {
                bail!("Task '{}' is listed more than once", task);
            }
        }
        self.schema.validate()
    }
}

impl SchemaConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let named = [&self.identifier, &self.timestamp, &self.feedback, &self.session]
            .into_iter()
            .chain(self.attention_checks.iter());
        for name in named {
            if name.trim().is_empty() {
                bail!("Schema configuration contains an empty column name");
            }
            if !seen.insert(name.as_str()) {
                bail!("Schema column '{}' is assigned to more than one role", name);
            }
        }
        if self.reviewer_comment.trim().is_empty() {
            bail!("Schema configuration needs a reviewer comment column");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
new_data_dir: /data/new
old_data_dir: /data/old
output_dir: out
eligibility:
  allow_list: /data/qa/pristine_subjects.json
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: RunConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.tasks.len(), 12);
        assert_eq!(config.schema, SchemaConfig::default());
        assert_eq!(config.eligibility.denylist.len(), 1);
        assert_eq!(config.eligibility.denylist[0].id, "665368b3a0704ee687e448a0");
        assert!(config.mirror_dir.is_none());
        assert_eq!(config.new_data_exclude_suffixes, vec!["_screener_time_averaged.csv"]);
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let yaml = format!("{}tasks: [stroop, flanker, stroop]\n", MINIMAL);
        let config: RunConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schema_role_collision_rejected() {
        let yaml = format!("{}schema:\n  session: date_time\n", MINIMAL);
        let config: RunConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunConfig::load(&dir.path().join("missing.yaml")).is_err());
    }
}
