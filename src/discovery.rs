use anyhow::{bail, Context, Result};
use glob::{glob, Pattern};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PRIOR_ROUND_PREFIX: &str = "rdoc behavioral matrix - ";
const PRIOR_ROUND_SUFFIX: &str = "_with_notes.csv";
const TABLE_EXTENSION: &str = ".csv";

/// Locates the tables a run reads.
pub trait DatasetSource {
    /// Prior-round cumulative table per task name.
    fn prior_round(&self, tasks: &[String]) -> Result<BTreeMap<String, PathBuf>>;
    /// Candidate freshly collected tables.
    fn new_data_files(&self) -> Result<Vec<PathBuf>>;
}

pub struct DirectorySource {
    old_dir: PathBuf,
    new_dir: PathBuf,
    exclude_suffixes: Vec<String>,
}

impl DirectorySource {
    pub fn new(old_dir: PathBuf, new_dir: PathBuf, exclude_suffixes: Vec<String>) -> Self {
        Self { old_dir, new_dir, exclude_suffixes }
    }
}

impl DatasetSource for DirectorySource {
    fn prior_round(&self, tasks: &[String]) -> Result<BTreeMap<String, PathBuf>> {
        let files = find_csv_files(&self.old_dir)?;
        info!("Found {} prior-round tables in {}", files.len(), self.old_dir.display());
        match_prior_round(&files, tasks)
    }

    fn new_data_files(&self) -> Result<Vec<PathBuf>> {
        let files: Vec<PathBuf> = find_csv_files(&self.new_dir)?
            .into_iter()
            .filter(|p| {
                let name = file_name(p);
                !self.exclude_suffixes.iter().any(|s| name.ends_with(s.as_str()))
            })
            .collect();
        info!("Found {} new data tables in {}", files.len(), self.new_dir.display());
        Ok(files)
    }
}

pub fn find_csv_files<P: AsRef<Path>>(directory: P) -> Result<Vec<PathBuf>> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
        bail!("Directory does not exist: {}", directory.display());
    }
    let escaped = Pattern::escape(&directory.to_string_lossy());
    let pattern = Path::new(&escaped).join("*.csv");
    let pattern_str = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob(&pattern_str)
        .with_context(|| format!("Invalid search pattern: {}", pattern_str))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    if paths.is_empty() {
        warn!("No files found matching the pattern: {}", pattern_str);
    }
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

/// Task name of a prior-round file under either naming convention:
/// `<task>_with_notes.csv` or `rdoc behavioral matrix - <task>_with_notes.csv`.
pub fn prior_round_task_name(file_name: &str) -> String {
    let name = file_name.strip_prefix(PRIOR_ROUND_PREFIX).unwrap_or(file_name);
    name.strip_suffix(PRIOR_ROUND_SUFFIX)
        .or_else(|| name.strip_suffix(TABLE_EXTENSION))
        .unwrap_or(name)
        .to_string()
}

pub fn output_file_name(task: &str) -> String {
    format!("{}{}", task, PRIOR_ROUND_SUFFIX)
}

/// Checks the prior-round files against the expected tasks. Too many files, or
/// any task without a file, means the dataset is misconfigured.
pub fn match_prior_round(files: &[PathBuf], tasks: &[String]) -> Result<BTreeMap<String, PathBuf>> {
    if files.len() > tasks.len() {
        bail!(
            "Found {} prior-round tables but only {} tasks are expected",
            files.len(),
            tasks.len()
        );
    }
    let mut matched = BTreeMap::new();
    for path in files {
        let task = prior_round_task_name(&file_name(path));
        if !tasks.contains(&task) {
            warn!("Prior-round table {} does not belong to any expected task", path.display());
            continue;
        }
        if let Some(previous) = matched.insert(task.clone(), path.clone()) {
            bail!(
                "Task '{}' has more than one prior-round table: {} and {}",
                task,
                previous.display(),
                path.display()
            );
        }
    }
    let missing: Vec<&str> = tasks.iter().filter(|t| !matched.contains_key(*t)).map(|t| t.as_str()).collect();
    if !missing.is_empty() {
        bail!("No prior-round table found for tasks: {}", missing.join(", "));
    }
    Ok(matched)
}

/// The new data table for a task: an exact file-stem match, else the shortest
/// file name containing the task name.
pub fn find_new_file(task: &str, candidates: &[PathBuf]) -> Option<PathBuf> {
    if let Some(exact) = candidates
        .iter()
        .find(|p| p.file_stem().map(|s| s.to_string_lossy() == task).unwrap_or(false))
    {
        return Some(exact.clone());
    }
    let mut matching: Vec<&PathBuf> = candidates.iter().filter(|p| file_name(p).contains(task)).collect();
    matching.sort_by_key(|p| {
        let name = file_name(p);
        (name.len(), name)
    });
    if matching.len() > 1 {
        warn!(
            "Several new data tables match task '{}'; using {}",
            task,
            matching[0].display()
        );
    }
    matching.first().map(|p| p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tasks(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prior_round_task_name() {
        assert_eq!(prior_round_task_name("stroop_with_notes.csv"), "stroop");
        assert_eq!(prior_round_task_name("rdoc behavioral matrix - flanker_with_notes.csv"), "flanker");
        assert_eq!(prior_round_task_name("go_nogo.csv"), "go_nogo");
        assert_eq!(output_file_name("n_back"), "n_back_with_notes.csv");
    }

    #[test]
    fn test_match_prior_round() {
        let files = vec![
            PathBuf::from("/old/stroop_with_notes.csv"),
            PathBuf::from("/old/rdoc behavioral matrix - flanker_with_notes.csv"),
        ];
        let matched = match_prior_round(&files, &tasks(&["flanker", "stroop"])).unwrap();
        assert_eq!(matched["flanker"], files[1]);
        assert_eq!(matched["stroop"], files[0]);
    }

    #[test]
    fn test_match_prior_round_failures() {
        let files = vec![
            PathBuf::from("/old/stroop_with_notes.csv"),
            PathBuf::from("/old/flanker_with_notes.csv"),
        ];
        assert!(match_prior_round(&files, &tasks(&["stroop"])).is_err());
        assert!(match_prior_round(&files, &tasks(&["stroop", "flanker", "n_back"])).is_err());

        let duplicated = vec![
            PathBuf::from("/old/stroop_with_notes.csv"),
            PathBuf::from("/old/rdoc behavioral matrix - stroop_with_notes.csv"),
        ];
        assert!(match_prior_round(&duplicated, &tasks(&["stroop", "flanker"])).is_err());
    }

    #[test]
    fn test_find_new_file() {
        let candidates = vec![
            PathBuf::from("/new/cued_task_switching__wide.csv"),
            PathBuf::from("/new/stop_signal.csv"),
            PathBuf::from("/new/stop_signal_rdoc__wide.csv"),
        ];
        assert_eq!(find_new_file("stop_signal", &candidates), Some(candidates[1].clone()));
        assert_eq!(find_new_file("cued_task_switching", &candidates), Some(candidates[0].clone()));
        assert_eq!(find_new_file("flanker", &candidates), None);
    }

    #[test]
    fn test_directory_source_filters_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let new_dir = dir.path().join("new");
        let old_dir = dir.path().join("old");
        fs::create_dir_all(&new_dir).unwrap();
        fs::create_dir_all(&old_dir).unwrap();
        fs::write(new_dir.join("stroop.csv"), "sub_id,date_time\n").unwrap();
        fs::write(new_dir.join("stroop_screener_time_averaged.csv"), "sub_id,date_time\n").unwrap();
        fs::write(new_dir.join("readme.txt"), "ignore me").unwrap();
        fs::write(old_dir.join("stroop_with_notes.csv"), "sub_id,date_time\n").unwrap();

        let source = DirectorySource::new(old_dir.clone(), new_dir.clone(), vec!["_screener_time_averaged.csv".to_string()]);
        assert_eq!(source.new_data_files().unwrap(), vec![new_dir.join("stroop.csv")]);
        let prior = source.prior_round(&tasks(&["stroop"])).unwrap();
        assert_eq!(prior["stroop"], old_dir.join("stroop_with_notes.csv"));
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_csv_files(dir.path().join("absent")).is_err());
    }
}
