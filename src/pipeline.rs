use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::discovery::{find_new_file, DatasetSource};
use crate::eligibility::Eligibility;
use crate::loader::load_and_clean_file;
use crate::reconcile::{reconcile, ReconcileReport};
use crate::schema::Schema;
use crate::sink::{mirror_directory, TableSink, WrittenTable};
use crate::summary::{append_summary, SummarizedTable};
use crate::table::Table;

#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub task: String,
    pub old_path: PathBuf,
    pub new_path: Option<PathBuf>,
}

/// Everything checked before the first table is written.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub tasks: Vec<PlannedTask>,
    /// Subjects found in any prior-round table.
    pub known_subjects: HashSet<String>,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Written { report: ReconcileReport, written: WrittenTable, carried_forward: bool },
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub struct TaskResult {
    pub task: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug)]
pub struct RunSummary {
    pub known_subjects: usize,
    pub tasks: Vec<TaskResult>,
    pub mirrored_files: Option<Result<usize>>,
}

impl RunSummary {
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Failed(_)))
            .map(|t| t.task.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed_tasks().is_empty() && !matches!(self.mirrored_files, Some(Err(_)))
    }
}

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    schema: Schema<'a>,
    eligibility: Eligibility,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RunConfig, eligibility: Eligibility) -> Self {
        Self { config, schema: Schema::new(&config.schema), eligibility }
    }

    /// Resolves every task's inputs and gathers the cumulative subject set.
    /// Errors here are fatal to the whole run.
    pub fn prepare(&self, source: &dyn DatasetSource) -> Result<RunPlan> {
        let prior = source.prior_round(&self.config.tasks).context("Prior-round tables do not match the expected tasks")?;
        let new_files = source.new_data_files().context("Failed to list new data tables")?;

        let mut known_subjects = HashSet::new();
        for (task, path) in &prior {
            match load_and_clean_file(path, &self.schema, &self.eligibility) {
                Ok(table) => {
                    if let Some(id_col) = table.column_index(self.schema.identifier()) {
                        known_subjects.extend(table.column_values(id_col).map(str::to_string));
                    }
                }
                Err(e) => error!("Error reading prior-round table for {}: {:#}", task, e),
            }
        }
        info!("Found {} existing subject IDs", known_subjects.len());

        let tasks = self
            .config
            .tasks
            .iter()
            .filter_map(|task| {
                let old_path = prior.get(task)?.clone();
                let new_path = find_new_file(task, &new_files);
                if new_path.is_none() {
                    warn!("No new data file found for {}; carrying the prior-round table forward", task);
                }
                Some(PlannedTask { task: task.clone(), old_path, new_path })
            })
            .collect();
        Ok(RunPlan { tasks, known_subjects })
    }

    fn drop_retired_columns(&self, table: &mut Table) {
        for column in &self.config.schema.retired_columns {
            if table.remove_column(column) {
                debug!("Removed retired column '{}'", column);
            }
        }
    }

    /// Runs one task through clean, reconcile, normalize and summarize.
    pub fn process_task(&self, planned: &PlannedTask, known_subjects: &HashSet<String>) -> Result<(SummarizedTable, ReconcileReport)> {
        let task = &planned.task;
        let old = load_and_clean_file(&planned.old_path, &self.schema, &self.eligibility)
            .with_context(|| format!("Failed to load prior-round table for {}", task))?;
        let (mut merged, report) = match &planned.new_path {
            Some(path) => {
                let new = load_and_clean_file(path, &self.schema, &self.eligibility)
                    .with_context(|| format!("Failed to load new data for {}", task))?;
                let (merged, report) = reconcile(old, &new, &self.schema, &self.eligibility, known_subjects)?;
                info!("Found {} existing subjects with updated values for {}", report.updated_rows, task);
                info!("Found {} new rows for {}", report.inserted_rows, task);
                if report.rejected_rows > 0 {
                    info!("Skipped {} rows from ineligible subjects for {}", report.rejected_rows, task);
                }
                (merged, report)
            }
            None => (old, ReconcileReport::default()),
        };
        if merged.is_empty() {
            warn!("{} has no data rows after reconciliation", task);
        }
        self.drop_retired_columns(&mut merged);
        let normalized = self.schema.normalize_columns(merged);
        debug!("{} column layout: {:?}", task, self.schema.describe(&normalized));
        let summarized = append_summary(normalized, &self.schema)?;
        Ok((summarized, report))
    }

    /// Processes every planned task in order. A failing task is logged and
    /// recorded; the remaining tasks still run.
    pub fn execute(&self, plan: &RunPlan, sink: &mut dyn TableSink) -> RunSummary {
        let progress_bar = ProgressBar::new(plan.tasks.len() as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Failed to create progress bar template")
                .progress_chars("=> "),
        );

        let mut tasks = Vec::with_capacity(plan.tasks.len());
        for planned in &plan.tasks {
            progress_bar.set_message(planned.task.clone());
            let result = self
                .process_task(planned, &plan.known_subjects)
                .and_then(|(table, report)| Ok((sink.write_table(&planned.task, &table)?, report)));
            let outcome = match result {
                Ok((written, report)) => {
                    info!("Wrote {} ({} records, sha256 {})", written.path.display(), written.records, written.sha256);
                    TaskOutcome::Written { report, written, carried_forward: planned.new_path.is_none() }
                }
                Err(e) => {
                    error!("Error processing {}: {:#}", planned.task, e);
                    TaskOutcome::Failed(e)
                }
            };
            tasks.push(TaskResult { task: planned.task.clone(), outcome });
            progress_bar.inc(1);
        }
        progress_bar.finish_with_message(format!("{} tasks processed", plan.tasks.len()));

        let mirrored_files = self.config.mirror_dir.as_deref().map(|mirror| self.mirror(mirror));
        RunSummary { known_subjects: plan.known_subjects.len(), tasks, mirrored_files }
    }

    fn mirror(&self, mirror: &Path) -> Result<usize> {
        let result = mirror_directory(&self.config.output_dir, mirror);
        if let Err(e) = &result {
            error!("Error copying files to {}: {:#}", mirror.display(), e);
        }
        result
    }
}
