/// Reports written after scoring a task: a JSON summary with every answer,
/// and a CSV with one row per trial for analysis elsewhere.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scoring::{Answer, SameDifferentSummary, TaskScore, TiePolicy};
use crate::tasks::TaskKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport
{
    pub model: String,
    pub task: TaskKind,
    /// Local time, e.g. "2021-01-01 12:00:00".
    pub timestamp: String,
    pub tie_policy: TiePolicy,
    pub correct: usize,
    pub total: usize,
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_different: Option<SameDifferentSummary>,
    pub answers: Vec<Answer>,
    #[serde(skip)]
    file_stem: String,
}

/// One CSV row. Distances are joined with ';' so the row keeps a fixed width.
#[derive(Debug, Serialize)]
struct AnswerRow
{
    trial: usize,
    choice: String,
    recorded: String,
    correct: bool,
    tied: bool,
    normalized: Option<f32>,
    distances: String,
}

impl From<&Answer> for AnswerRow
{
    fn from(answer: &Answer) -> Self
    {
        AnswerRow {
            trial: answer.trial,
            choice: answer.choice.to_string(),
            recorded: answer.recorded.to_string(),
            correct: answer.correct,
            tied: answer.tied,
            normalized: answer.normalized,
            distances: answer.distances.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(";"),
        }
    }
}

impl TaskReport
{
    pub fn new(model: &str, score: &TaskScore, policy: TiePolicy, at: DateTime<Local>) -> Self
    {
        // The default datetime.to_string() includes fractional seconds and the timezone.
        let timestamp = at.format("%Y-%m-%d %H:%M:%S").to_string();
        let safe_model: String = model.chars().map(|c| if c == '/' || c == '\\' { '_' } else { c }).collect();
        let file_stem = format!("{}_{}_{}", safe_model, score.task.name(), at.format("%Y%m%dT%H%M%S"));

        TaskReport {
            model: model.to_string(),
            task: score.task,
            timestamp,
            tie_policy: policy,
            correct: score.correct,
            total: score.total,
            accuracy: score.accuracy(),
            same_different: score.same_different.clone(),
            answers: score.answers.clone(),
            file_stem,
        }
    }

    pub fn summary_line(&self) -> String
    {
        format!("{} correct: {} / {}", self.task, self.correct, self.total)
    }

    pub fn write_answers_csv<W: Write>(&self, writer: W) -> Result<()>
    {
        let mut writer = csv::Writer::from_writer(writer);
        for answer in &self.answers {
            writer.serialize(AnswerRow::from(answer))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes `<model>_<task>_<timestamp>.json` and `.csv` into `dir`, creating it if needed.
    /// Returns the two paths.
    pub fn write(&self, dir: &Path) -> Result<(PathBuf, PathBuf)>
    {
        fs::create_dir_all(dir)?;
        let json_path = dir.join(format!("{}.json", self.file_stem));
        let csv_path = dir.join(format!("{}.csv", self.file_stem));

        fs::write(&json_path, serde_json::to_string_pretty(self)?)?;
        self.write_answers_csv(fs::File::create(&csv_path)?)?;

        Ok((json_path, csv_path))
    }
}
