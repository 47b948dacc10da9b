/// Reading trial definitions out of the task CSV files.
///
/// Rows are turned into `Trial`s according to a `TrialLayout`. Image names are resolved
/// here (generated from patterns or read from columns), but nothing is looked up in the
/// representation set yet; that is the scorer's job.

use std::fmt::{self, Display, Formatter};
use std::io::Read;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tasks::{expand_pattern, Column, TaskConfig, TrialLayout};

/// A predicted or recorded answer to a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice
{
    Same,
    Different,
    /// 1-based candidate or image position (3AFC and oddball).
    Position(u8),
    Target,
    Foil1,
    Foil2,
}

impl Display for Choice
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
    {
        match self
        {
            Choice::Same => write!(f, "same"),
            Choice::Different => write!(f, "diff"),
            Choice::Position(p) => write!(f, "{}", p),
            Choice::Target => write!(f, "target"),
            Choice::Foil1 => write!(f, "foil1"),
            Choice::Foil2 => write!(f, "foil2"),
        }
    }
}

/// The images a trial references, by task shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Stimuli
{
    SameDifferent { first: String, second: String },
    ThreeAfc { target: String, candidates: [String; 3] },
    Oddball { images: [String; 3] },
    ExemplarLearning { target: String, foils: [String; 2], references: Vec<String> },
}

impl Stimuli
{
    /// Every image name this trial needs a representation for.
    pub fn image_names(&self) -> Vec<&str>
    {
        match self
        {
            Stimuli::SameDifferent { first, second } => vec![first.as_str(), second.as_str()],
            Stimuli::ThreeAfc { target, candidates } => {
                std::iter::once(target).chain(candidates.iter()).map(String::as_str).collect()
            },
            Stimuli::Oddball { images } => images.iter().map(String::as_str).collect(),
            Stimuli::ExemplarLearning { target, foils, references } => {
                std::iter::once(target)
                    .chain(foils.iter())
                    .chain(references.iter())
                    .map(String::as_str)
                    .collect()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial
{
    /// 1-based number of the trial among the data rows of its file.
    pub number: usize,
    pub stimuli: Stimuli,
    pub recorded: Choice,
}

/// Reads every trial of a task from its configured CSV file.
pub fn load_trials(config: &TaskConfig) -> Result<Vec<Trial>>
{
    let file = std::fs::File::open(&config.trials)?;
    read_trials(file, config)
}

/// Reads trials from any CSV source, using the layout and leniency of `config`.
pub fn read_trials<R: Read>(source: R, config: &TaskConfig) -> Result<Vec<Trial>>
{
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(config.has_header)
        .flexible(true)
        .from_reader(source);

    let mut trials = Vec::new();
    for (idx, record) in reader.records().enumerate()
    {
        let number = idx + 1;
        let record = record?;
        let fields: Vec<&str> = record.iter().collect();
        match parse_row(&config.layout, number, &fields)
        {
            Ok(trial) => trials.push(trial),
            Err(e @ Error::MalformedRow { .. }) if config.lenient => {
                warn!("Skipping trial {} of {:?}: {}", number, config.trials, e);
            },
            Err(e) => return Err(e),
        }
    }

    Ok(trials)
}

/// Parses one data row. `number` is the 1-based data row number, which also names
/// the generated stimuli for pattern-based layouts.
pub fn parse_row(layout: &TrialLayout, number: usize, fields: &[&str]) -> Result<Trial>
{
    let field = |column: &Column| -> Result<&str> {
        column.resolve(fields.len())
            .map(|idx| fields[idx].trim())
            .ok_or_else(|| malformed(number, format!("missing column {} (row has {} fields)", column, fields.len())))
    };

    match layout
    {
        TrialLayout::SameDifferent { first_image_column, second_image_column, answer_column, rename_extension } => {
            let rename = |name: &str| match rename_extension {
                Some(ext) => ext.apply(name),
                None => name.to_string(),
            };
            let first = rename(field(first_image_column)?);
            let second = rename(field(second_image_column)?);
            let recorded = parse_same_different(field(answer_column)?)
                .ok_or_else(|| malformed(number, "recorded answer is not same/diff or 1/2".to_string()))?;
            Ok(Trial { number, stimuli: Stimuli::SameDifferent { first, second }, recorded })
        },
        TrialLayout::ThreeAfc { answer_column, image_pattern, target_slot } => {
            let recorded = parse_position(field(answer_column)?)
                .ok_or_else(|| malformed(number, "recorded answer is not a candidate in 1..=3".to_string()))?;
            let stimuli = Stimuli::ThreeAfc {
                target: expand_pattern(image_pattern, number, target_slot),
                candidates: [1, 2, 3].map(|slot| expand_pattern(image_pattern, number, &slot.to_string())),
            };
            Ok(Trial { number, stimuli, recorded })
        },
        TrialLayout::Oddball { answer_column, image_pattern } => {
            let recorded = parse_position(field(answer_column)?)
                .ok_or_else(|| malformed(number, "recorded answer is not an image in 1..=3".to_string()))?;
            let stimuli = Stimuli::Oddball {
                images: [1, 2, 3].map(|slot| expand_pattern(image_pattern, number, &slot.to_string())),
            };
            Ok(Trial { number, stimuli, recorded })
        },
        TrialLayout::ExemplarLearning { target_column, foil_columns, answer_column, image_suffix, references } => {
            let target = format!("{}{}", field(target_column)?, image_suffix);
            let foil1 = format!("{}{}", field(&foil_columns[0])?, image_suffix);
            let foil2 = format!("{}{}", field(&foil_columns[1])?, image_suffix);
            let recorded = parse_exemplar(field(answer_column)?)
                .ok_or_else(|| malformed(number, "recorded answer is not target/foil1/foil2 or 1..=3".to_string()))?;
            let stimuli = Stimuli::ExemplarLearning {
                target,
                foils: [foil1, foil2],
                references: references.clone(),
            };
            Ok(Trial { number, stimuli, recorded })
        },
    }
}

fn malformed(row: usize, reason: String) -> Error
{
    Error::MalformedRow { row, reason }
}

fn parse_same_different(value: &str) -> Option<Choice>
{
    match value.to_ascii_lowercase().as_str()
    {
        "same" | "1" => Some(Choice::Same),
        "diff" | "different" | "2" => Some(Choice::Different),
        _ => None,
    }
}

fn parse_position(value: &str) -> Option<Choice>
{
    // Some exports write the index as a float, e.g. "2.0".
    let position = value.parse::<u8>().ok()
        .or_else(|| value.parse::<f32>().ok().filter(|v| v.fract() == 0.0).map(|v| v as u8))?;
    (1..=3).contains(&position).then_some(Choice::Position(position))
}

fn parse_exemplar(value: &str) -> Option<Choice>
{
    match value.to_ascii_lowercase().as_str()
    {
        "target" | "1" => Some(Choice::Target),
        "foil1" | "2" => Some(Choice::Foil1),
        "foil2" | "3" => Some(Choice::Foil2),
        _ => None,
    }
}

#[cfg(test)]
mod tests
{
    use std::path::PathBuf;

    use crate::tasks::{TaskKind, DEFAULT_EXEMPLAR_REFERENCES};

    use super::*;

    fn config(kind: TaskKind, lenient: bool) -> TaskConfig
    {
        TaskConfig {
            layout: TrialLayout::default_for(kind),
            trials: PathBuf::from("trials.csv"),
            images: PathBuf::from("stimuli"),
            has_header: true,
            lenient,
            crop: None,
        }
    }

    #[test]
    fn same_different_rows_rename_extensions()
    {
        let csv = "subj,block,CorrRes,rt,resp,img1,img2\n\
                   1,1,same,0.5,1,a.jpg,b.jpg\n\
                   1,1,2,0.7,2,c.jpg,d.jpg\n";
        let trials = read_trials(csv.as_bytes(), &config(TaskKind::SameDifferent, false)).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[0].stimuli, Stimuli::SameDifferent { first: "a.tif".into(), second: "b.tif".into() });
        assert_eq!(trials[0].recorded, Choice::Same);
        assert_eq!(trials[1].recorded, Choice::Different);
        assert_eq!(trials[1].number, 2);
    }

    #[test]
    fn three_afc_names_come_from_the_trial_number()
    {
        let csv = "trial,CorrRes\n1,3\n2,1\n";
        let trials = read_trials(csv.as_bytes(), &config(TaskKind::ThreeAfc, false)).unwrap();
        assert_eq!(trials[1].recorded, Choice::Position(1));
        match &trials[1].stimuli
        {
            Stimuli::ThreeAfc { target, candidates } => {
                assert_eq!(target, "trial2-target.jpg");
                assert_eq!(candidates[2], "trial2-3.jpg");
            },
            other => panic!("unexpected stimuli {:?}", other),
        }
    }

    #[test]
    fn oddball_accepts_float_indices()
    {
        let csv = "trial,CorrRes\n1,2.0\n";
        let trials = read_trials(csv.as_bytes(), &config(TaskKind::Oddball, false)).unwrap();
        assert_eq!(trials[0].recorded, Choice::Position(2));
        assert_eq!(trials[0].stimuli.image_names(), vec!["trial1-1.jpg", "trial1-2.jpg", "trial1-3.jpg"]);
    }

    #[test]
    fn exemplar_rows_use_trailing_foil_columns()
    {
        let csv = "subj,block,target,CorrRes,foilA,foilB\n1,1,nz1_9_a,target,nz1_40_b,nz1_41_a\n";
        let trials = read_trials(csv.as_bytes(), &config(TaskKind::ExemplarLearning, false)).unwrap();
        match &trials[0].stimuli
        {
            Stimuli::ExemplarLearning { target, foils, references } => {
                assert_eq!(target, "nz1_9_a.tif");
                assert_eq!(foils, &["nz1_40_b.tif".to_string(), "nz1_41_a.tif".to_string()]);
                assert_eq!(references.len(), DEFAULT_EXEMPLAR_REFERENCES.len());
            },
            other => panic!("unexpected stimuli {:?}", other),
        }
        assert_eq!(trials[0].recorded, Choice::Target);
        assert_eq!(trials[0].stimuli.image_names().len(), 9);
    }

    #[test]
    fn malformed_answer_fails_in_strict_mode()
    {
        let csv = "trial,CorrRes\n1,left\n";
        let err = read_trials(csv.as_bytes(), &config(TaskKind::ThreeAfc, false)).unwrap_err();
        assert!(matches!(err, Error::MalformedRow { row: 1, .. }));
    }

    #[test]
    fn lenient_mode_skips_malformed_rows()
    {
        let csv = "trial,CorrRes\n1,left\n2,4\n3,2\n";
        let trials = read_trials(csv.as_bytes(), &config(TaskKind::ThreeAfc, true)).unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].number, 3);
    }

    #[test]
    fn short_rows_are_malformed()
    {
        let csv = "a,b,c\n1,2,3\n";
        let err = read_trials(csv.as_bytes(), &config(TaskKind::SameDifferent, false)).unwrap_err();
        assert!(matches!(err, Error::MalformedRow { row: 1, .. }));
    }

    #[test]
    fn load_trials_reads_from_disk()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trials.csv");
        std::fs::write(&path, "trial,CorrRes\n1,1\n2,2\n").unwrap();
        let mut config = config(TaskKind::Oddball, false);
        config.trials = path;
        let trials = load_trials(&config).unwrap();
        assert_eq!(trials.len(), 2);
    }
}
