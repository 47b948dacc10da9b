/// Decision rules that turn trial distances into choices, and the scoring of whole trial sets.
///
/// Each task compares Euclidean distances between the representations of the images in a trial:
///
/// - same/different: the distance of every trial in the batch is min-max normalized,
///   and a normalized distance below `SAME_DIFFERENT_THRESHOLD` is judged "same".
/// - 3AFC: the candidate nearest the target is chosen.
/// - oddball: the image outside the closest pair is the odd one out.
/// - exemplar learning: of the target and the two foils, the image nearest any of the
///   reference images is chosen.
///
/// Exact ties are resolved by an explicit `TiePolicy` and flagged on the answer.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::distance::{is_degenerate, normalize_min_max};
use crate::error::{Error, Result};
use crate::representations::RepresentationSet;
use crate::tasks::TaskKind;
use crate::trials::{Choice, Stimuli, Trial};

pub const SAME_DIFFERENT_THRESHOLD: f32 = 0.5;

/// Which candidate wins when several share the smallest distance.
/// Candidates are ordered as presented: candidates 1..3, images 1..3 (via their
/// pairs d12, d13, d23), and target, foil1, foil2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy
{
    #[default]
    FirstListed,
    LastListed,
}

/// A decision among candidates: the 0-based index of the winner and whether it was tied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision
{
    pub index: usize,
    pub tied: bool,
}

/// Picks the smallest value. Returns None for an empty slice.
pub fn pick_min(values: &[f32], policy: TiePolicy) -> Option<Decision>
{
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let mut minima = values.iter().enumerate().filter(|(_, v)| **v == min).map(|(i, _)| i);
    let first = minima.next()?;
    let last = minima.last();
    let index = match (policy, last)
    {
        (TiePolicy::LastListed, Some(last)) => last,
        _ => first,
    };
    Some(Decision { index, tied: last.is_some() })
}

/// 3AFC: choose the candidate with the minimum distance to the target.
/// `distances` holds the target's distance to candidates 1, 2 and 3.
pub fn choose_nearest(distances: [f32; 3], policy: TiePolicy) -> (Choice, bool)
{
    // A non-empty slice always yields a decision.
    let decision = pick_min(&distances, policy).unwrap_or(Decision { index: 0, tied: false });
    (Choice::Position(decision.index as u8 + 1), decision.tied)
}

/// Oddball: `pairs` holds (d12, d13, d23). The closest pair are the two similar images,
/// so the image not in that pair is chosen.
pub fn choose_oddball(pairs: [f32; 3], policy: TiePolicy) -> (Choice, bool)
{
    const ODD_ONE_OUT: [u8; 3] = [3, 2, 1];
    let decision = pick_min(&pairs, policy).unwrap_or(Decision { index: 0, tied: false });
    (Choice::Position(ODD_ONE_OUT[decision.index]), decision.tied)
}

/// Exemplar learning: `minima` holds the smallest distance from the target, foil1 and foil2
/// to any reference image. The image closest to the references is chosen.
pub fn choose_exemplar(minima: [f32; 3], policy: TiePolicy) -> (Choice, bool)
{
    const CHOICES: [Choice; 3] = [Choice::Target, Choice::Foil1, Choice::Foil2];
    let decision = pick_min(&minima, policy).unwrap_or(Decision { index: 0, tied: false });
    (CHOICES[decision.index], decision.tied)
}

/// Same/different: classify one already-normalized distance.
pub fn classify_same_different(normalized: f32) -> Choice
{
    if normalized < SAME_DIFFERENT_THRESHOLD {
        Choice::Same
    } else {
        Choice::Different
    }
}

/// The outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer
{
    pub trial: usize,
    pub choice: Choice,
    pub recorded: Choice,
    pub correct: bool,
    pub tied: bool,
    /// The distances the decision was made on, in candidate order.
    pub distances: Vec<f32>,
    /// Same/different only: the trial's distance after batch normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<f32>,
}

/// Mean normalized distance of correctly and incorrectly judged same/different trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SameDifferentSummary
{
    pub mean_normalized_correct: Option<f32>,
    pub mean_normalized_incorrect: Option<f32>,
    /// Every trial had the same raw distance, so normalization had no range.
    pub degenerate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScore
{
    pub task: TaskKind,
    pub correct: usize,
    pub total: usize,
    pub answers: Vec<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_different: Option<SameDifferentSummary>,
}

impl TaskScore
{
    pub fn accuracy(&self) -> Option<f64>
    {
        if self.total == 0 {
            return None;
        }
        Some(self.correct as f64 / self.total as f64)
    }

    fn from_answers(task: TaskKind, answers: Vec<Answer>) -> Self
    {
        let correct = answers.iter().filter(|a| a.correct).count();
        TaskScore { task, correct, total: answers.len(), answers, same_different: None }
    }
}

/// Every image referenced by `trials` that has no representation, in trial order without repeats.
pub fn missing_images<'a>(trials: &'a [Trial], representations: &RepresentationSet) -> Vec<&'a str>
{
    let mut missing: Vec<&str> = Vec::new();
    for trial in trials
    {
        for image in trial.stimuli.image_names()
        {
            if !representations.contains(image) && !missing.contains(&image) {
                missing.push(image);
            }
        }
    }
    missing
}

/// Scores every trial of a task against one model's representations.
///
/// Fails on the first trial that references an image without a representation,
/// or on a trial whose stimuli don't belong to `task`.
pub fn score_trials(task: TaskKind, trials: &[Trial], representations: &RepresentationSet, policy: TiePolicy) -> Result<TaskScore>
{
    let score = match task
    {
        TaskKind::SameDifferent => score_same_different(trials, representations)?,
        _ => {
            let answers = trials
                .iter()
                .map(|trial| score_single(task, trial, representations, policy))
                .collect::<Result<Vec<Answer>>>()?;
            TaskScore::from_answers(task, answers)
        },
    };

    info!("{} correct: {} / {}", task, score.correct, score.total);
    Ok(score)
}

fn score_single(task: TaskKind, trial: &Trial, reps: &RepresentationSet, policy: TiePolicy) -> Result<Answer>
{
    let n = trial.number;
    let (choice, tied, distances) = match (task, &trial.stimuli)
    {
        (TaskKind::ThreeAfc, Stimuli::ThreeAfc { target, candidates }) => {
            let distances = [
                reps.distance(target, &candidates[0], n)?,
                reps.distance(target, &candidates[1], n)?,
                reps.distance(target, &candidates[2], n)?,
            ];
            let (choice, tied) = choose_nearest(distances, policy);
            (choice, tied, distances.to_vec())
        },
        (TaskKind::Oddball, Stimuli::Oddball { images: [first, second, third] }) => {
            let pairs = [
                reps.distance(first, second, n)?,
                reps.distance(first, third, n)?,
                reps.distance(second, third, n)?,
            ];
            let (choice, tied) = choose_oddball(pairs, policy);
            (choice, tied, pairs.to_vec())
        },
        (TaskKind::ExemplarLearning, Stimuli::ExemplarLearning { target, foils, references }) => {
            if references.is_empty() {
                return Err(Error::MalformedRow { row: n, reason: "no reference images configured".to_string() });
            }
            let nearest_reference = |image: &str| -> Result<f32> {
                references.iter().try_fold(f32::INFINITY, |min, reference| {
                    Ok::<f32, Error>(min.min(reps.distance(reference, image, n)?))
                })
            };
            let minima = [
                nearest_reference(target)?,
                nearest_reference(&foils[0])?,
                nearest_reference(&foils[1])?,
            ];
            let (choice, tied) = choose_exemplar(minima, policy);
            (choice, tied, minima.to_vec())
        },
        _ => return Err(mismatched(task, trial)),
    };

    let correct = choice == trial.recorded;
    debug!("Trial {}: chose {} (recorded {}), distances {:?}", n, choice, trial.recorded, distances);
    Ok(Answer { trial: n, choice, recorded: trial.recorded, correct, tied, distances, normalized: None })
}

fn score_same_different(trials: &[Trial], reps: &RepresentationSet) -> Result<TaskScore>
{
    // Every distance is needed before any trial can be classified.
    let raw = trials
        .iter()
        .map(|trial| match &trial.stimuli
        {
            Stimuli::SameDifferent { first, second } => reps.distance(first, second, trial.number),
            _ => Err(mismatched(TaskKind::SameDifferent, trial)),
        })
        .collect::<Result<Vec<f32>>>()?;

    let degenerate = trials.len() > 1 && is_degenerate(&raw);
    if degenerate {
        warn!("All {} same/different distances are equal; every trial normalizes to 0", raw.len());
    }
    let normalized = normalize_min_max(&raw);

    let answers: Vec<Answer> = trials
        .iter()
        .zip(raw.iter().zip(normalized.iter()))
        .map(|(trial, (&distance, &norm))| {
            let choice = classify_same_different(norm);
            let correct = choice == trial.recorded;
            debug!("Trial {}: normalized {} -> {} (recorded {})", trial.number, norm, choice, trial.recorded);
            Answer {
                trial: trial.number,
                choice,
                recorded: trial.recorded,
                correct,
                tied: false,
                distances: vec![distance],
                normalized: Some(norm),
            }
        })
        .collect();

    let mean = |correct: bool| -> Option<f32> {
        let values: Vec<f32> = answers.iter().filter(|a| a.correct == correct).filter_map(|a| a.normalized).collect();
        (!values.is_empty()).then(|| values.iter().sum::<f32>() / values.len() as f32)
    };
    let summary = SameDifferentSummary {
        mean_normalized_correct: mean(true),
        mean_normalized_incorrect: mean(false),
        degenerate,
    };

    let mut score = TaskScore::from_answers(TaskKind::SameDifferent, answers);
    score.same_different = Some(summary);
    Ok(score)
}

fn mismatched(task: TaskKind, trial: &Trial) -> Error
{
    Error::MalformedRow { row: trial.number, reason: format!("trial stimuli do not match task {}", task) }
}
