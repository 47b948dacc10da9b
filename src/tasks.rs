/// Task kinds and the column layouts of their trial files.
///
/// Each task has a fixed CSV shape. Rather than hardcoding column positions at the
/// point of parsing, every layout is described by a `TrialLayout` which is passed
/// explicitly to the parser and can be overridden from the run configuration.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::preprocessing::StimulusCrop;

/// The six reference images shown during the exemplar learning phase.
pub const DEFAULT_EXEMPLAR_REFERENCES: [&str; 6] = [
    "nz1_4_a.tif",
    "nz1_12_b.tif",
    "nz1_30_a.tif",
    "nz1_75_a.tif",
    "nz1_70_b.tif",
    "nz1_77_b.tif",
];

pub const DEFAULT_IMAGE_PATTERN: &str = "trial{trial}-{slot}.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind
{
    SameDifferent,
    ThreeAfc,
    Oddball,
    ExemplarLearning,
}

impl TaskKind
{
    pub const ALL: [TaskKind; 4] = [
        TaskKind::SameDifferent,
        TaskKind::ThreeAfc,
        TaskKind::Oddball,
        TaskKind::ExemplarLearning,
    ];

    pub fn name(&self) -> &'static str
    {
        match self
        {
            TaskKind::SameDifferent => "same_different",
            TaskKind::ThreeAfc => "three_afc",
            TaskKind::Oddball => "oddball",
            TaskKind::ExemplarLearning => "exemplar_learning",
        }
    }
}

impl Display for TaskKind
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TaskKind
{
    type Err = Error;

    /// Accepts the canonical names as well as the short tags used by older trial runs
    /// (e.g. `same_diff`, `3ACF`, `many_odd`, `learn_exemp`).
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str()
        {
            "same_different" | "same_diff" | "sd" => Ok(TaskKind::SameDifferent),
            "three_afc" | "3afc" | "3acf" | "choose_3" => Ok(TaskKind::ThreeAfc),
            "oddball" | "many_odd" | "many_oddball" => Ok(TaskKind::Oddball),
            "exemplar_learning" | "learn_exemp" | "learning_exemplar" => Ok(TaskKind::ExemplarLearning),
            _ => Err(Error::UnknownTask(s.to_string())),
        }
    }
}

/// A CSV column position. Negative values count from the end of the row,
/// so `-1` is the last column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Column(pub isize);

impl Column
{
    /// Resolves the column against a row of `len` fields.
    pub fn resolve(&self, len: usize) -> Option<usize>
    {
        if self.0 >= 0 {
            let idx = self.0 as usize;
            (idx < len).then_some(idx)
        } else {
            len.checked_sub(self.0.unsigned_abs())
        }
    }
}

impl Display for Column
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Rewrites an image name's extension, e.g. trial files list `.jpg` names
/// but the stimuli on disk are `.tif`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRename
{
    pub from: String,
    pub to: String,
}

impl ExtensionRename
{
    pub fn apply(&self, name: &str) -> String
    {
        name.replace(&self.from, &self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TrialLayout
{
    /// Two images named in the row, and a recorded same/diff label.
    SameDifferent
    {
        first_image_column: Column,
        second_image_column: Column,
        answer_column: Column,
        #[serde(default)]
        rename_extension: Option<ExtensionRename>,
    },
    /// Three candidates and a target. Image names are generated from the trial number.
    ThreeAfc
    {
        answer_column: Column,
        image_pattern: String,
        target_slot: String,
    },
    /// Three images, one of which is the odd one out. Names are generated from the trial number.
    Oddball
    {
        answer_column: Column,
        image_pattern: String,
    },
    /// A target and two foils named in the row, compared against a fixed set of references.
    ExemplarLearning
    {
        target_column: Column,
        foil_columns: [Column; 2],
        answer_column: Column,
        image_suffix: String,
        references: Vec<String>,
    },
}

impl TrialLayout
{
    pub fn default_for(kind: TaskKind) -> Self
    {
        match kind
        {
            TaskKind::SameDifferent => TrialLayout::SameDifferent {
                first_image_column: Column(5),
                second_image_column: Column(6),
                answer_column: Column(2),
                rename_extension: Some(ExtensionRename { from: ".jpg".to_string(), to: ".tif".to_string() }),
            },
            TaskKind::ThreeAfc => TrialLayout::ThreeAfc {
                answer_column: Column(1),
                image_pattern: DEFAULT_IMAGE_PATTERN.to_string(),
                target_slot: "target".to_string(),
            },
            TaskKind::Oddball => TrialLayout::Oddball {
                answer_column: Column(1),
                image_pattern: DEFAULT_IMAGE_PATTERN.to_string(),
            },
            TaskKind::ExemplarLearning => TrialLayout::ExemplarLearning {
                target_column: Column(2),
                foil_columns: [Column(-2), Column(-1)],
                answer_column: Column(3),
                image_suffix: ".tif".to_string(),
                references: DEFAULT_EXEMPLAR_REFERENCES.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    pub fn kind(&self) -> TaskKind
    {
        match self
        {
            TrialLayout::SameDifferent { .. } => TaskKind::SameDifferent,
            TrialLayout::ThreeAfc { .. } => TaskKind::ThreeAfc,
            TrialLayout::Oddball { .. } => TaskKind::Oddball,
            TrialLayout::ExemplarLearning { .. } => TaskKind::ExemplarLearning,
        }
    }
}

/// Expands an image name pattern such as `trial{trial}-{slot}.jpg`.
pub fn expand_pattern(pattern: &str, trial: usize, slot: &str) -> String
{
    pattern
        .replace("{trial}", &trial.to_string())
        .replace("{slot}", slot)
}

fn default_true() -> bool
{
    true
}

/// Everything needed to score one task: the layout of its trial file and where its files live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig
{
    #[serde(flatten)]
    pub layout: TrialLayout,
    /// The trial CSV.
    pub trials: PathBuf,
    /// The stimulus directory whose images the trials reference.
    pub images: PathBuf,
    #[serde(default = "default_true")]
    pub has_header: bool,
    /// Skip malformed rows with a warning instead of failing.
    #[serde(default)]
    pub lenient: bool,
    /// Cut applied to this task's stimuli before resizing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<StimulusCrop>,
}

impl TaskConfig
{
    pub fn kind(&self) -> TaskKind
    {
        self.layout.kind()
    }

    /// The task configurations for the standard stimulus sets, laid out under `data_dir`.
    pub fn defaults(data_dir: &std::path::Path) -> Vec<TaskConfig>
    {
        let paths = [
            (TaskKind::SameDifferent, "ziggerins_trials_full.csv", "novset"),
            (TaskKind::ThreeAfc, "3ACF_trials.csv", "3AFCMatching/stimuli_altered"),
            (TaskKind::Oddball, "many_oddball_trials.csv", "ManyObjectsOddball/stimuli"),
            (TaskKind::ExemplarLearning, "learning_exemplar_trials.csv", "novset_lr"),
        ];
        paths.iter().map(|(kind, trials, images)| TaskConfig {
            layout: TrialLayout::default_for(*kind),
            trials: data_dir.join(trials),
            images: data_dir.join(images),
            has_header: true,
            lenient: false,
            // Only the 3AFC match images have a response panel to cut away.
            crop: (*kind == TaskKind::ThreeAfc).then_some(StimulusCrop::THREE_AFC),
        }).collect()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn parses_legacy_task_tags()
    {
        assert_eq!("same_diff".parse::<TaskKind>().unwrap(), TaskKind::SameDifferent);
        assert_eq!("3ACF".parse::<TaskKind>().unwrap(), TaskKind::ThreeAfc);
        assert_eq!("choose_3".parse::<TaskKind>().unwrap(), TaskKind::ThreeAfc);
        assert_eq!("many_odd".parse::<TaskKind>().unwrap(), TaskKind::Oddball);
        assert_eq!("learn_exemp".parse::<TaskKind>().unwrap(), TaskKind::ExemplarLearning);
        assert_eq!("exemplar-learning".parse::<TaskKind>().unwrap(), TaskKind::ExemplarLearning);
    }

    #[test]
    fn unknown_task_tag_is_an_error()
    {
        let err = "matching".parse::<TaskKind>().unwrap_err();
        assert!(matches!(err, Error::UnknownTask(tag) if tag == "matching"));
    }

    #[test]
    fn task_names_round_trip()
    {
        for kind in TaskKind::ALL {
            assert_eq!(kind.name().parse::<TaskKind>().unwrap(), kind);
        }
    }

    #[test]
    fn negative_columns_count_from_the_end()
    {
        assert_eq!(Column(-1).resolve(8), Some(7));
        assert_eq!(Column(-2).resolve(8), Some(6));
        assert_eq!(Column(-9).resolve(8), None);
        assert_eq!(Column(3).resolve(8), Some(3));
        assert_eq!(Column(8).resolve(8), None);
    }

    #[test]
    fn expands_image_patterns()
    {
        assert_eq!(expand_pattern(DEFAULT_IMAGE_PATTERN, 4, "target"), "trial4-target.jpg");
        assert_eq!(expand_pattern(DEFAULT_IMAGE_PATTERN, 12, "2"), "trial12-2.jpg");
    }

    #[test]
    fn task_config_serializes_with_task_tag()
    {
        let config = TaskConfig {
            layout: TrialLayout::default_for(TaskKind::Oddball),
            trials: PathBuf::from("trials.csv"),
            images: PathBuf::from("stimuli"),
            has_header: true,
            lenient: false,
            crop: None,
        };
        let serialized = serde_json::to_value(&config).unwrap();
        assert_eq!(serialized["task"], "oddball");
        assert_eq!(serialized["answer_column"], 1);
        assert!(serialized.get("crop").is_none());
        let deserialized: TaskConfig = serde_json::from_value(serialized).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn only_the_three_afc_stimuli_are_cropped_by_default()
    {
        let defaults = TaskConfig::defaults(std::path::Path::new("data"));
        for config in &defaults
        {
            let expected = (config.kind() == TaskKind::ThreeAfc).then_some(StimulusCrop::THREE_AFC);
            assert_eq!(config.crop, expected, "{}", config.kind());
        }

        let serialized = serde_json::to_value(&defaults[1]).unwrap();
        let deserialized: TaskConfig = serde_json::from_value(serialized).unwrap();
        assert_eq!(deserialized.crop, Some(StimulusCrop::THREE_AFC));
    }

    #[test]
    fn unknown_task_in_config_fails_to_parse()
    {
        let json = r#"{"task": "matching", "trials": "t.csv", "images": "i"}"#;
        assert!(serde_json::from_str::<TaskConfig>(json).is_err());
    }
}
