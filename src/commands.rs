use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use log::{info, warn};

use crate::catalog::{Catalog, ModelSpec};
use crate::config::RunConfig;
use crate::db::{self, DbPool};
use crate::extraction::{extract_representations, Model, ModelDescription, RepresentationModel};
use crate::models::{ScoringRun, TrialAnswer};
use crate::preprocessing::StimulusCrop;
use crate::queries;
use crate::report::TaskReport;
use crate::representations::RepresentationSet;
use crate::scoring::{missing_images, score_trials};
use crate::tasks::{TaskConfig, TaskKind, TrialLayout};
use crate::trials::load_trials;
use crate::uuid::UUID;

/// Everything a command needs: the run configuration, the model catalogs, and the store.
pub struct Workspace
{
    pub config: RunConfig,
    pub catalog: Catalog,
    pub pool: DbPool,
}

/// How a model is picked on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelector
{
    Name(String),
    /// Position in the catalog's model list, as used by array batch jobs.
    Index(usize),
}

impl Workspace
{
    /// `database` overrides the configured store path.
    pub fn open(config: RunConfig, database: Option<PathBuf>) -> anyhow::Result<Self>
    {
        let db_path = match database.or_else(|| config.database.clone())
        {
            Some(path) => path,
            None => db::default_db_path()?,
        };
        let pool = db::init(&db_path).context("Unable to open the results database")?;
        let catalog = Catalog::load(&config.catalogs).context("Unable to load model catalogs")?;
        Ok(Workspace { config, catalog, pool })
    }

    /// A model's name. Names are taken as given, so models outside the catalogs can be
    /// scored from a vectors file.
    pub fn model_name(&self, selector: &ModelSelector) -> anyhow::Result<String>
    {
        match selector
        {
            ModelSelector::Name(name) => Ok(name.clone()),
            ModelSelector::Index(index) => Ok(self.catalog.model_at(*index, &self.config.excluded_models)?),
        }
    }

    pub fn resolve_model(&self, selector: &ModelSelector) -> anyhow::Result<ModelSpec>
    {
        let name = self.model_name(selector)?;
        Ok(self.catalog.find_model(&name)?)
    }

    /// The configured task, with its trial file optionally replaced.
    /// A task missing from the configuration falls back to its default layout,
    /// which then needs an explicit trial file.
    pub fn task_config(&self, kind: TaskKind, trials: Option<PathBuf>) -> anyhow::Result<TaskConfig>
    {
        let mut config = match (self.config.task(kind), &trials)
        {
            (Some(config), _) => config.clone(),
            (None, Some(path)) => TaskConfig {
                layout: TrialLayout::default_for(kind),
                trials: path.clone(),
                images: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                has_header: true,
                lenient: false,
                crop: None,
            },
            (None, None) => anyhow::bail!("Task {} is not configured; pass a trial file", kind),
        };
        if let Some(path) = trials {
            config.trials = path;
        }
        Ok(config)
    }

    /// The crop of the configured task whose stimuli live in `images`, if any.
    pub fn crop_for(&self, images: &Path) -> Option<StimulusCrop>
    {
        let key = image_set_key(images);
        self.config.tasks
            .iter()
            .find(|task| image_set_key(&task.images) == key)
            .and_then(|task| task.crop)
    }
}

/// The store key of a stimulus directory: its canonical path, so every spelling of one
/// directory finds the same vectors. Directories that don't exist are normalized lexically.
fn image_set_key(images: &Path) -> String
{
    let path = fs::canonicalize(images).unwrap_or_else(|_| normalize_lexically(images));
    path.to_string_lossy().into_owned()
}

fn normalize_lexically(path: &Path) -> PathBuf
{
    let absolute = match env::current_dir()
    {
        Ok(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    let mut normalized = PathBuf::new();
    for component in absolute.components()
    {
        match component
        {
            Component::CurDir => {},
            Component::ParentDir => {
                normalized.pop();
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// Runs every image of `images` through a loaded model and stores the vectors. Returns the count stored.
/// The vectors are also written to `save_json` when given, in the format `score --vectors` reads.
pub fn extract_with<M: RepresentationModel>(
    workspace: &Workspace,
    model: &M,
    model_name: &str,
    images: &Path,
    batch_size: usize,
    save_json: Option<&Path>,
) -> anyhow::Result<usize>
{
    info!("Extracting {} representations of {:?}", model_name, images);
    let now = std::time::Instant::now();
    let vectors = extract_representations(model, images, batch_size, workspace.crop_for(images))?;

    if let Some(path) = save_json {
        let set = RepresentationSet::from_pairs(vectors.iter().cloned())?;
        set.save_json(path).with_context(|| format!("Unable to write representations to {:?}", path))?;
        info!("Wrote {} vectors to {:?}", set.len(), path);
    }

    let mut connection = db::get_db_connection(&workspace.pool)?;
    let stored = queries::insert_representations(model_name, &image_set_key(images), &vectors, &mut connection)?;
    info!("Stored {} vectors for {} in {:?}", stored, model_name, now.elapsed());
    Ok(stored)
}

pub fn extract(workspace: &Workspace, spec: &ModelSpec, images: &Path, batch_size: usize, save_json: Option<&Path>) -> anyhow::Result<usize>
{
    let model = Model::load(spec).with_context(|| format!("Unable to load model {}", spec.name))?;
    extract_with(workspace, &model, &spec.name, images, batch_size, save_json)
}

/// Scores a task against already available representations, writes its report, and records the run.
/// Nothing is recorded unless the report was written.
pub fn score_with(workspace: &Workspace, model_name: &str, task: &TaskConfig, representations: &RepresentationSet, output: &Path) -> anyhow::Result<TaskReport>
{
    let trials = load_trials(task).with_context(|| format!("Unable to read trials from {:?}", task.trials))?;

    let missing = missing_images(&trials, representations);
    if !missing.is_empty() {
        anyhow::bail!(
            "{} images referenced by {:?} have no {} representation: {}",
            missing.len(),
            task.trials,
            model_name,
            missing.join(", ")
        );
    }

    let policy = workspace.config.tie_policy;
    let score = score_trials(task.kind(), &trials, representations, policy)?;

    let report = TaskReport::new(model_name, &score, policy, Local::now());
    let (json, csv) = report.write(output).with_context(|| format!("Unable to write the report to {:?}", output))?;
    info!("Wrote {:?} and {:?}", json, csv);

    let mut connection = db::get_db_connection(&workspace.pool)?;
    let run_id = queries::insert_scoring_run(model_name, &score, &mut connection)?;
    info!("Recorded {} for {} as run {}", task.kind(), model_name, run_id);
    Ok(report)
}

/// Scores one task. Representations come from `vectors` (a JSON file) when given,
/// otherwise from the store. Returns None when the model was already scored on the
/// task and `force` is false.
pub fn score(workspace: &Workspace, model_name: &str, task: &TaskConfig, vectors: Option<&Path>, output: &Path, force: bool) -> anyhow::Result<Option<TaskReport>>
{
    let mut connection = db::get_db_connection(&workspace.pool)?;
    if !force && queries::has_scoring_run(model_name, task.kind().name(), &mut connection)? {
        info!("Already have {} for {}, skipping", task.kind(), model_name);
        return Ok(None);
    }

    let representations = match vectors
    {
        Some(path) => RepresentationSet::load_json(path)
            .with_context(|| format!("Unable to read representations from {:?}", path))?,
        None => queries::load_representations(model_name, &image_set_key(&task.images), &mut connection)?,
    };
    drop(connection);
    if representations.is_empty() {
        anyhow::bail!("No representations of {:?} are stored for {}; run extract first", task.images, model_name);
    }

    score_with(workspace, model_name, task, &representations, output).map(Some)
}

/// Extracts and scores each task in turn. The model is loaded once, on the first
/// task that isn't already scored.
pub fn run(workspace: &Workspace, spec: &ModelSpec, kinds: &[TaskKind], force: bool) -> anyhow::Result<Vec<TaskReport>>
{
    let mut model: Option<Model> = None;
    let mut reports = Vec::new();
    for kind in kinds
    {
        let Some(task) = workspace.config.task(*kind) else {
            warn!("Task {} is not configured, skipping", kind);
            continue;
        };

        let mut connection = db::get_db_connection(&workspace.pool)?;
        if !force && queries::has_scoring_run(&spec.name, kind.name(), &mut connection)? {
            info!("Already have {} for {}, skipping", kind, spec.name);
            continue;
        }
        drop(connection);

        if model.is_none() {
            model = Some(Model::load(spec).with_context(|| format!("Unable to load model {}", spec.name))?);
        }
        let Some(loaded) = model.as_ref() else { continue };

        let vectors = extract_representations(loaded, &task.images, workspace.config.batch_size, task.crop)?;
        let mut connection = db::get_db_connection(&workspace.pool)?;
        queries::insert_representations(&spec.name, &image_set_key(&task.images), &vectors, &mut connection)?;
        drop(connection);

        let representations = RepresentationSet::from_pairs(vectors)?;
        let report = score_with(workspace, &spec.name, task, &representations, &workspace.config.output_dir)?;
        reports.push(report);
    }
    Ok(reports)
}

pub fn describe(spec: &ModelSpec) -> anyhow::Result<ModelDescription>
{
    let model = Model::load(spec).with_context(|| format!("Unable to load model {}", spec.name))?;
    Ok(model.describe())
}

/// Catalog models with their batch indices and the number of vectors stored for each.
pub fn list_models(workspace: &Workspace) -> anyhow::Result<Vec<(usize, String, i64)>>
{
    let mut connection = db::get_db_connection(&workspace.pool)?;
    workspace.catalog
        .model_names(&workspace.config.excluded_models)
        .into_iter()
        .enumerate()
        .map(|(index, name)| -> anyhow::Result<(usize, String, i64)> {
            let stored = queries::count_representations(&name, &mut connection)?;
            Ok((index, name, stored))
        })
        .collect()
}

pub fn results(workspace: &Workspace, model_name: Option<&str>) -> anyhow::Result<Vec<ScoringRun>>
{
    let mut connection = db::get_db_connection(&workspace.pool)?;
    Ok(queries::list_scoring_runs(model_name, &mut connection)?)
}

/// The per-trial answers of one stored run, in trial order.
pub fn trial_answers(workspace: &Workspace, run_id: UUID) -> anyhow::Result<Vec<TrialAnswer>>
{
    let mut connection = db::get_db_connection(&workspace.pool)?;
    let answers = queries::load_trial_answers(run_id, &mut connection)?;
    if answers.is_empty() {
        warn!("Run {} has no stored answers", run_id);
    }
    Ok(answers)
}


#[cfg(test)]
mod tests
{
    use std::fs;

    use image::{DynamicImage, RgbImage};
    use ndarray::Array2;

    use crate::extraction::{ModelSource, TensorLayout};
    use crate::preprocessing::Normalization;
    use crate::scoring::TiePolicy;
    use super::*;

    const ODDBALL_TRIALS: &str = "trial,CorrRes\n1,3\n2,1\n";

    /// Trial 1's odd image is 3; trial 2's is 2, which the recorded answer gets wrong.
    const ODDBALL_VECTORS: &str = r#"{
        "trial1-1.jpg": [0.0, 0.0], "trial1-2.jpg": [0.0, 1.0], "trial1-3.jpg": [9.0, 9.0],
        "trial2-1.jpg": [0.0, 0.0], "trial2-2.jpg": [5.0, 5.0], "trial2-3.jpg": [0.0, 1.0]
    }"#;

    /// Reports each image's width and height less one, which survive JPEG encoding exactly.
    struct SizeModel;

    impl RepresentationModel for SizeModel
    {
        fn load(_spec: &ModelSpec) -> anyhow::Result<Self>
        {
            Ok(SizeModel)
        }

        fn infer(&self, images: &[DynamicImage]) -> anyhow::Result<Array2<f32>>
        {
            let mut output = Array2::zeros((images.len(), 2));
            for (i, image) in images.iter().enumerate()
            {
                output[[i, 0]] = image.width() as f32 - 1.0;
                output[[i, 1]] = image.height() as f32 - 1.0;
            }
            Ok(output)
        }

        fn describe(&self) -> ModelDescription
        {
            ModelDescription {
                name: "size".to_string(),
                source: ModelSource::Timm,
                layout: TensorLayout::ChannelsFirst,
                input_size: (1, 1),
                normalization: Normalization::UNIT,
                output: "size".to_string(),
                session_inputs: vec![],
                session_outputs: vec![],
            }
        }
    }

    /// The images behind ODDBALL_VECTORS, sized so SizeModel reproduces those vectors.
    fn write_oddball_stimuli(dir: &Path)
    {
        fs::create_dir_all(dir).unwrap();
        let sizes = [
            ("trial1-1.jpg", 1, 1), ("trial1-2.jpg", 1, 2), ("trial1-3.jpg", 10, 10),
            ("trial2-1.jpg", 1, 1), ("trial2-2.jpg", 6, 6), ("trial2-3.jpg", 1, 2),
        ];
        for (name, width, height) in sizes
        {
            RgbImage::new(width, height).save(dir.join(name)).unwrap();
        }
    }

    fn workspace(dir: &Path) -> Workspace
    {
        let mut config = RunConfig::with_root(dir);
        config.database = Some(dir.join("store.db"));
        config.tie_policy = TiePolicy::FirstListed;
        for task in config.tasks.iter_mut()
        {
            if task.kind() == TaskKind::Oddball {
                task.trials = dir.join("odd.csv");
                task.images = dir.join("stimuli");
            }
        }
        fs::write(dir.join("odd.csv"), ODDBALL_TRIALS).unwrap();
        fs::write(dir.join("vectors.json"), ODDBALL_VECTORS).unwrap();
        Workspace::open(config, None).unwrap()
    }

    #[test]
    fn score_from_vectors_file_records_and_reports()
    {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let task = workspace.task_config(TaskKind::Oddball, None).unwrap();
        let output = dir.path().join("out");

        let report = score(&workspace, "toy", &task, Some(&dir.path().join("vectors.json")), &output, false)
            .unwrap()
            .unwrap();
        assert_eq!((report.correct, report.total), (1, 2));
        assert_eq!(fs::read_dir(&output).unwrap().count(), 2);

        let runs = results(&workspace, Some("toy")).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].task, "oddball");
    }

    #[test]
    fn already_scored_tasks_are_skipped_unless_forced()
    {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let task = workspace.task_config(TaskKind::Oddball, None).unwrap();
        let vectors = dir.path().join("vectors.json");
        let output = dir.path().join("out");

        assert!(score(&workspace, "toy", &task, Some(&vectors), &output, false).unwrap().is_some());
        assert!(score(&workspace, "toy", &task, Some(&vectors), &output, false).unwrap().is_none());
        assert!(score(&workspace, "toy", &task, Some(&vectors), &output, true).unwrap().is_some());
        assert_eq!(results(&workspace, None).unwrap().len(), 2);
    }

    #[test]
    fn score_uses_stored_vectors_for_the_task_images()
    {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let task = workspace.task_config(TaskKind::Oddball, None).unwrap();

        let set = RepresentationSet::load_json(&dir.path().join("vectors.json")).unwrap();
        let pairs: Vec<(String, Vec<f32>)> = set.names()
            .into_iter()
            .map(|name| (name.to_string(), set.get(name, 0).unwrap().to_vec()))
            .collect();
        let mut connection = db::get_db_connection(&workspace.pool).unwrap();
        queries::insert_representations("toy", &image_set_key(&task.images), &pairs, &mut connection).unwrap();
        drop(connection);

        let report = score(&workspace, "toy", &task, None, &dir.path().join("out"), false).unwrap().unwrap();
        assert_eq!(report.correct, 1);

        let err = score(&workspace, "other", &task, None, &dir.path().join("out"), false).unwrap_err();
        assert!(err.to_string().contains("run extract first"));
    }

    #[test]
    fn unconfigured_task_needs_a_trial_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut workspace = workspace(dir.path());
        workspace.config.tasks.retain(|t| t.kind() != TaskKind::ThreeAfc);

        assert!(workspace.task_config(TaskKind::ThreeAfc, None).is_err());
        let task = workspace.task_config(TaskKind::ThreeAfc, Some(dir.path().join("afc.csv"))).unwrap();
        assert_eq!(task.trials, dir.path().join("afc.csv"));
        assert_eq!(task.images, dir.path());
    }

    #[test]
    fn image_set_keys_ignore_spelling()
    {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("stimuli");
        fs::create_dir(&existing).unwrap();
        assert_eq!(image_set_key(&existing), image_set_key(&dir.path().join("./stimuli/")));
        assert_eq!(image_set_key(&existing), image_set_key(&dir.path().join("stimuli/../stimuli")));

        let missing = Path::new("/no/such/./data/sets/../stimuli/");
        assert_eq!(image_set_key(missing), image_set_key(Path::new("/no/such/data/stimuli")));
        assert!(Path::new(&image_set_key(Path::new("relative/stimuli"))).is_absolute());
    }

    #[test]
    fn extraction_and_scoring_agree_on_how_the_image_dir_is_spelled()
    {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        write_oddball_stimuli(&dir.path().join("stimuli"));

        let trailing_slash = PathBuf::from(format!("{}/", dir.path().join("stimuli").display()));
        let saved = dir.path().join("extracted.json");
        let stored = extract_with(&workspace, &SizeModel, "toy", &trailing_slash, 4, Some(&saved)).unwrap();
        assert_eq!(stored, 6);

        let mut task = workspace.task_config(TaskKind::Oddball, None).unwrap();
        task.images = dir.path().join(".").join("stimuli");
        let report = score(&workspace, "toy", &task, None, &dir.path().join("out"), false).unwrap().unwrap();
        assert_eq!((report.correct, report.total), (1, 2));

        let written = RepresentationSet::load_json(&saved).unwrap();
        assert_eq!(written.len(), 6);
        assert_eq!(written.get("trial1-3.jpg", 1).unwrap().to_vec(), vec![9.0, 9.0]);
    }

    #[test]
    fn failed_report_leaves_the_task_unscored()
    {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let task = workspace.task_config(TaskKind::Oddball, None).unwrap();
        let vectors = dir.path().join("vectors.json");

        // A file where the output directory should be.
        let blocked = dir.path().join("odd.csv");
        assert!(score(&workspace, "toy", &task, Some(&vectors), &blocked, false).is_err());
        assert!(results(&workspace, None).unwrap().is_empty());

        let retried = score(&workspace, "toy", &task, Some(&vectors), &dir.path().join("out"), false).unwrap();
        assert!(retried.is_some());
        assert_eq!(results(&workspace, None).unwrap().len(), 1);
    }

    #[test]
    fn every_missing_image_is_reported_before_scoring()
    {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let task = workspace.task_config(TaskKind::Oddball, None).unwrap();
        let partial = dir.path().join("partial.json");
        fs::write(&partial, r#"{ "trial1-1.jpg": [0.0], "trial1-2.jpg": [1.0], "trial1-3.jpg": [5.0], "trial2-1.jpg": [0.0] }"#).unwrap();

        let err = score(&workspace, "toy", &task, Some(&partial), &dir.path().join("out"), false).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("2 images"), "{}", message);
        assert!(message.ends_with("trial2-2.jpg, trial2-3.jpg"), "{}", message);
        assert!(results(&workspace, None).unwrap().is_empty());
    }

    #[test]
    fn stored_runs_keep_their_answers()
    {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(dir.path());
        let task = workspace.task_config(TaskKind::Oddball, None).unwrap();
        score(&workspace, "toy", &task, Some(&dir.path().join("vectors.json")), &dir.path().join("out"), false).unwrap();

        let runs = results(&workspace, Some("toy")).unwrap();
        let answers = trial_answers(&workspace, runs[0].id).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!((answers[0].trial_number, answers[0].choice.as_str(), answers[0].correct), (1, "3", true));
        assert_eq!((answers[1].choice.as_str(), answers[1].recorded.as_str(), answers[1].correct), ("2", "1", false));

        assert!(trial_answers(&workspace, UUID::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn model_listing_counts_stored_vectors()
    {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("catalogs")).unwrap();
        fs::write(
            dir.path().join("catalogs").join("hubModels_timm.json"),
            r#"{ "toy": { "origin": "timm", "onnx": "toy.onnx" }, "alexnet": { "origin": "timm", "onnx": "alexnet.onnx" } }"#,
        ).unwrap();
        let workspace = workspace(dir.path());
        write_oddball_stimuli(&dir.path().join("stimuli"));
        extract_with(&workspace, &SizeModel, "toy", &dir.path().join("stimuli"), 32, None).unwrap();

        let listing = list_models(&workspace).unwrap();
        assert_eq!(listing, vec![(0, "alexnet".to_string(), 0), (1, "toy".to_string(), 6)]);
    }

    #[test]
    fn only_a_cropping_task_crops_its_stimuli()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut workspace = workspace(dir.path());
        let afc = dir.path().join("afc");
        let other = dir.path().join("other");
        for task in workspace.config.tasks.iter_mut()
        {
            if task.kind() == TaskKind::ThreeAfc {
                task.images = afc.clone();
            }
        }
        for images in [&afc, &other]
        {
            fs::create_dir_all(images).unwrap();
            RgbImage::new(203, 470).save(images.join("trial1-target.jpg")).unwrap();
        }

        assert_eq!(workspace.crop_for(&dir.path().join("./afc/")), Some(StimulusCrop::THREE_AFC));
        assert_eq!(workspace.crop_for(&other), None);

        let saved = dir.path().join("saved.json");
        extract_with(&workspace, &SizeModel, "toy", &afc, 8, Some(&saved)).unwrap();
        let cropped = RepresentationSet::load_json(&saved).unwrap();
        assert_eq!(cropped.get("trial1-target.jpg", 1).unwrap().to_vec(), vec![199.0, 199.0]);

        extract_with(&workspace, &SizeModel, "toy", &other, 8, Some(&saved)).unwrap();
        let untouched = RepresentationSet::load_json(&saved).unwrap();
        assert_eq!(untouched.get("trial1-target.jpg", 1).unwrap().to_vec(), vec![202.0, 469.0]);
    }
}
