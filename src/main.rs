use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::{error, LevelFilter};

use simtrials::commands::{self, ModelSelector, Workspace};
use simtrials::config::{self, RunConfig};
use simtrials::tasks::TaskKind;
use simtrials::uuid::UUID;

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Warn;

const LOG_FILENAME: &str = "simtrials.log";

/// Score neural network image representations against psychophysical trials.
#[derive(Parser)]
#[command(name = "simtrials", version, about)]
struct Cli
{
    /// Raise the log level; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Run configuration file. Created with defaults when missing.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite store, overriding the configured one.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ModelArgs
{
    /// Model name as listed in the catalogs.
    #[arg(long)]
    model: Option<String>,

    /// Position in the `models` listing.
    #[arg(long)]
    index: Option<usize>,
}

impl ModelArgs
{
    fn selector(&self) -> ModelSelector
    {
        match (&self.model, self.index)
        {
            (_, Some(index)) => ModelSelector::Index(index),
            (Some(name), None) => ModelSelector::Name(name.clone()),
            // clap requires one of the two.
            (None, None) => ModelSelector::Index(0),
        }
    }
}

#[derive(Subcommand)]
enum Command
{
    /// Extract and store a model's representations of every image in a directory
    Extract
    {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long)]
        images: PathBuf,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Also write the vectors to this JSON file, for `score --vectors`.
        #[arg(long)]
        save_json: Option<PathBuf>,
    },
    /// Score one task from stored representations or a vectors file
    Score
    {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long)]
        task: TaskKind,
        /// Trial CSV, replacing the configured one.
        #[arg(long)]
        trials: Option<PathBuf>,
        /// JSON object of image name to feature vector.
        #[arg(long)]
        vectors: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Score again even if this model already has results for the task.
        #[arg(long)]
        force: bool,
    },
    /// Extract each task's stimuli and score them
    Run
    {
        #[command(flatten)]
        model: ModelArgs,
        /// A task name, or `all`.
        #[arg(long, default_value = "all")]
        task: String,
        #[arg(long)]
        force: bool,
    },
    /// Show how a model is loaded and fed
    Describe
    {
        #[arg(long)]
        model: String,
    },
    /// List catalog models with their indices and stored vector counts
    Models,
    /// List stored scoring runs, or the answers of one run
    Results
    {
        #[arg(long, conflicts_with = "run")]
        model: Option<String>,
        /// Run ID as listed by `results`.
        #[arg(long)]
        run: Option<UUID>,
    },
}

fn setup_logging(level: LevelFilter) -> anyhow::Result<()>
{
    let log_dir = dirs::data_local_dir()
        .ok_or(anyhow::anyhow!("Error getting log directory"))?
        .join("simtrials")
        .join("logs");
    fs::create_dir_all(&log_dir)?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_dir.join(LOG_FILENAME))?)
        .apply()?;
    Ok(())
}

fn parse_tasks(value: &str) -> anyhow::Result<Vec<TaskKind>>
{
    if value.eq_ignore_ascii_case("all") {
        return Ok(TaskKind::ALL.to_vec());
    }
    Ok(vec![value.parse()?])
}

fn execute(command: Command, workspace: &Workspace) -> anyhow::Result<()>
{
    match command
    {
        Command::Extract { model, images, batch_size, save_json } => {
            let spec = workspace.resolve_model(&model.selector())?;
            let batch_size = batch_size.unwrap_or(workspace.config.batch_size);
            let stored = commands::extract(workspace, &spec, &images, batch_size, save_json.as_deref())?;
            println!("Stored {} representations for {}", stored, spec.name);
        },
        Command::Score { model, task, trials, vectors, output, force } => {
            let model_name = workspace.model_name(&model.selector())?;
            let task_config = workspace.task_config(task, trials)?;
            let output = output.unwrap_or_else(|| workspace.config.output_dir.clone());
            match commands::score(workspace, &model_name, &task_config, vectors.as_deref(), &output, force)?
            {
                Some(report) => println!("{}", report.summary_line()),
                None => println!("Already have {} for {}", task, model_name),
            }
        },
        Command::Run { model, task, force } => {
            let spec = workspace.resolve_model(&model.selector())?;
            let kinds = parse_tasks(&task)?;
            for report in commands::run(workspace, &spec, &kinds, force)?
            {
                println!("{}", report.summary_line());
            }
        },
        Command::Describe { model } => {
            let spec = workspace.catalog.find_model(&model)?;
            let description = commands::describe(&spec)?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        },
        Command::Models => {
            for (index, name, stored) in commands::list_models(workspace)?
            {
                println!("{}\t{}\t{}", index, name, stored);
            }
        },
        Command::Results { run: Some(run_id), .. } => {
            for answer in commands::trial_answers(workspace, run_id)?
            {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    answer.trial_number, answer.choice, answer.recorded, answer.correct, answer.tied, answer.distances
                );
            }
        },
        Command::Results { model, run: None } => {
            for run in commands::results(workspace, model.as_deref())?
            {
                println!("{}\t{}\t{}\t{}\t{} / {}", run.id, run.scored_at, run.model_name, run.task, run.correct, run.total);
            }
        },
    }
    Ok(())
}

fn main() -> anyhow::Result<()>
{
    let cli = Cli::parse();

    let level = match cli.verbose
    {
        0 => LOG_LEVEL,
        1 => LOG_LEVEL.max(LevelFilter::Info),
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    setup_logging(level)?;

    let config_path = match cli.config
    {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let run_config: RunConfig = config::load_or_init(&config_path, RunConfig::default)?;
    let workspace = Workspace::open(run_config, cli.database)?;

    let result = execute(cli.command, &workspace);
    if let Err(e) = &result {
        error!("{:?}", e);
    }
    result
}
