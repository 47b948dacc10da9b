/// Queries against the representation and results store;
/// queries related to the database itself (e.g. to enable foreign keys)
/// are handled in the db module.

use anyhow::Context;
use diesel::dsl::{exists, select};
use diesel::prelude::*;
use diesel::{ExpressionMethods, QueryDsl, SqliteConnection};

use crate::models::{NewRepresentation, NewScoringRun, NewTrialAnswer, Representation, ScoringRun, TrialAnswer};
use crate::representations::RepresentationSet;
use crate::scoring::TaskScore;
use crate::uuid::UUID;

/// Stores feature vectors a model produced for one image set (the stimulus directory),
/// replacing any existing vector for the same image. Vectors are serialized with bincode.
pub fn insert_representations(model_name: &str, image_set: &str, vectors: &[(String, Vec<f32>)], connection: &mut SqliteConnection) -> anyhow::Result<usize>
{
   use crate::schema::representations;

   let serialized = vectors
      .iter()
      .map(|(_, v)| Ok(bincode::serialize(v)?))
      .collect::<anyhow::Result<Vec<Vec<u8>>>>()?;

   let rows: Vec<NewRepresentation> = vectors
      .iter()
      .zip(serialized.iter())
      .map(|((image_name, _), feature_vector)| NewRepresentation {
         model_name,
         image_set,
         image_name,
         feature_vector,
      })
      .collect();

   let inserted = connection.transaction(|connection| {
      let mut count = 0;
      // SQLite limits the number of bound parameters per statement.
      for chunk in rows.chunks(256) {
         count += diesel::replace_into(representations::table)
            .values(chunk)
            .execute(connection)?;
      }
      diesel::QueryResult::Ok(count)
   })?;

   Ok(inserted)
}

/// Loads every stored vector a model produced for an image set.
pub fn load_representations(model_name: &str, image_set: &str, connection: &mut SqliteConnection) -> anyhow::Result<RepresentationSet>
{
   use crate::schema::representations;

   let rows = representations::table
      .filter(representations::model_name.eq(model_name))
      .filter(representations::image_set.eq(image_set))
      .select(Representation::as_select())
      .load::<Representation>(connection)
      .context("Unable to load representations")?;

   let pairs = rows
      .into_iter()
      .map(|row| {
         let vector: Vec<f32> = bincode::deserialize(&row.feature_vector[..])?;
         Ok((row.image_name, vector))
      })
      .collect::<anyhow::Result<Vec<(String, Vec<f32>)>>>()?;

   Ok(RepresentationSet::from_pairs(pairs)?)
}

pub fn count_representations(model_name: &str, connection: &mut SqliteConnection) -> diesel::QueryResult<i64>
{
   use crate::schema::representations;

   representations::table
      .filter(representations::model_name.eq(model_name))
      .count()
      .get_result(connection)
}

/// Whether a model has already been scored on a task.
pub fn has_scoring_run(model_name: &str, task: &str, connection: &mut SqliteConnection) -> diesel::QueryResult<bool>
{
   use crate::schema::scoring_runs;

   select(exists(scoring_runs::table
      .filter(scoring_runs::model_name.eq(model_name))
      .filter(scoring_runs::task.eq(task))))
      .get_result(connection)
}

/// Records a scored task and its per-trial answers. Returns the new run's ID.
pub fn insert_scoring_run(model_name: &str, score: &TaskScore, connection: &mut SqliteConnection) -> anyhow::Result<UUID>
{
   use crate::schema::{scoring_runs, trial_answers};

   let run_id = UUID::new_v4();
   let task = score.task.name();

   let answers = score.answers
      .iter()
      .map(|answer| Ok(NewTrialAnswer {
         run_id,
         trial_number: i32::try_from(answer.trial)?,
         choice: answer.choice.to_string(),
         recorded: answer.recorded.to_string(),
         correct: answer.correct,
         tied: answer.tied,
         distances: serde_json::to_string(&answer.distances)?,
      }))
      .collect::<anyhow::Result<Vec<NewTrialAnswer>>>()?;

   let run = NewScoringRun {
      id: run_id,
      model_name,
      task,
      correct: i32::try_from(score.correct)?,
      total: i32::try_from(score.total)?,
      scored_at: None,
   };

   connection.transaction(|connection| {
      diesel::insert_into(scoring_runs::table)
         .values(&run)
         .execute(connection)?;
      for chunk in answers.chunks(128) {
         diesel::insert_into(trial_answers::table)
            .values(chunk)
            .execute(connection)?;
      }
      diesel::QueryResult::Ok(())
   })?;

   Ok(run_id)
}

/// Lists stored scoring runs, newest first, optionally for one model.
pub fn list_scoring_runs(model_name: Option<&str>, connection: &mut SqliteConnection) -> diesel::QueryResult<Vec<ScoringRun>>
{
   use crate::schema::scoring_runs;

   let mut query = scoring_runs::table
      .select(ScoringRun::as_select())
      .order((scoring_runs::scored_at.desc(), scoring_runs::model_name.asc()))
      .into_boxed();

   if let Some(model_name) = model_name {
      query = query.filter(scoring_runs::model_name.eq(model_name));
   }

   query.load::<ScoringRun>(connection)
}

pub fn load_trial_answers(run_id: UUID, connection: &mut SqliteConnection) -> diesel::QueryResult<Vec<TrialAnswer>>
{
   use crate::schema::trial_answers;

   trial_answers::table
      .filter(trial_answers::run_id.eq(run_id))
      .order(trial_answers::trial_number.asc())
      .select(TrialAnswer::as_select())
      .load::<TrialAnswer>(connection)
}
