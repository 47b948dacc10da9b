use diesel::prelude::*;
use time;

use crate::uuid::UUID;

#[derive(Insertable)]
#[diesel(table_name = crate::schema::representations)]
pub struct NewRepresentation<'a> {
    pub model_name: &'a str,
    pub image_set: &'a str,
    pub image_name: &'a str,
    pub feature_vector: &'a [u8],
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::representations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Representation {
    pub model_name: String,
    pub image_set: String,
    pub image_name: String,
    pub feature_vector: Vec<u8>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::scoring_runs)]
pub struct NewScoringRun<'a> {
    pub id: UUID,
    pub model_name: &'a str,
    pub task: &'a str,
    pub correct: i32,
    pub total: i32,
    // When timestamp is None, the current time (the SQL default) is used.
    // https://docs.rs/diesel/latest/diesel/fn.insert_into.html#inserting-default-value-for-a-column
    pub scored_at: Option<time::PrimitiveDateTime>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::scoring_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScoringRun {
    pub id: UUID,
    pub model_name: String,
    pub task: String,
    pub correct: i32,
    pub total: i32,
    pub scored_at: time::PrimitiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::trial_answers)]
pub struct NewTrialAnswer {
    pub run_id: UUID,
    pub trial_number: i32,
    pub choice: String,
    pub recorded: String,
    pub correct: bool,
    pub tied: bool,
    /// JSON array of the distances the choice was made on.
    pub distances: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::trial_answers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TrialAnswer {
    pub run_id: UUID,
    pub trial_number: i32,
    pub choice: String,
    pub recorded: String,
    pub correct: bool,
    pub tied: bool,
    pub distances: String,
}
