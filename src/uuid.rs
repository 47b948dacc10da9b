use core::fmt;
use std::{fmt::{Display, Formatter}, str::FromStr};

use diesel::{backend::Backend, deserialize::{self, FromSql, FromSqlRow}, expression::AsExpression, serialize::{IsNull, ToSql}, sql_types::Text, sqlite::Sqlite};

// We use the uuid crate, but need to wrap it in our own struct to implement ToSql.
// Scoring runs are identified by these; they are stored as text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, AsExpression, FromSqlRow, serde::Serialize, serde::Deserialize)]
#[diesel(sql_type = diesel::sql_types::Text)]
pub struct UUID(uuid::Uuid);

impl UUID {
  pub fn new_v4() -> Self {
      UUID(uuid::Uuid::new_v4())
  }
}

impl From<UUID> for uuid::Uuid {
  fn from(s: UUID) -> Self {
      s.0
  }
}

impl From<uuid::Uuid> for UUID {
  fn from(s: uuid::Uuid) -> Self {
      UUID(s)
  }
}

impl FromStr for UUID {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
      uuid::Uuid::from_str(s).map(UUID)
  }
}

impl Display for UUID {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
      write!(f, "{}", self.0)
  }
}

impl<B: Backend> FromSql<Text, B> for UUID
where
    String: FromSql<Text, B>,
{
    fn from_sql(bytes: <B as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let value = String::from_sql(bytes)?;
        uuid::Uuid::from_str(value.as_str())
            .map(UUID)
            .map_err(|e| e.into())
    }
}

impl ToSql<Text, Sqlite> for UUID
where
  String: ToSql<Text, Sqlite>,
{
  fn to_sql<'b>(&'b self, out: &mut diesel::serialize::Output<'b, '_, diesel::sqlite::Sqlite>) -> diesel::serialize::Result {
    out.set_value(self.0.to_string());
    Ok(IsNull::No)
  }
}
