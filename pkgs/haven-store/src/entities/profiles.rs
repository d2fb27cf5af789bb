//! Profile entity

use super::RowModel;
use haven_chat::{from_row, to_row, DataStoreError, ProfileRow, Row};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub role: String, // "admin", "manager" or "tenant"
    pub avatar_url: Option<String>,
    pub online: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<ProfileRow> for Model {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id.0,
            name: row.name,
            role: row.role.as_str().to_string(),
            avatar_url: row.avatar_url,
            online: row.online,
        }
    }
}

impl RowModel for Model {
    fn into_row(self) -> Result<Row, DataStoreError> {
        let role = self
            .role
            .parse::<haven_chat::Role>()
            .map_err(DataStoreError::InvalidRow)?;
        to_row(&ProfileRow {
            id: self.id.into(),
            name: self.name,
            role,
            avatar_url: self.avatar_url,
            online: self.online,
        })
    }

    fn from_row(row: Row) -> Result<Self, DataStoreError> {
        from_row::<ProfileRow>(row).map(Self::from)
    }
}
