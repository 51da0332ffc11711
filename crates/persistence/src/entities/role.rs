//! `role` column mapping.

use domain::models::InvitationRole;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgTypeInfo, PgValueRef, Postgres};

/// A `role` column value, decoded into the closed role set.
///
/// An unknown value fails the row decode (`sqlx::Error::ColumnDecode`)
/// instead of being read as some default role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleColumn(pub InvitationRole);

fn parse_role(raw: &str) -> Result<RoleColumn, BoxDynError> {
    raw.parse::<InvitationRole>()
        .map(RoleColumn)
        .map_err(BoxDynError::from)
}

impl sqlx::Type<Postgres> for RoleColumn {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for RoleColumn {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as sqlx::Decode<'r, Postgres>>::decode(value)?;
        parse_role(raw)
    }
}

impl From<RoleColumn> for InvitationRole {
    fn from(column: RoleColumn) -> Self {
        column.0
    }
}
