//! Relational member repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use chrono::NaiveDate;
use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{EntityKey, MemberRecord};

/// Trait for member storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MemberRepository {
    /// Insert a new member, returning it with its assigned id
    async fn insert(&self, member: &MemberRecord) -> Result<MemberRecord>;

    /// Get a member by entity key, soft-deleted rows included
    async fn get_by_key(&self, entity_key: &EntityKey) -> Result<Option<MemberRecord>>;

    /// Get a member by relational id
    async fn get_by_id(&self, id: i64) -> Result<Option<MemberRecord>>;

    /// Overwrite every column of an existing member
    async fn update(&self, member: &MemberRecord) -> Result<()>;

    /// List members ordered by name
    async fn list(&self, include_deleted: bool, limit: usize) -> Result<Vec<MemberRecord>>;
}

/// libSQL implementation of `MemberRepository`
pub struct LibSqlMemberRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMemberRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_one(&self, sql: &str, param: Value) -> Result<Option<MemberRecord>> {
        let mut rows = self.conn.query(sql, vec![param]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_member(&row)?)),
            None => Ok(None),
        }
    }

    fn parse_member(row: &Row) -> Result<MemberRecord> {
        let entity_key: String = row.get(1)?;
        Ok(MemberRecord {
            id: row.get(0)?,
            entity_key: EntityKey::parse(&entity_key)?,
            name: row.get(2)?,
            birthday: parse_date(row.get(3)?)?,
            gender: row.get(4)?,
            housing_situation: row.get(5)?,
            email: row.get(6)?,
            phone: row.get(7)?,
            facebook: row.get(8)?,
            street: row.get(9)?,
            postal_code: row.get(10)?,
            city: row.get(11)?,
            country: row.get(12)?,
            reachable: row.get::<i64>(13)? != 0,
            groupable: row.get::<i64>(14)? != 0,
            date_joined: parse_date(row.get(15)?)?,
            admin_notes: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
            deleted_at: row.get(19)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, entity_key, name, birthday, gender, housing_situation, \
     email, phone, facebook, street, postal_code, city, country, reachable, groupable, \
     date_joined, admin_notes, created_at, updated_at, deleted_at FROM members";

fn parse_date(value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|text| {
            NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map_err(|error| Error::Database(format!("invalid stored date `{text}`: {error}")))
        })
        .transpose()
}

fn date_text(value: Option<NaiveDate>) -> Value {
    value.map_or(Value::Null, |date| {
        Value::Text(date.format("%Y-%m-%d").to_string())
    })
}

fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

fn attribute_params(member: &MemberRecord) -> Vec<Value> {
    vec![
        Value::Text(member.name.clone()),
        date_text(member.birthday),
        Value::Integer(member.gender),
        Value::Integer(member.housing_situation),
        text(member.email.as_deref()),
        text(member.phone.as_deref()),
        text(member.facebook.as_deref()),
        text(member.street.as_deref()),
        text(member.postal_code.as_deref()),
        text(member.city.as_deref()),
        text(member.country.as_deref()),
        Value::Integer(i64::from(member.reachable)),
        Value::Integer(i64::from(member.groupable)),
        date_text(member.date_joined),
        text(member.admin_notes.as_deref()),
        Value::Integer(member.updated_at),
        member.deleted_at.map_or(Value::Null, Value::Integer),
    ]
}

impl MemberRepository for LibSqlMemberRepository<'_> {
    async fn insert(&self, member: &MemberRecord) -> Result<MemberRecord> {
        let mut params = attribute_params(member);
        params.push(Value::Text(member.entity_key.as_str().to_string()));
        params.push(Value::Integer(member.created_at));
        self.conn
            .execute(
                "INSERT INTO members (name, birthday, gender, housing_situation, email, phone,
                    facebook, street, postal_code, city, country, reachable, groupable,
                    date_joined, admin_notes, updated_at, deleted_at, entity_key, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params,
            )
            .await?;

        let mut stored = member.clone();
        stored.id = self.conn.last_insert_rowid();
        Ok(stored)
    }

    async fn get_by_key(&self, entity_key: &EntityKey) -> Result<Option<MemberRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE entity_key = ?");
        self.query_one(&sql, Value::Text(entity_key.as_str().to_string()))
            .await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<MemberRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        self.query_one(&sql, Value::Integer(id)).await
    }

    async fn update(&self, member: &MemberRecord) -> Result<()> {
        let mut params = attribute_params(member);
        params.push(Value::Integer(member.id));
        let changed = self
            .conn
            .execute(
                "UPDATE members SET name = ?, birthday = ?, gender = ?, housing_situation = ?,
                    email = ?, phone = ?, facebook = ?, street = ?, postal_code = ?, city = ?,
                    country = ?, reachable = ?, groupable = ?, date_joined = ?, admin_notes = ?,
                    updated_at = ?, deleted_at = ?
                 WHERE id = ?",
                params,
            )
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("member {}", member.entity_key.masked())));
        }
        Ok(())
    }

    async fn list(&self, include_deleted: bool, limit: usize) -> Result<Vec<MemberRecord>> {
        let filter = if include_deleted {
            ""
        } else {
            " WHERE deleted_at IS NULL"
        };
        let sql = format!("{SELECT_COLUMNS}{filter} ORDER BY name COLLATE NOCASE LIMIT ?");
        let mut rows = self
            .conn
            .query(&sql, vec![Value::Integer(limit as i64)])
            .await?;
        let mut members = Vec::new();
        while let Some(row) = rows.next().await? {
            members.push(Self::parse_member(&row)?);
        }
        Ok(members)
    }
}
