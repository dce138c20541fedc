//! SQLite-backed storage for custom fields
//!
//! [`SqliteStore`] implements [`FieldStore`] over a single rusqlite
//! connection. File databases run in WAL mode so readers in other processes
//! are not blocked by a writer.
//!
//! # Schema
//!
//! - fields table (default `custom_fields`): one row per field definition;
//!   options are a JSON array, timestamps are RFC 3339 text. A unique index on
//!   `(owner_kind, owner_id, ifnull(field_group, ''), field_order)` keeps
//!   orders distinct within a scope.
//! - responses table (default `custom_field_responses`): one row per answer,
//!   the value stored as JSON text.
//!
//! Order assignment, reorders, definition edits and response replacement run
//! inside `BEGIN IMMEDIATE` transactions, so concurrent writers to the same
//! database serialize on the write lock. Calls run on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tracing::debug;

use custom_fields::{
    next_order, plan_reorder, store::sort_fields, CustomField, CustomFieldsConfig, FieldDraft,
    FieldId, FieldQuery, FieldResponse, FieldScope, FieldStore, FieldType, FieldsError, OwnerRef,
    ResponseId, Result, TableNames,
};

/// Columns selected for a field row, in `FieldRow::from_row` order.
const FIELD_COLUMNS: &str = "id, owner_kind, owner_id, field_type, title, description, options, \
     field_group, required, default_value, field_order, archived_at, created_at, updated_at";

trait StorageResultExt<T> {
    fn or_storage(self) -> Result<T>;
}

impl<T> StorageResultExt<T> for rusqlite::Result<T> {
    fn or_storage(self) -> Result<T> {
        self.map_err(FieldsError::storage)
    }
}

fn sql_id(id: FieldId) -> i64 {
    id.get() as i64
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(FieldsError::storage)
}

/// SQL text for one table layout.
struct Queries {
    insert_field: String,
    select_field: String,
    select_owner_fields: String,
    select_scope_fields: String,
    update_field: String,
    negate_scope_orders: String,
    update_order: String,
    update_archived: String,
    field_exists: String,
    insert_response: String,
    select_responses: String,
    delete_responses: String,
    count_responses: String,
}

impl Queries {
    fn new(tables: &TableNames) -> Self {
        let fields = &tables.fields;
        let responses = &tables.responses;
        let scope = "owner_kind = ?1 AND owner_id = ?2 AND ifnull(field_group, '') = ifnull(?3, '')";
        Self {
            insert_field: format!(
                "INSERT INTO {fields} (owner_kind, owner_id, field_type, title, description, \
                 options, field_group, required, default_value, field_order, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            select_field: format!("SELECT {FIELD_COLUMNS} FROM {fields} WHERE id = ?1"),
            select_owner_fields: format!(
                "SELECT {FIELD_COLUMNS} FROM {fields} WHERE owner_kind = ?1 AND owner_id = ?2"
            ),
            select_scope_fields: format!(
                "SELECT {FIELD_COLUMNS} FROM {fields} WHERE {scope} ORDER BY field_order"
            ),
            update_field: format!(
                "UPDATE {fields} SET field_type = ?2, title = ?3, description = ?4, options = ?5, \
                 required = ?6, default_value = ?7, updated_at = ?8 WHERE id = ?1"
            ),
            negate_scope_orders: format!(
                "UPDATE {fields} SET field_order = -field_order WHERE {scope}"
            ),
            update_order: format!(
                "UPDATE {fields} SET field_order = ?2, updated_at = ?3 WHERE id = ?1"
            ),
            update_archived: format!(
                "UPDATE {fields} SET archived_at = ?2, updated_at = ?3 WHERE id = ?1"
            ),
            field_exists: format!("SELECT 1 FROM {fields} WHERE id = ?1"),
            insert_response: format!(
                "INSERT INTO {responses} (field_id, value, created_at) VALUES (?1, ?2, ?3)"
            ),
            select_responses: format!(
                "SELECT id, field_id, value, created_at FROM {responses} \
                 WHERE field_id = ?1 ORDER BY id"
            ),
            delete_responses: format!("DELETE FROM {responses} WHERE field_id = ?1"),
            count_responses: format!("SELECT count(*) FROM {responses} WHERE field_id = ?1"),
        }
    }
}

fn schema(tables: &TableNames) -> String {
    let fields = &tables.fields;
    let responses = &tables.responses;
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {fields} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            field_type TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            options TEXT NOT NULL DEFAULT '[]',
            field_group TEXT,
            required INTEGER NOT NULL DEFAULT 0,
            default_value TEXT,
            field_order INTEGER NOT NULL,
            archived_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_{fields}_scope_order
            ON {fields}(owner_kind, owner_id, ifnull(field_group, ''), field_order);
        CREATE INDEX IF NOT EXISTS idx_{fields}_owner ON {fields}(owner_kind, owner_id);

        CREATE TABLE IF NOT EXISTS {responses} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            field_id INTEGER NOT NULL REFERENCES {fields}(id) ON DELETE CASCADE,
            value TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_{responses}_field ON {responses}(field_id);
        "#
    )
}

/// A field row before its text columns are decoded.
struct FieldRow {
    id: i64,
    owner_kind: String,
    owner_id: String,
    field_type: String,
    title: String,
    description: Option<String>,
    options: String,
    group: Option<String>,
    required: bool,
    default_value: Option<String>,
    order: i64,
    archived_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FieldRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_kind: row.get(1)?,
            owner_id: row.get(2)?,
            field_type: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            options: row.get(6)?,
            group: row.get(7)?,
            required: row.get(8)?,
            default_value: row.get(9)?,
            order: row.get(10)?,
            archived_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_field(self) -> Result<CustomField> {
        Ok(CustomField {
            id: FieldId::new(self.id as u64),
            owner: OwnerRef::new(self.owner_kind, self.owner_id),
            field_type: self.field_type.parse::<FieldType>()?,
            title: self.title,
            description: self.description,
            options: serde_json::from_str(&self.options)?,
            group: self.group,
            required: self.required,
            default_value: self.default_value,
            order: u32::try_from(self.order).map_err(FieldsError::storage)?,
            archived_at: self.archived_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn response_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

/// The connection and its SQL. Every method blocks on SQLite.
struct Database {
    conn: Mutex<Connection>,
    queries: Queries,
}

impl Database {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FieldsError::storage("sqlite connection mutex poisoned"))
    }

    fn query_fields(
        &self,
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<CustomField>> {
        let mut stmt = conn.prepare_cached(sql).or_storage()?;
        let rows = stmt
            .query_map(params, FieldRow::from_row)
            .or_storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .or_storage()?;
        rows.into_iter().map(FieldRow::into_field).collect()
    }

    fn load_field(&self, conn: &Connection, id: FieldId) -> Result<CustomField> {
        let row = conn
            .prepare_cached(&self.queries.select_field)
            .or_storage()?
            .query_row(params![sql_id(id)], FieldRow::from_row)
            .optional()
            .or_storage()?;
        row.ok_or(FieldsError::FieldNotFound { id })?.into_field()
    }

    fn scope_fields(&self, conn: &Connection, scope: &FieldScope) -> Result<Vec<CustomField>> {
        self.query_fields(
            conn,
            &self.queries.select_scope_fields,
            params![scope.owner.kind, scope.owner.id, scope.group],
        )
    }

    fn ensure_field(&self, conn: &Connection, id: FieldId) -> Result<()> {
        let found = conn
            .prepare_cached(&self.queries.field_exists)
            .or_storage()?
            .exists(params![sql_id(id)])
            .or_storage()?;
        if found {
            Ok(())
        } else {
            Err(FieldsError::FieldNotFound { id })
        }
    }

    fn response_count(&self, conn: &Connection, field_id: FieldId) -> Result<usize> {
        let count: i64 = conn
            .prepare_cached(&self.queries.count_responses)
            .or_storage()?
            .query_row(params![sql_id(field_id)], |row| row.get(0))
            .or_storage()?;
        Ok(count as usize)
    }

    fn write_response(
        &self,
        conn: &Connection,
        field_id: FieldId,
        value: &Value,
    ) -> Result<FieldResponse> {
        let created_at = Utc::now();
        conn.prepare_cached(&self.queries.insert_response)
            .or_storage()?
            .execute(params![
                sql_id(field_id),
                serde_json::to_string(value)?,
                timestamp(created_at)
            ])
            .or_storage()?;
        Ok(FieldResponse {
            id: ResponseId::new(conn.last_insert_rowid() as u64),
            field_id,
            value: value.clone(),
            created_at,
        })
    }

    fn insert_field(&self, owner: &OwnerRef, draft: &FieldDraft) -> Result<CustomField> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .or_storage()?;

        let scope = FieldScope::new(owner.clone(), draft.group.clone());
        let order = next_order(&self.scope_fields(&tx, &scope)?);
        let now = Utc::now();
        tx.prepare_cached(&self.queries.insert_field)
            .or_storage()?
            .execute(params![
                owner.kind,
                owner.id,
                draft.field_type.as_str(),
                draft.title,
                draft.description,
                serde_json::to_string(&draft.options)?,
                draft.group,
                draft.required,
                draft.default_value,
                order,
                timestamp(now),
                timestamp(now),
            ])
            .or_storage()?;
        let id = FieldId::new(tx.last_insert_rowid() as u64);
        tx.commit().or_storage()?;

        debug!(field_id = %id, %scope, order, "sqlite field inserted");
        Ok(CustomField {
            id,
            owner: owner.clone(),
            field_type: draft.field_type,
            title: draft.title.clone(),
            description: draft.description.clone(),
            options: draft.options.clone(),
            group: draft.group.clone(),
            required: draft.required,
            default_value: draft.default_value.clone(),
            order,
            archived_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn find_field(&self, id: FieldId) -> Result<Option<CustomField>> {
        let conn = self.conn()?;
        match self.load_field(&conn, id) {
            Ok(field) => Ok(Some(field)),
            Err(FieldsError::FieldNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_fields(&self, query: &FieldQuery) -> Result<Vec<CustomField>> {
        let conn = self.conn()?;
        let mut fields = self.query_fields(
            &conn,
            &self.queries.select_owner_fields,
            params![query.owner.kind, query.owner.id],
        )?;
        fields.retain(|f| query.matches(f));
        sort_fields(&mut fields, query.ordering);
        Ok(fields)
    }

    fn save_field(&self, field: &CustomField) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .or_storage()?;

        let stored = self.load_field(&tx, field.id)?;
        if stored.field_type != field.field_type && self.response_count(&tx, field.id)? > 0 {
            return Err(FieldsError::TypeLocked { id: field.id });
        }
        tx.prepare_cached(&self.queries.update_field)
            .or_storage()?
            .execute(params![
                sql_id(field.id),
                field.field_type.as_str(),
                field.title,
                field.description,
                serde_json::to_string(&field.options)?,
                field.required,
                field.default_value,
                timestamp(field.updated_at),
            ])
            .or_storage()?;
        tx.commit().or_storage()
    }

    fn reorder_fields(&self, scope: &FieldScope, ids: &[FieldId]) -> Result<Vec<CustomField>> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .or_storage()?;

        let plan = plan_reorder(scope, &self.scope_fields(&tx, scope)?, ids)?;

        // Move the scope out of the way first so the unique index holds
        // after every single-row update.
        tx.prepare_cached(&self.queries.negate_scope_orders)
            .or_storage()?
            .execute(params![scope.owner.kind, scope.owner.id, scope.group])
            .or_storage()?;

        let now = timestamp(Utc::now());
        let mut reordered = Vec::with_capacity(plan.len());
        for (id, order) in &plan {
            tx.prepare_cached(&self.queries.update_order)
                .or_storage()?
                .execute(params![sql_id(*id), order, now])
                .or_storage()?;
            reordered.push(self.load_field(&tx, *id)?);
        }
        tx.commit().or_storage()?;

        debug!(%scope, fields = reordered.len(), "sqlite store reordered");
        Ok(reordered)
    }

    fn set_archived_at(
        &self,
        id: FieldId,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<CustomField> {
        let conn = self.conn()?;
        let changed = conn
            .prepare_cached(&self.queries.update_archived)
            .or_storage()?
            .execute(params![
                sql_id(id),
                archived_at.map(timestamp),
                timestamp(Utc::now())
            ])
            .or_storage()?;
        if changed == 0 {
            return Err(FieldsError::FieldNotFound { id });
        }
        self.load_field(&conn, id)
    }

    fn insert_response(&self, field_id: FieldId, value: &Value) -> Result<FieldResponse> {
        let conn = self.conn()?;
        self.ensure_field(&conn, field_id)?;
        self.write_response(&conn, field_id, value)
    }

    fn list_responses(&self, field_id: FieldId) -> Result<Vec<FieldResponse>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(&self.queries.select_responses)
            .or_storage()?;
        let rows = stmt
            .query_map(params![sql_id(field_id)], response_from_row)
            .or_storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .or_storage()?;

        rows.into_iter()
            .map(|(id, field_id, value, created_at)| {
                Ok(FieldResponse {
                    id: ResponseId::new(id as u64),
                    field_id: FieldId::new(field_id as u64),
                    value: serde_json::from_str(&value)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    fn replace_responses(&self, answers: &[(FieldId, Vec<Value>)]) -> Result<Vec<FieldResponse>> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .or_storage()?;

        for (field_id, _) in answers {
            self.ensure_field(&tx, *field_id)?;
        }

        let mut written = Vec::new();
        for (field_id, values) in answers {
            tx.prepare_cached(&self.queries.delete_responses)
                .or_storage()?
                .execute(params![sql_id(*field_id)])
                .or_storage()?;
            for value in values {
                written.push(self.write_response(&tx, *field_id, value)?);
            }
        }
        tx.commit().or_storage()?;
        Ok(written)
    }

    fn count_responses(&self, field_id: FieldId) -> Result<usize> {
        let conn = self.conn()?;
        self.response_count(&conn, field_id)
    }
}

/// SQLite [`FieldStore`].
///
/// The connection sits behind a `Mutex` inside a shared handle. Each store
/// call runs on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    /// Open or create a database file and its schema, in WAL mode.
    pub fn open(path: impl AsRef<Path>, config: &CustomFieldsConfig) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).or_storage()?;
        conn.pragma_update(None, "journal_mode", "WAL").or_storage()?;
        conn.pragma_update(None, "synchronous", "NORMAL").or_storage()?;
        debug!(path = %path.display(), "custom fields database opened");
        Self::with_connection(conn, config)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory(config: &CustomFieldsConfig) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().or_storage()?, config)
    }

    fn with_connection(conn: Connection, config: &CustomFieldsConfig) -> Result<Self> {
        config.validate()?;
        conn.pragma_update(None, "foreign_keys", "ON").or_storage()?;
        conn.execute_batch(&schema(&config.tables)).or_storage()?;
        Ok(Self {
            db: Arc::new(Database {
                conn: Mutex::new(conn),
                queries: Queries::new(&config.tables),
            }),
        })
    }

    /// Run `op` against the database on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| FieldsError::storage(format!("sqlite task failed: {e}")))?
    }
}

#[async_trait]
impl FieldStore for SqliteStore {
    async fn insert_field(&self, owner: &OwnerRef, draft: &FieldDraft) -> Result<CustomField> {
        let owner = owner.clone();
        let draft = draft.clone();
        self.blocking(move |db| db.insert_field(&owner, &draft)).await
    }

    async fn find_field(&self, id: FieldId) -> Result<Option<CustomField>> {
        self.blocking(move |db| db.find_field(id)).await
    }

    async fn list_fields(&self, query: &FieldQuery) -> Result<Vec<CustomField>> {
        let query = query.clone();
        self.blocking(move |db| db.list_fields(&query)).await
    }

    async fn save_field(&self, field: &CustomField) -> Result<()> {
        let field = field.clone();
        self.blocking(move |db| db.save_field(&field)).await
    }

    async fn reorder_fields(
        &self,
        scope: &FieldScope,
        ids: &[FieldId],
    ) -> Result<Vec<CustomField>> {
        let scope = scope.clone();
        let ids = ids.to_vec();
        self.blocking(move |db| db.reorder_fields(&scope, &ids)).await
    }

    async fn set_archived_at(
        &self,
        id: FieldId,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<CustomField> {
        self.blocking(move |db| db.set_archived_at(id, archived_at)).await
    }

    async fn insert_response(&self, field_id: FieldId, value: Value) -> Result<FieldResponse> {
        self.blocking(move |db| db.insert_response(field_id, &value)).await
    }

    async fn list_responses(&self, field_id: FieldId) -> Result<Vec<FieldResponse>> {
        self.blocking(move |db| db.list_responses(field_id)).await
    }

    async fn replace_responses(
        &self,
        answers: &[(FieldId, Vec<Value>)],
    ) -> Result<Vec<FieldResponse>> {
        let answers = answers.to_vec();
        self.blocking(move |db| db.replace_responses(&answers)).await
    }

    async fn count_responses(&self, field_id: FieldId) -> Result<usize> {
        self.blocking(move |db| db.count_responses(field_id)).await
    }
}
