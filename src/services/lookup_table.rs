use anyhow::{Context, Result};
use async_trait::async_trait;
use sea_orm::sea_query::{Alias, ColumnDef, Expr, Index, OnConflict, Order, Query, Table};
use sea_orm::{ConnectionTrait, DatabaseConnection, FromQueryResult};
use serde::{Deserialize, Serialize};

pub const FILE_KEY_COLUMN: &str = "file_key";
pub const FILE_NAME_COLUMN: &str = "file_name";

/// One key -> filename association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromQueryResult)]
pub struct FileRecord {
    pub file_key: String,
    pub file_name: String,
}

impl FileRecord {
    pub fn new(file_key: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_key: file_key.into(),
            file_name: file_name.into(),
        }
    }
}

#[async_trait]
pub trait LookupTable: Send + Sync {
    /// Writes the record; re-writing an identical record is a no-op.
    async fn put_item(&self, record: &FileRecord) -> Result<()>;

    /// All records for `file_key`, in the table's native order.
    async fn query(&self, file_key: &str) -> Result<Vec<FileRecord>>;

    async fn delete_item(&self, record: &FileRecord) -> Result<()>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;
}

/// Lookup table stored in a SQL database through SeaORM.
///
/// Rows are keyed by `(file_key, file_name)`, so the same content uploaded
/// under two names yields two rows. Query results come back ordered by
/// `file_name`, mirroring a hash+range keyed table.
pub struct SeaOrmLookupTable {
    db: DatabaseConnection,
    table: String,
}

impl SeaOrmLookupTable {
    pub fn new(db: DatabaseConnection, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Creates the backing table if it is missing.
    pub async fn ensure_table(&self) -> Result<()> {
        let stmt = Table::create()
            .table(Alias::new(&self.table))
            .if_not_exists()
            .col(ColumnDef::new(Alias::new(FILE_KEY_COLUMN)).string().not_null())
            .col(ColumnDef::new(Alias::new(FILE_NAME_COLUMN)).string().not_null())
            .primary_key(
                Index::create()
                    .col(Alias::new(FILE_KEY_COLUMN))
                    .col(Alias::new(FILE_NAME_COLUMN)),
            )
            .to_owned();

        let backend = self.db.get_database_backend();
        self.db
            .execute(backend.build(&stmt))
            .await
            .with_context(|| format!("Failed to create lookup table '{}'", self.table))?;
        Ok(())
    }
}

#[async_trait]
impl LookupTable for SeaOrmLookupTable {
    async fn put_item(&self, record: &FileRecord) -> Result<()> {
        let stmt = Query::insert()
            .into_table(Alias::new(&self.table))
            .columns([Alias::new(FILE_KEY_COLUMN), Alias::new(FILE_NAME_COLUMN)])
            .values([
                record.file_key.clone().into(),
                record.file_name.clone().into(),
            ])?
            .on_conflict(
                OnConflict::columns([Alias::new(FILE_KEY_COLUMN), Alias::new(FILE_NAME_COLUMN)])
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();

        let backend = self.db.get_database_backend();
        self.db
            .execute(backend.build(&stmt))
            .await
            .with_context(|| format!("put_item failed for key {}", record.file_key))?;
        Ok(())
    }

    async fn query(&self, file_key: &str) -> Result<Vec<FileRecord>> {
        let stmt = Query::select()
            .columns([Alias::new(FILE_KEY_COLUMN), Alias::new(FILE_NAME_COLUMN)])
            .from(Alias::new(&self.table))
            .and_where(Expr::col(Alias::new(FILE_KEY_COLUMN)).eq(file_key))
            .order_by(Alias::new(FILE_NAME_COLUMN), Order::Asc)
            .to_owned();

        let backend = self.db.get_database_backend();
        let records = FileRecord::find_by_statement(backend.build(&stmt))
            .all(&self.db)
            .await
            .with_context(|| format!("query failed for key {}", file_key))?;
        Ok(records)
    }

    async fn delete_item(&self, record: &FileRecord) -> Result<()> {
        let stmt = Query::delete()
            .from_table(Alias::new(&self.table))
            .and_where(Expr::col(Alias::new(FILE_KEY_COLUMN)).eq(record.file_key.as_str()))
            .and_where(Expr::col(Alias::new(FILE_NAME_COLUMN)).eq(record.file_name.as_str()))
            .to_owned();

        let backend = self.db.get_database_backend();
        self.db
            .execute(backend.build(&stmt))
            .await
            .with_context(|| format!("delete_item failed for key {}", record.file_key))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await?;
        Ok(())
    }
}
