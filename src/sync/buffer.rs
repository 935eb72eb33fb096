// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

/// Highest number of bound parameters SQLite accepts in one statement.
const MAX_BIND_PARAMETERS: usize = 32766;

/// Target table of a [`BulkBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Null,
}

impl Value {
    fn size(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            Value::Integer(_) => std::mem::size_of::<i64>(),
            Value::Null => 0,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value as i64)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Collects rows of a table and writes them with a single multi row `INSERT`.
///
/// The rows are written once the buffered payload reaches `threshold` bytes, when the next row
/// would exceed the parameter limit of SQLite, or on [`flush`](BulkBuffer::flush). A flush is a
/// statement of the surrounding transaction, it does not commit.
#[derive(Debug)]
pub struct BulkBuffer {
    table: Table,
    rows: Vec<Vec<Value>>,
    size: usize,
    threshold: usize,
    flushes: usize,
    written: u64,
}

impl BulkBuffer {
    /// A `threshold` of `0` only writes on parameter exhaustion or an explicit flush.
    pub fn new(table: Table, threshold: usize) -> Self {
        Self {
            table,
            rows: Vec::new(),
            size: 0,
            threshold,
            flushes: 0,
            written: 0,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of executed inserts.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Number of rows written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn max_rows(&self) -> usize {
        (MAX_BIND_PARAMETERS / self.table.columns.len().max(1)).max(1)
    }

    pub async fn push(
        &mut self,
        conn: &mut SqliteConnection,
        row: Vec<Value>,
    ) -> Result<(), sqlx::Error> {
        debug_assert_eq!(
            row.len(),
            self.table.columns.len(),
            "row does not match columns of {}",
            self.table.name
        );
        self.size += row.iter().map(Value::size).sum::<usize>();
        self.rows.push(row);
        let over_threshold = self.threshold > 0 && self.size >= self.threshold;
        if over_threshold || self.rows.len() >= self.max_rows() {
            self.flush(conn).await?;
        }
        Ok(())
    }

    /// Writes all buffered rows.
    pub async fn flush(&mut self, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
        if self.rows.is_empty() {
            return Ok(0);
        }
        let count = self.rows.len();
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            self.table.name,
            self.table.columns.join(", ")
        ));
        builder.push_values(self.rows.drain(..), |mut b, row| {
            for value in row {
                match value {
                    Value::Text(s) => b.push_bind(s),
                    Value::Integer(i) => b.push_bind(i),
                    Value::Null => b.push_bind(None::<String>),
                };
            }
        });
        self.size = 0;

        let result = builder.build().execute(&mut *conn).await.map_err(|error| {
            tracing::warn!(table = self.table.name, rows = count, %error, "bulk insert failed");
            error
        })?;
        self.flushes += 1;
        self.written += result.rows_affected();
        tracing::trace!(table = self.table.name, rows = count, "bulk insert");
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::{Connection, SqliteConnection, query_scalar};

    use super::*;

    const NUMBERS: Table = Table {
        name: "numbers",
        columns: &["name", "value", "note"],
    };

    async fn connection() -> SqliteConnection {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE numbers (name TEXT NOT NULL, value INTEGER, note TEXT)")
            .execute(&mut conn)
            .await
            .unwrap();
        conn
    }

    async fn count(conn: &mut SqliteConnection) -> i64 {
        query_scalar("SELECT COUNT(*) FROM numbers")
            .fetch_one(conn)
            .await
            .unwrap()
    }

    fn row(i: i64) -> Vec<Value> {
        vec![format!("n{i}").into(), i.into(), None::<String>.into()]
    }

    #[tokio::test]
    async fn writes_only_on_flush_below_threshold() {
        let mut conn = connection().await;
        let mut buffer = BulkBuffer::new(NUMBERS, 0);
        for i in 0..10 {
            buffer.push(&mut conn, row(i)).await.unwrap();
        }
        assert_eq!(count(&mut conn).await, 0);
        assert_eq!(buffer.len(), 10);

        assert_eq!(buffer.flush(&mut conn).await.unwrap(), 10);
        assert_eq!(count(&mut conn).await, 10);
        assert_eq!(buffer.flushes(), 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.flush(&mut conn).await.unwrap(), 0);
        assert_eq!(buffer.flushes(), 1);
    }

    #[tokio::test]
    async fn flushes_when_threshold_is_reached() {
        let mut conn = connection().await;
        // every row carries 2 bytes of text and 8 bytes of integer
        let mut buffer = BulkBuffer::new(NUMBERS, 30);
        for i in 0..7 {
            buffer.push(&mut conn, row(i)).await.unwrap();
        }
        assert_eq!(buffer.flushes(), 2);
        assert_eq!(count(&mut conn).await, 6);
        buffer.flush(&mut conn).await.unwrap();
        assert_eq!(count(&mut conn).await, 7);
        assert_eq!(buffer.written(), 7);
    }

    #[tokio::test]
    async fn failing_insert_is_reported() {
        let mut conn = connection().await;
        let mut buffer = BulkBuffer::new(NUMBERS, 0);
        buffer
            .push(&mut conn, vec![Value::Null, 1.into(), Value::Null])
            .await
            .unwrap();
        assert!(buffer.flush(&mut conn).await.is_err());
        assert_eq!(buffer.flushes(), 0);
    }

    #[tokio::test]
    async fn flushes_within_a_transaction_are_rolled_back() {
        let mut conn = connection().await;
        {
            let mut tx = conn.begin().await.unwrap();
            let mut buffer = BulkBuffer::new(NUMBERS, 0);
            buffer.push(&mut tx, row(1)).await.unwrap();
            buffer.flush(&mut tx).await.unwrap();
            assert_eq!(count(&mut tx).await, 1);
        }
        assert_eq!(count(&mut conn).await, 0);
    }
}
