//! Catalog metadata: columns, tables and `describe`.

use crate::conn::{Conn, collect_rows};
use crate::dispatch::{completion, wait};
use crate::error::{Error, Result};
use crate::row::Row;

/// What to describe.
///
/// With `table` and `column` set, describes that column; with only `table`,
/// every column of the table; otherwise the tables of `database`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeRequest {
    /// Catalog to inspect. Required.
    pub database: Option<String>,
    /// Schema pattern. Default: `%`
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name (only used with `table`)
    pub column: Option<String>,
    /// Table type filter. Default: `table`
    pub table_type: Option<String>,
}

impl DescribeRequest {
    /// Describe the tables of a catalog.
    pub fn database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            ..Default::default()
        }
    }

    /// Narrow to one table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Narrow to one column of the table.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Set the schema pattern.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    fn resolve(self) -> Result<Lookup> {
        let catalog = self.database.ok_or_else(|| {
            Error::MissingArgument(
                "the request did not contain a database; it is required to describe".into(),
            )
        })?;
        let schema = self.schema.unwrap_or_else(|| "%".to_string());
        Ok(match self.table {
            Some(table) => Lookup::Columns {
                catalog,
                schema,
                table,
                column: self.column.unwrap_or_else(|| "%".to_string()),
            },
            None => Lookup::Tables {
                catalog,
                schema,
                table_type: self.table_type.unwrap_or_else(|| "table".to_string()),
            },
        })
    }
}

/// The metadata call a [`DescribeRequest`] resolves to.
#[derive(Debug, PartialEq, Eq)]
enum Lookup {
    Columns {
        catalog: String,
        schema: String,
        table: String,
        column: String,
    },
    Tables {
        catalog: String,
        schema: String,
        table_type: String,
    },
}

fn owned(s: Option<&str>) -> Option<String> {
    s.map(str::to_string)
}

impl Conn {
    /// Queue a column enumeration and collect its rows.
    pub fn columns_with<F>(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
        cb: F,
    ) where
        F: FnOnce(Result<Vec<Row>>) + Send + 'static,
    {
        let (catalog, schema, table, column) =
            (owned(catalog), owned(schema), owned(table), owned(column));
        let fetch_mode = self.fetch_mode();
        self.submit(
            move |raw| {
                let result = raw.columns(
                    catalog.as_deref(),
                    schema.as_deref(),
                    table.as_deref(),
                    column.as_deref(),
                )?;
                collect_rows(result, fetch_mode)
            },
            cb,
        );
    }

    /// Enumerate columns matching the filters.
    pub async fn columns(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Result<Vec<Row>> {
        let (cb, rx) = completion();
        self.columns_with(catalog, schema, table, column, cb);
        wait(rx).await
    }

    /// Queue a table enumeration and collect its rows.
    pub fn tables_with<F>(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
        cb: F,
    ) where
        F: FnOnce(Result<Vec<Row>>) + Send + 'static,
    {
        let (catalog, schema, table, table_type) =
            (owned(catalog), owned(schema), owned(table), owned(table_type));
        let fetch_mode = self.fetch_mode();
        self.submit(
            move |raw| {
                let result = raw.tables(
                    catalog.as_deref(),
                    schema.as_deref(),
                    table.as_deref(),
                    table_type.as_deref(),
                )?;
                collect_rows(result, fetch_mode)
            },
            cb,
        );
    }

    /// Enumerate tables matching the filters.
    pub async fn tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<Vec<Row>> {
        let (cb, rx) = completion();
        self.tables_with(catalog, schema, table, table_type, cb);
        wait(rx).await
    }

    /// Describe a catalog, a table or a single column.
    ///
    /// A request without `database` fails with [`Error::MissingArgument`]
    /// before anything is queued.
    pub fn describe_with<F>(&self, request: DescribeRequest, cb: F)
    where
        F: FnOnce(Result<Vec<Row>>) + Send + 'static,
    {
        match request.resolve() {
            Ok(Lookup::Columns {
                catalog,
                schema,
                table,
                column,
            }) => self.columns_with(
                Some(&catalog),
                Some(&schema),
                Some(&table),
                Some(&column),
                cb,
            ),
            Ok(Lookup::Tables {
                catalog,
                schema,
                table_type,
            }) => self.tables_with(Some(&catalog), Some(&schema), None, Some(&table_type), cb),
            Err(e) => cb(Err(e)),
        }
    }

    /// Describe a catalog, a table or a single column.
    pub async fn describe(&self, request: DescribeRequest) -> Result<Vec<Row>> {
        let (cb, rx) = completion();
        self.describe_with(request, cb);
        wait(rx).await
    }
}
