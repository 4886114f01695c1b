// Dynamic Row Decoding and Parameter Binding
// The port trades in serde_json values; this is where they meet SQLite's
// type affinities.

use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

use shardbase_core::domain::Record;
use shardbase_core::error::{AppError, Result};

/// Bind JSON parameters positionally. Arrays and objects are stored as
/// JSON text.
pub fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(flag) => query.bind(*flag),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    query.bind(int)
                } else if let Some(float) = number.as_f64() {
                    query.bind(float)
                } else {
                    query.bind(number.to_string())
                }
            }
            Value::String(text) => query.bind(text.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Decode a row into a JSON object by column type affinity.
pub fn record_from_row(row: &SqliteRow) -> Result<Record> {
    let mut record = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| AppError::storage(column.name().to_string(), e.to_string()))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            decode_column(row, idx, &type_name)
                .map_err(|e| AppError::storage(column.name().to_string(), e.to_string()))?
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_column(
    row: &SqliteRow,
    idx: usize,
    type_name: &str,
) -> std::result::Result<Value, sqlx::Error> {
    let value = match type_name {
        "INTEGER" | "BOOLEAN" => Value::Number(row.try_get::<i64, _>(idx)?.into()),
        "REAL" => Number::from_f64(row.try_get::<f64, _>(idx)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(idx)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::String(row.try_get::<String, _>(idx)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn binds_and_decodes_each_affinity() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE t (i INTEGER, r REAL, s TEXT, n TEXT)")
            .execute(&pool)
            .await
            .unwrap();

        let params = vec![json!(42), json!(1.5), json!("hello"), Value::Null];
        bind_params(
            sqlx::query("INSERT INTO t (i, r, s, n) VALUES (?, ?, ?, ?)"),
            &params,
        )
        .execute(&pool)
        .await
        .unwrap();

        let row = sqlx::query("SELECT i, r, s, n FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        let record = record_from_row(&row).unwrap();
        assert_eq!(record.get("i"), Some(&json!(42)));
        assert_eq!(record.get("r"), Some(&json!(1.5)));
        assert_eq!(record.get("s"), Some(&json!("hello")));
        assert_eq!(record.get("n"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn nested_values_are_stored_as_json_text() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE t (payload TEXT)")
            .execute(&pool)
            .await
            .unwrap();

        let params = vec![json!({"a": [1, 2]})];
        bind_params(sqlx::query("INSERT INTO t (payload) VALUES (?)"), &params)
            .execute(&pool)
            .await
            .unwrap();

        let row = sqlx::query("SELECT payload FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        let record = record_from_row(&row).unwrap();
        assert_eq!(record.get("payload"), Some(&json!(r#"{"a":[1,2]}"#)));
    }
}
