//! flexquery test utilities.
//!
//! Helpers for integration testing: the orchard fixture schema, an
//! in-memory SQLite database seeded with matching rows, and assertion
//! utilities for compiled SQL.

use std::sync::Arc;

use flexquery::{ModelDefinition, Schema};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Fixture schema: baskets holding fruits.
///
/// - `Basket`: `label`, `owner_id`
/// - `Fruit`: `name`, `size`, foreign key `basket` (reverse accessor `fruits`)
pub fn orchard_schema() -> Arc<Schema> {
    Schema::builder()
        .model(
            ModelDefinition::new("Basket", "basket")
                .field("label")
                .field("owner_id"),
        )
        .model(
            ModelDefinition::new("Fruit", "fruit")
                .field("name")
                .field("size")
                .foreign_key("basket", "Basket", Some("fruits")),
        )
        .build()
        .unwrap_or_else(|err| panic!("orchard fixture schema is invalid: {err}"))
}

/// A fruit row.
#[derive(Debug, Clone, PartialEq)]
pub struct TestFruit {
    pub id: i64,
    pub name: &'static str,
    pub size: i64,
    pub basket_id: Option<i64>,
}

/// A basket row.
#[derive(Debug, Clone, PartialEq)]
pub struct TestBasket {
    pub id: i64,
    pub label: &'static str,
    pub owner_id: i64,
}

/// Baskets seeded by [`orchard_pool`].
pub const BASKETS: &[TestBasket] = &[
    TestBasket { id: 1, label: "big", owner_id: 1 },
    TestBasket { id: 2, label: "mixed", owner_id: 2 },
    TestBasket { id: 3, label: "empty", owner_id: 1 },
];

/// Fruits seeded by [`orchard_pool`]. Basket 2 holds two small fruits.
pub const FRUITS: &[TestFruit] = &[
    TestFruit { id: 1, name: "apple", size: 12, basket_id: Some(1) },
    TestFruit { id: 2, name: "melon", size: 30, basket_id: Some(1) },
    TestFruit { id: 3, name: "cherry", size: 2, basket_id: Some(2) },
    TestFruit { id: 4, name: "plum", size: 8, basket_id: Some(2) },
    TestFruit { id: 5, name: "pear", size: 11, basket_id: Some(2) },
    TestFruit { id: 6, name: "grape", size: 1, basket_id: None },
];

const ORCHARD_DDL: &[&str] = &[
    "CREATE TABLE basket (id INTEGER PRIMARY KEY, label TEXT NOT NULL, owner_id INTEGER NOT NULL)",
    "CREATE TABLE fruit (id INTEGER PRIMARY KEY, name TEXT NOT NULL, size INTEGER NOT NULL, \
     basket_id INTEGER REFERENCES basket (id))",
];

/// Open an in-memory SQLite database with the orchard tables and rows.
pub async fn orchard_pool() -> sqlx::Result<SqlitePool> {
    // Every connection to :memory: is a separate database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    for ddl in ORCHARD_DDL {
        sqlx::query(ddl).execute(&pool).await?;
    }
    for basket in BASKETS {
        sqlx::query("INSERT INTO basket (id, label, owner_id) VALUES (?, ?, ?)")
            .bind(basket.id)
            .bind(basket.label)
            .bind(basket.owner_id)
            .execute(&pool)
            .await?;
    }
    for fruit in FRUITS {
        sqlx::query("INSERT INTO fruit (id, name, size, basket_id) VALUES (?, ?, ?, ?)")
            .bind(fruit.id)
            .bind(fruit.name)
            .bind(fruit.size)
            .bind(fruit.basket_id)
            .execute(&pool)
            .await?;
    }

    Ok(pool)
}

/// Run `sql` and return the `id` column of every row, in row order.
pub async fn fetch_ids(pool: &SqlitePool, sql: &str) -> sqlx::Result<Vec<i64>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    rows.iter().map(|row| row.try_get::<i64, _>("id")).collect()
}

/// Run `sql` and return the sorted, de-duplicated `id` column.
pub async fn fetch_id_set(pool: &SqlitePool, sql: &str) -> sqlx::Result<Vec<i64>> {
    let mut ids = fetch_ids(pool, sql).await?;
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Run a `COUNT` statement and return the count.
pub async fn fetch_count(pool: &SqlitePool, sql: &str) -> sqlx::Result<i64> {
    let row = sqlx::query(sql).fetch_one(pool).await?;
    row.try_get::<i64, _>(0)
}

/// Assertion helpers for compiled SQL.
pub mod assert {
    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }
}
