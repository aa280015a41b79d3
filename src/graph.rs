//! Per-user property graph on SQLite.
//!
//! Entities are nodes keyed by `(user_id, name_key)`; relationships are
//! directed typed edges between two entity keys of the same user. Every row
//! carries both the raw user id and the `User_<id>` scope label, and every
//! query filters on both.
//!
//! The [`GraphStore`] trait is the seam the workflow and query engine depend
//! on; [`SqliteGraphStore`] is the only implementation and shares its pool
//! with the SQLite vector store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::RelationshipPolicy;
use crate::models::{
    normalize_name, Entity, EntityType, ExtractedEntity, ExtractedRelationship, GraphContext,
    GraphData, GraphEdge, GraphNode, Relationship, RelationshipType, UserId,
};

/// Below this length a name only matches a focal concept exactly.
const MIN_SUBSTRING_KEY_LEN: i64 = 3;

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create_user_if_not_exists(&self, user: &UserId) -> Result<()>;

    /// Upsert entities by normalized name. Returns the number written.
    async fn create_entities(&self, user: &UserId, entities: &[ExtractedEntity]) -> Result<usize>;

    /// Write edges whose endpoints both exist. Returns the number written.
    async fn create_relationships(
        &self,
        user: &UserId,
        relationships: &[ExtractedRelationship],
    ) -> Result<usize>;

    async fn get_user_entities(&self, user: &UserId, limit: i64) -> Result<Vec<Entity>>;

    async fn get_user_relationships(&self, user: &UserId, limit: i64) -> Result<Vec<Relationship>>;

    async fn get_user_graph_data(&self, user: &UserId) -> Result<GraphData>;

    /// Entities matching `concept` plus everything within `depth` hops.
    async fn neighborhood(
        &self,
        user: &UserId,
        concept: &str,
        depth: u32,
        limit: i64,
    ) -> Result<GraphContext>;

    async fn count_user_entities(&self, user: &UserId) -> Result<i64>;

    /// Remove every entity, relationship, chunk and the user row itself.
    async fn delete_user_data(&self, user: &UserId) -> Result<()>;
}

pub struct SqliteGraphStore {
    pool: SqlitePool,
    policy: RelationshipPolicy,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool, policy: RelationshipPolicy) -> Self {
        Self { pool, policy }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_entity_type(raw: &str) -> EntityType {
    EntityType::parse(raw).unwrap_or(EntityType::Concept)
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn create_user_if_not_exists(&self, user: &UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, scope, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(user.as_str())
        .bind(user.scope_label())
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .context("Failed to create user")?;
        Ok(())
    }

    async fn create_entities(&self, user: &UserId, entities: &[ExtractedEntity]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }

        let scope = user.scope_label();
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for entity in entities {
            let key = normalize_name(&entity.name);
            if key.is_empty() {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO entities (user_id, scope, name, name_key, entity_type, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, name_key) DO UPDATE SET
                    name = excluded.name,
                    entity_type = excluded.entity_type,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(user.as_str())
            .bind(&scope)
            .bind(entity.name.trim())
            .bind(&key)
            .bind(entity.entity_type.as_str())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert entity")?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn create_relationships(
        &self,
        user: &UserId,
        relationships: &[ExtractedRelationship],
    ) -> Result<usize> {
        if relationships.is_empty() {
            return Ok(0);
        }

        let scope = user.scope_label();
        let now = now_millis();
        let dedupe_clause = match self.policy {
            RelationshipPolicy::Append => "",
            RelationshipPolicy::Dedupe => {
                "AND NOT EXISTS (SELECT 1 FROM relationships \
                 WHERE user_id = ? AND scope = ? AND source_key = ? AND target_key = ? AND rel_type = ?)"
            }
        };
        let sql = format!(
            r#"
            INSERT INTO relationships (user_id, scope, source_key, target_key, rel_type, created_at)
            SELECT ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM entities WHERE user_id = ? AND scope = ? AND name_key = ?)
              AND EXISTS (SELECT 1 FROM entities WHERE user_id = ? AND scope = ? AND name_key = ?)
              {}
            "#,
            dedupe_clause
        );

        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;

        for rel in relationships {
            let source_key = normalize_name(&rel.source);
            let target_key = normalize_name(&rel.target);

            let mut query = sqlx::query(&sql)
                .bind(user.as_str())
                .bind(&scope)
                .bind(&source_key)
                .bind(&target_key)
                .bind(rel.rel_type.as_str())
                .bind(now)
                .bind(user.as_str())
                .bind(&scope)
                .bind(&source_key)
                .bind(user.as_str())
                .bind(&scope)
                .bind(&target_key);
            if self.policy == RelationshipPolicy::Dedupe {
                query = query
                    .bind(user.as_str())
                    .bind(&scope)
                    .bind(&source_key)
                    .bind(&target_key)
                    .bind(rel.rel_type.as_str());
            }

            let result = query
                .execute(&mut *tx)
                .await
                .context("Failed to insert relationship")?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn get_user_entities(&self, user: &UserId, limit: i64) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            r#"
            SELECT name, entity_type, user_id, created_at
            FROM entities
            WHERE user_id = ? AND scope = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user.as_str())
        .bind(user.scope_label())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Entity {
                name: row.get("name"),
                entity_type: parse_entity_type(row.get("entity_type")),
                user_id: row.get("user_id"),
                created_at: from_millis(row.get("created_at")),
            })
            .collect())
    }

    async fn get_user_relationships(&self, user: &UserId, limit: i64) -> Result<Vec<Relationship>> {
        let rows = sqlx::query(
            r#"
            SELECT s.name AS source_name, t.name AS target_name, r.rel_type, r.user_id, r.created_at
            FROM relationships r
            JOIN entities s ON s.user_id = r.user_id AND s.name_key = r.source_key
            JOIN entities t ON t.user_id = r.user_id AND t.name_key = r.target_key
            WHERE r.user_id = ? AND r.scope = ?
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT ?
            "#,
        )
        .bind(user.as_str())
        .bind(user.scope_label())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(relationship_from_row).collect())
    }

    async fn get_user_graph_data(&self, user: &UserId) -> Result<GraphData> {
        let scope = user.scope_label();

        let entity_rows = sqlx::query(
            "SELECT name, entity_type FROM entities WHERE user_id = ? AND scope = ? ORDER BY rowid",
        )
        .bind(user.as_str())
        .bind(&scope)
        .fetch_all(&self.pool)
        .await?;

        let edge_rows = sqlx::query(
            r#"
            SELECT s.name AS source_name, t.name AS target_name, r.rel_type
            FROM relationships r
            JOIN entities s ON s.user_id = r.user_id AND s.name_key = r.source_key
            JOIN entities t ON t.user_id = r.user_id AND t.name_key = r.target_key
            WHERE r.user_id = ? AND r.scope = ?
            ORDER BY r.id
            "#,
        )
        .bind(user.as_str())
        .bind(&scope)
        .fetch_all(&self.pool)
        .await?;

        let edges: Vec<GraphEdge> = edge_rows
            .iter()
            .filter_map(|row| {
                let label = RelationshipType::parse(row.get("rel_type"))?;
                Some(GraphEdge {
                    from: row.get("source_name"),
                    to: row.get("target_name"),
                    label,
                })
            })
            .collect();

        let mut connections: HashMap<&str, usize> = HashMap::new();
        for edge in &edges {
            *connections.entry(edge.from.as_str()).or_default() += 1;
            *connections.entry(edge.to.as_str()).or_default() += 1;
        }

        let nodes = entity_rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                GraphNode {
                    connections: connections.get(name.as_str()).copied().unwrap_or(0),
                    id: name.clone(),
                    label: name,
                    entity_type: parse_entity_type(row.get("entity_type")),
                }
            })
            .collect();

        Ok(GraphData { nodes, edges })
    }

    async fn neighborhood(
        &self,
        user: &UserId,
        concept: &str,
        depth: u32,
        limit: i64,
    ) -> Result<GraphContext> {
        let concept_key = normalize_name(concept);
        if concept_key.is_empty() {
            return Ok(GraphContext::default());
        }
        let scope = user.scope_label();

        // Seeds match the concept exactly or by substring in either
        // direction, then the walk follows edges both ways.
        let entity_rows = sqlx::query(
            r#"
            WITH RECURSIVE reach(name_key, depth) AS (
                SELECT name_key, 0 FROM entities
                WHERE user_id = ? AND scope = ?
                  AND (
                    name_key = ?
                    OR (length(name_key) >= ? AND instr(?, name_key) > 0)
                    OR (length(?) >= ? AND instr(name_key, ?) > 0)
                  )

                UNION

                SELECT
                    CASE WHEN r.source_key = reach.name_key THEN r.target_key ELSE r.source_key END,
                    reach.depth + 1
                FROM reach
                JOIN relationships r ON r.user_id = ? AND r.scope = ?
                    AND (r.source_key = reach.name_key OR r.target_key = reach.name_key)
                WHERE reach.depth < ?
            )
            SELECT e.name, e.name_key, e.entity_type, e.user_id, e.created_at, d.distance
            FROM entities e
            JOIN (SELECT name_key, MIN(depth) AS distance FROM reach GROUP BY name_key) d
                ON d.name_key = e.name_key
            WHERE e.user_id = ? AND e.scope = ?
            ORDER BY d.distance, e.created_at DESC, e.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user.as_str())
        .bind(&scope)
        .bind(&concept_key)
        .bind(MIN_SUBSTRING_KEY_LEN)
        .bind(&concept_key)
        .bind(&concept_key)
        .bind(MIN_SUBSTRING_KEY_LEN)
        .bind(&concept_key)
        .bind(user.as_str())
        .bind(&scope)
        .bind(depth as i64)
        .bind(user.as_str())
        .bind(&scope)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to walk graph neighborhood")?;

        if entity_rows.is_empty() {
            return Ok(GraphContext::default());
        }

        let keys: Vec<String> = entity_rows.iter().map(|row| row.get("name_key")).collect();
        let entities = entity_rows
            .iter()
            .map(|row| Entity {
                name: row.get("name"),
                entity_type: parse_entity_type(row.get("entity_type")),
                user_id: row.get("user_id"),
                created_at: from_millis(row.get("created_at")),
            })
            .collect();

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            r#"
            SELECT s.name AS source_name, t.name AS target_name, r.rel_type, r.user_id,
                   MAX(r.created_at) AS created_at
            FROM relationships r
            JOIN entities s ON s.user_id = r.user_id AND s.name_key = r.source_key
            JOIN entities t ON t.user_id = r.user_id AND t.name_key = r.target_key
            WHERE r.user_id = ? AND r.scope = ?
              AND r.source_key IN ({placeholders})
              AND r.target_key IN ({placeholders})
            GROUP BY r.source_key, r.rel_type, r.target_key
            ORDER BY MAX(r.id) DESC
            "#
        );

        let mut query = sqlx::query(&sql).bind(user.as_str()).bind(&scope);
        for key in keys.iter().chain(keys.iter()) {
            query = query.bind(key);
        }
        let rel_rows = query.fetch_all(&self.pool).await?;

        Ok(GraphContext {
            entities,
            relationships: rel_rows.iter().filter_map(relationship_from_row).collect(),
        })
    }

    async fn count_user_entities(&self, user: &UserId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE user_id = ? AND scope = ?")
                .bind(user.as_str())
                .bind(user.scope_label())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn delete_user_data(&self, user: &UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["relationships", "entities", "chunks"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE user_id = ? AND scope = ?"))
                .bind(user.as_str())
                .bind(user.scope_label())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to delete user rows from {table}"))?;
        }
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn relationship_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<Relationship> {
    let rel_type = RelationshipType::parse(row.get("rel_type"))?;
    Some(Relationship {
        from: row.get("source_name"),
        to: row.get("target_name"),
        rel_type,
        user_id: row.get("user_id"),
        created_at: from_millis(row.get("created_at")),
    })
}
