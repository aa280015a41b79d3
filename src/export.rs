//! Export a user's graph as JSON for visualization tools.
//!
//! The document carries the full node/edge lists from
//! [`GraphStore::get_user_graph_data`](crate::graph::GraphStore::get_user_graph_data)
//! plus summary statistics, so a consumer can size its layout before
//! walking the data.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::{GraphData, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub user_id: String,
    pub export_timestamp: DateTime<Utc>,
    pub statistics: GraphStatistics,
    pub data: GraphData,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStatistics {
    pub nodes: usize,
    pub edges: usize,
    /// Node count per entity type.
    pub node_types: BTreeMap<String, usize>,
}

impl GraphExport {
    pub fn new(user: &UserId, data: GraphData) -> Self {
        let mut node_types = BTreeMap::new();
        for node in &data.nodes {
            *node_types
                .entry(node.entity_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        Self {
            user_id: user.as_str().to_string(),
            export_timestamp: Utc::now(),
            statistics: GraphStatistics {
                nodes: data.nodes.len(),
                edges: data.edges.len(),
                node_types,
            },
            data,
        }
    }
}

/// Write the export as pretty JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn write_export(export: &GraphExport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(export)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} nodes, {} edges to {}",
                export.statistics.nodes,
                export.statistics.edges,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, GraphEdge, GraphNode, RelationshipType};

    fn node(name: &str, entity_type: EntityType, connections: usize) -> GraphNode {
        GraphNode {
            id: name.into(),
            label: name.into(),
            entity_type,
            connections,
        }
    }

    #[test]
    fn test_statistics() {
        let data = GraphData {
            nodes: vec![
                node("Algorithms", EntityType::Concept, 1),
                node("Sorting", EntityType::Concept, 0),
                node("CS101", EntityType::Organization, 1),
            ],
            edges: vec![GraphEdge {
                from: "Algorithms".into(),
                to: "CS101".into(),
                label: RelationshipType::UsedIn,
            }],
        };
        let export = GraphExport::new(&UserId::parse("alice").unwrap(), data);

        assert_eq!(export.statistics.nodes, 3);
        assert_eq!(export.statistics.edges, 1);
        assert_eq!(export.statistics.node_types["concept"], 2);
        assert_eq!(export.statistics.node_types["organization"], 1);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["data"]["nodes"][2]["type"], "organization");
        assert_eq!(json["data"]["edges"][0]["label"], "used_in");
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/graph.json");
        let export = GraphExport::new(&UserId::parse("bob").unwrap(), GraphData::default());
        write_export(&export, Some(&path)).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["statistics"]["nodes"], 0);
        assert_eq!(written["data"]["edges"].as_array().unwrap().len(), 0);
    }
}
