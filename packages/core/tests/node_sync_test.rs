//! Node Synchronization Tests
//!
//! End-to-end saves through `GraphService` against `MemoryGraph`.
//!
//! ## Test Coverage
//! - Idempotence and creation-time immutability, whatever type `_created` holds
//! - Properties missing from a later payload are dropped
//! - Label convergence from any starting label set
//! - Relationship replace-all
//! - Atomic failure when a relationship target is missing
//! - The Castle / Throne Room scenario under each missing-target policy
//! - Deleting an absent node

#[cfg(test)]
mod node_sync_tests {
    use anyhow::{anyhow, Result};
    use serde_json::{json, Value};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;
    use worldgraph_core::db::MemoryGraph;
    use worldgraph_core::models::{Direction, NodePayload, PropertyMap, RelationshipSpec};
    use worldgraph_core::operations::{SyncReport, TaskFailure};
    use worldgraph_core::{GraphService, MissingTargetPolicy, SyncConfig};

    struct Harness {
        graph: MemoryGraph,
        service: GraphService,
        failures: mpsc::UnboundedReceiver<TaskFailure>,
    }

    fn harness_with(config: SyncConfig) -> Harness {
        let graph = MemoryGraph::new();
        let (tx, failures) = mpsc::unbounded_channel();
        let service = GraphService::new(config, Arc::new(graph.clone())).with_error_handler(
            move |failure| {
                let _ = tx.send(failure);
            },
        );
        Harness {
            graph,
            service,
            failures,
        }
    }

    fn harness() -> Harness {
        harness_with(SyncConfig::default())
    }

    async fn save(harness: &mut Harness, payload: NodePayload) -> Result<Result<SyncReport, TaskFailure>> {
        let (tx, rx) = oneshot::channel();
        let handle = harness
            .service
            .save_node(payload, move |report| {
                let _ = tx.send(report);
            })
            .await?;
        timeout(Duration::from_secs(2), handle.wait()).await?;

        if let Ok(report) = rx.await {
            return Ok(Ok(report));
        }
        harness
            .failures
            .try_recv()
            .map(Err)
            .map_err(|_| anyhow!("save emitted neither a result nor an error"))
    }

    async fn seed(graph: &MemoryGraph, name: &str, labels: &[&str]) {
        let mut props = PropertyMap::new();
        props.insert("name".into(), json!(name));
        graph
            .insert_node(labels.iter().copied().chain(["Node"]), props)
            .await;
    }

    fn castle() -> NodePayload {
        NodePayload::new("Castle")
            .with_label("Location")
            .with_tags(["fortress"])
            .with_relationship(RelationshipSpec::new(
                "CONTAINS",
                "Throne Room",
                Direction::Outgoing,
            ))
    }

    fn domain_labels(labels: &BTreeSet<String>) -> BTreeSet<String> {
        labels.iter().filter(|l| *l != "Node").cloned().collect()
    }

    #[tokio::test]
    async fn test_castle_scenario_with_existing_target() -> Result<()> {
        let mut harness = harness();
        seed(&harness.graph, "Throne Room", &["Room"]).await;

        let report = save(&mut harness, castle()).await?.map_err(|f| anyhow!(f.to_string()))?;
        assert!(report.created);
        assert_eq!(report.relationships_written, 1);

        let node = harness.graph.node("Castle").await.expect("castle saved");
        assert_eq!(
            node.labels,
            BTreeSet::from(["Location".to_string(), "Node".to_string()])
        );
        assert_eq!(node.properties["tags"], json!(["fortress"]));
        assert_eq!(node.properties["_author"], json!("System"));

        let relationships = harness.graph.relationships_of("Castle").await;
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].rel_type, "CONTAINS");
        assert_eq!(relationships[0].start_name.as_deref(), Some("Castle"));
        assert_eq!(relationships[0].end_name.as_deref(), Some("Throne Room"));
        assert_eq!(harness.graph.node_count().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_castle_scenario_against_empty_graph_aborts() -> Result<()> {
        let mut harness = harness();

        let failure = save(&mut harness, castle()).await?.expect_err("missing target aborts");
        assert_eq!(failure.operation, "save_node");
        assert!(failure.message.contains("Throne Room"));
        assert_eq!(harness.graph.node_count().await, 0);
        assert_eq!(harness.graph.relationship_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_castle_scenario_with_stub_policy() -> Result<()> {
        let mut harness = harness_with(SyncConfig {
            missing_target_policy: MissingTargetPolicy::CreateStub,
            ..SyncConfig::default()
        });

        let report = save(&mut harness, castle()).await?.map_err(|f| anyhow!(f.to_string()))?;
        assert_eq!(report.stubs_created, vec!["Throne Room".to_string()]);

        let stub = harness.graph.node("Throne Room").await.expect("stub created");
        assert!(stub.labels.contains("STUMP"));
        assert!(stub.properties.contains_key("_created"));
        assert_eq!(harness.graph.relationships_of("Castle").await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_castle_scenario_with_skip_policy() -> Result<()> {
        let mut harness = harness_with(SyncConfig {
            missing_target_policy: MissingTargetPolicy::Skip,
            ..SyncConfig::default()
        });

        let report = save(&mut harness, castle()).await?.map_err(|f| anyhow!(f.to_string()))?;
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.relationships_written, 0);
        assert!(harness.graph.node("Castle").await.is_some());
        assert!(harness.graph.node("Throne Room").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_second_identical_save_only_advances_modified() -> Result<()> {
        let mut harness = harness();
        seed(&harness.graph, "Throne Room", &["Room"]).await;
        let payload = castle().with_description("Seat of the crown").with_property("height", 40);

        save(&mut harness, payload.clone()).await?.map_err(|f| anyhow!(f.to_string()))?;
        let first = harness.graph.node("Castle").await.expect("first save");
        let first_rels = harness.graph.relationships_of("Castle").await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = save(&mut harness, payload).await?.map_err(|f| anyhow!(f.to_string()))?;
        assert!(!report.created);
        assert!(report.labels_added.is_empty() && report.labels_removed.is_empty());

        let second = harness.graph.node("Castle").await.expect("second save");
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.properties["_created"], second.properties["_created"]);

        let stamp = |node: &worldgraph_core::db::MemoryNode| {
            node.properties["_modified"].as_str().map(str::to_string)
        };
        assert!(stamp(&second) > stamp(&first));

        let without_modified = |node: &worldgraph_core::db::MemoryNode| {
            let mut props = node.properties.clone();
            props.remove("_modified");
            props
        };
        assert_eq!(without_modified(&first), without_modified(&second));
        assert_eq!(first_rels, harness.graph.relationships_of("Castle").await);
        assert_eq!(harness.graph.node_count().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_created_survives_changed_saves() -> Result<()> {
        let mut harness = harness();
        save(&mut harness, NodePayload::new("Keep").with_label("Location"))
            .await?
            .map_err(|f| anyhow!(f.to_string()))?;
        let created = harness.graph.node("Keep").await.expect("saved").properties["_created"].clone();

        for description in ["Old tower", "Ruined tower"] {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let payload = NodePayload::new("Keep")
                .with_label("Ruin")
                .with_description(description);
            save(&mut harness, payload).await?.map_err(|f| anyhow!(f.to_string()))?;
        }

        let node = harness.graph.node("Keep").await.expect("saved");
        assert_eq!(node.properties["_created"], created);
        assert_eq!(node.properties["description"], json!("Ruined tower"));
        Ok(())
    }

    #[tokio::test]
    async fn test_non_string_created_is_kept_as_stored() -> Result<()> {
        let mut harness = harness();
        let mut props = PropertyMap::new();
        props.insert("name".into(), json!("Keep"));
        props.insert("_created".into(), json!(1700000000000_i64));
        harness.graph.insert_node(["Node", "Location"], props).await;

        let report = save(&mut harness, NodePayload::new("Keep").with_label("Location"))
            .await?
            .map_err(|f| anyhow!(f.to_string()))?;
        assert!(!report.created);

        let node = harness.graph.node("Keep").await.expect("saved");
        assert_eq!(node.properties["_created"], json!(1700000000000_i64));
        assert!(node.properties["_modified"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_properties_dropped_on_resave() -> Result<()> {
        let mut harness = harness();
        save(
            &mut harness,
            NodePayload::new("Castle").with_label("Location").with_property("height", 40),
        )
        .await?
        .map_err(|f| anyhow!(f.to_string()))?;

        save(
            &mut harness,
            NodePayload::new("Castle").with_label("Location").with_property("width", 12),
        )
        .await?
        .map_err(|f| anyhow!(f.to_string()))?;

        let node = harness.graph.node("Castle").await.expect("saved");
        let keys: Vec<&str> = node.properties.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["_author", "_created", "_modified", "description", "name", "tags", "width"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_labels_converge_to_desired_set() -> Result<()> {
        let mut harness = harness();
        seed(&harness.graph, "Keep", &["Old", "Shared", "Stale"]).await;

        let payload = NodePayload::new("Keep").with_label("Shared").with_label("New");
        let report = save(&mut harness, payload).await?.map_err(|f| anyhow!(f.to_string()))?;
        assert_eq!(report.labels_added, vec!["New".to_string()]);
        assert_eq!(report.labels_removed, vec!["Old".to_string(), "Stale".to_string()]);

        let node = harness.graph.node("Keep").await.expect("saved");
        assert_eq!(
            domain_labels(&node.labels),
            BTreeSet::from(["New".to_string(), "Shared".to_string()])
        );
        assert!(node.labels.contains("Node"));
        Ok(())
    }

    #[tokio::test]
    async fn test_relationships_are_replaced_not_merged() -> Result<()> {
        let mut harness = harness();
        seed(&harness.graph, "River", &["Location"]).await;
        seed(&harness.graph, "Kingdom", &["Realm"]).await;

        let first = NodePayload::new("Castle")
            .with_label("Location")
            .with_relationship(RelationshipSpec::new("NEAR", "River", Direction::Outgoing).with_property("miles", 2));
        save(&mut harness, first).await?.map_err(|f| anyhow!(f.to_string()))?;

        let second = NodePayload::new("Castle")
            .with_label("Location")
            .with_relationship(RelationshipSpec::new("RULES", "Kingdom", Direction::Incoming));
        let report = save(&mut harness, second).await?.map_err(|f| anyhow!(f.to_string()))?;
        assert_eq!(report.relationships_removed, 1);

        let relationships = harness.graph.relationships_of("Castle").await;
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].rel_type, "RULES");
        assert_eq!(relationships[0].start_name.as_deref(), Some("Kingdom"));
        assert_eq!(relationships[0].end_name.as_deref(), Some("Castle"));
        assert!(relationships[0].properties.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_second_target_leaves_graph_untouched() -> Result<()> {
        let mut harness = harness();
        seed(&harness.graph, "River", &["Location"]).await;
        save(
            &mut harness,
            NodePayload::new("Castle").with_label("Location").with_description("before"),
        )
        .await?
        .map_err(|f| anyhow!(f.to_string()))?;
        let before = harness.graph.node("Castle").await.expect("saved");

        let payload = NodePayload::new("Castle")
            .with_label("Ruin")
            .with_description("after")
            .with_property("height", 12)
            .with_relationship(RelationshipSpec::new("NEAR", "River", Direction::Outgoing))
            .with_relationship(RelationshipSpec::new("NEAR", "Atlantis", Direction::Outgoing));
        save(&mut harness, payload).await?.expect_err("second target is missing");

        assert_eq!(harness.graph.node("Castle").await, Some(before));
        assert_eq!(harness.graph.relationship_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_system_and_reserved_keys_never_merged() -> Result<()> {
        let mut harness = harness();
        let payload = NodePayload::new("Castle")
            .with_label("Location")
            .with_property("_author", "Mallory")
            .with_property("name", "Imposter")
            .with_property("height", 40);

        let report = save(&mut harness, payload).await?.map_err(|f| anyhow!(f.to_string()))?;
        assert_eq!(report.properties_merged, 1);

        let node = harness.graph.node("Castle").await.expect("saved");
        assert_eq!(node.properties["_author"], json!("System"));
        assert_eq!(node.properties["height"], json!(40));
        assert!(matches!(node.properties.get("_created"), Some(Value::String(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_of_absent_node_succeeds() -> Result<()> {
        let harness = harness();
        let (tx, rx) = oneshot::channel();
        harness
            .service
            .delete_node("Nowhere", move |deleted| {
                let _ = tx.send(deleted);
            })
            .await?;

        assert!(timeout(Duration::from_secs(2), rx).await??);
        Ok(())
    }
}
