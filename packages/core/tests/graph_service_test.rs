//! Graph Service Read Path Tests
//!
//! Builds a small world through `save_node`, then checks every read call of
//! `GraphService` against it.
//!
//! ## Fixture
//! - "Throne Room" (Room)
//! - "Castle" (Location) -CONTAINS-> "Throne Room"
//! - "Crown" (Item) -KEPT_IN-> "Throne Room"
//! - "Keep" (Location, tagged "fortress")

#[cfg(test)]
mod graph_service_tests {
    use anyhow::{anyhow, Result};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};
    use worldgraph_core::db::MemoryGraph;
    use worldgraph_core::logging::init_tracing;
    use worldgraph_core::models::{Direction, NodePayload, RelationshipSpec};
    use worldgraph_core::{GraphService, SyncConfig};

    async fn recv<T>(rx: oneshot::Receiver<T>) -> Result<T> {
        Ok(timeout(Duration::from_secs(2), rx).await??)
    }

    async fn save(service: &GraphService, payload: NodePayload) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        service
            .save_node(payload, move |report| {
                let _ = tx.send(report);
            })
            .await?;
        recv(rx).await.map(|_| ()).map_err(|_| anyhow!("save did not complete"))
    }

    async fn world() -> Result<(MemoryGraph, GraphService)> {
        init_tracing("worldgraph_core=debug");
        let graph = MemoryGraph::new();
        let service = GraphService::new(SyncConfig::default(), Arc::new(graph.clone()));

        save(&service, NodePayload::new("Throne Room").with_label("Room")).await?;
        save(
            &service,
            NodePayload::new("Castle")
                .with_label("Location")
                .with_description("Seat of the crown")
                .with_relationship(
                    RelationshipSpec::new("CONTAINS", "Throne Room", Direction::Outgoing)
                        .with_property("floor", 2),
                ),
        )
        .await?;
        save(
            &service,
            NodePayload::new("Crown")
                .with_label("Item")
                .with_relationship(RelationshipSpec::new("KEPT_IN", "Throne Room", Direction::Outgoing)),
        )
        .await?;
        save(
            &service,
            NodePayload::new("Keep").with_label("Location").with_tags(["fortress"]),
        )
        .await?;
        Ok((graph, service))
    }

    #[tokio::test]
    async fn test_load_round_trips_to_payload() -> Result<()> {
        let (_graph, service) = world().await?;
        let (tx, rx) = oneshot::channel();
        service
            .load_node("Castle", move |loaded| {
                let _ = tx.send(loaded);
            })
            .await?;

        let loaded = recv(rx).await?.expect("castle exists");
        assert!(loaded.system_field("_created").is_some());
        assert_eq!(loaded.relationships.len(), 1);

        let payload = loaded.into_payload();
        assert_eq!(payload.name, "Castle");
        assert_eq!(payload.description, "Seat of the crown");
        assert_eq!(payload.labels.iter().collect::<Vec<_>>(), vec!["Location"]);
        assert!(payload.properties.keys().all(|key| !key.starts_with('_')));
        let relationship = &payload.relationships[0];
        assert_eq!(relationship.rel_type, "CONTAINS");
        assert_eq!(relationship.target_name, "Throne Room");
        assert_eq!(relationship.direction, Direction::Outgoing);
        assert_eq!(relationship.properties["floor"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_of_unknown_name_emits_none() -> Result<()> {
        let (_graph, service) = world().await?;
        let (tx, rx) = oneshot::channel();
        assert_ok!(
            service
                .load_node("Atlantis", move |loaded| {
                    let _ = tx.send(loaded);
                })
                .await
        );
        assert!(recv(rx).await?.is_none());
        assert_err!(service.load_node("", |_| {}).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_limited() -> Result<()> {
        let (_graph, service) = world().await?;

        let (tx, rx) = oneshot::channel();
        service
            .search_nodes_by_prefix("RO", 10, move |names| {
                let _ = tx.send(names);
            })
            .await?;
        assert_eq!(recv(rx).await?, vec!["Crown".to_string(), "Throne Room".to_string()]);

        let (tx, rx) = oneshot::channel();
        service
            .search_nodes_by_prefix("e", 2, move |names| {
                let _ = tx.send(names);
            })
            .await?;
        assert_eq!(recv(rx).await?, vec!["Castle".to_string(), "Keep".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_relationships_walk_depth_plus_one_hops() -> Result<()> {
        let (_graph, service) = world().await?;
        let (tx, rx) = oneshot::channel();
        service
            .get_node_relationships("Castle", 1, move |rows| {
                let _ = tx.send(rows);
            })
            .await?;

        let rows = recv(rx).await?;
        assert!(rows.windows(2).all(|pair| pair[0].depth <= pair[1].depth));
        assert!(rows.iter().all(|row| row.depth <= 2));

        let first = &rows[0];
        assert_eq!(first.node_name, "Throne Room");
        assert_eq!(first.parent_name, "Castle");
        assert_eq!(first.direction, Direction::Outgoing);
        assert_eq!(first.depth, 1);

        let crown = rows
            .iter()
            .find(|row| row.node_name == "Crown")
            .expect("crown reached through the throne room");
        assert_eq!(crown.parent_name, "Throne Room");
        assert_eq!(crown.rel_type, "KEPT_IN");
        assert_eq!(crown.direction, Direction::Incoming);
        assert_eq!(crown.depth, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_label_hierarchy_groups_by_primary_label() -> Result<()> {
        let (_graph, service) = world().await?;
        let (tx, rx) = oneshot::channel();
        service
            .get_label_hierarchy(move |hierarchy| {
                let _ = tx.send(hierarchy);
            })
            .await?;

        let hierarchy = recv(rx).await?;
        assert_eq!(hierarchy["Item"], vec!["Crown".to_string()]);
        assert_eq!(hierarchy["Room"], vec!["Throne Room".to_string()]);
        let mut locations = hierarchy["Location"].clone();
        locations.sort();
        assert_eq!(locations, vec!["Castle".to_string(), "Keep".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_updates_names_and_last_modified() -> Result<()> {
        let (graph, service) = world().await?;
        tokio::time::sleep(Duration::from_millis(2)).await;

        let (tx, rx) = oneshot::channel();
        service
            .rename_node("Castle", "Fortress", move |renamed| {
                let _ = tx.send(renamed);
            })
            .await?;
        assert!(recv(rx).await?);
        assert_eq!(graph.relationships_of("Fortress").await.len(), 1);

        let (tx, rx) = oneshot::channel();
        service
            .get_all_node_names(move |names| {
                let _ = tx.send(names);
            })
            .await?;
        assert_eq!(recv(rx).await?, vec!["Crown", "Fortress", "Keep", "Throne Room"]);

        let (tx, rx) = oneshot::channel();
        service
            .get_last_modified_node(move |latest| {
                let _ = tx.send(latest);
            })
            .await?;
        let latest = recv(rx).await?.expect("nodes were saved");
        assert_eq!(latest.name, "Fortress");
        assert!(latest.modified.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_suggestions_rank_peer_tags() -> Result<()> {
        let (_graph, service) = world().await?;
        let (tx, rx) = oneshot::channel();
        service.generate_suggestions("Castle", ["Location"], move |suggestions| {
            let _ = tx.send(suggestions);
        })?;

        let suggestions = recv(rx).await?;
        let fortress = suggestions
            .tags
            .iter()
            .find(|tag| tag.tag == "fortress")
            .expect("peer tag suggested");
        // 1 of 2 peers, 1 of 4 nodes: 50 + 12.5
        assert_eq!(fortress.confidence, 62.5);
        assert!(suggestions.relationships.iter().all(|rel| rel.target != "Throne Room"));
        Ok(())
    }
}
