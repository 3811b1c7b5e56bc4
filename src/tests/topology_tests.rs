#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::error::HarnessError;
    use crate::node::{ExtAddr, Node, NodeId};
    use crate::scenario::ScenarioContext;
    use crate::test_helpers::{Script, ScriptedDut, scripted_node, test_config};
    use crate::topology::Topology;

    const EXT1: &str = "18b4300000000001";
    const EXT2: &str = "18b4300000000002";

    async fn pair(
        first: Script,
        second: Script,
    ) -> (BTreeMap<NodeId, Node>, ScriptedDut, ScriptedDut) {
        let config = test_config();
        let (n1, d1) = scripted_node(1, first, &config).await.unwrap();
        let (n2, d2) = scripted_node(2, second, &config).await.unwrap();
        let nodes = BTreeMap::from([(n1.id(), n1), (n2.id(), n2)]);
        (nodes, d1, d2)
    }

    #[tokio::test]
    async fn test_apply_programs_both_directions() {
        let first = Script::new()
            .reply("mac addr64", &[EXT1])
            .ack(format!("mac whitelist add {EXT2}"))
            .ack("mac whitelist enable");
        let second = Script::new()
            .reply("mac addr64", &[EXT2])
            .ack(format!("mac whitelist add {EXT1} -30"))
            .ack("mac whitelist enable");
        let (mut nodes, d1, d2) = pair(first, second).await;

        let mut topology = Topology::new();
        topology
            .admit(NodeId::new(1), NodeId::new(2), None)
            .admit(NodeId::new(2), NodeId::new(1), Some(-30));
        topology.apply(&mut nodes).await.unwrap();

        let n2 = &nodes[&NodeId::new(2)];
        assert!(n2.whitelist_enabled());
        assert_eq!(n2.whitelist().get(&ExtAddr(0x18b4_3000_0000_0001)), Some(&Some(-30)));

        drop(nodes);
        assert_eq!(d1.received().await.len(), 6);
        assert_eq!(d2.received().await.len(), 6);
    }

    #[tokio::test]
    async fn test_apply_with_unknown_node_writes_nothing() {
        let first = Script::new().reply("mac addr64", &[EXT1]);
        let (mut nodes, d1, _d2) = pair(first, Script::new()).await;

        let mut topology = Topology::new();
        topology.link(NodeId::new(1), NodeId::new(3));
        let err = topology.apply(&mut nodes).await.unwrap_err();
        assert!(matches!(err, HarnessError::UnknownNode(id) if id == NodeId::new(3)));

        drop(nodes);
        let received = d1.received().await;
        assert!(received.iter().all(|c| !c.contains("whitelist add")));
    }

    #[tokio::test]
    async fn test_reapply_revokes_removed_edges() {
        let first = Script::new()
            .reply("mac addr64", &[EXT1])
            .ack(format!("mac whitelist add {EXT2}"))
            .ack("mac whitelist enable")
            .ack(format!("mac whitelist remove {EXT2}"))
            .ack("mac whitelist enable");
        let second = Script::new()
            .reply("mac addr64", &[EXT2])
            .ack(format!("mac whitelist add {EXT1}"))
            .ack("mac whitelist enable")
            .ack(format!("mac whitelist remove {EXT1}"))
            .ack("mac whitelist enable");
        let (mut nodes, d1, d2) = pair(first, second).await;

        let mut topology = Topology::new();
        topology.link(NodeId::new(1), NodeId::new(2));
        topology.apply(&mut nodes).await.unwrap();
        assert_eq!(nodes[&NodeId::new(1)].whitelist().len(), 1);

        topology.unlink(NodeId::new(1), NodeId::new(2));
        topology.apply(&mut nodes).await.unwrap();
        for node in nodes.values() {
            assert!(node.whitelist().is_empty());
            assert!(node.whitelist_enabled());
        }

        drop(nodes);
        let received = d1.received().await;
        assert_eq!(received.len(), 8);
        assert_eq!(received[6], format!("mac whitelist remove {EXT2}"));
        assert_eq!(d2.received().await.len(), 8);
    }

    #[tokio::test]
    async fn test_reapply_of_unchanged_model_only_enables() {
        let first = Script::new()
            .reply("mac addr64", &[EXT1])
            .ack(format!("mac whitelist add {EXT2} -30"))
            .ack("mac whitelist enable")
            .ack("mac whitelist enable");
        let second = Script::new()
            .reply("mac addr64", &[EXT2])
            .ack("mac whitelist enable")
            .ack("mac whitelist enable");
        let (mut nodes, d1, d2) = pair(first, second).await;

        let mut topology = Topology::new();
        topology.admit(NodeId::new(1), NodeId::new(2), Some(-30));
        topology.apply(&mut nodes).await.unwrap();
        topology.apply(&mut nodes).await.unwrap();

        drop(nodes);
        let received = d1.received().await;
        assert_eq!(received.len(), 7);
        assert!(received.iter().filter(|c| c.contains("whitelist add")).count() == 1);
        assert_eq!(d2.received().await.len(), 6);
    }

    #[tokio::test]
    async fn test_admitted_only_node_admits_nobody() {
        let first = Script::new()
            .reply("mac addr64", &[EXT1])
            .ack(format!("mac whitelist add {EXT2}"))
            .ack("mac whitelist enable");
        let second = Script::new()
            .reply("mac addr64", &[EXT2])
            .ack("mac whitelist enable");
        let (mut nodes, _d1, d2) = pair(first, second).await;

        let mut topology = Topology::new();
        topology.admit(NodeId::new(1), NodeId::new(2), None);
        topology.apply(&mut nodes).await.unwrap();

        let n2 = &nodes[&NodeId::new(2)];
        assert!(n2.whitelist_enabled());
        assert!(n2.whitelist().is_empty());

        drop(nodes);
        let received = d2.received().await;
        assert!(received.iter().all(|c| !c.contains("whitelist add")));
        assert_eq!(received.last().map(String::as_str), Some("mac whitelist enable"));
    }

    #[tokio::test]
    async fn test_context_link_and_unlink_on_live_mesh() {
        // Node 2's address is resolved first, so node 1 is written to before
        // it is asked for its own.
        let first = Script::new()
            .ack(format!("mac whitelist add {EXT2}"))
            .reply("mac addr64", &[EXT1])
            .ack(format!("mac whitelist remove {EXT2}"));
        let second = Script::new()
            .reply("mac addr64", &[EXT2])
            .ack(format!("mac whitelist add {EXT1}"))
            .ack(format!("mac whitelist remove {EXT1}"));
        let (nodes, _d1, _d2) = pair(first, second).await;

        let mut ctx = ScenarioContext::new(test_config());
        for (_, node) in nodes {
            ctx.insert_node(node).unwrap();
        }

        ctx.link(1, 2).await.unwrap();
        assert!(ctx.topology().has_edge(NodeId::new(1), NodeId::new(2)));
        assert!(ctx.topology().has_edge(NodeId::new(2), NodeId::new(1)));

        ctx.unlink(1, 2).await.unwrap();
        assert!(!ctx.topology().has_edge(NodeId::new(1), NodeId::new(2)));
        assert!(ctx.node(1).unwrap().whitelist().is_empty());
    }
}
