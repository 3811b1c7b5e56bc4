#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use crate::config::HarnessConfig;
    use crate::dialect::Dialect;
    use crate::error::HarnessError;
    use crate::node::{ExtAddr, Mode, NetworkDataPrefix, Rloc16, Role, Scope};
    use crate::test_helpers::{Script, scripted_node, test_config};

    fn compact() -> HarnessConfig {
        test_config().with_dialect(Dialect::Compact)
    }

    #[tokio::test]
    async fn test_construction_resets_whitelist_and_child_timeout() {
        let config = test_config();
        let (node, dut) = scripted_node(1, Script::new(), &config).await.unwrap();
        assert!(!node.whitelist_enabled());
        assert!(node.whitelist().is_empty());
        assert_eq!(node.timers().child_timeout, Some(100));

        drop(node);
        assert_eq!(
            dut.received().await,
            vec!["mac whitelist clear", "mac whitelist disable", "thread timeout 100"]
        );
    }

    #[tokio::test]
    async fn test_compact_construction_sequence() {
        let (node, dut) = scripted_node(2, Script::new(), &compact()).await.unwrap();
        drop(node);
        assert_eq!(
            dut.received().await,
            vec!["whitelist clear", "whitelist disable", "childtimeout 100"]
        );
    }

    #[tokio::test]
    async fn test_construction_fails_on_silent_dut() {
        let config = test_config();
        let script = Script::new().silent("mac whitelist clear");
        let (transport, _dut) = crate::test_helpers::ScriptedDut::spawn(1.into(), script, &config);
        let err = crate::node::Node::with_transport(transport, &config)
            .await
            .err()
            .unwrap();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_state_parsing() {
        let script = Script::new()
            .reply("thread state", &["router"])
            .reply("thread state", &["disabled"]);
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        assert_eq!(node.get_state().await.unwrap(), Role::Router);

        let err = node.get_state().await.unwrap_err();
        assert!(matches!(err, HarnessError::ProtocolMismatch { .. }));
        assert!(node.last_exchange().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_identity_queries() {
        let script = Script::new()
            .reply("mac addr16", &["0c01"])
            .reply("mac addr64", &["18b4300000000002"])
            .reply("mac panid", &["0xface"]);
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();

        let rloc = node.get_addr16().await.unwrap();
        assert_eq!(rloc, Rloc16(0x0c01));
        assert_eq!(rloc.router_id(), 3);
        assert!(!rloc.is_router());

        let ext = node.get_addr64().await.unwrap();
        assert_eq!(ext, ExtAddr(0x18b4_3000_0000_0002));
        // Cached: the script holds a single addr64 step.
        assert_eq!(node.get_addr64().await.unwrap(), ext);
        assert_eq!(node.get_panid().await.unwrap(), 0xface);
    }

    #[tokio::test]
    async fn test_setters_track_timers_and_whitelist() {
        let script = Script::new()
            .ack("thread mode rsn")
            .ack("thread network_id_timeout 110")
            .ack("netdata context_reuse_delay 10")
            .ack("mac whitelist add 18b4300000000002 -40")
            .ack("mac whitelist enable")
            .ack("mac whitelist remove 18b4300000000002");
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();

        node.set_mode(Mode::END_DEVICE).await.unwrap();
        node.set_network_id_timeout(110).await.unwrap();
        node.set_context_reuse_delay(10).await.unwrap();
        let timers = node.timers();
        assert_eq!(timers.network_id_timeout, Some(110));
        assert_eq!(timers.context_reuse_delay, Some(10));

        let peer = ExtAddr(0x18b4_3000_0000_0002);
        node.add_whitelist(peer, Some(-40)).await.unwrap();
        node.enable_whitelist().await.unwrap();
        assert_eq!(node.whitelist().get(&peer), Some(&Some(-40)));
        assert!(node.whitelist_enabled());

        node.remove_whitelist(peer).await.unwrap();
        assert!(node.whitelist().is_empty());
    }

    #[tokio::test]
    async fn test_network_name_rejects_whitespace_locally() {
        let (mut node, _dut) = scripted_node(1, Script::new(), &test_config()).await.unwrap();
        let err = node.set_network_name("two words").await.unwrap_err();
        assert!(matches!(err, HarnessError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_namespaced_addresses_come_from_mesh_section() {
        let script = Script::new().reply(
            "ifconfig",
            &[
                "lo:",
                "  inet6 ::1/128",
                "thread:",
                "  inet6 fe80::1ab4:3000:0:2/64",
                "  inet6 fdde:ad00:beef::ff:fe00:400/64",
                "  inet6 2001::1ab4:3000:0:2/64",
            ],
        );
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        let addrs = node.get_addrs().await.unwrap();
        let scopes: Vec<Scope> = addrs.iter().map(|a| a.scope()).collect();
        assert_eq!(scopes, vec![Scope::LinkLocal, Scope::MeshLocal, Scope::Global]);
        assert!(addrs.iter().all(|a| a.prefix_len == Some(64)));
    }

    #[tokio::test]
    async fn test_compact_addresses_are_flat() {
        let script = Script::new().reply("ipaddr", &["fe80::2", "fdde:ad00:beef::5"]);
        let (mut node, _dut) = scripted_node(1, script, &compact()).await.unwrap();
        let addrs = node.get_addrs().await.unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[1].addr, "fdde:ad00:beef::5".parse::<Ipv6Addr>().unwrap());
        assert_eq!(addrs[1].prefix_len, None);
    }

    #[tokio::test]
    async fn test_cache_rows() {
        let script = Script::new().reply(
            "thread cache",
            &["fdde:ad00:beef::1ab4 0 0401 25", "Total: 1"],
        );
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        let cache = node.get_cache().await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache[0].rloc16, Rloc16(0x0401));
        assert_eq!(cache[0].timeout, 25);
    }

    #[tokio::test]
    async fn test_cache_unsupported_in_compact_dialect_sends_nothing() {
        let (mut node, dut) = scripted_node(1, Script::new(), &compact()).await.unwrap();
        let err = node.get_cache().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Unsupported {
                operation: "cache",
                dialect: Dialect::Compact
            }
        ));
        drop(node);
        assert_eq!(dut.received().await.len(), 3);
    }

    #[tokio::test]
    async fn test_scan_rows() {
        let script = Script::new().reply(
            "mac scan",
            &[
                "| Network Name     | Extended PAN     | PAN  | MAC Address      | Ch | dBm |",
                "| OpenThread       | dead00beef00cafe | face | 18b4300000000002 | 11 | -20 |",
            ],
        );
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        let results = node.scan().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].network_name, "OpenThread");
        assert_eq!(results[0].panid, 0xface);
        assert_eq!(results[0].ext_addr, ExtAddr(0x18b4_3000_0000_0002));
        assert_eq!(results[0].rssi, -20);
    }

    #[tokio::test]
    async fn test_ping_collects_responders() {
        let script = Script::new().expect(
            "ping -I thread -s 16 ff03::1",
            "16 bytes from fdde:ad00:beef::1%thread: icmp_seq=1 hlim=64\r\n\
             16 bytes from fdde:ad00:beef::2%thread: icmp_seq=1 hlim=64\r\n",
        );
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        let responders = node
            .ping("ff03::1".parse().unwrap(), 2, Some(16))
            .await
            .unwrap();
        assert_eq!(responders.len(), 2);
        assert!(responders.contains(&"fdde:ad00:beef::2".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_ping_short_of_response_count_is_timeout() {
        let script = Script::new().expect(
            "ping -I thread ff03::1",
            "8 bytes from fdde:ad00:beef::1%thread: icmp_seq=1 hlim=64\r\n",
        );
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        let err = node
            .ping("ff03::1".parse().unwrap(), 3, None)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_ping_without_reply_is_timeout() {
        let script = Script::new().silent("ping 2001::9");
        let (mut node, _dut) = scripted_node(1, script, &compact()).await.unwrap();
        let err = node.ping("2001::9".parse().unwrap(), 1, None).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_help_lists_verbs() {
        let script = Script::new().reply("?", &["Commands:", "  ifconfig", "  thread", "  ping"]);
        let (mut node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        assert_eq!(
            node.get_commands().await.unwrap(),
            vec!["ifconfig", "thread", "ping"]
        );
    }

    #[tokio::test]
    async fn test_prefix_commands() {
        let prefix: NetworkDataPrefix =
            NetworkDataPrefix::new("2001::/64".parse().unwrap(), "pvcrs".parse().unwrap());
        let script = Script::new()
            .ack("prefix add 2001::/64 pvcrs med")
            .ack("netdataregister")
            .ack("prefix remove 2001::/64");
        let (mut node, dut) = scripted_node(1, script, &compact()).await.unwrap();
        node.add_prefix(&prefix).await.unwrap();
        node.register_netdata().await.unwrap();
        node.remove_prefix(prefix.prefix).await.unwrap();
        drop(node);
        assert_eq!(dut.received().await.len(), 6);
    }

    #[tokio::test]
    async fn test_close_sends_shutdown_once() {
        let (mut node, dut) = scripted_node(1, Script::new(), &test_config()).await.unwrap();
        node.close().await.unwrap();
        node.close().await.unwrap();
        assert!(!node.is_connected());
        drop(node);
        let received = dut.received().await;
        assert_eq!(received.last().map(String::as_str), Some("shutdown"));
        assert_eq!(received.iter().filter(|c| *c == "shutdown").count(), 1);
    }
}
