#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{HarnessError, Result};
    use crate::node::Role;
    use crate::report::Outcome;
    use crate::scenario::{Scenario, ScenarioContext, Wait, run_scenario};
    use crate::test_helpers::{Script, ScriptedDut, scripted_node, test_config};

    /// Opens node 1 over a script and checks its role.
    struct RoleCheck {
        expected: Role,
        script: Mutex<Option<Script>>,
        dut: Mutex<Option<ScriptedDut>>,
    }

    impl RoleCheck {
        fn new(expected: Role, script: Script) -> Self {
            Self {
                expected,
                script: Mutex::new(Some(script)),
                dut: Mutex::new(None),
            }
        }

        async fn received(&self) -> Vec<String> {
            let dut = self.dut.lock().unwrap().take();
            match dut {
                Some(dut) => dut.received().await,
                None => Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Scenario for RoleCheck {
        fn name(&self) -> &'static str {
            "role-check"
        }

        fn description(&self) -> &'static str {
            "scripted role check"
        }

        async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            let (node, dut) = scripted_node(1, script, ctx.config()).await?;
            *self.dut.lock().unwrap() = Some(dut);
            ctx.insert_node(node)?;
            ctx.expect_role(1, self.expected).await
        }
    }

    #[tokio::test]
    async fn test_passing_scenario_tears_down() {
        let scenario = RoleCheck::new(
            Role::Leader,
            Script::new()
                .reply("thread state", &["leader"])
                .ack("thread stop"),
        );
        let report = run_scenario(&scenario, &test_config()).await;
        assert!(report.passed(), "{report}");
        assert!(report.teardown_warnings.is_empty());

        let received = scenario.received().await;
        assert_eq!(&received[received.len() - 2..], ["thread stop", "shutdown"]);
    }

    #[tokio::test]
    async fn test_assertion_failure_keeps_last_exchange() {
        let scenario = RoleCheck::new(
            Role::Router,
            Script::new()
                .reply("thread state", &["child"])
                .ack("thread stop"),
        );
        let report = run_scenario(&scenario, &test_config()).await;
        assert_eq!(report.outcome, Outcome::Failed);
        assert!(!report.fatal);
        assert!(report.error.as_deref().unwrap().contains("router"));
        assert!(report.last_exchange.as_deref().unwrap().contains("thread state"));

        // Teardown still ran.
        let received = scenario.received().await;
        assert!(received.contains(&"thread stop".to_string()));
        assert_eq!(received.last().map(String::as_str), Some("shutdown"));
    }

    #[tokio::test]
    async fn test_protocol_mismatch_is_fatal() {
        let scenario = RoleCheck::new(
            Role::Leader,
            Script::new()
                .expect("thread state", "Error 7: InvalidArgs\r\n")
                .ack("thread stop"),
        );
        let report = run_scenario(&scenario, &test_config()).await;
        assert!(!report.passed());
        assert!(report.fatal);
        assert!(report.last_exchange.as_deref().unwrap().contains("InvalidArgs"));
    }

    #[tokio::test]
    async fn test_unanswered_stop_becomes_teardown_warning() {
        let scenario = RoleCheck::new(Role::Leader, Script::new().reply("thread state", &["leader"]));
        let report = run_scenario(&scenario, &test_config()).await;
        assert!(report.passed());
        assert_eq!(report.teardown_warnings.len(), 1);
        assert!(report.teardown_warnings[0].contains("stop"));
    }

    #[tokio::test]
    async fn test_node_zero_and_duplicates_rejected() {
        let mut ctx = ScenarioContext::new(test_config());
        let err = ctx.add_node(0).await.err().unwrap();
        assert!(matches!(err, HarnessError::InvalidValue { .. }));

        let (node, _dut) = scripted_node(4, Script::new(), &test_config()).await.unwrap();
        ctx.insert_node(node).unwrap();
        let (again, _dut2) = scripted_node(4, Script::new(), &test_config()).await.unwrap();
        assert!(ctx.insert_node(again).is_err());
        assert!(matches!(ctx.node(5), Err(HarnessError::UnknownNode(_))));
        ctx.teardown().await;
    }

    #[tokio::test]
    async fn test_reachability_expectations() {
        let script = Script::new()
            .silent("ping -I thread 2001::1")
            .silent("ping -I thread 2001::2")
            .expect(
                "ping -I thread 2001::3",
                "8 bytes from 2001::3%thread: icmp_seq=1 hlim=64\r\n",
            );
        let (node, _dut) = scripted_node(1, script, &test_config()).await.unwrap();
        let mut ctx = ScenarioContext::new(test_config());
        ctx.insert_node(node).unwrap();

        ctx.expect_unreachable(1, "2001::1".parse().unwrap())
            .await
            .unwrap();
        let err = ctx
            .expect_reachable(1, "2001::2".parse().unwrap())
            .await
            .unwrap_err();
        match err {
            HarnessError::Assertion { last_exchange, .. } => {
                assert!(last_exchange.unwrap().contains("2001::2"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        ctx.expect_unreachable(1, "2001::3".parse().unwrap())
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn test_wait_scales_with_unit() {
        let ctx = ScenarioContext::new(test_config());
        let started = tokio::time::Instant::now();
        ctx.wait(Wait::Units(5)).await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(5));
    }

    #[test]
    fn test_context_can_be_held_across_scenario_awaits() {
        // Scenario futures hold `&ScenarioContext` across awaits and must
        // stay `Send`, so everything the context owns has to be `Sync`.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScenarioContext>();
        assert_send_sync::<crate::transport::Transport>();
        assert_send_sync::<crate::node::Node>();
    }
}
