#[cfg(test)]
mod tests {
    use regex::Regex;

    use crate::error::HarnessError;
    use crate::node::NodeId;
    use crate::session::{CommandSession, ExchangeOutcome, Reply, Request};
    use crate::test_helpers::{Script, ScriptedDut, test_config};

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    fn session(script: Script) -> (CommandSession, ScriptedDut) {
        let config = test_config();
        let (transport, dut) = ScriptedDut::spawn(NodeId::new(1), script, &config);
        (
            CommandSession::new(transport, config.response_timeout, config.transcript_len),
            dut,
        )
    }

    #[tokio::test]
    async fn test_scalar_captures_value_line() {
        let (mut session, _dut) = session(Script::new().reply("rloc16", &["0400"]));
        let reply = session
            .request(Request::scalar("rloc16", &re(r"(?m)^([0-9a-f]{4})\r?$")))
            .await
            .unwrap();
        assert_eq!(reply, Reply::Scalar("0400".into()));
        assert_eq!(
            session.transcript().last().unwrap().outcome,
            ExchangeOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_scalar_without_value_is_mismatch() {
        let (mut session, _dut) = session(Script::new().reply("state", &["disabled"]));
        let err = session
            .request(Request::scalar("state", &re(r"(?m)^(leader|router)\r?$")))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn test_rows_skip_totals() {
        let (mut session, _dut) = session(Script::new().reply(
            "thread cache",
            &["fdde:ad00:beef::1 0 0401 12", "2001::5 0 0802 7", "Total: 2"],
        ));
        let row = re(r"(?m)^(\S+) (\d+) ([0-9a-f]{4}) (\d+)\r?$");
        let total = re(r"(?m)^Total: \d+\r?$");
        let reply = session
            .request(Request::rows("thread cache", &row, &[&total]))
            .await
            .unwrap();
        let Reply::Rows(rows) = reply else {
            panic!("expected rows, got {reply:?}");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["2001::5", "0", "0802", "7"]);
    }

    #[tokio::test]
    async fn test_sectioned_keeps_named_section_only() {
        let (mut session, _dut) = session(Script::new().reply(
            "ifconfig",
            &[
                "lo:",
                "  inet6 ::1/128",
                "thread:",
                "  inet6 fe80::1/64",
                "  inet6 fdde:ad00:beef::2/64",
            ],
        ));
        let header = re(r"(?m)^(\S+):\r?$");
        let row = re(r"(?m)^[ \t]+inet6[ \t]+([0-9a-fA-F:.]+)/(\d{1,3})[ \t]*\r?$");
        let reply = session
            .request(Request::sectioned("ifconfig", &header, &row, "thread"))
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::Rows(vec![
                vec!["fe80::1".into(), "64".into()],
                vec!["fdde:ad00:beef::2".into(), "64".into()],
            ])
        );
    }

    #[tokio::test]
    async fn test_collect_dedups_responders() {
        let (mut session, _dut) = session(Script::new().expect(
            "ping ff03::1",
            "8 bytes from fdde::1: icmp_seq=1\r\n8 bytes from fdde::1: icmp_seq=1\r\n8 bytes from fdde::2: icmp_seq=1\r\n",
        ));
        let reply = session
            .request(Request::collect("ping ff03::1", &re(r"from ([0-9a-f:]+?):\s"), 2))
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::Rows(vec![vec!["fdde::1".into()], vec!["fdde::2".into()]])
        );
        assert_eq!(
            session.transcript().last().unwrap().outcome,
            ExchangeOutcome::Collected
        );
    }

    #[tokio::test]
    async fn test_collect_short_of_count_times_out() {
        let (mut session, _dut) =
            session(Script::new().expect("ping ff03::1", "8 bytes from fdde::1: icmp_seq=1\r\n"));
        let reply = session
            .request(Request::collect("ping ff03::1", &re(r"from ([0-9a-f:]+?):\s"), 3))
            .await
            .unwrap();
        assert_eq!(reply, Reply::TimedOut);
        assert!(session.transcript().last().unwrap().received.contains("fdde::1"));
    }

    #[tokio::test]
    async fn test_silent_dut_times_out() {
        let (mut session, _dut) = session(Script::new().silent("ping 2001::1"));
        let reply = session
            .request(Request::collect("ping 2001::1", &re(r"from (\S+?):\s"), 1))
            .await
            .unwrap();
        assert_eq!(reply, Reply::TimedOut);

        let err = reply
            .require("ping 2001::1", test_config().response_timeout)
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            session.transcript().last().unwrap().outcome,
            ExchangeOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn test_leftover_text_is_mismatch() {
        let (mut session, _dut) =
            session(Script::new().expect("thread start", "Error 35: InvalidCommand\r\n"));
        let err = session.request(Request::ack("thread start")).await.unwrap_err();
        match err {
            HarnessError::ProtocolMismatch { command, received } => {
                assert_eq!(command, "thread start");
                assert!(received.contains("InvalidCommand"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(
            session.transcript().last().unwrap().outcome,
            ExchangeOutcome::Mismatch
        );
    }

    #[tokio::test]
    async fn test_execute_reports_pattern_indices() {
        let (mut session, _dut) =
            session(Script::new().reply("thread state", &["child", "leader"]));
        let patterns = [re(r"(?m)^(leader)\r?$"), re(r"(?m)^(child)\r?$")];
        let matches = session.execute("thread state", &patterns).await.unwrap();
        let indices: Vec<usize> = matches.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_stale_output_is_drained_before_sending() {
        let (mut session, dut) = session(
            Script::new()
                .expect("thread stop", "Done\r\nstray\r\n")
                .ack("thread start"),
        );
        session.request(Request::ack("thread stop")).await.unwrap();
        let reply = session.request(Request::ack("thread start")).await.unwrap();
        assert_eq!(reply, Reply::Acknowledged);

        drop(session);
        assert_eq!(dut.received().await, vec!["thread stop", "thread start"]);
    }
}
