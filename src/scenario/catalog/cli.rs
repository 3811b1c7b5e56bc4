use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::node::NodeId;
use crate::scenario::{Scenario, ScenarioContext};

const DUT: u16 = 1;

/// Every verb the DUT lists answers `-h` with `Done`.
pub struct CliCommands;

#[async_trait]
impl Scenario for CliCommands {
    fn name(&self) -> &'static str {
        "cli-commands"
    }

    fn description(&self) -> &'static str {
        "CLI help smoke test"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.add_node(DUT).await?;

        let commands = ctx.node(DUT)?.get_commands().await?;
        if commands.is_empty() {
            return Err(ctx.failure(NodeId::new(DUT), "help listed no commands"));
        }
        info!(count = commands.len(), "commands listed");

        for command in &commands {
            let line = format!("{command} -h");
            match ctx.node(DUT)?.run_command(&line).await {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    return Err(ctx.failure(NodeId::new(DUT), format!("'{line}' did not finish with Done")));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
