use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use mesh_cert::scenario::catalog::{self, ShortAddressExpectation};
use mesh_cert::{Dialect, HarnessConfig, RunReport, TransportMode, run_scenario};
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "mesh_cert",
    author,
    version,
    disable_version_flag = true,
    about = "Mesh certification harness",
    override_usage = "mesh_cert [OPTIONS] [SCENARIO]..."
)]
struct Cli {
    /// Print the version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    print_version: bool,

    /// List catalog scenarios and exit
    #[arg(long = "list")]
    list: bool,

    /// Scenarios to run, by catalog name (all when omitted)
    scenarios: Vec<String>,

    /// Transport to the DUTs: sim (UDP endpoints) or serial
    #[arg(long = "mode", value_enum)]
    mode: Option<TransportMode>,
    /// Simulated DUT program spawned once per node
    #[arg(long = "dut")]
    dut: Option<PathBuf>,
    /// Argument for the DUT program; `{nodeid}` is replaced (repeatable)
    #[arg(long = "dut-arg")]
    dut_args: Vec<String>,
    /// CLI dialect spoken by the DUTs
    #[arg(long = "dialect", value_enum)]
    dialect: Option<Dialect>,
    /// UDP port of node 0; node N listens on base + N
    #[arg(long = "base-port")]
    base_port: Option<u16>,
    /// Serial device template; `{index}` is (node id - 1) * 2
    #[arg(long = "serial-template")]
    serial_template: Option<String>,
    /// Per-command response timeout in ms
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,
    /// Length of one protocol time unit in ms (1000 on real DUTs)
    #[arg(long = "unit-ms")]
    unit_ms: Option<u64>,
    /// RLOC16 outcome required after a router id timeout (default: per phase)
    #[arg(long = "rloc16-after-timeout", value_enum)]
    rloc16_after_timeout: Option<ShortAddressExpectation>,
    /// Log every line received from the DUTs
    #[arg(long = "verbose")]
    verbose: bool,
    /// Print the run report as JSON
    #[arg(long = "json")]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut HarnessConfig) -> Result<()> {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(dut) = &self.dut {
            config.dut_program = Some(dut.clone());
        }
        if !self.dut_args.is_empty() {
            config.dut_args = self.dut_args.clone();
        }
        if let Some(dialect) = self.dialect {
            config.dialect = dialect;
        }
        if let Some(port) = self.base_port {
            config.base_port = port;
        }
        if let Some(template) = &self.serial_template {
            config.serial_template = template.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.response_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.unit_ms {
            if ms == 0 {
                bail!("--unit-ms must be positive");
            }
            config.unit = Duration::from_millis(ms);
        }
        if let Some(expectation) = self.rloc16_after_timeout {
            config.rloc16_after_timeout = Some(expectation);
        }
        if self.verbose {
            config.echo = true;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Cli::parse();
    if args.print_version {
        let version = env!("CARGO_PKG_VERSION");
        let git_hash = env!("GIT_HASH");
        let git_branch = env!("GIT_BRANCH");
        let git_dirty = env!("GIT_DIRTY");

        println!(
            "{} ({}@{}{}) [{}]",
            version,
            git_branch,
            git_hash,
            git_dirty,
            env!("CARGO_PKG_NAME")
        );
        return Ok(ExitCode::SUCCESS);
    }

    if args.list {
        for scenario in catalog::catalog() {
            println!("{:<26} {}", scenario.name(), scenario.description());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = HarnessConfig::from_env().context("invalid environment")?;
    args.apply(&mut config)?;

    let selected = if args.scenarios.is_empty() {
        catalog::catalog()
    } else {
        args.scenarios
            .iter()
            .map(|name| {
                catalog::find(name).with_context(|| format!("unknown scenario '{name}' (see --list)"))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let mut report = RunReport::new();
    for scenario in &selected {
        report.push(run_scenario(scenario.as_ref(), &config).await);
    }

    if args.json {
        println!("{}", report.to_json().context("failed to serialise report")?);
    } else {
        println!("{report}");
    }

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
