//! UDP front end: one socket per node, plus the clock driving the model.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cli::{self, CliDialect};
use crate::test_util::candidate_base_port;
use crate::world::{TICKS_PER_UNIT, World};

/// Attempts at finding a free block of ports before giving up.
const BIND_ATTEMPTS: usize = 16;

#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Nodes `1..=nodes` are simulated.
    pub nodes: u16,
    /// Wall-clock length of one protocol time unit.
    pub unit: Duration,
    /// Node N listens on `base_port + N`. `None` picks a free block.
    pub base_port: Option<u16>,
    pub dialect: CliDialect,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 8,
            unit: Duration::from_millis(20),
            base_port: None,
            dialect: CliDialect::default(),
        }
    }
}

#[derive(Clone)]
struct Clock {
    epoch: Instant,
    tick: Duration,
}

impl Clock {
    fn now(&self) -> u64 {
        (self.epoch.elapsed().as_nanos() / self.tick.as_nanos().max(1)) as u64
    }
}

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running simulated mesh. Tasks stop when this is dropped.
pub struct MeshSim {
    world: Arc<Mutex<World>>,
    base_port: u16,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshSim {
    pub async fn spawn(config: SimConfig) -> Result<Self> {
        if config.nodes == 0 {
            bail!("a simulated mesh needs at least one node");
        }
        let tick = config.unit / TICKS_PER_UNIT as u32;
        if tick.is_zero() {
            bail!("unit {:?} is too short", config.unit);
        }

        let (base_port, sockets) = match config.base_port {
            Some(base) => (base, bind_block(base, config.nodes).await?),
            None => bind_free_block(config.nodes).await?,
        };

        let world = Arc::new(Mutex::new(World::new(config.nodes)));
        let clock = Clock {
            epoch: Instant::now(),
            tick,
        };

        let mut tasks = Vec::with_capacity(sockets.len() + 1);
        tasks.push(tokio::spawn(run_clock(world.clone(), clock.clone())));
        for (id, socket) in (1..=config.nodes).zip(sockets) {
            tasks.push(tokio::spawn(serve(
                id,
                socket,
                world.clone(),
                clock.clone(),
                config.dialect,
            )));
        }

        info!(
            nodes = config.nodes,
            base_port,
            unit_ms = config.unit.as_millis() as u64,
            "mesh simulator listening"
        );
        Ok(Self {
            world,
            base_port,
            tasks,
        })
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Run `f` against the current model state.
    pub fn inspect<R>(&self, f: impl FnOnce(&World) -> R) -> R {
        f(&lock(&self.world))
    }

    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for MeshSim {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn bind_block(base: u16, nodes: u16) -> Result<Vec<UdpSocket>> {
    let mut sockets = Vec::with_capacity(usize::from(nodes));
    for id in 1..=nodes {
        let port = base
            .checked_add(id)
            .with_context(|| format!("base port {base} leaves no room for node {id}"))?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind node {id} to {addr}"))?;
        sockets.push(socket);
    }
    Ok(sockets)
}

async fn bind_free_block(nodes: u16) -> Result<(u16, Vec<UdpSocket>)> {
    let mut last_error = None;
    for _ in 0..BIND_ATTEMPTS {
        let base = candidate_base_port();
        match bind_block(base, nodes).await {
            Ok(sockets) => return Ok((base, sockets)),
            Err(e) => {
                debug!(base, error = %e, "port block busy");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no port block available")))
}

async fn run_clock(world: Arc<Mutex<World>>, clock: Clock) {
    let mut interval = tokio::time::interval(clock.tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        lock(&world).advance_to(clock.now());
    }
}

async fn serve(
    id: u16,
    socket: UdpSocket,
    world: Arc<Mutex<World>>,
    clock: Clock,
    dialect: CliDialect,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(node = id, error = %e, "receive failed");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let output = {
                let mut world = lock(&world);
                world.advance_to(clock.now());
                cli::execute(&mut world, id, line, dialect)
            };
            debug!(node = id, command = line, bytes = output.len(), "command");
            if !output.is_empty()
                && let Err(e) = socket.send_to(output.as_bytes(), peer).await
            {
                warn!(node = id, error = %e, "reply failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange(socket: &UdpSocket, command: &str) -> String {
        socket.send(format!("{command}\n").as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 2048];
        let n = tokio::time::timeout(Duration::from_secs(1), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_nodes_answer_on_their_ports() {
        let sim = MeshSim::spawn(SimConfig {
            nodes: 2,
            ..SimConfig::default()
        })
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .connect(("127.0.0.1", sim.base_port() + 2))
            .await
            .unwrap();
        let reply = exchange(&client, "extaddr").await;
        let expected = sim.inspect(|w| format!("{:016x}\r\nDone\r\n", w.node(2).unwrap().ext_addr));
        assert_eq!(reply, expected);
        sim.shutdown();
    }

    #[tokio::test]
    async fn test_clock_drives_attachment() {
        let sim = MeshSim::spawn(SimConfig {
            nodes: 2,
            unit: Duration::from_millis(4),
            ..SimConfig::default()
        })
        .await
        .unwrap();

        let leader = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        leader.connect(("127.0.0.1", sim.base_port() + 1)).await.unwrap();
        let router = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        router.connect(("127.0.0.1", sim.base_port() + 2)).await.unwrap();

        assert_eq!(exchange(&leader, "thread start").await, "Done\r\n");
        assert_eq!(exchange(&leader, "thread state leader").await, "Done\r\n");
        assert_eq!(exchange(&router, "thread start").await, "Done\r\n");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(exchange(&router, "thread state").await, "router\r\nDone\r\n");
    }

    #[tokio::test]
    async fn test_zero_nodes_rejected() {
        let result = MeshSim::spawn(SimConfig {
            nodes: 0,
            ..SimConfig::default()
        })
        .await;
        assert!(result.is_err());
    }
}
