use std::sync::atomic::{AtomicU16, Ordering};

static BLOCK_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Ports per simulated mesh; node ids stay below this.
pub const BLOCK_SIZE: u16 = 64;
const FIRST_PORT: u16 = 20_000;
const BLOCKS: u16 = 600;

/// Base port of a block unlikely to collide with parallel tests.
///
/// Combines PID + atomic counter so concurrent test binaries and tests
/// within one binary walk different blocks.
pub fn candidate_base_port() -> u16 {
    let seq = BLOCK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = (std::process::id() % u32::from(BLOCKS)) as u16;
    let block = (pid.wrapping_mul(37).wrapping_add(seq)) % BLOCKS;
    FIRST_PORT + block * BLOCK_SIZE
}
