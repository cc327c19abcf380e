//! Fuzz target for the full client under simulation
//!
//! Drives the real runtime and `SyncClient` through the simulation harness
//! with arbitrary commands, server activity and injected failures.
//!
//! # Invariants
//!
//! - The standard client invariants hold after every published change
//! - Once failures stop and the client reconnects, every open view matches
//!   the server

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use murmur_harness::{Operation, Simulation};

const MAX_OPS: usize = 64;

#[derive(Debug, Arbitrary)]
struct Input {
    seed: u64,
    page_size: u8,
    ops: Vec<Operation>,
}

fuzz_target!(|input: Input| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    let result: Result<(), String> = runtime.block_on(async {
        // Catch-up re-reads only the newest page, so it must cover everything
        // a run can post while the channel is down.
        let page_size = 100 + u32::from(input.page_size);
        let mut sim = Simulation::new(input.seed, page_size).map_err(|e| e.to_string())?;

        for op in input.ops.iter().take(MAX_OPS) {
            sim.apply(op).await.map_err(|e| format!("{op:?}: {e}"))?;
        }
        sim.converge().await.map_err(|e| e.to_string())?;
        sim.check_converged().map_err(|e| e.to_string())
    });

    if let Err(e) = result {
        panic!("{e}");
    }
});
