//!
//! This demo runs two counting components on a single execution context.
//!
//! The execution context is described by a TOML file given as the first
//! argument (see `ec.toml` next to this crate).  Without an argument a
//! periodic context ticking at 10 Hz is used.  One of the counters fails
//! every 25 ticks and is reset by the main thread.
//!
//! Run with `RUST_LOG=debug` to see every lifecycle transition.
//!

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use crossbeam::channel::{unbounded, RecvTimeoutError};
use tracing::info;

use rtec::prelude::*;

pub mod counter_component;
use counter_component::CounterComponent;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match env::args().nth(1) {
        Some(path) => EcConfig::from_file(&path)
            .with_context(|| format!("could not load execution context config from {}", path))?,
        None => EcConfig::default().rate(10.0),
    };

    let manager = Manager::new();
    let steady = Arc::new(CounterComponent::new("steady"));
    let faulty = Arc::new(CounterComponent::faulty("faulty", 25));
    let steady_id = manager.register_component(steady.clone());
    let faulty_id = manager.register_component(faulty.clone());

    let ec = manager.create_context(&config)?;
    for id in [steady_id, faulty_id] {
        ec.try_add_component(id)?;
        ec.try_activate_component(id)?;
    }
    ec.try_start()?;

    let (tx, rx) = unbounded();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("could not set the Ctrl-C handler")?;

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if ec.get_component_state(faulty_id) == LifecycleState::Error {
            ec.try_reset_component(faulty_id)?;
        } else if ec.get_component_state(faulty_id) == LifecycleState::Inactive {
            ec.try_activate_component(faulty_id)?;
        }

        let stats = ec.stats();
        info!(
            steady = steady.count(),
            faulty = faulty.count(),
            faulty_state = %ec.get_component_state(faulty_id),
            mean_us = stats.mean * 1e6,
            overruns = stats.overruns,
            missed_releases = stats.missed_releases,
            "counters"
        );
    }

    manager.shutdown();
    Ok(())
}
