//! Fixed-timestep server loop
//!
//! Each tick the application's [`Simulation`] advances by one step, then the
//! [`NetworkEngine`] drains inbound traffic and broadcasts a snapshot. The
//! loop is stopped from outside through a [`LoopControl`] handle; the tick in
//! progress always completes first.

use crate::error::TickError;
use crate::network::NetworkEngine;
use crate::transport::Transport;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Application logic advanced once per unpaused tick.
pub trait Simulation {
    fn update(&mut self, delta_time: f64);
}

impl<F: FnMut(f64)> Simulation for F {
    fn update(&mut self, delta_time: f64) {
        self(delta_time)
    }
}

/// Cloneable handle that stops or pauses a running [`ServerLoop`] from any thread.
#[derive(Debug, Clone)]
pub struct LoopControl {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

pub struct ServerLoop<'r, T: Transport, S: Simulation> {
    engine: NetworkEngine<'r, T>,
    simulation: S,
    control: LoopControl,
    delta_time: Duration,
    server_time: f64,
    tick_count: u64,
}

impl<'r, T: Transport, S: Simulation> ServerLoop<'r, T, S> {
    pub fn new(engine: NetworkEngine<'r, T>, simulation: S, delta_time: Duration) -> Self {
        Self {
            engine,
            simulation,
            control: LoopControl::new(),
            delta_time,
            server_time: 0.0,
            tick_count: 0,
        }
    }

    /// Handle for stopping or pausing this loop
    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    /// Runs one tick without waiting.
    ///
    /// Returns `Ok(false)` when paused, in which case nothing happens. Server
    /// time advances on every unpaused tick, even one whose broadcast failed.
    pub fn tick_once(&mut self) -> Result<bool, TickError> {
        if self.control.is_paused() {
            return Ok(false);
        }

        let delta_time = self.delta_time.as_secs_f64();
        self.simulation.update(delta_time);
        let result = self.engine.update();

        self.server_time += delta_time;
        self.tick_count += 1;

        result.map(|()| true)
    }

    /// Ticks at the fixed rate until [`LoopControl::stop`] is called.
    pub async fn run(&mut self) {
        let mut ticker = interval(self.delta_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server loop running at {:.1} Hz",
            1.0 / self.delta_time.as_secs_f64()
        );

        while self.control.is_running() {
            ticker.tick().await;

            if let Err(e) = self.tick_once() {
                error!("Tick {} failed: {}", self.tick_count, e);
            }
        }

        info!(
            "Server loop stopped after {} ticks ({:.2}s simulated)",
            self.tick_count, self.server_time
        );
    }

    /// Simulated seconds elapsed over all unpaused ticks
    pub fn server_time(&self) -> f64 {
        self.server_time
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn delta_time(&self) -> Duration {
        self.delta_time
    }

    pub fn engine(&self) -> &NetworkEngine<'r, T> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut NetworkEngine<'r, T> {
        &mut self.engine
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    pub fn into_engine(self) -> NetworkEngine<'r, T> {
        self.engine
    }
}
