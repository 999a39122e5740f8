//! Per-fan mode state machine and curve sampling loops
//!
//! Each fan is in exactly one of Auto, Fixed or Curve. A fan in Curve mode
//! owns one background task that samples the temperature on a fixed period
//! and writes the interpolated speed. The controller is the only code that
//! starts or stops those tasks; the index of running loops sits behind one
//! async mutex that is held for the whole transition, so two mode changes
//! for the same fan can never interleave their hardware writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tc_error::TunectlError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::curve::interpolate;
use crate::constants::timing;
use crate::data::{validate_fan_speed, Curve, FanInfo, FanMode};
use crate::Result;

/// Hardware side of one controllable fan
pub trait FanActuator: Send + Sync {
    /// Display name
    fn name(&self) -> String;

    /// Take the fan away from firmware control
    fn enable_manual(&self) -> Result<()>;

    /// Write a duty cycle in percent (0-100)
    fn write_speed(&self, percent: i32) -> Result<()>;

    /// Hand the fan back to firmware control
    fn release_manual(&self) -> Result<()>;

    /// `Some(percent)` when the hardware reports manual control, `None` when
    /// the firmware is in charge
    fn read_manual_speed(&self) -> Result<Option<i32>>;

    /// Current duty in percent regardless of mode
    fn read_speed(&self) -> Option<i32> {
        None
    }

    fn read_rpm(&self) -> Option<u32> {
        None
    }
}

/// Representative temperature for curve mode
pub trait TemperatureSource: Send + Sync {
    /// Current temperature in °C, or `None` when nothing usable was read
    fn read(&self) -> Option<i32>;
}

/// Bookkeeping for a fan while its curve loop runs
struct CurveState {
    curve: Arc<Curve>,
    last_temperature: Arc<Mutex<Option<i32>>>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CurveState {
    /// Signal the loop and wait until it has exited
    async fn stop(self, fan_id: usize) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(fan = fan_id, "Curve loop ended abnormally: {}", e);
        }
    }
}

/// Owns the fans, their modes and every running curve loop
pub struct ModeController {
    fans: Vec<Arc<dyn FanActuator>>,
    temperature: Arc<dyn TemperatureSource>,
    interval: Duration,
    release_on_shutdown: bool,
    curves: tokio::sync::Mutex<HashMap<usize, CurveState>>,
    /// Set by `shutdown` under the `curves` lock; no new loops after that
    shutting_down: AtomicBool,
}

impl ModeController {
    pub fn new(fans: Vec<Arc<dyn FanActuator>>, temperature: Arc<dyn TemperatureSource>) -> Self {
        Self {
            fans,
            temperature,
            interval: timing::DEFAULT_CURVE_INTERVAL,
            release_on_shutdown: true,
            curves: tokio::sync::Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Set the curve sampling period
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether `shutdown` hands curve-driven fans back to the firmware
    pub fn with_release_on_shutdown(mut self, release: bool) -> Self {
        self.release_on_shutdown = release;
        self
    }

    pub fn fan_count(&self) -> usize {
        self.fans.len()
    }

    fn fan(&self, fan_id: usize) -> Result<&Arc<dyn FanActuator>> {
        self.fans.get(fan_id).ok_or_else(|| {
            TunectlError::not_found(format!(
                "fan {} (have {} fans)",
                fan_id,
                self.fans.len()
            ))
        })
    }

    /// Switch a fan to the requested mode.
    ///
    /// Any running curve loop for the fan is stopped and awaited before the
    /// hardware is touched.
    pub async fn set_mode(&self, fan_id: usize, mode: FanMode) -> Result<()> {
        let fan = Arc::clone(self.fan(fan_id)?);

        match mode {
            FanMode::Auto => {
                let mut curves = self.curves.lock().await;
                if let Some(state) = curves.remove(&fan_id) {
                    state.stop(fan_id).await;
                }
                fan.release_manual()?;
                info!(fan = fan_id, "Fan returned to automatic control");
            }
            FanMode::Fixed { speed } => {
                validate_fan_speed(speed)?;
                let mut curves = self.curves.lock().await;
                if let Some(state) = curves.remove(&fan_id) {
                    state.stop(fan_id).await;
                }
                fan.enable_manual()?;
                fan.write_speed(speed)?;
                info!(fan = fan_id, speed, "Fan set to fixed speed");
            }
            FanMode::Curve { points } => {
                let curve = Arc::new(Curve::new(points)?);
                let mut curves = self.curves.lock().await;
                if self.shutting_down.load(Ordering::SeqCst) {
                    return Err(TunectlError::Generic(
                        "mode controller is shutting down".to_string(),
                    ));
                }
                if let Some(state) = curves.remove(&fan_id) {
                    state.stop(fan_id).await;
                }
                fan.enable_manual()?;
                let state = self.start_curve_loop(fan_id, fan, curve);
                curves.insert(fan_id, state);
                info!(fan = fan_id, "Fan set to curve mode");
            }
        }
        Ok(())
    }

    fn start_curve_loop(
        &self,
        fan_id: usize,
        fan: Arc<dyn FanActuator>,
        curve: Arc<Curve>,
    ) -> CurveState {
        let (stop_tx, stop_rx) = oneshot::channel();
        let last_temperature = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run_curve_loop(CurveLoop {
            fan_id,
            fan,
            source: Arc::clone(&self.temperature),
            curve: Arc::clone(&curve),
            last_temperature: Arc::clone(&last_temperature),
            interval: self.interval,
            stop: stop_rx,
        }));

        CurveState {
            curve,
            last_temperature,
            stop: stop_tx,
            task,
        }
    }

    /// Current mode of a fan.
    ///
    /// Curve mode comes from the controller; otherwise the hardware is read
    /// back, and anything unreadable is reported as Auto.
    pub async fn get_mode(&self, fan_id: usize) -> Result<FanMode> {
        let fan = self.fan(fan_id)?;

        let curves = self.curves.lock().await;
        if let Some(state) = curves.get(&fan_id) {
            return Ok(FanMode::Curve {
                points: state.curve.points().to_vec(),
            });
        }
        drop(curves);

        match fan.read_manual_speed() {
            Ok(Some(speed)) => Ok(FanMode::Fixed { speed }),
            Ok(None) => Ok(FanMode::Auto),
            Err(e) => {
                debug!(fan = fan_id, "Could not read fan mode, assuming auto: {}", e);
                Ok(FanMode::Auto)
            }
        }
    }

    /// Temperature the curve loop last acted on, if it is running and has
    /// completed a tick
    pub async fn last_temperature(&self, fan_id: usize) -> Option<i32> {
        let curves = self.curves.lock().await;
        curves
            .get(&fan_id)
            .and_then(|state| *state.last_temperature.lock())
    }

    /// Number of curve loops currently running
    pub async fn active_curves(&self) -> usize {
        self.curves.lock().await.len()
    }

    /// Every fan with its live reading and mode
    pub async fn list_fans(&self) -> Vec<FanInfo> {
        let mut fans = Vec::with_capacity(self.fans.len());
        for (id, fan) in self.fans.iter().enumerate() {
            let mode = match self.get_mode(id).await {
                Ok(mode) => mode,
                Err(_) => FanMode::Auto,
            };
            fans.push(FanInfo {
                id,
                name: fan.name(),
                speed: fan.read_speed(),
                rpm: fan.read_rpm(),
                mode,
            });
        }
        fans
    }

    /// Stop every curve loop and, if configured, release those fans
    pub async fn shutdown(&self) {
        let mut curves = self.curves.lock().await;
        self.shutting_down.store(true, Ordering::SeqCst);
        let stopping: Vec<(usize, CurveState)> = curves.drain().collect();
        drop(curves);

        for (fan_id, state) in stopping {
            state.stop(fan_id).await;
            if !self.release_on_shutdown {
                continue;
            }
            if let Some(fan) = self.fans.get(fan_id) {
                if let Err(e) = fan.release_manual() {
                    warn!(fan = fan_id, "Failed to release fan on shutdown: {}", e);
                }
            }
        }
        info!("Mode controller shut down");
    }
}

struct CurveLoop {
    fan_id: usize,
    fan: Arc<dyn FanActuator>,
    source: Arc<dyn TemperatureSource>,
    curve: Arc<Curve>,
    last_temperature: Arc<Mutex<Option<i32>>>,
    interval: Duration,
    stop: oneshot::Receiver<()>,
}

/// Sample, interpolate, write; until told to stop.
///
/// The read and write run on the blocking pool. A failed read or write
/// skips the tick. Only the stop signal (or the sender being dropped) ends
/// the loop; a tick already in flight finishes first.
async fn run_curve_loop(mut ctx: CurveLoop) {
    let mut ticker = interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_errors: u32 = 0;

    debug!(fan = ctx.fan_id, interval_ms = ctx.interval.as_millis() as u64, "Curve loop started");

    loop {
        tokio::select! {
            biased;
            _ = &mut ctx.stop => break,
            _ = ticker.tick() => {}
        }

        let source = Arc::clone(&ctx.source);
        let fan = Arc::clone(&ctx.fan);
        let curve = Arc::clone(&ctx.curve);
        let tick = tokio::task::spawn_blocking(move || {
            let temperature = source.read()?;
            let speed = interpolate(&curve, temperature);
            Some((temperature, speed, fan.write_speed(speed)))
        })
        .await;

        let (temperature, speed, written) = match tick {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                debug!(fan = ctx.fan_id, "Temperature unknown, skipping tick");
                continue;
            }
            Err(e) => {
                warn!(fan = ctx.fan_id, "Curve tick task failed, skipping tick: {}", e);
                continue;
            }
        };

        match written {
            Ok(()) => {
                if consecutive_errors > 0 {
                    info!(
                        fan = ctx.fan_id,
                        after = consecutive_errors,
                        "Curve writes recovered"
                    );
                    consecutive_errors = 0;
                }
                *ctx.last_temperature.lock() = Some(temperature);
                trace!(fan = ctx.fan_id, temperature, speed, "Curve tick");
            }
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors == 1 || consecutive_errors % timing::ERROR_LOG_EVERY == 0 {
                    warn!(
                        fan = ctx.fan_id,
                        consecutive_errors,
                        "Curve write failed, skipping tick: {}",
                        e
                    );
                }
            }
        }
    }

    debug!(fan = ctx.fan_id, "Curve loop stopped");
}
