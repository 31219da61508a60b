//! Sampling and aggregation loop: reads every sensor at a fixed cadence,
//! reduces each window of samples to medians and hands them to the
//! [`Reconciler`].
//!
//! The loop is strictly sequential. A report is only ever built from the
//! most recent `samples_per_report` samples and never overlaps another.
//!
//! ## Phases
//!
//! ```text
//! Idle ──▶ Sampling ──[count < N]──▶ (sleep) ──▶ Sampling
//!             │
//!             └──[count == N]──▶ Aggregating ──▶ Reporting ──▶ (sleep) ──▶ Sampling
//! ```
//!
//! Each cycle sleeps `sample_interval - elapsed`, or not at all when the
//! cycle overran, so the cadence holds as load varies. Timing is best
//! effort: a slow report shortens the next sleep rather than shifting every
//! later sample.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregate::{Medians, SampleBuffers};
use crate::error::ConfigurationError;
use crate::hardware::Hardware;
use crate::reconcile::{Coordinator, ReconcileOutcome, Reconciler};

/// Value recorded for a sensor read that failed.
const SENSOR_FAILURE_SENTINEL: f32 = 0.0;

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    report_interval: Duration,
    samples_per_report: u32,
}

impl Cadence {
    pub fn new(
        report_interval: Duration,
        samples_per_report: u32,
    ) -> Result<Self, ConfigurationError> {
        if samples_per_report == 0 {
            return Err(ConfigurationError::InvalidConfiguration(
                "samples per report must be at least 1".into(),
            ));
        }
        if report_interval.is_zero() {
            return Err(ConfigurationError::InvalidConfiguration(
                "report interval must be positive".into(),
            ));
        }
        Ok(Self {
            report_interval,
            samples_per_report,
        })
    }

    pub fn report_interval(&self) -> Duration {
        self.report_interval
    }

    pub fn samples_per_report(&self) -> u32 {
        self.samples_per_report
    }

    pub fn sample_interval(&self) -> Duration {
        self.report_interval / self.samples_per_report
    }
}

/// How long to sleep after a cycle that took `elapsed`.
pub fn remaining(sample_interval: Duration, elapsed: Duration) -> Duration {
    sample_interval.saturating_sub(elapsed)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, no cycle run yet.
    Idle,
    Sampling,
    Aggregating,
    Reporting,
}

pub struct Scheduler<C> {
    hardware: Hardware,
    reconciler: Reconciler<C>,
    cadence: Cadence,
    moisture: SampleBuffers,
    temperature: SampleBuffers,
    samples_taken: u32,
    reports_sent: u64,
    phase: Phase,
}

impl<C: Coordinator> Scheduler<C> {
    /// Take ownership of the hardware and force it into the safe state
    /// before anything else happens.
    pub fn new(mut hardware: Hardware, coordinator: C, cadence: Cadence) -> Self {
        hardware.force_safe_state();

        let capacity = cadence.samples_per_report() as usize;
        let moisture =
            SampleBuffers::with_names(hardware.moisture.keys().map(String::as_str), capacity);
        let temperature =
            SampleBuffers::with_names(hardware.temperature.keys().map(String::as_str), capacity);

        Self {
            hardware,
            reconciler: Reconciler::new(coordinator),
            cadence,
            moisture,
            temperature,
            samples_taken: 0,
            reports_sent: 0,
            phase: Phase::Idle,
        }
    }

    /// Run forever. Only returns if the future is dropped.
    pub async fn run(&mut self) {
        let interval = self.cadence.sample_interval();
        info!(
            report_interval_sec = self.cadence.report_interval().as_secs_f64(),
            samples_per_report = self.cadence.samples_per_report(),
            sample_interval_ms = interval.as_millis() as u64,
            "scheduler started"
        );

        loop {
            let started = Instant::now();
            if let Some(outcome) = self.run_cycle().await {
                debug!(
                    report = self.reports_sent,
                    tanks = ?outcome.report.tanks,
                    instructions = ?outcome.instructions,
                    changed = outcome.applied.changed,
                    fail_safe = outcome.failure.is_some(),
                    "report cycle complete"
                );
            }

            let elapsed = started.elapsed();
            if elapsed > interval {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    sample_interval_ms = interval.as_millis() as u64,
                    phase = ?self.phase,
                    "cycle overran the sample interval"
                );
            }
            tokio::time::sleep(remaining(interval, elapsed)).await;
        }
    }

    /// One sample, plus aggregation and reporting when the window is full.
    /// Returns the reconcile outcome on reporting cycles.
    pub async fn run_cycle(&mut self) -> Option<ReconcileOutcome> {
        self.phase = Phase::Sampling;
        self.sample();
        if self.samples_taken < self.cadence.samples_per_report() {
            return None;
        }

        self.phase = Phase::Aggregating;
        let medians = self.aggregate();

        self.phase = Phase::Reporting;
        let outcome = self.reconciler.reconcile(&mut self.hardware, medians).await;
        self.reports_sent += 1;
        Some(outcome)
    }

    fn sample(&mut self) {
        for (name, sensor) in self.hardware.moisture.iter_mut() {
            let value = sensor.read().unwrap_or_else(|e| {
                warn!(sensor = %name, "moisture read failed: {e}");
                SENSOR_FAILURE_SENTINEL
            });
            self.moisture.push(name, value);
        }
        for (name, sensor) in self.hardware.temperature.iter_mut() {
            let value = sensor.read().unwrap_or_else(|e| {
                warn!(sensor = %name, "temperature read failed: {e}");
                SENSOR_FAILURE_SENTINEL
            });
            self.temperature.push(name, value);
        }
        self.samples_taken += 1;
    }

    /// Reduce the window to medians and start a fresh one.
    fn aggregate(&mut self) -> Medians {
        let medians = Medians {
            moisture: self.moisture.medians(),
            temperature: self.temperature.medians(),
        };
        self.moisture.clear();
        self.temperature.clear();
        self.samples_taken = 0;
        medians
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn samples_taken(&self) -> u32 {
        self.samples_taken
    }

    #[cfg(test)]
    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    #[cfg(test)]
    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware {
        &mut self.hardware
    }

    #[cfg(test)]
    pub fn coordinator(&self) -> &C {
        self.reconciler.coordinator()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::error::CommunicationError;
    use crate::hardware::tests::FakeFactory;
    use crate::protocol::Instructions;
    use crate::reconcile::tests::ScriptedCoordinator;

    fn cadence(secs: u64, n: u32) -> Cadence {
        Cadence::new(Duration::from_secs(secs), n).unwrap()
    }

    fn scheduler(
        n: u32,
        coordinator: ScriptedCoordinator,
    ) -> (Scheduler<ScriptedCoordinator>, FakeFactory) {
        let mut factory = FakeFactory {
            relay_power_on_level: true,
            ..Default::default()
        };
        let hw = Hardware::from_config(&valid_config(), &mut factory).unwrap();
        (Scheduler::new(hw, coordinator, cadence(20, n)), factory)
    }

    fn water_everything() -> Instructions {
        Instructions {
            pumps: [("pump1".to_string(), true)].into(),
            valves: [("valve1".to_string(), true), ("valve2".to_string(), true)].into(),
        }
    }

    // -- Cadence ------------------------------------------------------------

    #[test]
    fn cadence_rejects_zero_samples() {
        assert!(matches!(
            Cadence::new(Duration::from_secs(20), 0),
            Err(ConfigurationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn cadence_rejects_zero_interval() {
        assert!(Cadence::new(Duration::ZERO, 6).is_err());
    }

    #[test]
    fn cadence_divides_interval() {
        let c = cadence(20, 4);
        assert_eq!(c.sample_interval(), Duration::from_secs(5));
        let c = cadence(20, 1);
        assert_eq!(c.sample_interval(), Duration::from_secs(20));
    }

    #[test]
    fn remaining_never_negative() {
        let i = Duration::from_secs(5);
        assert_eq!(remaining(i, Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(remaining(i, Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(remaining(i, Duration::from_secs(9)), Duration::ZERO);
    }

    // -- Startup ------------------------------------------------------------

    #[test]
    fn startup_forces_safe_state() {
        let (s, factory) = scheduler(3, ScriptedCoordinator::default());
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.hardware().pump_states().values().all(|on| !on));
        assert!(s.hardware().valve_states().values().all(|open| !open));
        assert!(!factory.relays["pump1"].level());
    }

    // -- Sampling -----------------------------------------------------------

    #[tokio::test]
    async fn cycles_before_window_is_full_do_not_report() {
        let (mut s, _) = scheduler(3, ScriptedCoordinator::default());
        assert!(s.run_cycle().await.is_none());
        assert!(s.run_cycle().await.is_none());
        assert_eq!(s.samples_taken(), 2);
        assert_eq!(s.phase(), Phase::Sampling);
        assert_eq!(s.moisture.samples("moisture2").len(), 2);
        assert!(s.coordinator().reports.borrow().is_empty());
    }

    #[tokio::test]
    async fn nth_cycle_reports_and_resets_window() {
        let (mut s, _) = scheduler(3, ScriptedCoordinator::answering([Ok(Instructions::default())]));
        s.run_cycle().await;
        s.run_cycle().await;
        let outcome = s.run_cycle().await.expect("third cycle reports");

        assert!(outcome.failure.is_none());
        assert_eq!(s.phase(), Phase::Reporting);
        assert_eq!(s.samples_taken(), 0);
        assert_eq!(s.reports_sent(), 1);
        assert!(s.moisture.samples("moisture2").is_empty());
        assert!(s.temperature.samples("temperature1").is_empty());
    }

    #[tokio::test]
    async fn single_sample_window_reports_every_cycle() {
        let (mut s, _) = scheduler(1, ScriptedCoordinator::default());
        assert!(s.run_cycle().await.is_some());
        assert!(s.run_cycle().await.is_some());
        assert_eq!(s.reports_sent(), 2);
    }

    #[tokio::test]
    async fn report_carries_median_not_mean() {
        let (mut s, factory) = scheduler(5, ScriptedCoordinator::default());
        let ch = &factory.channels["moisture2"];
        for v in [0.1, 0.1, 0.9, 0.1, 0.1] {
            ch.set(Some(v));
            s.run_cycle().await;
        }
        let reports = s.coordinator().reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].moisture["moisture2"], 0.1);
    }

    #[tokio::test]
    async fn inverse_moisture_sensor_reported_inverted() {
        let (mut s, factory) = scheduler(1, ScriptedCoordinator::default());
        factory.channels["moisture1"].set(Some(0.25));
        let outcome = s.run_cycle().await.unwrap();
        assert_eq!(outcome.report.moisture["moisture1"], 0.75);
    }

    #[tokio::test]
    async fn failed_temperature_read_recorded_as_zero() {
        let (mut s, factory) = scheduler(3, ScriptedCoordinator::default());
        let probe = &factory.probes["temperature1"];
        probe.set(None);
        s.run_cycle().await;
        probe.set(Some(21.0));
        s.run_cycle().await;

        assert_eq!(s.temperature.samples("temperature1"), &[0.0, 21.0]);
        // Other sensors were still sampled on the failing cycle.
        assert_eq!(s.moisture.samples("moisture2").len(), 2);
    }

    #[tokio::test]
    async fn failed_moisture_read_recorded_as_zero() {
        let (mut s, factory) = scheduler(3, ScriptedCoordinator::default());
        factory.channels["moisture2"].set(None);
        s.run_cycle().await;
        assert_eq!(s.moisture.samples("moisture2"), &[0.0]);
    }

    #[tokio::test]
    async fn report_includes_tank_level_and_actuators() {
        let (mut s, _) = scheduler(1, ScriptedCoordinator::default());
        let outcome = s.run_cycle().await.unwrap();
        assert_eq!(outcome.report.tanks["tank1"], 100.0);
        assert_eq!(outcome.report.pumps.len(), 1);
        assert_eq!(outcome.report.valves.len(), 2);
    }

    // -- Reconciliation through the loop -------------------------------------

    #[tokio::test]
    async fn instructions_applied_then_fail_safe_on_next_failure() {
        let (mut s, _) = scheduler(
            1,
            ScriptedCoordinator::answering([
                Ok(water_everything()),
                Err(CommunicationError::Malformed("oops".into())),
            ]),
        );

        s.run_cycle().await;
        assert!(s.hardware().pump_states()["pump1"]);
        assert!(s.hardware().valve_states()["valve2"]);

        let outcome = s.run_cycle().await.unwrap();
        assert!(outcome.failure.is_some());
        assert!(s.hardware().pump_states().values().all(|on| !on));
        assert!(s.hardware().valve_states().values().all(|open| !open));

        // Second report saw the watering state from the first.
        let reports = s.coordinator().reports.borrow();
        assert!(reports[1].pumps["pump1"]);
    }

    #[tokio::test]
    async fn communication_failure_does_not_stop_the_loop() {
        let (mut s, _) = scheduler(1, ScriptedCoordinator::answering([
            Err(CommunicationError::Timeout),
            Ok(water_everything()),
        ]));
        assert!(s.run_cycle().await.unwrap().failure.is_some());
        assert!(s.run_cycle().await.unwrap().failure.is_none());
        assert!(s.hardware().pump_states()["pump1"]);
    }

    // -- Timing -------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn run_keeps_the_sample_cadence() {
        // 10 s / 5 samples → a sample every 2 s; samples at t = 0, 2, …, 20.
        let mut factory = FakeFactory::default();
        let hw = Hardware::from_config(&valid_config(), &mut factory).unwrap();
        let mut s = Scheduler::new(hw, ScriptedCoordinator::default(), cadence(10, 5));

        let _ = tokio::time::timeout(Duration::from_secs(21), s.run()).await;

        assert_eq!(s.reports_sent(), 2);
        assert_eq!(s.samples_taken(), 1);
        assert_eq!(s.coordinator().reports.borrow().len(), 2);
    }
}
