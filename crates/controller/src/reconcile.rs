//! Report/instructions exchange with the coordinator.
//!
//! Once per aggregation window the controller sends a [`ControllerReport`]
//! and adopts the returned [`Instructions`]. Any failure of the exchange
//! (timeout, refused connection, non-2xx, unparsable body) is replaced by
//! [`Instructions::fail_safe`], which switches every pump off and closes
//! every valve. There is no immediate retry; the next window tries again.

use anyhow::Context;
use reqwest::Url;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::aggregate::Medians;
use crate::error::CommunicationError;
use crate::hardware::Hardware;
use crate::protocol::{state_url, ControllerReport, Instructions};
use crate::valve::{Pump, Valve};

/// Upper bound on one report/instructions round trip.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The remote authority for actuator state.
#[allow(async_fn_in_trait)]
pub trait Coordinator {
    async fn exchange(&self, report: &ControllerReport)
        -> Result<Instructions, CommunicationError>;
}

/// JSON over HTTP POST to `{base}/updateControllerState/{controller}`.
pub struct HttpCoordinator {
    client: reqwest::Client,
    url: Url,
}

impl HttpCoordinator {
    pub fn new(base_url: &str, controller_name: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("http client init failed")?;
        Ok(Self {
            client,
            url: state_url(base_url, controller_name)?,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

impl Coordinator for HttpCoordinator {
    async fn exchange(
        &self,
        report: &ControllerReport,
    ) -> Result<Instructions, CommunicationError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| CommunicationError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// What applying one set of instructions did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplySummary {
    /// Relays actually switched.
    pub changed: usize,
    pub unknown_pumps: Vec<String>,
    pub unknown_valves: Vec<String>,
}

/// Result of one reconcile round, for logging and tests.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub report: ControllerReport,
    pub instructions: Instructions,
    pub failure: Option<CommunicationError>,
    pub applied: ApplySummary,
}

pub struct Reconciler<C> {
    coordinator: C,
}

impl<C: Coordinator> Reconciler<C> {
    pub fn new(coordinator: C) -> Self {
        Self { coordinator }
    }

    /// Report `medians` plus the current tank and actuator state, then apply
    /// whatever comes back (or the fail-safe).
    pub async fn reconcile(&self, hw: &mut Hardware, medians: Medians) -> ReconcileOutcome {
        let report = snapshot(hw, medians);

        let (instructions, failure) = match self.coordinator.exchange(&report).await {
            Ok(instructions) => {
                info!(
                    pumps = instructions.pumps.len(),
                    valves = instructions.valves.len(),
                    "report sent, instructions received"
                );
                (instructions, None)
            }
            Err(e) => {
                error!("coordinator exchange failed: {e}; applying fail-safe instructions");
                (Instructions::fail_safe(), Some(e))
            }
        };

        let applied = apply(hw, &instructions);

        ReconcileOutcome {
            report,
            instructions,
            failure,
            applied,
        }
    }

    #[cfg(test)]
    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }
}

/// Freeze the current state of the controller into a report.
pub fn snapshot(hw: &Hardware, medians: Medians) -> ControllerReport {
    ControllerReport {
        moisture: medians.moisture,
        temperature: medians.temperature,
        tanks: hw.tank_levels(),
        pumps: hw.pump_states(),
        valves: hw.valve_states(),
    }
}

/// Drive every configured actuator to the state `instructions` ask for.
/// Actuators not mentioned go to their safe state; names that are not
/// configured are logged and skipped.
pub fn apply(hw: &mut Hardware, instructions: &Instructions) -> ApplySummary {
    let mut summary = ApplySummary::default();

    for (name, pump) in hw.pumps.iter_mut() {
        let on = instructions.pumps.get(name).copied().unwrap_or(false);
        let switched = if on { pump.turn_on() } else { pump.turn_off() };
        if switched {
            summary.changed += 1;
            info!(pump = %name, on, "pump switched");
        }
    }

    for (name, valve) in hw.valves.iter_mut() {
        let open = instructions.valves.get(name).copied().unwrap_or(false);
        let switched = if open { valve.open() } else { valve.close() };
        if switched {
            summary.changed += 1;
            info!(valve = %name, open, "valve switched");
        }
    }

    for name in instructions.pumps.keys() {
        if !hw.pumps.contains_key(name) {
            error!(pump = %name, "instructions name an unknown pump, ignoring");
            summary.unknown_pumps.push(name.clone());
        }
    }
    for name in instructions.valves.keys() {
        if !hw.valves.contains_key(name) {
            error!(valve = %name, "instructions name an unknown valve, ignoring");
            summary.unknown_valves.push(name.clone());
        }
    }

    if hw.pumps.values().any(Pump::is_on) && hw.valves.values().all(Valve::is_closed) {
        warn!("a pump is running while every valve is closed");
    }

    summary
}

// ===========================================================================
// Tests
// ===========================================================================
