//! The pulse: periodic metabolism of attention.
//!
//! One pulse dispatches triggered protocols for active signals, sweeps for
//! stagnation, auto-resolves signals whose condition cleared, and writes a
//! summary into the history ring. Errors in one signal never abort the
//! pulse; they are recorded per signal.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::engine::{DispatchOptions, Engine};
use crate::core::error::ChoraError;
use crate::core::model::QueryFilter;
use crate::core::time::now_iso;
use crate::metabolism;
use crate::worker;

/// Pulse configuration document, stored as JSON beside the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        PulseConfig {
            enabled: true,
            interval_seconds: 60,
        }
    }
}

impl PulseConfig {
    /// Config path for a given database path: `<db>.pulse.json`.
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut os = db_path.as_os_str().to_os_string();
        os.push(".pulse.json");
        PathBuf::from(os)
    }

    pub fn load(path: &Path) -> Result<Self, ChoraError> {
        if !path.exists() {
            return Ok(PulseConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: PulseConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ChoraError> {
        self.validate()?;
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ChoraError> {
        if self.interval_seconds < 1 {
            return Err(ChoraError::InvalidData(
                "interval_seconds must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// A signal queued for dispatch: (signal entity, triggered protocol id).
struct Candidate {
    signal_id: String,
    protocol_id: String,
    inputs: Value,
}

pub struct Pulse {
    engine: Arc<Engine>,
    config: PulseConfig,
    running: Mutex<()>,
}

impl Pulse {
    pub fn new(engine: Arc<Engine>, config: PulseConfig) -> Self {
        Pulse {
            engine,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    fn candidates(&self) -> Result<Vec<Candidate>, ChoraError> {
        let store = self.engine.store();
        let signals = store.query_entities(&QueryFilter {
            entity_type: Some("signal".to_string()),
            status: Some("active".to_string()),
            limit: Some(200),
            ..Default::default()
        })?;

        let mut out = Vec::new();
        for signal in signals {
            for bond in store.bonds_from(&signal.id)? {
                if bond.verb != "triggers" || bond.status != "active" {
                    continue;
                }
                let Some(target) = store.get_entity(&bond.to_id)? else {
                    continue;
                };
                if target.entity_type != "protocol" {
                    continue;
                }
                let mut inputs = signal.data.clone();
                inputs.insert("signal_id".into(), json!(signal.id));
                out.push(Candidate {
                    signal_id: signal.id.clone(),
                    protocol_id: target.id,
                    inputs: Value::Object(inputs),
                });
            }
        }
        Ok(out)
    }

    /// Preview what a pulse would process. No writes.
    pub fn preview(&self) -> Result<Value, ChoraError> {
        let candidates = self.candidates()?;
        let store = self.engine.store();
        let active = store.query_entities(&QueryFilter {
            entity_type: Some("signal".to_string()),
            status: Some("active".to_string()),
            limit: Some(200),
            ..Default::default()
        })?;
        let triggered: Vec<Value> = candidates
            .iter()
            .map(|c| json!({ "signal_id": c.signal_id, "protocol_id": c.protocol_id }))
            .collect();
        let without = active
            .iter()
            .filter(|s| !candidates.iter().any(|c| c.signal_id == s.id))
            .count();
        Ok(json!({
            "would_process": triggered,
            "signals_without_triggers": without,
        }))
    }

    /// Run one pulse to completion and record its summary.
    pub fn run_once(&self) -> Result<Value, ChoraError> {
        match self.running.try_lock() {
            Ok(_guard) => self.run_inner(),
            Err(_) => {
                eprintln!("pulse tick skipped: previous pulse still running");
                Ok(json!({ "skipped": true }))
            }
        }
    }

    fn run_inner(&self) -> Result<Value, ChoraError> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.interval_seconds);
        let store = Arc::clone(self.engine.store());

        let candidates = self.candidates()?;
        let mut processed = 0usize;
        let mut errors: Vec<Value> = Vec::new();

        for candidate in candidates {
            let dispatch_started = Instant::now();
            let result = worker::execute_recorded(
                &self.engine,
                &candidate.signal_id,
                &candidate.protocol_id,
                candidate.inputs,
                DispatchOptions {
                    deadline: Some(deadline),
                    ..Default::default()
                },
            );
            let duration_ms = dispatch_started.elapsed().as_millis() as i64;

            let Some(signal) = store.get_entity(&candidate.signal_id)? else {
                continue;
            };
            let mut data = signal.data.clone();
            if result.ok {
                let mut outcome = json!({
                    "protocol_id": candidate.protocol_id,
                    "duration_ms": duration_ms,
                });
                if let Some(payload) = result.data.as_object() {
                    for (k, v) in payload {
                        outcome[k.clone()] = v.clone();
                    }
                }
                data.insert("status".into(), json!("resolved"));
                data.insert("outcome_data".into(), outcome);
                store.save_entity(&signal.id, "signal", data, Some("resolved"))?;
            } else {
                let error = json!({
                    "kind": result
                        .error_kind
                        .map(|k| k.as_str().to_string())
                        .unwrap_or_else(|| "execution_error".into()),
                    "message": result.error_message.clone().unwrap_or_default(),
                });
                data.insert("status".into(), json!("failed"));
                data.insert(
                    "outcome_data".into(),
                    json!({
                        "protocol_id": candidate.protocol_id,
                        "duration_ms": duration_ms,
                        "error": error,
                    }),
                );
                store.save_entity(&signal.id, "signal", data, Some("failed"))?;
                errors.push(json!({ "signal_id": signal.id, "error": error }));
            }
            processed += 1;
        }

        let stagnation = metabolism::detect_stagnation(&store)?;
        let auto_resolved = metabolism::check_auto_resolution(&store)?;

        let duration_ms = started.elapsed().as_millis() as i64;
        store.record_pulse(processed, errors.len(), duration_ms)?;

        Ok(json!({
            "ts": now_iso(),
            "signals_processed": processed,
            "errors": errors,
            "duration_ms": duration_ms,
            "stagnation": stagnation,
            "auto_resolved": auto_resolved,
        }))
    }

    /// Recent pulse summaries from the history ring.
    pub fn status(&self, limit: u32) -> Result<Value, ChoraError> {
        let pulses = self.engine.store().pulse_history(limit)?;
        Ok(json!({ "pulses": pulses, "total": pulses.len() }))
    }

    /// Blocking pulse loop. A tick that fires while the previous pulse is
    /// still running is skipped and logged.
    pub fn run_loop(&self) -> Result<(), ChoraError> {
        if !self.config.enabled {
            eprintln!("pulse disabled by config");
            return Ok(());
        }
        let interval = Duration::from_secs(self.config.interval_seconds);
        loop {
            let started = Instant::now();
            match self.run_once() {
                Ok(summary) => {
                    if summary.get("skipped").is_none() {
                        eprintln!(
                            "pulse: {} signals, {} errors, {}ms",
                            summary["signals_processed"],
                            summary["errors"].as_array().map(|e| e.len()).unwrap_or(0),
                            summary["duration_ms"]
                        );
                    }
                }
                Err(e) => eprintln!("pulse failed: {}", e),
            }
            let elapsed = started.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }
}
