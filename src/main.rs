use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use inspect_live::{
    init_logging,
    models::{Measurement, ModelRegistry, Phase},
    ClientSettings, InspectionClient, SessionError, SettingsStore, WsConnector,
};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_SETTINGS_FILE: &str = "inspect-live.json";

const HELP: &str = "commands: start | scan <barcode> | stop | model <id> | pause | resume | \
feed | clear | reset | retry | connect | disconnect | history | summary <barcode> | quit";

#[tokio::main]
async fn main() -> Result<()> {
    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let store = SettingsStore::new(path)?;
    let settings = store.get().with_env();
    init_logging(settings.debug);

    info!(
        "inspect-live starting (backend {}, settings {})",
        settings.backend_url,
        store.path().display()
    );
    run(&store, settings).await
}

async fn run(store: &SettingsStore, settings: ClientSettings) -> Result<()> {
    let mut model_id = settings.selected_model_id;
    let registry = match &settings.models_path {
        Some(path) => ModelRegistry::load(path)?,
        None => ModelRegistry::default(),
    };
    let client = InspectionClient::spawn(&settings, WsConnector);

    let mut connection = client.connection();
    let mut session = client.session();
    let mut latest = client.latest();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{HELP}");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match execute(&client, store, &registry, &mut model_id, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => println!("! {err}"),
                }
            }
            Ok(()) = connection.changed() => {
                println!("connection: {:?}", *connection.borrow_and_update());
            }
            Ok(()) = session.changed() => {
                let snapshot = session.borrow_and_update().clone();
                println!(
                    "session: {:?} listening={} devices={}/{} barcode={} phase={} progress={}",
                    snapshot.stage(),
                    snapshot.is_listening,
                    snapshot.connected_device_count,
                    snapshot.total_device_count,
                    snapshot.current_barcode.as_deref().unwrap_or("-"),
                    snapshot.current_phase.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                    snapshot.progress_percent.map(|p| format!("{p}%")).unwrap_or_else(|| "-".into()),
                );
                if let Some(horizon) = snapshot
                    .current_phase
                    .and_then(|phase| phase_horizon(&registry, model_id, phase))
                {
                    println!("  {horizon}");
                }
                if let Some(settled) = &snapshot.last_settled {
                    println!("  last result: {} {}", settled.barcode, settled.result);
                }
                if let Some(error) = &snapshot.last_error {
                    println!("  error: {error}");
                }
            }
            Ok(()) = latest.changed() => {
                if let Some(m) = latest.borrow_and_update().as_ref() {
                    println!(
                        "measurement: {} {} {} {} {} @ {}{}",
                        m.barcode,
                        m.phase,
                        m.value,
                        m.unit,
                        m.result,
                        m.timestamp,
                        limits_note(&registry, model_id, m)
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutting down");
    client.shutdown().await
}

/// Runs one operator command. `Ok(false)` ends the session.
async fn execute(
    client: &InspectionClient,
    store: &SettingsStore,
    registry: &ModelRegistry,
    model_id: &mut Option<i64>,
    line: &str,
) -> Result<bool> {
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "start" => {
            if let Some(id) = *model_id {
                match registry.model(id) {
                    Some(model) if !model.is_active => warn!("model {id} is marked inactive"),
                    None if !registry.inspection_models.is_empty() => {
                        warn!("model {id} is not in the local registry")
                    }
                    _ => {}
                }
            }
            client.start_listening(*model_id).await?;
        }
        "scan" => {
            client.submit_barcode(argument, *model_id).await?;
        }
        "stop" => {
            if client.stop().await?.is_none() {
                println!("not listening");
            }
        }
        "model" => {
            let id = argument
                .parse::<i64>()
                .map_err(|_| SessionError::InvalidModel)?;
            *model_id = Some(id);
            if let Err(err) = store.select_model(Some(id)) {
                warn!("model {id} selected but not saved: {err:#}");
            }
            println!("model {id} selected");
        }
        "pause" => client.pause_feed()?,
        "resume" => client.resume_feed()?,
        "clear" => client.clear_feed()?,
        "reset" => client.clear_history()?,
        "retry" => client.retry_now()?,
        "connect" => client.connect()?,
        "disconnect" => client.disconnect()?,
        "history" => {
            for m in client.history().await? {
                println!(
                    "  {} {} {} {} {} {}",
                    m.timestamp, m.barcode, m.phase, m.value, m.unit, m.result
                );
            }
        }
        "summary" => match client.summary_for(argument).await? {
            Some(summary) => {
                for (phase, m) in &summary.phases {
                    println!("  {phase}: {} {} {}", m.value, m.unit, m.result);
                }
                println!("  overall: {}", summary.overall);
            }
            None => println!("no measurements for {argument}"),
        },
        "feed" => {
            let snapshot = client.feed().borrow().clone();
            println!(
                "feed: {} points, {} hidden{}",
                snapshot.points.len(),
                snapshot.hidden,
                if snapshot.paused { " (paused)" } else { "" }
            );
        }
        "help" => println!("{HELP}"),
        "quit" | "exit" => return Ok(false),
        other => println!("unknown command '{other}'; {HELP}"),
    }
    Ok(true)
}

/// ` [within 10..14]` / ` [OUT OF LIMITS 10..14]`, or nothing when the model
/// is unknown.
fn limits_note(registry: &ModelRegistry, model_id: Option<i64>, m: &Measurement) -> String {
    let (Some(within), Some(model)) = (
        registry.within_limits(model_id, m),
        model_id.and_then(|id| registry.model(id)),
    ) else {
        return String::new();
    };
    let limits = model.limits_for(m.phase);
    let verdict = if within { "within" } else { "OUT OF LIMITS" };
    format!(" [{verdict} {}..{}]", limits.lower_limit, limits.upper_limit)
}

/// Where `phase` sits in the expected inspection timeline.
fn phase_horizon(registry: &ModelRegistry, model_id: Option<i64>, phase: Phase) -> Option<String> {
    let timing = registry.timing_for(model_id)?;
    let (start, end) = timing.phase_window(phase);
    Some(format!(
        "{phase} window {:.1}s-{:.1}s of {:.1}s",
        start.as_secs_f64(),
        end.as_secs_f64(),
        timing.expected_total().as_secs_f64()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inspect_live::models::MeasurementResult;

    fn registry() -> ModelRegistry {
        serde_json::from_str(
            r#"{
                "inspection_models": [
                    {"id": 7, "model_name": "PSU-220", "p1_lower_limit": 10.0, "p1_upper_limit": 14.0,
                     "p2_lower_limit": 11.0, "p2_upper_limit": 13.0, "p3_lower_limit": 0.0, "p3_upper_limit": 1.5}
                ],
                "test_settings": [
                    {"name": "global", "is_active": true, "p1_measure_duration": 5.0, "wait_duration_1_to_2": 2.0,
                     "p2_measure_duration": 3.0, "wait_duration_2_to_3": 1.0, "p3_measure_duration": 4.0}
                ]
            }"#,
        )
        .unwrap()
    }

    fn reading(phase: Phase, value: f64) -> Measurement {
        Measurement {
            measurement_id: "m-1".into(),
            barcode: "BC123".into(),
            phase,
            value,
            unit: "V".into(),
            result: MeasurementResult::Pass,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn readings_are_tagged_against_the_selected_model() {
        let registry = registry();
        assert_eq!(
            limits_note(&registry, Some(7), &reading(Phase::P1, 12.0)),
            " [within 10..14]"
        );
        assert_eq!(
            limits_note(&registry, Some(7), &reading(Phase::P3, 2.0)),
            " [OUT OF LIMITS 0..1.5]"
        );
        assert_eq!(limits_note(&registry, Some(9), &reading(Phase::P1, 12.0)), "");
        assert_eq!(limits_note(&registry, None, &reading(Phase::P1, 12.0)), "");
    }

    #[test]
    fn phase_window_uses_global_timing() {
        let registry = registry();
        assert_eq!(
            phase_horizon(&registry, Some(7), Phase::P2).as_deref(),
            Some("P2 window 7.0s-10.0s of 15.0s")
        );
        assert_eq!(
            phase_horizon(&ModelRegistry::default(), Some(7), Phase::P2),
            None
        );
    }
}
