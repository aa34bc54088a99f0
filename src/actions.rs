use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::ArgMatches;
use std::{sync::Arc, time::Duration};

use cellscope_protocol::{summarize, Reading, ReadingHistory, TimeSeriesWindow, TOTAL_SERIES};

use crate::{
    config::SessionConfig,
    session::{ConnectionSession, ConnectionState, SessionEvent},
    transport::{ports, DeviceTransport, MemoryTransport, SerialTransport},
};

const REPLAY_CHUNK: usize = 256;
const REPLAY_DELAY: Duration = Duration::from_millis(5);

pub fn list_ports(want_json: bool) -> Result<()> {
    let listing = ports::list_ports();
    if want_json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    if listing.is_empty() {
        eprintln!("No serial ports found");
    }
    for port in &listing {
        match &port.usb_id {
            Some(id) => println!("{} ({}, {id})", port.port_name, port.port_type),
            None => println!("{} ({})", port.port_name, port.port_type),
        }
    }
    Ok(())
}

/// Settings from `--config`, then individual flags on top.
pub fn load_config(matches: &ArgMatches) -> Result<SessionConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(port) = matches.get_one::<String>("port") {
        config.port_name = Some(port.clone());
    }
    if let Some(baud) = matches.get_one::<u32>("baud-rate") {
        config.baud_rate = *baud;
    }
    if let Some(limit) = matches.get_one::<usize>("history-limit") {
        config.history_limit = Some(*limit);
    }
    Ok(config)
}

/// Connect, print readings until the stream ends or Ctrl-C, then export what was collected.
pub async fn run_monitor(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let want_json = matches.get_flag("json");

    let transport: Arc<dyn DeviceTransport> = match matches.get_one::<String>("replay") {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read replay file {path}"))?;
            log::info!("Replaying {} bytes from {path}", data.len());
            let (transport, feed) = MemoryTransport::new();
            tokio::spawn(async move {
                feed.replay(Bytes::from(data), REPLAY_CHUNK, REPLAY_DELAY)
                    .await;
            });
            Arc::new(transport)
        }
        None => Arc::new(SerialTransport::new(config.port_name.clone())),
    };

    let mut window = TimeSeriesWindow::new(config.window_size);
    let mut history = match config.history_limit {
        Some(limit) => ReadingHistory::bounded(limit),
        None => ReadingHistory::new(),
    };
    let (session, events) = ConnectionSession::new(transport, config);

    let (interrupt_tx, interrupt_rx) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .map_err(|err| anyhow!("failed to install Ctrl-C handler: {err}"))?;

    session.connect().await?;

    let mut last_error = None;
    loop {
        tokio::select! {
            event = events.recv_async() => {
                let Ok(event) = event else { break };
                match event {
                    SessionEvent::Reading(reading) => {
                        let previous_total = window
                            .samples()
                            .last()
                            .and_then(|s| s.values.iter().find(|(name, _)| name == TOTAL_SERIES))
                            .map(|(_, v)| *v);
                        if want_json {
                            println!("{}", serde_json::to_string(&reading)?);
                        } else {
                            println!("{}", format_reading(&reading, previous_total));
                        }
                        window.push_reading(&reading);
                        history.push(reading);
                    }
                    SessionEvent::StateChanged { state: ConnectionState::Error, message } => {
                        let message = message.unwrap_or_else(|| "unknown error".to_string());
                        eprintln!("Connection error: {message}");
                        last_error = Some(message);
                    }
                    SessionEvent::StateChanged { state: ConnectionState::Idle, .. } => break,
                    SessionEvent::StateChanged { state, .. } => log::debug!("Session is {state}"),
                }
            }
            _ = interrupt_rx.recv_async() => {
                log::info!("Interrupted, disconnecting");
                session.disconnect().await;
            }
        }
    }

    export_history(matches, &history)?;
    log::info!(
        "Captured {} readings, {} in the chart window",
        history.len(),
        window.len()
    );

    match last_error {
        Some(message) => Err(anyhow!("connection lost: {message}")),
        None => Ok(()),
    }
}

fn export_history(matches: &ArgMatches, history: &ReadingHistory) -> Result<()> {
    if let Some(path) = matches.get_one::<String>("export-csv") {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {path}"))?;
        history.write_csv(file)?;
        log::info!("Exported {} readings to {path}", history.len());
    }
    if let Some(path) = matches.get_one::<String>("export-json") {
        std::fs::write(path, history.to_json()?)
            .with_context(|| format!("failed to write {path}"))?;
        log::info!("Exported {} readings to {path}", history.len());
    }
    Ok(())
}

/// One terminal line per reading: total, trend, spread and every present cell.
pub fn format_reading(reading: &Reading, previous_total: Option<f64>) -> String {
    let summary = summarize(reading);
    let mut line = format!(
        "{} total {:.3} V",
        reading.timestamp.format("%H:%M:%S"),
        reading.total_voltage
    );
    if let Some(previous) = previous_total {
        line.push_str(&format!(" ({:+.3})", reading.total_voltage - previous));
    }
    line.push_str(&format!(" spread {:.3} V |", summary.spread));
    for cell in reading.present_cells() {
        line.push_str(&format!(
            " {}: {:.3} {}",
            cell.number, cell.individual_voltage, cell.status
        ));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellscope_protocol::RecordParser;

    #[test]
    fn test_format_reading() {
        let reading = RecordParser::default().parse(
            "BATERIA TOTAL (2S): 7.95V\nCel 1: 3.96V\nCel 2: 3.99V\nMódulo 1 (0x48):\n  A0 (1S): RAW=22645  Tensão=3.963V\n  A1 (2S): RAW=45500  Tensão=7.950V",
        );
        let line = format_reading(&reading, Some(8.0));
        assert!(line.contains("total 7.950 V (-0.050)"), "{line}");
        assert!(line.contains("spread 0.030 V"), "{line}");
        assert!(line.ends_with("1: 3.960 good 2: 3.990 good"), "{line}");
    }

    #[test]
    fn test_load_config_flags_override_file() -> Result<()> {
        let path = std::env::temp_dir()
            .join(format!("cellscope_actions_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"port_name": "COM9", "baud_rate": 9600}"#)?;
        let path_str = path.to_string_lossy().to_string();

        let matches = crate::cli::build_command().try_get_matches_from([
            "cellscope",
            "--config",
            path_str.as_str(),
            "--baud-rate",
            "57600",
            "--history-limit",
            "500",
        ])?;
        let config = load_config(&matches)?;
        assert_eq!(config.port_name.as_deref(), Some("COM9"));
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.history_limit, Some(500));

        std::fs::remove_file(path)?;
        Ok(())
    }
}
