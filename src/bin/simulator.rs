use clap::{App, Arg};
use colored::*;
use satra::engines::{AccessConditions, TxOpportunity};
use satra::{
    LoadControlMessage, LoadController, LoadSample, OfferedLoadWindow, RandomAccess,
    RandomAccessConfig, RandomSource, SeededRandom, TriggerKind,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};

const BEAM_ID: u32 = 1;
const CARRIER_ID: u32 = 0;
const TRAFFIC_SEED_SALT: u64 = 0x5EED_7AFF_1C00_0000;

/// Events delivered to a terminal, in order, exactly once.
#[derive(Debug)]
enum TerminalEvent {
    Frame { now_ms: u64 },
    LoadControl(LoadControlMessage),
    Shutdown,
}

#[derive(Debug)]
struct FrameReport {
    terminal_id: usize,
    unique_packets: u32,
    slots: Vec<u32>,
}

impl FrameReport {
    fn empty(terminal_id: usize) -> Self {
        Self {
            terminal_id,
            unique_packets: 0,
            slots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct SimulationSummary {
    terminals: usize,
    frames: u64,
    offered_packets: u64,
    replicas_sent: u64,
    collided_slots: u64,
    load_control_messages: u32,
    final_backlog: u64,
}

/// Terminal traffic queue seen through the access oracles.
#[derive(Debug, Default)]
struct Backlog {
    queued: u32,
}

impl AccessConditions for Backlog {
    fn is_dama_available(&self) -> bool {
        // No dedicated capacity is granted in this scenario.
        false
    }

    fn are_buffers_empty(&self) -> bool {
        self.queued == 0
    }

    fn on_packet_scheduled(&mut self) {
        self.queued = self.queued.saturating_sub(1);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = App::new("satra-simulator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-terminal random access simulation for one satellite beam")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON random access configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("terminals")
                .short("t")
                .long("terminals")
                .value_name("COUNT")
                .default_value("8")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("frames")
                .short("f")
                .long("frames")
                .value_name("COUNT")
                .default_value("200")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .short("s")
                .long("seed")
                .value_name("SEED")
                .default_value("1")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("arrival-rate")
                .short("a")
                .long("arrival-rate")
                .value_name("PROBABILITY")
                .help("Per-frame probability that a terminal queues a new packet")
                .default_value("0.3")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print the summary as JSON"),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => RandomAccessConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => RandomAccessConfig::default(),
    };
    let terminals: usize = matches.value_of("terminals").unwrap_or("8").parse()?;
    let frames: u64 = matches.value_of("frames").unwrap_or("200").parse()?;
    let seed: u64 = matches.value_of("seed").unwrap_or("1").parse()?;
    let arrival_rate: f64 = matches
        .value_of("arrival-rate")
        .unwrap_or("0.3")
        .parse()?;

    let summary = match run_beam(&config, terminals, frames, seed, arrival_rate).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("simulation aborted: {}", e);
            return Err(e);
        }
    };

    if matches.is_present("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

async fn run_beam(
    config: &RandomAccessConfig,
    terminals: usize,
    frames: u64,
    seed: u64,
    arrival_rate: f64,
) -> Result<SimulationSummary, Box<dyn std::error::Error>> {
    // Validate everything up front so a bad configuration fails before any task starts.
    let channel_id = config
        .channels
        .first()
        .map(|c| c.id)
        .ok_or("configuration has no allocation channels")?;
    config.build_channels()?;

    let load_control = &config.load_control;
    let mut controller = LoadController::from_parameters(load_control.channels.iter().copied())?;
    if load_control.enabled && controller.channel_parameters(channel_id).is_none() {
        return Err(format!(
            "load control enabled without parameters for allocation channel {}",
            channel_id
        )
        .into());
    }
    let mut window = OfferedLoadWindow::new(load_control.measurement_window_frames);

    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let mut inboxes = Vec::with_capacity(terminals);
    let mut handles = Vec::with_capacity(terminals);

    for terminal_id in 0..terminals {
        let terminal_seed = seed.wrapping_add(terminal_id as u64);
        let access = RandomAccess::from_config(config, SeededRandom::from_seed(terminal_seed))?;
        let trigger = access
            .default_trigger(channel_id)
            .ok_or("random access model is off for the simulated channel")?;
        let traffic = SeededRandom::from_seed(terminal_seed ^ TRAFFIC_SEED_SALT);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        inboxes.push(inbox_tx);
        handles.push(tokio::spawn(run_terminal(
            terminal_id,
            access,
            traffic,
            channel_id,
            trigger,
            arrival_rate,
            inbox_rx,
            report_tx.clone(),
        )));
    }
    drop(report_tx);

    let mut summary = SimulationSummary {
        terminals,
        frames,
        ..Default::default()
    };

    info!(terminals, frames, model = ?config.model, "beam simulation starting");

    'frames: for frame in 0..frames {
        let now_ms = frame * u64::from(config.frame.frame_duration_ms);
        for inbox in &inboxes {
            if inbox.send(TerminalEvent::Frame { now_ms }).is_err() {
                warn!(frame, "terminal stopped, ending simulation");
                break 'frames;
            }
        }

        let mut offered = 0u32;
        let mut slot_usage: BTreeMap<u32, u32> = BTreeMap::new();
        for _ in 0..terminals {
            let Some(report) = report_rx.recv().await else {
                warn!(frame, "report channel closed, ending simulation");
                break 'frames;
            };
            trace!(
                frame,
                terminal = report.terminal_id,
                packets = report.unique_packets,
                replicas = report.slots.len(),
                "frame report"
            );
            offered = offered.saturating_add(report.unique_packets);
            summary.replicas_sent += report.slots.len() as u64;
            for slot in report.slots {
                *slot_usage.entry(slot).or_insert(0) += 1;
            }
        }
        summary.offered_packets += u64::from(offered);
        summary.collided_slots += slot_usage.values().filter(|&&count| count > 1).count() as u64;

        if !load_control.enabled {
            continue;
        }
        if let Some(load) = window.record_frame(offered, config.frame.ra_slot_count) {
            let sample = LoadSample {
                beam_id: BEAM_ID,
                channel_id,
                carrier_id: CARRIER_ID,
                average_normalized_offered_load: load,
            };
            if let Some(message) = controller.on_load_sample(&sample)? {
                for inbox in &inboxes {
                    if inbox.send(TerminalEvent::LoadControl(message)).is_err() {
                        warn!(frame, "terminal stopped before load control delivery");
                    }
                }
            }
        }
    }

    for inbox in &inboxes {
        let _ = inbox.send(TerminalEvent::Shutdown);
    }
    for handle in handles {
        match handle.await {
            Ok(backlog) => summary.final_backlog += u64::from(backlog),
            Err(e) => error!("terminal task failed: {}", e),
        }
    }
    summary.load_control_messages = controller.get_stats().messages_sent;

    Ok(summary)
}

/// Runs until shutdown or the first access failure. Every `Frame` event is
/// answered with exactly one report, including the one that fails.
#[allow(clippy::too_many_arguments)]
async fn run_terminal(
    terminal_id: usize,
    mut access: RandomAccess,
    mut traffic: SeededRandom,
    channel_id: u32,
    trigger: TriggerKind,
    arrival_rate: f64,
    mut inbox: mpsc::UnboundedReceiver<TerminalEvent>,
    reports: mpsc::UnboundedSender<FrameReport>,
) -> u32 {
    let mut backlog = Backlog::default();

    while let Some(event) = inbox.recv().await {
        match event {
            TerminalEvent::Frame { now_ms } => {
                if traffic.uniform() < arrival_rate {
                    backlog.queued = backlog.queued.saturating_add(1);
                }

                let result = access.evaluate(channel_id, trigger, now_ms, &mut backlog);
                let opportunity = match result {
                    Ok(opportunity) => opportunity,
                    Err(e) => {
                        error!(terminal_id, "random access failed: {}", e);
                        let _ = reports.send(FrameReport::empty(terminal_id));
                        break;
                    }
                };

                let mut report = FrameReport::empty(terminal_id);
                report.unique_packets = opportunity.unique_packets();
                match opportunity {
                    TxOpportunity::Crdsa { replicas } => {
                        report.slots = replicas.into_values().flatten().collect();
                    }
                    // These engines do not consult the buffers themselves.
                    TxOpportunity::SlottedAloha { .. } | TxOpportunity::Essa { .. } => {
                        if backlog.are_buffers_empty() {
                            report.unique_packets = 0;
                        } else {
                            backlog.on_packet_scheduled();
                        }
                    }
                    TxOpportunity::DoNothing => {}
                }

                if reports.send(report).is_err() {
                    break;
                }
            }
            TerminalEvent::LoadControl(message) => {
                if let Err(e) = access.apply_load_control(&message) {
                    error!(terminal_id, "load control message rejected: {}", e);
                    break;
                }
            }
            TerminalEvent::Shutdown => break,
        }
    }

    backlog.queued
}

fn print_summary(summary: &SimulationSummary) {
    println!("{}", "Random access beam simulation".bold());
    println!("================================");
    println!("  Terminals:              {}", summary.terminals);
    println!("  Frames:                 {}", summary.frames);
    println!(
        "  Offered packets:        {}",
        summary.offered_packets.to_string().green()
    );
    println!("  Replicas sent:          {}", summary.replicas_sent);
    let collided = summary.collided_slots.to_string();
    if summary.collided_slots > 0 {
        println!("  Slots with collisions:  {}", collided.yellow());
    } else {
        println!("  Slots with collisions:  {}", collided.green());
    }
    println!(
        "  Load control messages:  {}",
        summary.load_control_messages.to_string().cyan()
    );
    println!("  Final backlog:          {}", summary.final_backlog);
}

#[cfg(test)]
mod tests {
    use super::*;
    use satra::load_control::LoadControlParameters;
    use satra::AccessModel;

    fn spawn_terminal(
        config: &RandomAccessConfig,
        channel_id: u32,
    ) -> (
        mpsc::UnboundedSender<TerminalEvent>,
        mpsc::UnboundedReceiver<FrameReport>,
        tokio::task::JoinHandle<u32>,
    ) {
        let access = RandomAccess::from_config(config, SeededRandom::from_seed(1)).unwrap();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_terminal(
            7,
            access,
            SeededRandom::from_seed(2),
            channel_id,
            TriggerKind::Crdsa,
            1.0,
            inbox_rx,
            report_tx,
        ));
        (inbox_tx, report_rx, handle)
    }

    #[tokio::test]
    async fn test_failing_terminal_still_reports_its_frame() {
        let config = RandomAccessConfig {
            model: AccessModel::Crdsa,
            ..Default::default()
        };
        // Channel 9 is not configured, so the first evaluation fails.
        let (inbox, mut reports, handle) = spawn_terminal(&config, 9);

        inbox.send(TerminalEvent::Frame { now_ms: 0 }).unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.terminal_id, 7);
        assert_eq!(report.unique_packets, 0);
        assert!(report.slots.is_empty());

        assert_eq!(handle.await.unwrap(), 1);
        assert!(reports.recv().await.is_none());
        assert!(inbox.send(TerminalEvent::Frame { now_ms: 10 }).is_err());
    }

    #[tokio::test]
    async fn test_terminal_reports_every_frame_until_shutdown() {
        let config = RandomAccessConfig {
            model: AccessModel::Crdsa,
            ..Default::default()
        };
        let (inbox, mut reports, handle) = spawn_terminal(&config, 0);

        for frame in 0..3u64 {
            inbox.send(TerminalEvent::Frame { now_ms: frame * 10 }).unwrap();
            assert!(reports.recv().await.is_some());
        }
        inbox.send(TerminalEvent::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_enabled_load_control_needs_channel_parameters() {
        let mut config = RandomAccessConfig::default();
        config.load_control.enabled = true;

        let result = run_beam(&config, 2, 5, 1, 0.5).await;
        assert!(result.is_err());

        config.load_control.channels.push(LoadControlParameters {
            channel_id: 0,
            threshold: 0.5,
            low_load_backoff_probability: 0.05,
            low_load_backoff_time_ms: 250,
            high_load_backoff_probability: 0.5,
            high_load_backoff_time_ms: 500,
        });
        let summary = run_beam(&config, 2, 5, 1, 0.5).await.unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.terminals, 2);
    }
}
