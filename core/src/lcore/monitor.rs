use crate::config::RuntimeConfig;
use crate::port::{statistics::PortStats, PortId};
use crate::ptp::PtpSlave;
use crate::session::{SessionId, SessionStats};

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use crossbeam_channel::{tick, Receiver};
use csv::Writer;
use serde::Serialize;

/// A closure the runtime supplies so the monitor can read a snapshot of every live session's
/// counters without owning the scheduler pool itself.
pub(crate) type SessionSnapshotFn = dyn Fn() -> Vec<(SessionId, SessionStats)> + Send + Sync;

/// Monitors live ST 2110 session throughput and PTP lock health, and logs per-port NIC
/// statistics, while the runtime is online.
pub(crate) struct Monitor {
    duration: Option<Duration>,
    display: Option<Display>,
    logger: Option<Logger>,
    port_ids: Vec<PortId>,
    snapshot: Arc<SessionSnapshotFn>,
    ptp: Option<Arc<PtpSlave>>,
    is_running: Arc<AtomicBool>,
}

impl Monitor {
    pub(crate) fn new(
        config: &RuntimeConfig,
        port_ids: Vec<PortId>,
        snapshot: Arc<SessionSnapshotFn>,
        ptp: Option<Arc<PtpSlave>>,
        is_running: Arc<AtomicBool>,
    ) -> Self {
        let date = Local::now();
        let online_cfg = &config.online;

        let duration = online_cfg.duration.map(Duration::from_secs);

        let display = (|| {
            if let Some(monitor_cfg) = &online_cfg.monitor {
                if let Some(display_cfg) = &monitor_cfg.display {
                    return Some(Display {
                        ticker: tick(Duration::from_millis(1000)),
                        throughput: display_cfg.throughput,
                        ptp: display_cfg.ptp,
                        keywords: display_cfg.port_stats.clone(),
                    });
                }
            }
            None
        })();

        let logger = (|| {
            if let Some(monitor_cfg) = &online_cfg.monitor {
                if let Some(log_cfg) = &monitor_cfg.log {
                    let path = Path::new(&log_cfg.directory)
                        .join(date.format("%Y-%m-%dT%H:%M:%S").to_string());
                    fs::create_dir_all(&path).expect("create log directory");
                    log::info!("Logging to {:?}", path);

                    let toml = toml::to_string(&config).expect("serialize config");
                    let mut config_file =
                        fs::File::create(path.join("config.toml")).expect("create config log");
                    config_file.write_all(toml.as_bytes()).expect("log config");

                    let sessions_wtr = Writer::from_path(path.join("sessions.csv"))
                        .expect("create session stats log");

                    let mut port_wtrs = HashMap::new();
                    for port_id in &port_ids {
                        let fname = path.join(format!("port{}.csv", port_id));
                        let wtr = Writer::from_path(&fname).expect("create portstat log");
                        port_wtrs.insert(*port_id, wtr);
                    }
                    return Some(Logger {
                        ticker: tick(Duration::from_millis(log_cfg.interval)),
                        path,
                        sessions_wtr,
                        sessions_wtr_init: false,
                        port_wtrs,
                        keywords: log_cfg.port_stats.clone(),
                    });
                }
            }
            None
        })();

        Monitor {
            duration,
            display,
            logger,
            port_ids,
            snapshot,
            ptp,
            is_running,
        }
    }

    pub(crate) fn run(&mut self) {
        let start_ts = Instant::now();
        let mut init_agg = AggSessionStats::collect(&self.snapshot);
        let mut init_ts = start_ts;

        let mut prev_agg = init_agg;
        let mut prev_ts = init_ts;
        let mut init = true;
        // Add a small delay to allow sessions to start producing traffic
        std::thread::sleep(Duration::from_millis(1000));
        while self.is_running.load(Ordering::Relaxed) {
            if let Some(duration) = self.duration {
                if start_ts.elapsed() >= duration {
                    self.is_running.store(false, Ordering::Relaxed);
                }
            }

            if let Some(display) = &self.display {
                if display.ticker.try_recv().is_ok() {
                    let curr_ts = Instant::now();
                    let delta = curr_ts - prev_ts;
                    let curr_agg = AggSessionStats::collect(&self.snapshot);
                    let nms = delta.as_millis() as f64;
                    if init {
                        init_agg = curr_agg;
                        init_ts = curr_ts;
                        init = false;
                    }
                    if display.throughput {
                        println!("----------------------------------------------");
                        println!("Current time: {}s", (curr_ts - start_ts).as_secs());
                        for port_id in &self.port_ids {
                            if let Ok(port_stats) = PortStats::collect(*port_id) {
                                port_stats.display(&display.keywords);
                            }
                        }
                        AggSessionStats::display_rates(curr_agg, prev_agg, nms);
                        AggSessionStats::display_dropped(curr_agg, init_agg);
                    }
                    if display.ptp {
                        display.show_ptp(self.ptp.as_deref());
                    }
                    prev_agg = curr_agg;
                    prev_ts = curr_ts;
                }
            }

            if let Some(logger) = &mut self.logger {
                if logger.ticker.try_recv().is_ok() {
                    let curr_agg = AggSessionStats::collect(&self.snapshot);
                    match logger.log_stats(init_ts.elapsed(), curr_agg, self.ptp.as_deref()) {
                        Ok(_) => (),
                        Err(error) => log::error!("Monitor log error: {}", error),
                    }
                }
            }
        }

        std::thread::sleep(Duration::from_millis(100));
        println!("----------------------------------------------");
        let curr_agg = AggSessionStats::collect(&self.snapshot);
        let summary = Summary::new(curr_agg, init_agg, (Instant::now() - init_ts).as_millis() as f64);
        println!("{}", summary);

        if let Some(logger) = &self.logger {
            let json_fname = logger.path.join("summary.json");
            summary.dump_json(json_fname).expect("Unable to dump to json");
        }
    }
}

#[derive(Debug)]
struct Display {
    ticker: Receiver<Instant>,
    throughput: bool,
    ptp: bool,
    keywords: Vec<String>,
}

impl Display {
    fn show_ptp(&self, ptp: Option<&PtpSlave>) {
        match ptp {
            Some(ptp) => {
                let locked = ptp.is_locked();
                match ptp.delta_stats_ns() {
                    Some((min, avg, max)) => println!(
                        "PTP: {} (delta min/avg/max ns: {}/{}/{})",
                        if locked { "locked" } else { "unlocked" },
                        min,
                        avg,
                        max
                    ),
                    None => println!("PTP: {} (no delta samples yet)", if locked { "locked" } else { "unlocked" }),
                }
            }
            None => println!("PTP: disabled"),
        }
    }
}

#[derive(Debug)]
struct Logger {
    ticker: Receiver<Instant>,
    path: PathBuf,
    sessions_wtr: Writer<std::fs::File>,
    sessions_wtr_init: bool,
    port_wtrs: HashMap<PortId, Writer<std::fs::File>>,
    keywords: Vec<String>,
}

impl Logger {
    /// Logs aggregate session counters, PTP health, and per-port NIC statistics for one tick.
    fn log_stats(
        &mut self,
        elapsed: Duration,
        agg: AggSessionStats,
        ptp: Option<&PtpSlave>,
    ) -> Result<()> {
        if !self.sessions_wtr_init {
            self.sessions_wtr.write_record([
                "ts_ms",
                "sessions",
                "frames_completed",
                "frames_dropped",
                "packets_sent",
                "packets_received",
                "bytes_sent",
                "bytes_received",
                "rate_limit_fallback_count",
                "ptp_locked",
                "ptp_delta_avg_ns",
            ])?;
            self.sessions_wtr_init = true;
        }
        let (locked, delta_avg) = match ptp {
            Some(p) => (
                p.is_locked().to_string(),
                p.delta_stats_ns().map(|(_, avg, _)| avg.to_string()).unwrap_or_else(|| "-".to_string()),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        self.sessions_wtr.write_record([
            elapsed.as_millis().to_string(),
            agg.session_count.to_string(),
            agg.frames_completed.to_string(),
            agg.frames_dropped.to_string(),
            agg.packets_sent.to_string(),
            agg.packets_received.to_string(),
            agg.bytes_sent.to_string(),
            agg.bytes_received.to_string(),
            agg.rate_limit_fallback_count.to_string(),
            locked,
            delta_avg,
        ])?;
        self.sessions_wtr.flush()?;

        for (port_id, wtr) in self.port_wtrs.iter_mut() {
            match PortStats::collect(*port_id) {
                Ok(port_stats) => {
                    wtr.write_field(elapsed.as_millis().to_string())?;
                    for (label, value) in port_stats.stats.iter() {
                        if self.keywords.iter().any(|k| label.contains(k)) {
                            wtr.write_field(value.to_string())?;
                        }
                    }
                    wtr.write_record(None::<&[u8]>)?;
                    wtr.flush()?;
                }
                Err(error) => log::error!("{}", error),
            }
        }
        Ok(())
    }
}

/// Aggregate session statistics at one point in time, summed across every currently live
/// session regardless of kind.
#[derive(Debug, Default, Clone, Copy)]
struct AggSessionStats {
    session_count: u64,
    frames_completed: u64,
    frames_dropped: u64,
    packets_sent: u64,
    packets_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    rate_limit_fallback_count: u64,
}

impl AggSessionStats {
    fn collect(snapshot: &SessionSnapshotFn) -> Self {
        let mut agg = AggSessionStats::default();
        for (_, stats) in snapshot() {
            agg.session_count += 1;
            agg.frames_completed += stats.frames_completed;
            agg.frames_dropped += stats.frames_dropped;
            agg.packets_sent += stats.packets_sent;
            agg.packets_received += stats.packets_received;
            agg.bytes_sent += stats.bytes_sent;
            agg.bytes_received += stats.bytes_received;
            if stats.rate_limit_fallback {
                agg.rate_limit_fallback_count += 1;
            }
        }
        agg
    }

    fn display_rates(curr: AggSessionStats, prev: AggSessionStats, nms: f64) {
        println!(
            "TX: {:.0} bps / {:.0} fps ({} sessions)",
            (curr.bytes_sent - prev.bytes_sent) as f64 * 8.0 / nms * 1000.0,
            (curr.frames_completed - prev.frames_completed) as f64 / nms * 1000.0,
            curr.session_count
        );
        println!(
            "RX: {:.0} bps / {:.0} pps",
            (curr.bytes_received - prev.bytes_received) as f64 * 8.0 / nms * 1000.0,
            (curr.packets_received - prev.packets_received) as f64 / nms * 1000.0,
        );
        if curr.rate_limit_fallback_count > 0 {
            println!(
                "Rate-limit fallback active on {} session(s)",
                curr.rate_limit_fallback_count
            );
        }
    }

    fn display_dropped(curr: AggSessionStats, init: AggSessionStats) {
        let dropped = curr.frames_dropped - init.frames_dropped;
        let total = (curr.frames_completed - init.frames_completed) + dropped;
        println!(
            "Dropped: {} frames ({:.3}%)",
            dropped,
            if total > 0 {
                100.0 * dropped as f64 / total as f64
            } else {
                0.0
            }
        );
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    avg_tx_bps: f64,
    avg_tx_fps: f64,
    avg_rx_bps: f64,
    avg_rx_pps: f64,
    frames_dropped: u64,
    percent_dropped: f64,
}

impl Summary {
    fn new(curr: AggSessionStats, init: AggSessionStats, ems: f64) -> Self {
        let dropped = curr.frames_dropped - init.frames_dropped;
        let total = (curr.frames_completed - init.frames_completed) + dropped;
        Summary {
            avg_tx_bps: (curr.bytes_sent - init.bytes_sent) as f64 * 8.0 / ems * 1000.0,
            avg_tx_fps: (curr.frames_completed - init.frames_completed) as f64 / ems * 1000.0,
            avg_rx_bps: (curr.bytes_received - init.bytes_received) as f64 * 8.0 / ems * 1000.0,
            avg_rx_pps: (curr.packets_received - init.packets_received) as f64 / ems * 1000.0,
            frames_dropped: dropped,
            percent_dropped: if total > 0 {
                100.0 * dropped as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    fn dump_json(&self, path: PathBuf) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(&file, self)?;
        Ok(())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "AVERAGE TX: {:.3} bps / {:.3} fps", self.avg_tx_bps, self.avg_tx_fps)?;
        writeln!(f, "AVERAGE RX: {:.3} bps / {:.3} pps", self.avg_rx_bps, self.avg_rx_pps)?;
        writeln!(
            f,
            "DROPPED: {} frames ({:.3}%)",
            self.frames_dropped, self.percent_dropped,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(frames: u64, dropped: u64, bytes: u64) -> SessionStats {
        SessionStats {
            frames_completed: frames,
            frames_dropped: dropped,
            bytes_sent: bytes,
            ..SessionStats::default()
        }
    }

    #[test]
    fn aggregates_across_multiple_sessions() {
        let snapshot: Vec<(SessionId, SessionStats)> = vec![
            (SessionId(1), stats(10, 1, 1000)),
            (SessionId(2), stats(20, 0, 2000)),
        ];
        let agg = AggSessionStats::collect(&|| snapshot.clone());
        assert_eq!(agg.session_count, 2);
        assert_eq!(agg.frames_completed, 30);
        assert_eq!(agg.frames_dropped, 1);
        assert_eq!(agg.bytes_sent, 3000);
    }
}
