//! Configuration options.
//!
//! Applications that link this crate are free to define their own command line arguments, but the
//! library itself is driven by a single TOML runtime configuration file covering CPU/memory usage,
//! network interface(s), PTP, scheduler heuristics, and session defaults. The path to the
//! configuration file is typically a command line argument passed to the application; this crate
//! treats the parsed [`RuntimeConfig`] as an opaque input handed to it by that collaborator.

use crate::lcore::{CoreId, SocketId};

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> RuntimeConfig {
    let config_str = fs::read_to_string(path).expect("ERROR: File read failed");
    let config: RuntimeConfig = toml::from_str(&config_str).expect("Invalid config file");
    config
}

/// Loads a default configuration file.
///
/// For demonstration purposes only, not tuned for performance.
pub fn default_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

/* --------------------------------------------------------------------------------- */

/// Runtime configuration options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Main core identifier. Initializes and manages the scheduler pool, PTP slaves, the admin
    /// controller, and logging, but runs no session tasklets itself.
    pub main_core: u32,

    /// Sets the number of memory channels to use.
    ///
    /// Controls the spread layout used by the huge-page allocator; mainly for performance
    /// optimization. Defaults to `1`.
    #[serde(default = "default_nb_memory_channels")]
    pub nb_memory_channels: usize,

    /// Suppress poll-mode-driver runtime logging and telemetry output. Defaults to `true`.
    #[serde(default = "default_suppress_pmd_output")]
    pub suppress_pmd_output: bool,

    /// Per-mempool settings.
    pub mempool: MempoolConfig,

    /// Live traffic options.
    pub online: OnlineConfig,

    /// PTP slave tunables.
    #[serde(default = "PtpConfig::default")]
    pub ptp: PtpConfig,

    /// Scheduler heuristics.
    #[serde(default = "SchedulerConfig::default")]
    pub scheduler: SchedulerConfig,

    /// Admin controller (session migration) tunables.
    #[serde(default = "AdminConfig::default")]
    pub admin: AdminConfig,

    /// Multicast controller tunables.
    #[serde(default = "MulticastConfig::default")]
    pub multicast: MulticastConfig,

    /// ST 2022-7 redundant receiver tunables.
    #[serde(default = "RedundancyConfig::default")]
    pub redundancy: RedundancyConfig,

    /// RX video reassembly tunables.
    #[serde(default = "RxVideoConfig::default")]
    pub rx_video: RxVideoConfig,
}

impl RuntimeConfig {
    /// Returns a list of core IDs assigned to the runtime.
    pub(crate) fn get_all_core_ids(&self) -> Vec<CoreId> {
        let mut cores = vec![CoreId(self.main_core)];
        for port in self.online.ports.iter() {
            cores.extend(port.cores.iter().map(|c| CoreId(*c)));
        }
        cores.sort();
        cores.dedup();
        cores
    }

    /// Returns a list of socket IDs in use.
    pub(crate) fn get_all_socket_ids(&self) -> Vec<SocketId> {
        let mut sockets = vec![];
        for core_id in self.get_all_core_ids() {
            sockets.push(core_id.socket_id());
        }
        sockets.sort();
        sockets.dedup();
        sockets
    }

    /// Returns poll-mode-driver EAL-style initialization parameters.
    #[allow(clippy::vec_init_then_push)]
    pub(crate) fn get_eal_params(&self) -> Vec<String> {
        let mut eal_params = vec![];

        eal_params.push("--main-lcore".to_owned());
        eal_params.push(self.main_core.to_string());

        eal_params.push("-l".to_owned());
        let core_list: Vec<String> = self
            .get_all_core_ids()
            .iter()
            .map(|c| c.raw().to_string())
            .collect();
        eal_params.push(core_list.join(","));

        for supl_arg in self.online.dpdk_supl_args.iter() {
            eal_params.push(supl_arg.to_string())
        }
        for port in self.online.ports.iter() {
            eal_params.push("-a".to_owned());
            eal_params.push(port.device.to_string());
        }

        eal_params.push("-n".to_owned());
        eal_params.push(self.nb_memory_channels.to_string());

        if self.suppress_pmd_output {
            eal_params.push("--log-level=6".to_owned());
            eal_params.push("--no-telemetry".to_owned());
        }

        eal_params
    }
}

fn default_nb_memory_channels() -> usize {
    1
}

fn default_suppress_pmd_output() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            main_core: 0,
            nb_memory_channels: 1,
            suppress_pmd_output: true,
            mempool: MempoolConfig {
                capacity: 8192,
                cache_size: 512,
            },
            online: OnlineConfig {
                promiscuous: true,
                nb_rxd: 4096,
                nb_txd: 4096,
                mtu: 1500,
                hardware_assist: true,
                dpdk_supl_args: Vec::new(),
                monitor: None,
                duration: None,
                ports: vec![],
            },
            ptp: PtpConfig::default(),
            scheduler: SchedulerConfig::default(),
            admin: AdminConfig::default(),
            multicast: MulticastConfig::default(),
            redundancy: RedundancyConfig::default(),
            rx_video: RxVideoConfig::default(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// Memory pool options.
///
/// Packet buffer memory is allocated from huge-page backed mempools, taking advantage of NUMA
/// affinity and DMA-addressable memory.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MempoolConfig {
    /// Number of mbufs allocated per mempool. Defaults to `65536`.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// The size of the per-core object cache. Recommended to evenly divide `capacity`. Defaults to
    /// `512`.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_capacity() -> usize {
    65536
}

fn default_cache_size() -> usize {
    512
}

/* --------------------------------------------------------------------------------- */

/// Live traffic options.
///
/// ## Example
/// ```toml
/// [online]
///     nb_rxd = 4096
///     nb_txd = 4096
///     promiscuous = true
///     mtu = 1500
///     hardware_assist = true
///
///     [[online.ports]]
///         device = "0000:3b:00.0"
///         cores = [1,2,3,4]
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OnlineConfig {
    /// Whether promiscuous mode is enabled for all ports. Defaults to `true`.
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// The number of RX descriptors per receive queue. Defaults to `4096`.
    #[serde(default = "default_portqueue_nb_rxd")]
    pub nb_rxd: usize,

    /// The number of TX descriptors per transmit queue. Defaults to `4096`.
    #[serde(default = "default_portqueue_nb_txd")]
    pub nb_txd: usize,

    /// Maximum transmission unit (in bytes). Defaults to `1500`.
    #[serde(default = "default_mtu")]
    pub mtu: usize,

    /// If set, attempts to program hardware RX steering flows and a hardware rate-limit
    /// hierarchy, falling back to software pacing/demux on failure. Defaults to `true`.
    #[serde(default = "default_hardware_assist")]
    pub hardware_assist: bool,

    /// Supplementary poll-mode-driver initialization arguments (e.g. `--no-huge`).
    #[serde(default = "default_dpdk_supl_args")]
    pub dpdk_supl_args: Vec<String>,

    /// Live performance monitoring. Defaults to `None`.
    #[serde(default = "default_monitor")]
    pub monitor: Option<MonitorConfig>,

    /// If set, the runtime stops itself after `duration` seconds. Defaults to `None` (run until
    /// externally signaled).
    #[serde(default = "default_duration")]
    pub duration: Option<u64>,

    /// List of network interfaces to use.
    pub ports: Vec<PortMap>,
}

fn default_duration() -> Option<u64> {
    None
}

fn default_hardware_assist() -> bool {
    true
}

fn default_dpdk_supl_args() -> Vec<String> {
    Vec::new()
}

fn default_promiscuous() -> bool {
    true
}

fn default_portqueue_nb_rxd() -> usize {
    4096
}

fn default_portqueue_nb_txd() -> usize {
    4096
}

fn default_mtu() -> usize {
    1500
}

fn default_monitor() -> Option<MonitorConfig> {
    None
}

/* --------------------------------------------------------------------------------- */

/// Network interface options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PortMap {
    /// PCI address of the interface (or `AF_XDP`/kernel-bound PMD spec).
    pub device: String,

    /// List of worker cores (schedulers) that may be assigned sessions bound to this port.
    ///
    /// It is recommended the cores reside on the same NUMA node as the PCI device.
    pub cores: Vec<u32>,
}

/* --------------------------------------------------------------------------------- */

/// Statistics logging and live monitoring options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MonitorConfig {
    /// Live display configuration. Defaults to `None` (no output).
    #[serde(default = "default_display")]
    pub display: Option<DisplayConfig>,

    /// Logging configuration. Defaults to `None` (no logs).
    #[serde(default = "default_log")]
    pub log: Option<LogConfig>,
}

fn default_display() -> Option<DisplayConfig> {
    None
}

fn default_log() -> Option<LogConfig> {
    None
}

/* --------------------------------------------------------------------------------- */

/// Live statistics display options. If enabled, stats are written to stdout once per second.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DisplayConfig {
    /// Display live throughputs. Defaults to `true`.
    #[serde(default = "default_display_throughput")]
    pub throughput: bool,

    /// Display live PTP lock status. Defaults to `true`.
    #[serde(default = "default_display_ptp")]
    pub ptp: bool,

    /// List of live port statistics to display (substring match against xstat names). Defaults to
    /// no port statistics.
    #[serde(default = "default_display_port_stats")]
    pub port_stats: Vec<String>,
}

fn default_display_throughput() -> bool {
    true
}

fn default_display_ptp() -> bool {
    true
}

fn default_display_port_stats() -> Vec<String> {
    vec![]
}

/* --------------------------------------------------------------------------------- */

/// Logging options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    /// Log directory path. Defaults to `"./log/"`.
    #[serde(default = "default_log_directory")]
    pub directory: String,

    /// How often to log statistics (in milliseconds). Defaults to `1000`.
    #[serde(default = "default_log_interval")]
    pub interval: u64,

    /// List of port statistics to log (substring match). Defaults to `["rx"]`.
    #[serde(default = "default_log_port_stats")]
    pub port_stats: Vec<String>,
}

fn default_log_directory() -> String {
    "./log/".to_string()
}

fn default_log_interval() -> u64 {
    1000
}

fn default_log_port_stats() -> Vec<String> {
    vec!["rx".to_string()]
}

/* --------------------------------------------------------------------------------- */

/// PTP slave tunables. Names the magic numbers the original implementation left as literals.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PtpConfig {
    /// Median-smoothing window (in accepted samples) for the integral re-anchor coefficient.
    /// Defaults to `10`.
    #[serde(default = "default_coefficient_trim_window")]
    pub coefficient_trim_window: usize,

    /// Number of consecutive outlier rejections before resetting the moving averages. Defaults to
    /// `10`.
    #[serde(default = "default_outlier_reset_after")]
    pub outlier_reset_after: u32,

    /// PI controller proportional gain. Defaults to `5e-10`.
    #[serde(default = "default_kp")]
    pub kp: f64,

    /// PI controller integral gain. Defaults to `1e-10`.
    #[serde(default = "default_ki")]
    pub ki: f64,

    /// Clamp applied to the PI controller's per-cycle offset, in nanoseconds. Defaults to `100`.
    #[serde(default = "default_pi_clamp_ns")]
    pub pi_clamp_ns: i64,

    /// DELAY_REQ transmission period, in microseconds. Defaults to `50`.
    #[serde(default = "default_delay_req_period_us")]
    pub delay_req_period_us: u64,

    /// Statistics reporting interval, in seconds. Defaults to `10`.
    #[serde(default = "default_ptp_stat_interval_s")]
    pub stat_interval_s: u64,
}

fn default_coefficient_trim_window() -> usize {
    10
}
fn default_outlier_reset_after() -> u32 {
    10
}
fn default_kp() -> f64 {
    5e-10
}
fn default_ki() -> f64 {
    1e-10
}
fn default_pi_clamp_ns() -> i64 {
    100
}
fn default_delay_req_period_us() -> u64 {
    50
}
fn default_ptp_stat_interval_s() -> u64 {
    10
}

impl Default for PtpConfig {
    fn default() -> Self {
        PtpConfig {
            coefficient_trim_window: default_coefficient_trim_window(),
            outlier_reset_after: default_outlier_reset_after(),
            kp: default_kp(),
            ki: default_ki(),
            pi_clamp_ns: default_pi_clamp_ns(),
            delay_req_period_us: default_delay_req_period_us(),
            stat_interval_s: default_ptp_stat_interval_s(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// Scheduler sleep/busy heuristics.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum sleep duration advised between loop iterations, in microseconds. Defaults to
    /// `1000`.
    #[serde(default = "default_default_sleep_us")]
    pub default_sleep_us: u64,

    /// Below this advised sleep duration the scheduler yields instead of sleeping, in
    /// microseconds. Defaults to `200`.
    #[serde(default = "default_sleep_threshold_us")]
    pub sleep_threshold_us: u64,

    /// If set, overrides the sleep heuristic with a forced sleep duration, in microseconds.
    /// Defaults to `None`.
    #[serde(default = "default_force_sleep_us")]
    pub force_sleep_us: Option<u64>,

    /// Sleep-ratio-score threshold (percent) above which a scheduler is considered busy. Defaults
    /// to `70.0`.
    #[serde(default = "default_busy_sleep_ratio_pct")]
    pub busy_sleep_ratio_pct: f64,

    /// Per-scheduler data quota ceiling, in Mb/s. Defaults to `10000` (10 Gb/s).
    #[serde(default = "default_quota_mbs")]
    pub quota_mbs: u32,
}

fn default_default_sleep_us() -> u64 {
    1000
}
fn default_sleep_threshold_us() -> u64 {
    200
}
fn default_force_sleep_us() -> Option<u64> {
    None
}
fn default_busy_sleep_ratio_pct() -> f64 {
    70.0
}
fn default_quota_mbs() -> u32 {
    10_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            default_sleep_us: default_default_sleep_us(),
            sleep_threshold_us: default_sleep_threshold_us(),
            force_sleep_us: default_force_sleep_us(),
            busy_sleep_ratio_pct: default_busy_sleep_ratio_pct(),
            quota_mbs: default_quota_mbs(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// Admin controller (session migration) tunables.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AdminConfig {
    /// Wake period of the admin thread, in seconds. Defaults to `6`.
    #[serde(default = "default_admin_period_s")]
    pub period_s: u64,

    /// CPU-busy score (percent of `avg_ns_per_loop`) above which a session is a migration
    /// candidate. Defaults to `80.0`.
    #[serde(default = "default_migration_threshold_pct")]
    pub migration_threshold_pct: f64,
}

fn default_admin_period_s() -> u64 {
    6
}
fn default_migration_threshold_pct() -> f64 {
    80.0
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            period_s: default_admin_period_s(),
            migration_threshold_pct: default_migration_threshold_pct(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// Multicast controller tunables.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MulticastConfig {
    /// Maximum number of multicast groups tracked per port. Defaults to `64`.
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,

    /// IGMPv3 report re-issue period, in seconds. Defaults to `10`.
    #[serde(default = "default_rejoin_period_s")]
    pub rejoin_period_s: u64,
}

fn default_max_groups() -> usize {
    64
}
fn default_rejoin_period_s() -> u64 {
    10
}

impl Default for MulticastConfig {
    fn default() -> Self {
        MulticastConfig {
            max_groups: default_max_groups(),
            rejoin_period_s: default_rejoin_period_s(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// ST 2022-7 redundant receiver tunables.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RedundancyConfig {
    /// Sliding reorder window for merging the P and R paths, in milliseconds. Defaults to `10`.
    #[serde(default = "default_reorder_window_ms")]
    pub reorder_window_ms: u64,
}

fn default_reorder_window_ms() -> u64 {
    10
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        RedundancyConfig {
            reorder_window_ms: default_reorder_window_ms(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// RX video reassembly tunables.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RxVideoConfig {
    /// Number of extended sequence ids a packet may lag the highwater before being dropped as
    /// stale. Defaults to `5`.
    #[serde(default = "default_seq_drop_window")]
    pub seq_drop_window: u32,
}

fn default_seq_drop_window() -> u32 {
    5
}

impl Default for RxVideoConfig {
    fn default() -> Self {
        RxVideoConfig {
            seq_drop_window: default_seq_drop_window(),
        }
    }
}
