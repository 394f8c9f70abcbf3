//! Prometheus statistics.
//!
//! The runtime uses the Prometheus time series database to record and report per-session and
//! per-port counters for monitoring a deployment over time. You can use Prometheus with other
//! services like Grafana to chart the reported data.
//!
//! Enable the exporter with the `prometheus` feature, point it at the runtime's session and PTP
//! state with [`set_session_source`]/[`set_ptp_source`], and serve [`serve_req`] from any `hyper`
//! listener:
//!
//! ```yaml
//! global:
//!     scrape_interval: 1s
//!     evaluation_interval: 1s
//! scrape_configs:
//!     - job_name: mtlrs
//!       static_configs:
//!           - targets: ['127.0.0.1:9898']
//! ```
//!
//! You can also use [`register_base_prometheus_registry`] to add your own metrics to the
//! registry the runtime exports.

use http_body_util::Full;
use hyper::{
    body::{Body, Bytes},
    header::CONTENT_TYPE,
    Request, Response,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        family::Family,
        gauge::Gauge,
    },
    registry::{Registry, Unit},
};
use std::{
    fmt::Write,
    sync::atomic::AtomicI64,
    sync::{Arc, LazyLock, Mutex, OnceLock},
};

use crate::session::{SessionId, SessionStats};

impl EncodeLabelSet for SessionId {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        let mut label = encoder.encode_label();
        let mut key = label.encode_label_key()?;
        key.write_str("session")?;
        let mut value = key.encode_label_value()?;
        write!(value, "{}", self.0)?;
        value.finish()
    }
}

/// Label set for per-port gauges, keyed by the device name from the port's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PortLabel(String);

impl EncodeLabelSet for PortLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        let mut label = encoder.encode_label();
        let mut key = label.encode_label_key()?;
        key.write_str("port")?;
        let mut value = key.encode_label_value()?;
        write!(value, "{}", self.0)?;
        value.finish()
    }
}

type IntGauge = Gauge<i64, AtomicI64>;

#[derive(Default)]
struct SessionFamilies {
    frames_completed: Family<SessionId, IntGauge>,
    frames_dropped: Family<SessionId, IntGauge>,
    packets_sent: Family<SessionId, IntGauge>,
    packets_received: Family<SessionId, IntGauge>,
    bytes_sent: Family<SessionId, IntGauge>,
    bytes_received: Family<SessionId, IntGauge>,
    rx_latency_ns_avg: Family<SessionId, IntGauge>,
    rate_limit_fallback: Family<SessionId, IntGauge>,
}

#[derive(Default)]
struct PtpFamilies {
    locked: Family<PortLabel, IntGauge>,
    offset_ns: Family<PortLabel, IntGauge>,
    mean_path_delay_ns: Family<PortLabel, IntGauge>,
}

static SESSION_FAMILIES: LazyLock<SessionFamilies> = LazyLock::new(SessionFamilies::default);
static PTP_FAMILIES: LazyLock<PtpFamilies> = LazyLock::new(PtpFamilies::default);

/// One session's counters as of the last snapshot. Matches [`SessionStats`] field-for-field.
pub type SessionSource = Arc<dyn Fn() -> Vec<(SessionId, SessionStats)> + Send + Sync>;
/// One port's PTP slave state as of the last snapshot: `(device name, locked, offset_ns, mean_path_delay_ns)`.
pub type PtpSource = Arc<dyn Fn() -> Vec<(String, bool, Option<i128>, Option<i128>)> + Send + Sync>;

static SESSION_SOURCE: OnceLock<SessionSource> = OnceLock::new();
static PTP_SOURCE: OnceLock<PtpSource> = OnceLock::new();

/// Registers the closure the exporter polls for session counters on every scrape. The runtime
/// calls this once at startup with a closure over its scheduler pool's `session_snapshots()`.
pub fn set_session_source(f: impl Fn() -> Vec<(SessionId, SessionStats)> + Send + Sync + 'static) {
    if SESSION_SOURCE.set(Arc::new(f)).is_err() {
        panic!("session source already set. Call `set_session_source` only once before running the runtime.");
    }
}

/// Registers the closure the exporter polls for PTP slave state on every scrape.
pub fn set_ptp_source(
    f: impl Fn() -> Vec<(String, bool, Option<i128>, Option<i128>)> + Send + Sync + 'static,
) {
    if PTP_SOURCE.set(Arc::new(f)).is_err() {
        panic!("PTP source already set. Call `set_ptp_source` only once before running the runtime.");
    }
}

pub(crate) static BASE_STAT_REGISTRY: OnceLock<Mutex<Option<Registry>>> = OnceLock::new();

/// You can use this function to add your own metrics to the registry the runtime exports,
/// alongside the session and PTP gauges it registers itself.
pub fn register_base_prometheus_registry(r: Registry) {
    if BASE_STAT_REGISTRY.set(Mutex::new(Some(r))).is_err() {
        panic!(
            "Base registry already set. You should call `register_base_prometheus_registry` only \
                once before building the runtime."
        );
    }
}

pub(crate) static STAT_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let mut r = BASE_STAT_REGISTRY
        .get_or_init(|| Mutex::new(Some(Registry::default())))
        .lock()
        .unwrap()
        .take()
        .unwrap();

    r.register(
        "mtlrs_session_frames_completed",
        "Frames the session has fully assembled (RX) or sent (TX).",
        SESSION_FAMILIES.frames_completed.clone(),
    );
    r.register(
        "mtlrs_session_frames_dropped",
        "Frames the session discarded incomplete or late.",
        SESSION_FAMILIES.frames_dropped.clone(),
    );
    r.register_with_unit(
        "mtlrs_session_packets_sent",
        "Packets transmitted by the session.",
        Unit::Other("pkts".to_string()),
        SESSION_FAMILIES.packets_sent.clone(),
    );
    r.register_with_unit(
        "mtlrs_session_packets_received",
        "Packets received by the session.",
        Unit::Other("pkts".to_string()),
        SESSION_FAMILIES.packets_received.clone(),
    );
    r.register_with_unit(
        "mtlrs_session_bytes_sent",
        "Bytes transmitted by the session.",
        Unit::Bytes,
        SESSION_FAMILIES.bytes_sent.clone(),
    );
    r.register_with_unit(
        "mtlrs_session_bytes_received",
        "Bytes received by the session.",
        Unit::Bytes,
        SESSION_FAMILIES.bytes_received.clone(),
    );
    r.register_with_unit(
        "mtlrs_session_rx_latency_ns_avg",
        "Moving average of PTP-now minus the RTP timestamp, for RX sessions with hardware timestamping.",
        Unit::Other("ns".to_string()),
        SESSION_FAMILIES.rx_latency_ns_avg.clone(),
    );
    r.register(
        "mtlrs_session_rate_limit_fallback",
        "1 once a TX session has fallen back from a rejected hardware rate limit to TSC pacing.",
        SESSION_FAMILIES.rate_limit_fallback.clone(),
    );

    r.register(
        "mtlrs_ptp_locked",
        "1 if the port's PTP slave clock is locked to its master.",
        PTP_FAMILIES.locked.clone(),
    );
    r.register_with_unit(
        "mtlrs_ptp_offset_ns",
        "Most recent offset-from-master estimate.",
        Unit::Other("ns".to_string()),
        PTP_FAMILIES.offset_ns.clone(),
    );
    r.register_with_unit(
        "mtlrs_ptp_mean_path_delay_ns",
        "Most recent mean path delay estimate.",
        Unit::Other("ns".to_string()),
        PTP_FAMILIES.mean_path_delay_ns.clone(),
    );

    r
});

/// Pulls the latest session and PTP state from whatever sources were registered and updates the
/// exported gauges. Cheap enough to call on every scrape; there's no packet-path bookkeeping to
/// amortize.
fn refresh() {
    if let Some(source) = SESSION_SOURCE.get() {
        for (id, stats) in source() {
            SESSION_FAMILIES
                .frames_completed
                .get_or_create(&id)
                .set(stats.frames_completed as i64);
            SESSION_FAMILIES
                .frames_dropped
                .get_or_create(&id)
                .set(stats.frames_dropped as i64);
            SESSION_FAMILIES
                .packets_sent
                .get_or_create(&id)
                .set(stats.packets_sent as i64);
            SESSION_FAMILIES
                .packets_received
                .get_or_create(&id)
                .set(stats.packets_received as i64);
            SESSION_FAMILIES
                .bytes_sent
                .get_or_create(&id)
                .set(stats.bytes_sent as i64);
            SESSION_FAMILIES
                .bytes_received
                .get_or_create(&id)
                .set(stats.bytes_received as i64);
            SESSION_FAMILIES
                .rx_latency_ns_avg
                .get_or_create(&id)
                .set(stats.rx_latency_ns_avg.unwrap_or(0));
            SESSION_FAMILIES
                .rate_limit_fallback
                .get_or_create(&id)
                .set(stats.rate_limit_fallback as i64);
        }
    }

    if let Some(source) = PTP_SOURCE.get() {
        for (port, locked, offset_ns, mean_path_delay_ns) in source() {
            let label = PortLabel(port);
            PTP_FAMILIES
                .locked
                .get_or_create(&label)
                .set(locked as i64);
            if let Some(offset) = offset_ns {
                PTP_FAMILIES
                    .offset_ns
                    .get_or_create(&label)
                    .set(offset as i64);
            }
            if let Some(delay) = mean_path_delay_ns {
                PTP_FAMILIES
                    .mean_path_delay_ns
                    .get_or_create(&label)
                    .set(delay as i64);
            }
        }
    }
}

pub(crate) async fn serve_req(
    _req: Request<impl Body>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    refresh();

    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &STAT_REGISTRY).unwrap();

    let response = Response::builder()
        .status(200)
        .header(
            CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )
        .body(Full::new(Bytes::from(buffer)))
        .unwrap();

    Ok(response)
}
