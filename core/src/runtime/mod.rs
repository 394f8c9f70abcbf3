//! Runtime: the process-global root.
//!
//! Owns per-port interface state, the scheduler pool, PTP slaves, multicast controllers, and the
//! admin controller. Initializes the DPDK environment abstraction layer, creates memory pools,
//! launches the worker schedulers, and drives the monitor loop on the calling thread until
//! stopped (by `ctrl-c`, or the configured run duration).

use crate::admin::AdminController;
use crate::config::RuntimeConfig;
use crate::dpdk;
use crate::error::TransportError;
use crate::lcore::monitor::Monitor;
use crate::lcore::scheduler::{Scheduler, TaskletId};
use crate::lcore::{CoreId, SocketId};
use crate::memory::mempool::Mempool;
use crate::multicast::{MulticastController, MulticastTasklet};
use crate::port::queue_adapter::{NicPacketSink, NicPacketSource};
use crate::port::ratelimit::{self, RateLimitHierarchy};
use crate::port::{Port, PortId};
use crate::ptp::{PtpSlave, PtpTasklet};
use crate::session::queue::{PacketSink, PacketSource};
use crate::session::{
    redundancy, rx_ancillary, rx_audio, rx_fastmetadata, rx_video, tx_ancillary, tx_audio,
    tx_fastmetadata, tx_video, Session, SessionId, SessionTasklet,
};

use std::collections::{BTreeMap, HashMap};
use std::ffi::CString;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

/// The transport runtime.
///
/// ```no_run
/// use mtlrs_core::config::default_config;
/// use mtlrs_core::Runtime;
///
/// let cfg = default_config();
/// let mut runtime = Runtime::new(cfg).expect("failed to initialize runtime");
/// runtime.run();
/// ```
pub struct Runtime {
    config: RuntimeConfig,
    #[allow(dead_code)]
    mempools: BTreeMap<SocketId, Mempool>,
    ports: BTreeMap<PortId, Arc<Port>>,
    ports_by_device: HashMap<String, PortId>,
    port_cores: BTreeMap<PortId, Vec<CoreId>>,
    ptp: HashMap<PortId, Arc<PtpSlave>>,
    multicast: HashMap<PortId, Arc<MulticastController>>,
    schedulers: Vec<Arc<Scheduler>>,
    schedulers_by_core: HashMap<CoreId, Arc<Scheduler>>,
    rr: Mutex<HashMap<PortId, usize>>,
    ratelimits: HashMap<PortId, Mutex<RateLimitHierarchy>>,
    admin: Arc<AdminController>,
    next_session_id: AtomicU64,
    is_running: Arc<AtomicBool>,
    /// Set for the duration of a `reset_port` call, so other control-plane entry points can
    /// observe that a port's hardware state is mid-teardown.
    in_reset: AtomicBool,
}

impl Runtime {
    /// Initializes the EAL, mempools, ports, PTP slaves, multicast controllers, and scheduler
    /// pool from `config`. Does not start any traffic; call [`Runtime::run`] for that.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        println!("Initializing runtime...");
        log::info!("Initializing EAL...");
        dpdk::load_drivers();
        {
            let eal_params = config.get_eal_params();
            let eal_params_len = eal_params.len() as i32;

            let mut args = vec![];
            let mut ptrs = vec![];
            for arg in eal_params.into_iter() {
                let s = CString::new(arg).unwrap();
                ptrs.push(s.as_ptr() as *mut u8);
                args.push(s);
            }

            let ret = unsafe { dpdk::rte_eal_init(eal_params_len, ptrs.as_ptr() as *mut _) };
            if ret < 0 {
                bail!("Failure initializing EAL");
            }
        }

        log::info!("Initializing mempools...");
        let mut mempools = BTreeMap::new();
        for socket_id in config.get_all_socket_ids() {
            log::debug!("Socket ID: {}", socket_id);
            let mempool = Mempool::new(&config.mempool, socket_id, config.online.mtu)?;
            mempools.insert(socket_id, mempool);
        }

        log::info!("Initializing ports...");
        let mut ports = BTreeMap::new();
        let mut ports_by_device = HashMap::new();
        let mut port_cores = BTreeMap::new();
        for port_map in config.online.ports.iter() {
            let port = Port::new(port_map);
            let socket_id = port.id.socket_id();
            mempools.entry(socket_id).or_insert_with(|| {
                Mempool::new(&config.mempool, socket_id, config.online.mtu)
                    .expect("unable to initialize local mempool")
            });
            port.init(
                &mut mempools,
                config.online.nb_rxd,
                config.online.nb_txd,
                config.online.mtu,
                config.online.promiscuous,
            )?;
            let mut cores: Vec<CoreId> = port_map.cores.iter().map(|c| CoreId(*c)).collect();
            cores.sort_unstable();
            cores.dedup();
            ports_by_device.insert(port_map.device.clone(), port.id);
            port_cores.insert(port.id, cores);
            ports.insert(port.id, Arc::new(port));
        }

        log::info!("Initializing per-port rate-limit hierarchies...");
        let mut ratelimits = HashMap::new();
        for (port_id, port) in ports.iter() {
            let mut hierarchy = RateLimitHierarchy::new(*port_id);
            for queue in 0..port.nb_tx_queues() {
                hierarchy.stage_queue_limit(queue, ratelimit::BASELINE_BPS);
            }
            if let Err(e) = hierarchy.commit() {
                log::warn!(
                    "port {}: baseline rate-limit hierarchy rejected ({}), TX sessions will pace in software",
                    port_id,
                    e
                );
            }
            ratelimits.insert(*port_id, Mutex::new(hierarchy));
        }

        log::info!("Initializing scheduler pool...");
        let mut schedulers = Vec::new();
        let mut schedulers_by_core = HashMap::new();
        for core_id in config.get_all_core_ids() {
            if core_id.raw() == config.main_core {
                continue;
            }
            let scheduler = Scheduler::new(config.scheduler.clone(), core_id);
            schedulers_by_core.insert(core_id, Arc::clone(&scheduler));
            schedulers.push(scheduler);
        }
        if schedulers.is_empty() {
            bail!("no worker cores configured (every port core equals main_core)");
        }

        log::info!("Initializing PTP slaves and multicast controllers...");
        let mut ptp = HashMap::new();
        let mut multicast = HashMap::new();
        for (port_id, cores) in port_cores.iter() {
            let slave = Arc::new(PtpSlave::new(config.ptp.clone()));
            let scheduler = schedulers_by_core
                .get(&cores[0])
                .expect("port core has an assigned scheduler");
            scheduler.register_tasklet(Box::new(PtpTasklet::new(
                format!("ptp-{}", port_id),
                Arc::clone(&slave),
            )))?;
            ptp.insert(*port_id, slave);

            let mcast = Arc::new(MulticastController::new(config.multicast.clone()));
            scheduler.register_tasklet(Box::new(MulticastTasklet::new(
                format!("multicast-{}", port_id),
                Arc::clone(&mcast),
            )))?;
            multicast.insert(*port_id, mcast);
        }

        let admin = AdminController::new(config.admin.clone(), schedulers.clone());
        let is_running = Arc::new(AtomicBool::new(true));
        {
            let flag = Arc::clone(&is_running);
            ctrlc::set_handler(move || {
                flag.store(false, Ordering::Relaxed);
            })
            .expect("error setting ctrl-c handler");
        }

        log::info!("Runtime ready.");
        Ok(Runtime {
            config,
            mempools,
            ports,
            ports_by_device,
            port_cores,
            ptp,
            multicast,
            schedulers,
            schedulers_by_core,
            rr: Mutex::new(HashMap::new()),
            ratelimits,
            admin,
            next_session_id: AtomicU64::new(1),
            is_running,
            in_reset: AtomicBool::new(false),
        })
    }

    /// Starts ports and schedulers and runs the monitor loop on the calling thread until stopped
    /// by `ctrl-c` or the configured run duration.
    pub fn run(&mut self) {
        log::info!("Starting ports...");
        for port in self.ports.values() {
            port.start();
        }

        log::info!("Starting schedulers...");
        for scheduler in &self.schedulers {
            if let Err(e) = scheduler.start() {
                log::error!("failed to start scheduler on core {}: {}", scheduler.core(), e);
            }
        }
        self.admin.start();

        let schedulers = self.schedulers.clone();
        let snapshot = Arc::new(move || {
            schedulers
                .iter()
                .flat_map(|s| s.session_snapshots())
                .collect()
        });

        #[cfg(feature = "prometheus")]
        {
            let schedulers = self.schedulers.clone();
            crate::stats::set_session_source(move || {
                schedulers
                    .iter()
                    .flat_map(|s| s.session_snapshots())
                    .collect()
            });
            let device_by_port: HashMap<PortId, String> = self
                .ports_by_device
                .iter()
                .map(|(device, port_id)| (*port_id, device.clone()))
                .collect();
            let ptp_by_port = self.ptp.clone();
            crate::stats::set_ptp_source(move || {
                device_by_port
                    .iter()
                    .filter_map(|(port_id, device)| {
                        let slave = ptp_by_port.get(port_id)?;
                        let (offset, delay) = match slave.delta_stats_ns() {
                            Some((offset, delay, _)) => (Some(offset), Some(delay)),
                            None => (None, None),
                        };
                        Some((device.clone(), slave.is_locked(), offset, delay))
                    })
                    .collect()
            });
        }

        let port_ids: Vec<PortId> = self.ports.keys().copied().collect();
        let ptp = port_ids.first().and_then(|p| self.ptp.get(p)).cloned();

        let mut monitor = Monitor::new(&self.config, port_ids, snapshot, ptp, Arc::clone(&self.is_running));
        monitor.run();

        log::info!("Stopping...");
        self.admin.stop();
        for scheduler in &self.schedulers {
            scheduler.stop();
        }
        for port in self.ports.values() {
            port.stop();
        }
        log::info!("Done.");
    }

    fn port_by_device(&self, device: &str) -> Result<Arc<Port>, TransportError> {
        let port_id = self.ports_by_device.get(device).ok_or_else(|| {
            TransportError::InvalidArgument(format!("no port configured for device {}", device))
        })?;
        Ok(Arc::clone(&self.ports[port_id]))
    }

    fn next_core_for_port(&self, port_id: PortId) -> CoreId {
        let cores = &self.port_cores[&port_id];
        let mut rr = self.rr.lock().unwrap();
        let idx = rr.entry(port_id).or_insert(0);
        let core = cores[*idx % cores.len()];
        *idx = idx.wrapping_add(1);
        core
    }

    fn scheduler_for_core(&self, core: CoreId) -> Arc<Scheduler> {
        Arc::clone(&self.schedulers_by_core[&core])
    }

    /// Acquires a free TX queue on `device` and stages `target_bps` (or the baseline rate if
    /// unset) onto its hardware shaper. A rejected commit is logged and left to the session's own
    /// TSC-pacing fallback rather than failing the whole call.
    fn tx_queue(
        &self,
        device: &str,
        target_bps: Option<u64>,
    ) -> Result<(Box<dyn PacketSink>, Arc<Scheduler>), TransportError> {
        let port = self.port_by_device(device)?;
        let queue_id = port.acquire_tx_queue()?;
        if let Some(hierarchy) = self.ratelimits.get(&port.id) {
            let mut hierarchy = hierarchy.lock().unwrap();
            hierarchy.stage_queue_limit(queue_id, target_bps.unwrap_or(ratelimit::BASELINE_BPS));
            if let Err(e) = hierarchy.commit() {
                log::warn!(
                    "port {} queue {}: rate-limit commit rejected ({}), falling back to software pacing",
                    port.id,
                    queue_id,
                    e
                );
            }
        }
        let mempool_ptr = self
            .mempools
            .get(&port.id.socket_id())
            .ok_or_else(|| TransportError::Fatal(format!("no mempool for port {}", port.id)))?
            .as_ptr();
        let sink: Box<dyn PacketSink> = Box::new(NicPacketSink::new(port.id, queue_id, mempool_ptr));
        let core = self.next_core_for_port(port.id);
        Ok((sink, self.scheduler_for_core(core)))
    }

    /// Stops, reconfigures, and restarts `device`'s port after a link bounce, replaying its
    /// rate-limit hierarchy and re-announcing any joined multicast groups once it's back up.
    /// Existing sessions and their TX/RX queue ownership are left in place; only the hardware
    /// state underneath them is torn down and rebuilt.
    pub fn reset_port(&mut self, device: &str) -> Result<(), TransportError> {
        self.in_reset.store(true, Ordering::SeqCst);
        let result = self.reset_port_inner(device);
        self.in_reset.store(false, Ordering::SeqCst);
        result
    }

    fn reset_port_inner(&mut self, device: &str) -> Result<(), TransportError> {
        let port = self.port_by_device(device)?;
        log::warn!("port {} ({}): resetting after link bounce", port.id, device);
        port.reset(
            &mut self.mempools,
            self.config.online.nb_rxd,
            self.config.online.nb_txd,
            self.config.online.mtu,
            self.config.online.promiscuous,
        )
        .map_err(|e| TransportError::Fatal(format!("port {} reset failed: {}", port.id, e)))?;

        if let Some(hierarchy) = self.ratelimits.get(&port.id) {
            let mut hierarchy = hierarchy.lock().unwrap();
            if let Err(e) = hierarchy.replay() {
                log::warn!(
                    "port {}: rate-limit hierarchy replay rejected after reset ({}), TX sessions will pace in software",
                    port.id,
                    e
                );
            }
        }
        if let Some(mcast) = self.multicast.get(&port.id) {
            mcast.restore_after_reset();
        }
        log::info!("port {} ({}): reset complete", port.id, device);
        Ok(())
    }

    /// Whether a `reset_port` call is currently tearing down and rebuilding a port's hardware
    /// state.
    pub fn is_in_reset(&self) -> bool {
        self.in_reset.load(Ordering::SeqCst)
    }

    fn rx_queue(&self, device: &str) -> Result<(Box<dyn PacketSource>, Arc<Scheduler>), TransportError> {
        let port = self.port_by_device(device)?;
        let mut rr = self.rr.lock().unwrap();
        let queues = port.rx_queues();
        if queues.is_empty() {
            return Err(TransportError::ResourceExhausted(format!(
                "port {} has no RX queues",
                port.id
            )));
        }
        let idx = rr.entry(port.id).or_insert(0);
        let (queue_id, core) = queues[*idx % queues.len()];
        *idx = idx.wrapping_add(1);
        drop(rr);
        let ptp = self.ptp.get(&port.id).cloned();
        let source: Box<dyn PacketSource> = Box::new(NicPacketSource::new(port.id, queue_id.raw(), ptp));
        Ok((source, self.scheduler_for_core(core)))
    }

    fn register_session(&self, session: Session, scheduler: &Arc<Scheduler>) -> Result<SessionId, TransportError> {
        let id = session.id();
        let tasklet_id: TaskletId = scheduler.register_tasklet(Box::new(SessionTasklet::new(session)))?;
        let idx = self
            .schedulers
            .iter()
            .position(|s| Arc::ptr_eq(s, scheduler))
            .expect("scheduler belongs to this runtime");
        self.admin.track(id, idx, tasklet_id);
        Ok(id)
    }

    fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates an ST 2110-20 transmit session on `device`, and if `redundant_device` is set, a
    /// second transmit path for ST 2022-7 redundancy.
    pub fn create_tx_video_session(
        &self,
        device: &str,
        redundant_device: Option<&str>,
        target_bps: Option<u64>,
        cfg: tx_video::TxVideoConfig,
    ) -> Result<SessionId, TransportError> {
        let (primary, scheduler) = self.tx_queue(device, target_bps)?;
        let secondary = redundant_device
            .map(|dev| self.tx_queue(dev, target_bps))
            .transpose()?
            .map(|(s, _)| s);
        let id = self.next_session_id();
        let session = Session::TxVideo(tx_video::TxVideoSession::new(id, cfg, primary, secondary));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2110-30 transmit session on `device`.
    pub fn create_tx_audio_session(
        &self,
        device: &str,
        target_bps: Option<u64>,
        cfg: tx_audio::TxAudioConfig,
    ) -> Result<SessionId, TransportError> {
        let (sink, scheduler) = self.tx_queue(device, target_bps)?;
        let id = self.next_session_id();
        let session = Session::TxAudio(tx_audio::TxAudioSession::new(id, cfg, sink));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2110-40 transmit session on `device`, and if `redundant_device` is set, a
    /// second transmit path for ST 2022-7 redundancy.
    pub fn create_tx_ancillary_session(
        &self,
        device: &str,
        redundant_device: Option<&str>,
        target_bps: Option<u64>,
        cfg: tx_ancillary::TxAncillaryConfig,
    ) -> Result<SessionId, TransportError> {
        let (sink, scheduler) = self.tx_queue(device, target_bps)?;
        let secondary = redundant_device
            .map(|dev| self.tx_queue(dev, target_bps))
            .transpose()?
            .map(|(s, _)| s);
        let id = self.next_session_id();
        let session = Session::TxAncillary(tx_ancillary::TxAncillarySession::new(id, cfg, sink, secondary));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2110-41 transmit session on `device`.
    pub fn create_tx_fastmetadata_session(
        &self,
        device: &str,
        target_bps: Option<u64>,
        cfg: tx_fastmetadata::TxFastMetadataConfig,
    ) -> Result<SessionId, TransportError> {
        let (sink, scheduler) = self.tx_queue(device, target_bps)?;
        let id = self.next_session_id();
        let session =
            Session::TxFastMetadata(tx_fastmetadata::TxFastMetadataSession::new(id, cfg).with_sink(sink));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2110-20 receive session on `device`.
    pub fn create_rx_video_session(
        &self,
        device: &str,
        cfg: rx_video::RxVideoConfig,
    ) -> Result<SessionId, TransportError> {
        let (source, scheduler) = self.rx_queue(device)?;
        let id = self.next_session_id();
        let session = Session::RxVideo(rx_video::RxVideoSession::new(id, cfg, source));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2110-30 receive session on `device`.
    pub fn create_rx_audio_session(
        &self,
        device: &str,
        cfg: rx_audio::RxAudioConfig,
    ) -> Result<SessionId, TransportError> {
        let (source, scheduler) = self.rx_queue(device)?;
        let id = self.next_session_id();
        let session = Session::RxAudio(rx_audio::RxAudioSession::new(id, cfg, source));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2110-40 receive session on `device`.
    pub fn create_rx_ancillary_session(
        &self,
        device: &str,
        cfg: rx_ancillary::RxAncillaryConfig,
    ) -> Result<SessionId, TransportError> {
        let (source, scheduler) = self.rx_queue(device)?;
        let id = self.next_session_id();
        let session = Session::RxAncillary(rx_ancillary::RxAncillarySession::new(id, cfg, source));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2110-41 receive session on `device`.
    pub fn create_rx_fastmetadata_session(
        &self,
        device: &str,
        cfg: rx_fastmetadata::RxFastMetadataConfig,
    ) -> Result<SessionId, TransportError> {
        let (source, scheduler) = self.rx_queue(device)?;
        let id = self.next_session_id();
        let session = Session::RxFastMetadata(rx_fastmetadata::RxFastMetadataSession::new(id, cfg, source));
        self.register_session(session, &scheduler)
    }

    /// Creates an ST 2022-7 redundant receive session merging a primary path on `primary_device`
    /// with a secondary path on `secondary_device`.
    pub fn create_rx_redundant_session(
        &self,
        primary_device: &str,
        primary_cfg: rx_video::RxVideoConfig,
        secondary_device: &str,
        secondary_cfg: rx_video::RxVideoConfig,
    ) -> Result<SessionId, TransportError> {
        let (primary_source, scheduler) = self.rx_queue(primary_device)?;
        let (secondary_source, _) = self.rx_queue(secondary_device)?;
        let primary = rx_video::RxVideoSession::new(SessionId(0), primary_cfg, primary_source);
        let secondary = rx_video::RxVideoSession::new(SessionId(0), secondary_cfg, secondary_source);
        let id = self.next_session_id();
        let redundancy_cfg = redundancy::RedundancyConfig {
            reorder_window_ns: (self.config.redundancy.reorder_window_ms as i128) * 1_000_000,
        };
        let session = Session::RxRedundant(redundancy::RedundantSession::new(id, redundancy_cfg, primary, secondary));
        self.register_session(session, &scheduler)
    }

    /// Joins a multicast `group` on `device`'s RX path.
    pub fn join_multicast_group(&self, device: &str, group: Ipv4Addr) -> Result<(), TransportError> {
        let port = self.port_by_device(device)?;
        let mcast = self.multicast.get(&port.id).ok_or_else(|| {
            TransportError::Fatal(format!("no multicast controller for port {}", port.id))
        })?;
        mcast.join(group)?;
        Ok(())
    }

    /// Leaves a multicast `group` previously joined on `device`.
    pub fn leave_multicast_group(&self, device: &str, group: Ipv4Addr) -> Result<(), TransportError> {
        let port = self.port_by_device(device)?;
        if let Some(mcast) = self.multicast.get(&port.id) {
            mcast.leave(group);
        }
        Ok(())
    }
}
