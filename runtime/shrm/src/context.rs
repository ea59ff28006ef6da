//! Transport context
//!
//! [`ShrmContext`] owns every piece of AP-side state: the FIFO handles,
//! receive queues, power and boot state machines, and the six worker
//! threads. It is created by [`ShrmContext::attach`] and torn down by
//! [`ShrmContext::detach`] (or drop).
//!
//! Interrupts enter through an [`IrqLine`]. `fire` is phase 1: it decodes
//! the GOP bits and queues work without blocking. Phase 2 runs on the
//! workers:
//!
//! | worker           | work                                            |
//! |------------------|-------------------------------------------------|
//! | `shrm-common-wr` | common FIFO drain, read notifications, doorbell |
//! | `shrm-audio-wr`  | same for the audio FIFO                          |
//! | `shrm-ac-wake`   | raise AC wake request, consume wake acks        |
//! | `shrm-ca-wake`   | CA wake ack and CA sleep, suspend blocker       |
//! | `shrm-ac-sleep`  | idle timer, advisory AC sleep request           |
//! | `shrm-mod-stuck` | modem reset process                             |
//!
//! Lock order: FIFO writer, FIFO reader, stall slot, receive queue.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::boot::{self, BootHandshake, BootInfo, BootState};
use crate::channel::{Channel, Multiplexer, PhysChannel, ReceivedMessage};
use crate::config::ShrmConfig;
use crate::fifo::{FifoReader, FifoWriter};
use crate::frame;
use crate::gop::{Doorbell, GopBits, Irq};
use crate::layout::{invalid, FifoId, SharedSegment};
use crate::power::{AcWake, NoopBlocker, PowerState, SuspendBlocker};
use crate::stats::{ShrmStats, StatsSnapshot};
use crate::worker::{work_queue, Recv, WorkQueue, Worker, WorkerRx};
use crate::{deadline_after, lock, wait_deadline, Result, ShrmError};

const COMMON_WR: &str = "shrm-common-wr";
const AUDIO_WR: &str = "shrm-audio-wr";
const AC_WAKE: &str = "shrm-ac-wake";
const CA_WAKE: &str = "shrm-ca-wake";
const AC_SLEEP: &str = "shrm-ac-sleep";
const MOD_STUCK: &str = "shrm-mod-stuck";

/// Modem state reporting hooks
pub trait MsrCallbacks: Send + Sync {
    /// Link lost; queued messages are about to be discarded
    fn msr_crash(&self) {}

    /// Shared state reinitialised, waiting for a new boot handshake
    fn msr_reinit(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl MsrCallbacks for NoopCallbacks {}

/// Host platform collaborators
#[derive(Clone)]
pub struct PlatformHooks {
    pub blocker: Arc<dyn SuspendBlocker>,
    pub callbacks: Arc<dyn MsrCallbacks>,
}

impl Default for PlatformHooks {
    fn default() -> Self {
        Self {
            blocker: Arc::new(NoopBlocker),
            callbacks: Arc::new(NoopCallbacks),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelWork {
    Drain = 0,
    ReadNotified = 1,
    NotifyPending = 2,
}

#[derive(Debug, Clone, Copy)]
enum AcWakeWork {
    Request,
    Acked,
}

#[derive(Debug, Clone, Copy)]
enum CaWork {
    Wake,
    Sleep,
}

/// Sender dropped its last AC wake reference
struct AcIdle;

#[derive(Debug, Clone, Copy)]
enum ResetCause {
    WakeTimeout,
    ModemRequest,
    HostRequest,
    CorruptFrame(FifoId),
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetCause::WakeTimeout => write!(f, "AC wake not acknowledged"),
            ResetCause::ModemRequest => write!(f, "requested by modem"),
            ResetCause::HostRequest => write!(f, "requested by host"),
            ResetCause::CorruptFrame(fifo) => write!(f, "corrupt frame in {:?} FIFO", fifo),
        }
    }
}

struct Queues {
    channel: [WorkQueue<ChannelWork>; 2],
    ac_wake: WorkQueue<AcWakeWork>,
    ca_wake: WorkQueue<CaWork>,
    ac_sleep: WorkQueue<AcIdle>,
    mod_stuck: WorkQueue<ResetCause>,
}

struct Shared {
    config: ShrmConfig,
    segment: Arc<SharedSegment>,
    /// AC FIFO producers; each mutex is that FIFO's update lock
    writers: [Mutex<FifoWriter>; 2],
    space_freed: [Condvar; 2],
    /// CA FIFO consumers
    readers: [Mutex<FifoReader>; 2],
    /// Channel whose full receive queue stopped the drain
    stalled: [Mutex<Option<Channel>>; 2],
    /// Coalescing flags, indexed by phys channel then work kind
    scheduled: [[AtomicBool; 3]; 2],
    reset_scheduled: AtomicBool,
    attached: AtomicBool,
    mux: Multiplexer,
    power: PowerState,
    boot: BootHandshake,
    doorbell: Arc<dyn Doorbell>,
    hooks: PlatformHooks,
    stats: ShrmStats,
    queues: Queues,
}

impl Shared {
    fn raise(&self, bits: GopBits) {
        trace!("raise {:?}", bits);
        self.doorbell.raise(bits);
    }

    fn handle_irq(&self, irq: Irq) {
        trace!("irq {:?}", irq);
        let queued = match irq {
            Irq::CaWake => self.queues.ca_wake.queue(CaWork::Wake),
            Irq::CaSleep => self.queues.ca_wake.queue(CaWork::Sleep),
            Irq::AcWakeAck => self.queues.ac_wake.queue(AcWakeWork::Acked),
            Irq::AcReadNotification(phys) => self.schedule(phys, ChannelWork::ReadNotified),
            Irq::CaMsgPending(phys) => self.schedule(phys, ChannelWork::Drain),
            Irq::ModemReset => self.schedule_reset(ResetCause::ModemRequest),
        };
        if !queued {
            warn!("dropped {:?}", irq);
        }
    }

    /// Queue channel work unless the same work is already queued
    fn schedule(&self, phys: PhysChannel, work: ChannelWork) -> bool {
        let flag = &self.scheduled[phys as usize][work as usize];
        if flag.swap(true, Ordering::AcqRel) {
            return true;
        }
        if self.queues.channel[phys as usize].queue(work) {
            true
        } else {
            flag.store(false, Ordering::Release);
            false
        }
    }

    fn schedule_reset(&self, cause: ResetCause) -> bool {
        if !self.attached.load(Ordering::Acquire) {
            return false;
        }
        if self.reset_scheduled.swap(true, Ordering::AcqRel) {
            debug!("reset already pending, ignoring: {}", cause);
            return true;
        }
        if self.queues.mod_stuck.queue(cause) {
            true
        } else {
            self.reset_scheduled.store(false, Ordering::Release);
            false
        }
    }

    fn write_locked(&self, writer: &mut FifoWriter, channel: Channel, payload: &[u8]) -> Result<()> {
        let phys = channel.phys();
        if !self.attached.load(Ordering::Acquire) {
            return Err(ShrmError::WorkerStopped(self.queues.channel[phys as usize].name()));
        }
        self.boot.ensure_done()?;

        let pending = frame::write_message(writer, channel.l2(), payload)?;
        let len = writer.commit(pending);
        trace!("{:?}: wrote {} byte frame", channel, len);
        self.stats.record_tx(payload.len());

        // Coalescing keeps at most three items per channel queue, so this
        // only fails once the worker is gone
        if !self.schedule(phys, ChannelWork::NotifyPending) {
            return Err(ShrmError::WorkerStopped(self.queues.channel[phys as usize].name()));
        }
        Ok(())
    }

    fn drain(&self, phys: PhysChannel) {
        match self.boot.state() {
            BootState::Done => self.drain_messages(phys),
            BootState::Init if phys == PhysChannel::Common => self.boot_sync(),
            state => debug!("{:?}: msg pending ignored in boot state {:?}", phys, state),
        }
    }

    fn boot_sync(&self) {
        let request = {
            let mut reader = lock(&self.readers[PhysChannel::Common as usize]);
            match boot::read_boot_info_req(&mut reader) {
                Ok(info) => info,
                Err(ShrmError::InsufficientData { .. }) => return,
                Err(e) => {
                    error!("boot info request: {}", e);
                    self.boot.invalidate();
                    return;
                }
            }
        };
        debug!(
            "boot info request: config={:#04x} version={}",
            request.config, request.version
        );

        let response = match BootInfo::negotiate(
            request,
            self.config.boot_config_mask,
            self.config.protocol_version,
            self.config.min_modem_version,
        ) {
            Ok(info) => info,
            Err(e) => {
                error!("boot handshake failed: {}", e);
                self.boot.invalidate();
                return;
            }
        };

        {
            let mut writer = lock(&self.writers[PhysChannel::Common as usize]);
            if let Err(e) = boot::write_boot_info_resp(&mut writer, response) {
                error!("boot info response: {}", e);
                self.boot.invalidate();
                return;
            }
        }
        if self.boot.info_synced(response) {
            self.raise(GopBits::COMMON_AC_MSG_PENDING_NOTIFICATION);
        }
    }

    fn drain_messages(&self, phys: PhysChannel) {
        let mut reader = lock(&self.readers[phys as usize]);
        let mut unnotified = 0;

        loop {
            let header = match frame::peek_header(&mut reader) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => {
                    error!("{:?}: {}", phys, e);
                    self.schedule_reset(ResetCause::CorruptFrame(reader.id()));
                    return;
                }
            };
            let last = frame::is_the_only_unread_message(&reader, header.frame_len());
            let message = match frame::read_one_message(&mut reader) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    error!("{:?}: {}", phys, e);
                    self.schedule_reset(ResetCause::CorruptFrame(reader.id()));
                    return;
                }
            };

            match message.channel() {
                Ok(channel) => {
                    let mut stalled = lock(&self.stalled[phys as usize]);
                    if stalled.is_some() {
                        reader.rollback();
                        break;
                    }
                    match self.mux.enqueue_received(channel, &message.payload) {
                        Ok(_) => self.stats.record_rx(message.payload.len()),
                        Err(e @ ShrmError::QueueFull { .. }) => {
                            warn!("{:?}: {}, leaving message in the FIFO", phys, e);
                            reader.rollback();
                            *stalled = Some(channel);
                            break;
                        }
                        Err(e) => {
                            warn!("{:?}: dropping message: {}", phys, e);
                            self.stats.record_dropped();
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "{:?}: dropping {} byte message: {}",
                        phys,
                        message.payload.len(),
                        e
                    );
                    self.stats.record_dropped();
                }
            }

            unnotified += reader.commit_read();
            if last {
                self.raise(GopBits::ca_read_notification(phys));
                unnotified = 0;
            }
        }

        if unnotified > 0 {
            self.raise(GopBits::ca_read_notification(phys));
        }
    }

    fn resume_if_stalled(&self, channel: Channel) {
        let phys = channel.phys();
        let mut stalled = lock(&self.stalled[phys as usize]);
        if *stalled == Some(channel) {
            *stalled = None;
            drop(stalled);
            debug!("{:?}: reader caught up, resuming {:?} drain", channel, phys);
            self.schedule(phys, ChannelWork::Drain);
        }
    }

    fn read_notified(&self, phys: PhysChannel) {
        self.stats.record_read_notification();
        {
            let mut writer = lock(&self.writers[phys as usize]);
            let freed = writer.sync_remote();
            trace!("{:?}: modem freed {} bytes", phys, freed);
        }
        self.space_freed[phys as usize].notify_all();

        if phys == PhysChannel::Common && self.boot.complete() {
            // Anything the modem sent straight after booting
            self.schedule(PhysChannel::Common, ChannelWork::Drain);
            self.schedule(PhysChannel::Audio, ChannelWork::Drain);
        }
    }

    /// Wake the modem and tell it new data is waiting
    fn notify_pending(&self, phys: PhysChannel) {
        if self.boot.state() != BootState::Done {
            return;
        }
        match self.power.ac_wake_get() {
            AcWake::Request | AcWake::AwakeViaCa => {
                self.queues.ac_wake.queue(AcWakeWork::Request);
            }
            AcWake::Awake | AcWake::Pending => {}
        }

        let timeout = self.config.ac_wake_timeout();
        let awake = self.power.wait_ac_awake(timeout);
        let idle = self.power.ac_wake_put();
        if awake {
            self.raise(GopBits::ac_msg_pending(phys));
        } else if self.attached.load(Ordering::Acquire) {
            error!("{:?}: modem did not ack wake request within {:?}", phys, timeout);
            self.stats.record_wake_timeout();
            self.schedule_reset(ResetCause::WakeTimeout);
        }
        if idle {
            self.queues.ac_sleep.queue(AcIdle);
        }
    }

    fn ca_wake(&self) {
        if self.power.ca_wake_requested() {
            self.hooks.blocker.acquire();
            self.power.ca_awake();
        }
        self.raise(GopBits::CA_WAKE_ACK);
    }

    fn ca_sleep(&self) {
        if self.power.ca_sleep() {
            self.hooks.blocker.release_after(self.config.wake_lock_release());
        }
    }

    fn reset(&self, cause: ResetCause) {
        error!("modem reset: {}", cause);
        self.boot.invalidate();
        self.hooks.callbacks.msr_crash();

        let dropped = {
            let mut writers: Vec<_> = self.writers.iter().map(lock).collect();
            let mut readers: Vec<_> = self.readers.iter().map(lock).collect();
            let dropped = self.mux.drain_all();
            self.segment.reset();
            writers.iter_mut().for_each(|w| w.reset());
            readers.iter_mut().for_each(|r| r.reset());
            for slot in &self.stalled {
                *lock(slot) = None;
            }
            dropped
        };
        for cv in &self.space_freed {
            cv.notify_all();
        }

        self.power.reset();
        self.boot.restart();
        self.stats.record_reset();
        info!(
            "modem reset complete, {} queued messages discarded, waiting for boot request",
            dropped
        );
        self.hooks.callbacks.msr_reinit();
    }
}

fn run_channel_worker(shared: Arc<Shared>, phys: PhysChannel, rx: WorkerRx<ChannelWork>) {
    while let Some(work) = rx.recv() {
        shared.scheduled[phys as usize][work as usize].store(false, Ordering::Release);
        match work {
            ChannelWork::Drain => shared.drain(phys),
            ChannelWork::ReadNotified => shared.read_notified(phys),
            ChannelWork::NotifyPending => shared.notify_pending(phys),
        }
    }
}

fn run_ac_wake_worker(shared: Arc<Shared>, rx: WorkerRx<AcWakeWork>) {
    while let Some(work) = rx.recv() {
        match work {
            AcWakeWork::Request => shared.raise(GopBits::AC_WAKE_REQ),
            AcWakeWork::Acked => {
                if !shared.power.ac_wake_acked() {
                    debug!("stale AC wake ack");
                }
            }
        }
    }
}

fn run_ca_wake_worker(shared: Arc<Shared>, rx: WorkerRx<CaWork>) {
    while let Some(work) = rx.recv() {
        match work {
            CaWork::Wake => shared.ca_wake(),
            CaWork::Sleep => shared.ca_sleep(),
        }
    }
}

fn run_ac_sleep_worker(shared: Arc<Shared>, rx: WorkerRx<AcIdle>) {
    let idle = shared.config.ac_sleep_idle();
    while rx.recv().is_some() {
        // Restart the timer on every new idle event
        loop {
            match rx.recv_timeout(idle) {
                Recv::Work(AcIdle) => continue,
                Recv::Timeout => break,
                Recv::Stopped => return,
            }
        }
        if shared.power.ac_sleep_if_idle() {
            shared.raise(GopBits::AC_SLEEP_REQ);
        }
    }
}

fn run_mod_stuck_worker(shared: Arc<Shared>, rx: WorkerRx<ResetCause>) {
    while let Some(cause) = rx.recv() {
        shared.reset(cause);
        shared.reset_scheduled.store(false, Ordering::Release);
    }
}

/// Interrupt entry point handed to whatever delivers modem interrupts
#[derive(Clone)]
pub struct IrqLine {
    shared: Weak<Shared>,
}

impl IrqLine {
    /// Phase 1 handler: decode raised bits and queue the work. Never blocks.
    pub fn fire(&self, bits: GopBits) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if !shared.attached.load(Ordering::Acquire) {
            return;
        }
        let foreign = bits.difference(GopBits::MODEM_TO_AP);
        if !foreign.is_empty() {
            warn!("ignoring non-modem GOP bits {:?}", foreign);
        }
        for irq in Irq::from_bits(bits) {
            shared.handle_irq(irq);
        }
    }
}

impl fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqLine")
            .field("attached", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// AP side of one SHRM link
pub struct ShrmContext {
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
}

impl ShrmContext {
    /// Attach with no suspend blocking and no reset callbacks
    pub fn attach(
        config: ShrmConfig,
        segment: Arc<SharedSegment>,
        doorbell: Arc<dyn Doorbell>,
    ) -> Result<Self> {
        Self::attach_with(config, segment, doorbell, PlatformHooks::default())
    }

    /// Take ownership of the AP side of `segment` and start the workers
    ///
    /// # Errors
    /// `InvalidConfig` if the config is invalid or its FIFO sizes do not
    /// match the segment; `Io` if a worker thread cannot be spawned.
    pub fn attach_with(
        config: ShrmConfig,
        segment: Arc<SharedSegment>,
        doorbell: Arc<dyn Doorbell>,
        hooks: PlatformHooks,
    ) -> Result<Self> {
        config.validate()?;
        for (id, size) in [
            (FifoId::AcCommon, config.fifo.ac_common),
            (FifoId::AcAudio, config.fifo.ac_audio),
            (FifoId::CaCommon, config.fifo.ca_common),
            (FifoId::CaAudio, config.fifo.ca_audio),
        ] {
            let actual = segment.fifo(id).capacity();
            if actual != size {
                return Err(invalid(format!(
                    "{:?} FIFO is {} bytes, config says {}",
                    id, actual, size
                )));
            }
        }

        let depth = config.worker_queue_depth;
        let (common_q, common_rx) = work_queue(COMMON_WR, depth);
        let (audio_q, audio_rx) = work_queue(AUDIO_WR, depth);
        let (ac_wake_q, ac_wake_rx) = work_queue(AC_WAKE, depth);
        let (ca_wake_q, ca_wake_rx) = work_queue(CA_WAKE, depth);
        let (ac_sleep_q, ac_sleep_rx) = work_queue(AC_SLEEP, depth);
        let (mod_stuck_q, mod_stuck_rx) = work_queue(MOD_STUCK, depth);

        let shared = Arc::new(Shared {
            writers: PhysChannel::ALL
                .map(|p| Mutex::new(FifoWriter::new(segment.clone(), p.ac_fifo()))),
            readers: PhysChannel::ALL
                .map(|p| Mutex::new(FifoReader::new(segment.clone(), p.ca_fifo()))),
            space_freed: Default::default(),
            stalled: Default::default(),
            scheduled: Default::default(),
            reset_scheduled: AtomicBool::new(false),
            attached: AtomicBool::new(true),
            mux: Multiplexer::new(config.rx_queue_capacity),
            power: PowerState::new(),
            boot: BootHandshake::new(),
            doorbell,
            hooks,
            stats: ShrmStats::new(),
            queues: Queues {
                channel: [common_q, audio_q],
                ac_wake: ac_wake_q,
                ca_wake: ca_wake_q,
                ac_sleep: ac_sleep_q,
                mod_stuck: mod_stuck_q,
            },
            segment,
            config,
        });

        // Already spawned workers are stopped by Drop if a later spawn fails
        let mut workers = Vec::with_capacity(6);
        let s = shared.clone();
        workers.push(Worker::spawn(&shared.queues.channel[0], common_rx, move |rx| {
            run_channel_worker(s, PhysChannel::Common, rx)
        })?);
        let s = shared.clone();
        workers.push(Worker::spawn(&shared.queues.channel[1], audio_rx, move |rx| {
            run_channel_worker(s, PhysChannel::Audio, rx)
        })?);
        let s = shared.clone();
        workers.push(Worker::spawn(&shared.queues.ac_wake, ac_wake_rx, move |rx| {
            run_ac_wake_worker(s, rx)
        })?);
        let s = shared.clone();
        workers.push(Worker::spawn(&shared.queues.ca_wake, ca_wake_rx, move |rx| {
            run_ca_wake_worker(s, rx)
        })?);
        let s = shared.clone();
        workers.push(Worker::spawn(&shared.queues.ac_sleep, ac_sleep_rx, move |rx| {
            run_ac_sleep_worker(s, rx)
        })?);
        let s = shared.clone();
        workers.push(Worker::spawn(&shared.queues.mod_stuck, mod_stuck_rx, move |rx| {
            run_mod_stuck_worker(s, rx)
        })?);

        info!(
            "SHRM attached: {} byte segment, protocol version {}",
            shared.segment.size(),
            shared.config.protocol_version
        );
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Handle for the interrupt source
    pub fn irq_line(&self) -> IrqLine {
        IrqLine {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Deliver raised GOP bits, same as firing the IRQ line
    pub fn handle_gop(&self, bits: GopBits) {
        self.irq_line().fire(bits);
    }

    pub fn config(&self) -> &ShrmConfig {
        &self.shared.config
    }

    pub fn segment(&self) -> &Arc<SharedSegment> {
        &self.shared.segment
    }

    pub fn boot_state(&self) -> BootState {
        self.shared.boot.state()
    }

    /// Parameters agreed in the last boot handshake
    pub fn negotiated(&self) -> Option<BootInfo> {
        self.shared.boot.negotiated()
    }

    pub fn power(&self) -> &PowerState {
        &self.shared.power
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Frame `payload` into the channel's AC FIFO and notify the modem
    ///
    /// The frame is published before this returns; waking the modem and
    /// raising the doorbell happen on the channel's worker.
    ///
    /// # Errors
    /// - `NotReady` before the boot handshake is done
    /// - `InsufficientSpace` if the FIFO cannot take the frame right now
    /// - `PayloadTooLarge` if the frame can never fit
    pub fn write_msg(&self, channel: Channel, payload: &[u8]) -> Result<()> {
        let mut writer = lock(&self.shared.writers[channel.phys() as usize]);
        self.shared.write_locked(&mut writer, channel, payload)
    }

    /// Like [`write_msg`], but waits for read notifications while the FIFO
    /// is full
    ///
    /// [`write_msg`]: ShrmContext::write_msg
    pub fn write_msg_timeout(
        &self,
        channel: Channel,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let phys = channel.phys() as usize;
        let deadline = deadline_after(timeout);
        let mut writer = lock(&self.shared.writers[phys]);
        loop {
            match self.shared.write_locked(&mut writer, channel, payload) {
                Err(ShrmError::InsufficientSpace { .. }) => {}
                result => return result,
            }
            writer = wait_deadline(&self.shared.space_freed[phys], writer, deadline)
                .map_err(|_| ShrmError::Timeout("AC FIFO space"))?;
        }
    }

    /// Oldest received message on `channel`, if any
    pub fn read_message(&self, channel: Channel) -> Option<ReceivedMessage> {
        let message = self.shared.mux.dequeue_received(channel)?;
        self.shared.resume_if_stalled(channel);
        Some(message)
    }

    pub fn read_message_timeout(
        &self,
        channel: Channel,
        timeout: Duration,
    ) -> Option<ReceivedMessage> {
        let message = self.shared.mux.queue(channel).dequeue_timeout(timeout)?;
        self.shared.resume_if_stalled(channel);
        Some(message)
    }

    /// Messages waiting on `channel`
    pub fn pending(&self, channel: Channel) -> usize {
        self.shared.mux.queue(channel).len()
    }

    /// Schedule a full link reset, as if the modem were stuck
    pub fn reset_modem(&self) -> Result<()> {
        if self.shared.schedule_reset(ResetCause::HostRequest) {
            Ok(())
        } else {
            Err(ShrmError::WorkerStopped(MOD_STUCK))
        }
    }

    /// Stop all workers; further traffic fails with `WorkerStopped`
    pub fn detach(&self) {
        if !self.shared.attached.swap(false, Ordering::AcqRel) {
            return;
        }
        // Release the channel workers waiting on a wake ack, and callers
        // waiting for FIFO space
        self.shared.power.reset();
        for (writer, space_freed) in self.shared.writers.iter().zip(&self.shared.space_freed) {
            drop(lock(writer));
            space_freed.notify_all();
        }

        let mut workers = lock(&self.workers);
        for worker in workers.iter_mut() {
            debug!("stopping {}", worker.name());
            worker.stop();
        }
        workers.clear();
        info!("SHRM detached");
    }
}

impl Drop for ShrmContext {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ShrmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShrmContext")
            .field("boot", &self.boot_state())
            .field("ac", &self.shared.power.ac_state())
            .field("ca", &self.shared.power.ca_state())
            .field("attached", &self.shared.attached.load(Ordering::Relaxed))
            .finish()
    }
}
