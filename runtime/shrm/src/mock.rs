//! Software modem peer
//!
//! Plays the CMT side of the protocol over the same [`SharedSegment`] as a
//! [`ShrmContext`](crate::ShrmContext): it writes the CA FIFOs, reads the
//! AC FIFOs, answers the AP's doorbells and fires the AP's interrupt line.
//! Used by the integration tests and the `shrm-loop` tool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::boot::{self, BootInfo};
use crate::channel::{Channel, PhysChannel};
use crate::context::IrqLine;
use crate::fifo::{FifoReader, FifoWriter};
use crate::frame::{self, Message};
use crate::gop::{Doorbell, GopBits, GopRegister};
use crate::layout::SharedSegment;
use crate::{deadline_after, lock, wait_deadline, Result};

const POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct ModemState {
    booted: Option<BootInfo>,
    inbox: VecDeque<Message>,
}

struct ModemInner {
    /// CA FIFO producers
    tx: [Mutex<FifoWriter>; 2],
    /// AC FIFO consumers
    rx: [Mutex<FifoReader>; 2],
    /// Bits raised by the AP and not yet serviced
    gop: GopRegister,
    /// Every bit the AP ever raised, until cleared
    history: Mutex<GopBits>,
    raised: Condvar,
    irq: Mutex<Option<IrqLine>>,
    auto_ack: AtomicBool,
    echo: AtomicBool,
    ca_wake_requested: AtomicBool,
    running: AtomicBool,
    state: Mutex<ModemState>,
    state_changed: Condvar,
}

impl ModemInner {
    fn fire(&self, bits: GopBits) {
        let irq = lock(&self.irq).clone();
        match irq {
            Some(irq) => irq.fire(bits),
            None => debug!("mock modem: not connected, dropping {:?}", bits),
        }
    }

    fn raised_by_ap(&self, bits: GopBits) {
        self.gop.set(bits);
        *lock(&self.history) |= bits;
        self.raised.notify_all();
    }

    fn service(&self) -> GopBits {
        let bits = self.gop.take(GopBits::AP_TO_MODEM);
        if bits.contains(GopBits::AC_WAKE_REQ) && self.auto_ack.load(Ordering::Acquire) {
            self.fire(GopBits::AC_WAKE_ACK);
        }
        for phys in PhysChannel::ALL {
            if bits.contains(GopBits::ca_read_notification(phys)) {
                lock(&self.tx[phys as usize]).sync_remote();
            }
            if bits.contains(GopBits::ac_msg_pending(phys)) {
                self.receive(phys);
            }
        }
        bits
    }

    fn receive(&self, phys: PhysChannel) {
        let mut reader = lock(&self.rx[phys as usize]);
        let mut received = Vec::new();

        if phys == PhysChannel::Common && lock(&self.state).booted.is_none() {
            match boot::read_boot_info_resp(&mut reader) {
                Ok(info) => {
                    debug!("mock modem: booted, config={:#04x} version={}", info.config, info.version);
                    lock(&self.state).booted = Some(info);
                }
                Err(e) => {
                    warn!("mock modem: no boot response: {}", e);
                    return;
                }
            }
        }

        loop {
            match frame::read_one_message(&mut reader) {
                Ok(Some(message)) => received.push(message),
                Ok(None) => break,
                Err(e) => {
                    warn!("mock modem: {}", e);
                    break;
                }
            }
        }
        reader.commit_read();
        drop(reader);
        self.fire(GopBits::ac_read_notification(phys));

        if self.echo.load(Ordering::Acquire) {
            for message in received {
                if let Err(e) = self.send(message.l2, &message.payload) {
                    warn!("mock modem: echo of {} bytes failed: {}", message.payload.len(), e);
                }
            }
        } else if !received.is_empty() {
            lock(&self.state).inbox.extend(received);
        }
        self.state_changed.notify_all();
    }

    fn send(&self, l2: u8, payload: &[u8]) -> Result<()> {
        let phys = Channel::try_from(l2)
            .map(Channel::phys)
            .unwrap_or(PhysChannel::Common);
        {
            let mut writer = lock(&self.tx[phys as usize]);
            let pending = frame::write_message(&mut writer, l2, payload)?;
            writer.commit(pending);
        }

        let mut bits = GopBits::ca_msg_pending(phys);
        if !self.ca_wake_requested.swap(true, Ordering::AcqRel) {
            bits |= GopBits::CA_WAKE_REQ;
        }
        self.fire(bits);
        Ok(())
    }

    fn run(&self) {
        while self.running.load(Ordering::Acquire) {
            if self.service().is_empty() {
                let history = lock(&self.history);
                if self.gop.output().intersects(GopBits::AP_TO_MODEM) {
                    continue;
                }
                drop(
                    self.raised
                        .wait_timeout(history, POLL)
                        .unwrap_or_else(|poisoned| poisoned.into_inner()),
                );
            }
        }
    }

    fn wait_state<T>(
        &self,
        timeout: Duration,
        mut probe: impl FnMut(&mut ModemState) -> Option<T>,
    ) -> Option<T> {
        let deadline = deadline_after(timeout);
        let mut state: MutexGuard<'_, ModemState> = lock(&self.state);
        loop {
            if let Some(value) = probe(&mut state) {
                return Some(value);
            }
            state = wait_deadline(&self.state_changed, state, deadline).ok()?;
        }
    }
}

struct MockDoorbell(Arc<ModemInner>);

impl Doorbell for MockDoorbell {
    fn raise(&self, bits: GopBits) {
        self.0.raised_by_ap(bits);
    }
}

/// The modem end of a SHRM link
pub struct MockModem {
    inner: Arc<ModemInner>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl MockModem {
    pub fn new(segment: Arc<SharedSegment>) -> Self {
        let inner = ModemInner {
            tx: PhysChannel::ALL.map(|p| Mutex::new(FifoWriter::new(segment.clone(), p.ca_fifo()))),
            rx: PhysChannel::ALL.map(|p| Mutex::new(FifoReader::new(segment.clone(), p.ac_fifo()))),
            gop: GopRegister::new(),
            history: Mutex::new(GopBits::empty()),
            raised: Condvar::new(),
            irq: Mutex::new(None),
            auto_ack: AtomicBool::new(true),
            echo: AtomicBool::new(false),
            ca_wake_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            state: Mutex::new(ModemState::default()),
            state_changed: Condvar::new(),
        };
        Self {
            inner: Arc::new(inner),
            runner: Mutex::new(None),
        }
    }

    /// Doorbell to hand to the AP context
    pub fn doorbell(&self) -> Arc<dyn Doorbell> {
        Arc::new(MockDoorbell(self.inner.clone()))
    }

    /// Route modem interrupts to the AP
    pub fn connect(&self, irq: IrqLine) {
        *lock(&self.inner.irq) = Some(irq);
    }

    /// Whether AC wake requests are acknowledged (default true)
    pub fn set_auto_ack(&self, enabled: bool) {
        self.inner.auto_ack.store(enabled, Ordering::Release);
    }

    /// Loop every received message back on its channel instead of keeping it
    pub fn set_echo(&self, enabled: bool) {
        self.inner.echo.store(enabled, Ordering::Release);
    }

    /// Service doorbells on a background thread until [`stop`](MockModem::stop)
    pub fn start(&self) -> Result<()> {
        let mut runner = lock(&self.runner);
        if runner.is_some() {
            return Ok(());
        }
        self.inner.running.store(true, Ordering::Release);
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("shrm-mock-modem".to_string())
            .spawn(move || inner.run())?;
        *runner = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.raised.notify_all();
        if let Some(handle) = lock(&self.runner).take() {
            if handle.join().is_err() {
                warn!("mock modem thread panicked");
            }
        }
    }

    /// Handle whatever the AP raised since the last call
    ///
    /// For tests that drive the modem by hand instead of calling
    /// [`start`](MockModem::start). Returns the bits serviced.
    pub fn service(&self) -> GopBits {
        self.inner.service()
    }

    /// Put a boot info request in the CA common FIFO and signal it
    pub fn send_boot_request(&self, info: BootInfo) -> Result<()> {
        {
            let mut writer = lock(&self.inner.tx[PhysChannel::Common as usize]);
            boot::write_boot_info_req(&mut writer, info)?;
        }
        self.inner.fire(GopBits::COMMON_CA_MSG_PENDING_NOTIFICATION);
        Ok(())
    }

    pub fn send(&self, channel: Channel, payload: &[u8]) -> Result<()> {
        self.inner.send(channel.l2(), payload)
    }

    /// Send with an arbitrary L2 header, routed over the common FIFO when
    /// the header is unknown
    pub fn send_raw(&self, l2: u8, payload: &[u8]) -> Result<()> {
        self.inner.send(l2, payload)
    }

    /// Release the AP (CA sleep request)
    pub fn release_ap(&self) {
        if self.inner.ca_wake_requested.swap(false, Ordering::AcqRel) {
            self.inner.fire(GopBits::CA_SLEEP_REQ);
        }
    }

    /// Ask the AP to reset the link
    pub fn request_reset(&self) {
        self.inner.fire(GopBits::MODEM_RESET_REQ);
    }

    /// Forget all local state after the AP reset the segment
    pub fn restart(&self) {
        for writer in &self.inner.tx {
            lock(writer).reset();
        }
        for reader in &self.inner.rx {
            lock(reader).reset();
        }
        self.inner.gop.clear(GopBits::all());
        self.inner.ca_wake_requested.store(false, Ordering::Release);
        *lock(&self.inner.state) = ModemState::default();
    }

    /// Parameters from the AP's boot response, once received
    pub fn booted(&self) -> Option<BootInfo> {
        lock(&self.inner.state).booted
    }

    pub fn wait_booted(&self, timeout: Duration) -> Option<BootInfo> {
        self.inner.wait_state(timeout, |state| state.booted)
    }

    /// Next message the AP sent, waiting up to `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        self.inner.wait_state(timeout, |state| state.inbox.pop_front())
    }

    /// Every bit the AP raised since the last [`clear_history`](MockModem::clear_history)
    pub fn history(&self) -> GopBits {
        *lock(&self.inner.history)
    }

    pub fn clear_history(&self) {
        *lock(&self.inner.history) = GopBits::empty();
    }

    /// Wait until the AP has raised every bit in `bits`
    pub fn wait_for(&self, bits: GopBits, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut history = lock(&self.inner.history);
        loop {
            if history.contains(bits) {
                return true;
            }
            history = match wait_deadline(&self.inner.raised, history, deadline) {
                Ok(history) => history,
                Err(_) => return false,
            };
        }
    }
}

impl Drop for MockModem {
    fn drop(&mut self) {
        self.stop();
    }
}
