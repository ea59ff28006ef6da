//! GOP doorbell register and interrupt decoding
//!
//! The general output (GOP) register is used purely as a cross-processor
//! doorbell: setting a bit raises an interrupt on the other processor,
//! whose handler clears it. The register exposes the usual quartet:
//! output (read), set, clear and toggle.

use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, Ordering};
use static_assertions::const_assert_eq;

use crate::channel::PhysChannel;

bitflags! {
    /// Doorbell bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GopBits: u32 {
        // Raised by the modem towards the AP
        const AUDIO_AC_READ_NOTIFICATION = 1 << 0;
        const AUDIO_CA_MSG_PENDING_NOTIFICATION = 1 << 1;
        const COMMON_AC_READ_NOTIFICATION = 1 << 2;
        const COMMON_CA_MSG_PENDING_NOTIFICATION = 1 << 3;
        const AC_WAKE_ACK = 1 << 4;
        const CA_SLEEP_REQ = 1 << 5;
        const MODEM_RESET_REQ = 1 << 6;
        const CA_WAKE_REQ = 1 << 27;

        // Raised by the AP towards the modem
        const CA_WAKE_ACK = 1 << 7;
        const AUDIO_CA_READ_NOTIFICATION = 1 << 23;
        const AUDIO_AC_MSG_PENDING_NOTIFICATION = 1 << 24;
        const COMMON_CA_READ_NOTIFICATION = 1 << 25;
        const COMMON_AC_MSG_PENDING_NOTIFICATION = 1 << 26;
        const AC_WAKE_REQ = 1 << 28;
        const AC_SLEEP_REQ = 1 << 29;
    }
}

impl GopBits {
    /// Every bit the modem may raise towards the AP
    pub const MODEM_TO_AP: GopBits = GopBits::AUDIO_AC_READ_NOTIFICATION
        .union(GopBits::AUDIO_CA_MSG_PENDING_NOTIFICATION)
        .union(GopBits::COMMON_AC_READ_NOTIFICATION)
        .union(GopBits::COMMON_CA_MSG_PENDING_NOTIFICATION)
        .union(GopBits::AC_WAKE_ACK)
        .union(GopBits::CA_SLEEP_REQ)
        .union(GopBits::MODEM_RESET_REQ)
        .union(GopBits::CA_WAKE_REQ);

    /// Every bit the AP may raise towards the modem
    pub const AP_TO_MODEM: GopBits = GopBits::CA_WAKE_ACK
        .union(GopBits::AUDIO_CA_READ_NOTIFICATION)
        .union(GopBits::AUDIO_AC_MSG_PENDING_NOTIFICATION)
        .union(GopBits::COMMON_CA_READ_NOTIFICATION)
        .union(GopBits::COMMON_AC_MSG_PENDING_NOTIFICATION)
        .union(GopBits::AC_WAKE_REQ)
        .union(GopBits::AC_SLEEP_REQ);

    /// AP → modem "new data in the AC FIFO"
    pub fn ac_msg_pending(phys: PhysChannel) -> GopBits {
        match phys {
            PhysChannel::Common => GopBits::COMMON_AC_MSG_PENDING_NOTIFICATION,
            PhysChannel::Audio => GopBits::AUDIO_AC_MSG_PENDING_NOTIFICATION,
        }
    }

    /// AP → modem "space freed in the CA FIFO"
    pub fn ca_read_notification(phys: PhysChannel) -> GopBits {
        match phys {
            PhysChannel::Common => GopBits::COMMON_CA_READ_NOTIFICATION,
            PhysChannel::Audio => GopBits::AUDIO_CA_READ_NOTIFICATION,
        }
    }

    /// Modem → AP "new data in the CA FIFO"
    pub fn ca_msg_pending(phys: PhysChannel) -> GopBits {
        match phys {
            PhysChannel::Common => GopBits::COMMON_CA_MSG_PENDING_NOTIFICATION,
            PhysChannel::Audio => GopBits::AUDIO_CA_MSG_PENDING_NOTIFICATION,
        }
    }

    /// Modem → AP "space freed in the AC FIFO"
    pub fn ac_read_notification(phys: PhysChannel) -> GopBits {
        match phys {
            PhysChannel::Common => GopBits::COMMON_AC_READ_NOTIFICATION,
            PhysChannel::Audio => GopBits::AUDIO_AC_READ_NOTIFICATION,
        }
    }
}

const_assert_eq!(GopBits::MODEM_TO_AP.bits() & GopBits::AP_TO_MODEM.bits(), 0);

/// Modeled GOP register
#[derive(Debug, Default)]
pub struct GopRegister {
    output: AtomicU32,
}

impl GopRegister {
    pub const fn new() -> Self {
        Self {
            output: AtomicU32::new(0),
        }
    }

    /// Current output value
    pub fn output(&self) -> GopBits {
        GopBits::from_bits_retain(self.output.load(Ordering::Acquire))
    }

    /// Write to the SET register
    pub fn set(&self, bits: GopBits) {
        self.output.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    /// Write to the CLEAR register
    pub fn clear(&self, bits: GopBits) {
        self.output.fetch_and(!bits.bits(), Ordering::AcqRel);
    }

    /// Write to the TOGGLE register
    pub fn toggle(&self, bits: GopBits) {
        self.output.fetch_xor(bits.bits(), Ordering::AcqRel);
    }

    /// Clear the bits in `mask` and return the ones that were set
    ///
    /// This is what the receiving interrupt handler does on entry.
    pub fn take(&self, mask: GopBits) -> GopBits {
        let old = self.output.fetch_and(!mask.bits(), Ordering::AcqRel);
        GopBits::from_bits_retain(old) & mask
    }
}

/// Outbound doorbell towards the modem
///
/// Implemented by the host platform (or the mock modem). `raise` is called
/// from worker context and may touch hardware, but must not wait on the
/// modem.
pub trait Doorbell: Send + Sync {
    fn raise(&self, bits: GopBits);
}

/// Interrupts the modem can raise at the AP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Irq {
    /// Modem wants the AP awake
    CaWake,
    /// Modem no longer needs the AP awake
    CaSleep,
    /// Modem acknowledged an AC wake request
    AcWakeAck,
    /// Modem consumed data from an AC FIFO
    AcReadNotification(PhysChannel),
    /// Modem published data into a CA FIFO
    CaMsgPending(PhysChannel),
    /// Modem asks for a software reset
    ModemReset,
}

impl Irq {
    pub fn bit(self) -> GopBits {
        match self {
            Irq::CaWake => GopBits::CA_WAKE_REQ,
            Irq::CaSleep => GopBits::CA_SLEEP_REQ,
            Irq::AcWakeAck => GopBits::AC_WAKE_ACK,
            Irq::AcReadNotification(p) => GopBits::ac_read_notification(p),
            Irq::CaMsgPending(p) => GopBits::ca_msg_pending(p),
            Irq::ModemReset => GopBits::MODEM_RESET_REQ,
        }
    }

    /// Decode raised bits into interrupts, in service order
    ///
    /// Wake requests come first so that traffic interrupts in the same
    /// batch find the AP awake; a reset request comes last.
    pub fn from_bits(bits: GopBits) -> Vec<Irq> {
        const ORDER: [Irq; 8] = [
            Irq::CaWake,
            Irq::AcWakeAck,
            Irq::AcReadNotification(PhysChannel::Common),
            Irq::AcReadNotification(PhysChannel::Audio),
            Irq::CaMsgPending(PhysChannel::Common),
            Irq::CaMsgPending(PhysChannel::Audio),
            Irq::CaSleep,
            Irq::ModemReset,
        ];
        ORDER
            .into_iter()
            .filter(|irq| bits.contains(irq.bit()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_set_clear_toggle() {
        let reg = GopRegister::new();
        reg.set(GopBits::COMMON_AC_MSG_PENDING_NOTIFICATION | GopBits::CA_WAKE_ACK);
        assert!(reg.output().contains(GopBits::CA_WAKE_ACK));

        reg.clear(GopBits::CA_WAKE_ACK);
        assert_eq!(reg.output(), GopBits::COMMON_AC_MSG_PENDING_NOTIFICATION);

        reg.toggle(GopBits::COMMON_AC_MSG_PENDING_NOTIFICATION | GopBits::AC_WAKE_REQ);
        assert_eq!(reg.output(), GopBits::AC_WAKE_REQ);
    }

    #[test]
    fn test_take_clears_only_mask() {
        let reg = GopRegister::new();
        reg.set(GopBits::AC_WAKE_REQ | GopBits::COMMON_CA_READ_NOTIFICATION);
        let taken = reg.take(GopBits::AC_WAKE_REQ | GopBits::CA_WAKE_ACK);
        assert_eq!(taken, GopBits::AC_WAKE_REQ);
        assert_eq!(reg.output(), GopBits::COMMON_CA_READ_NOTIFICATION);
        assert!(reg.take(GopBits::AC_WAKE_REQ).is_empty());
    }

    #[test]
    fn test_bit_positions() {
        assert_eq!(GopBits::CA_WAKE_ACK.bits(), 1 << 7);
        assert_eq!(GopBits::COMMON_AC_MSG_PENDING_NOTIFICATION.bits(), 1 << 26);
        assert_eq!(GopBits::COMMON_CA_MSG_PENDING_NOTIFICATION.bits(), 1 << 3);
        assert_eq!(GopBits::CA_WAKE_REQ.bits(), 1 << 27);
    }

    #[test]
    fn test_irq_decoding_order() {
        let bits = GopBits::MODEM_RESET_REQ
            | GopBits::AUDIO_CA_MSG_PENDING_NOTIFICATION
            | GopBits::CA_WAKE_REQ
            | GopBits::COMMON_AC_READ_NOTIFICATION;
        assert_eq!(
            Irq::from_bits(bits),
            vec![
                Irq::CaWake,
                Irq::AcReadNotification(PhysChannel::Common),
                Irq::CaMsgPending(PhysChannel::Audio),
                Irq::ModemReset,
            ]
        );
    }

    #[test]
    fn test_ap_bits_do_not_decode() {
        assert!(Irq::from_bits(GopBits::AP_TO_MODEM).is_empty());
        for irq in Irq::from_bits(GopBits::MODEM_TO_AP) {
            assert!(GopBits::MODEM_TO_AP.contains(irq.bit()));
        }
    }
}
