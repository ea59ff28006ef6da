//! Wake/sleep negotiation
//!
//! Two independent state machines, one per direction:
//!
//! - AC (AP wants the modem awake): `Sleep → WakeRequested → Awake → Sleep`.
//!   Every sender holds a reference while it needs the modem; the last
//!   reference dropped starts the idle timer, after which the AP raises
//!   an advisory sleep request without waiting for an ack.
//! - CA (modem wants the AP awake): `Sleep → WakeRequested → Awake → Sleep`.
//!   The AP holds its suspend blocker for as long as CA is awake.
//!
//! If CA is already awake when an AC wake is requested the modem is known
//! to be up, so AC goes straight to `Awake` instead of waiting for an ack.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::debug;

use crate::{deadline_after, lock, wait_deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    Sleep,
    WakeRequested,
    Awake,
}

/// Platform hook that keeps the AP out of system suspend
pub trait SuspendBlocker: Send + Sync {
    fn acquire(&self);

    /// Drop the block once `timeout` has elapsed
    fn release_after(&self, timeout: Duration);
}

/// Blocker for hosts without system suspend
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBlocker;

impl SuspendBlocker for NoopBlocker {
    fn acquire(&self) {}

    fn release_after(&self, _timeout: Duration) {}
}

/// What a sender has to do after taking an AC wake reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcWake {
    /// Modem already awake, nothing to do
    Awake,
    /// Modem known awake through CA; raise the request but do not wait
    AwakeViaCa,
    /// This caller must raise the wake request and wait for the ack
    Request,
    /// Another caller already raised the request; wait for the ack
    Pending,
}

struct AcInner {
    state: WakeState,
    refs: u32,
}

/// Wake state of both directions
pub struct PowerState {
    ac: Mutex<AcInner>,
    ac_changed: Condvar,
    ca: Mutex<WakeState>,
}

impl Default for PowerState {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerState {
    pub fn new() -> Self {
        Self {
            ac: Mutex::new(AcInner {
                state: WakeState::Sleep,
                refs: 0,
            }),
            ac_changed: Condvar::new(),
            ca: Mutex::new(WakeState::Sleep),
        }
    }

    pub fn ac_state(&self) -> WakeState {
        lock(&self.ac).state
    }

    pub fn ac_refs(&self) -> u32 {
        lock(&self.ac).refs
    }

    pub fn ca_state(&self) -> WakeState {
        *lock(&self.ca)
    }

    /// Take an AC wake reference
    pub fn ac_wake_get(&self) -> AcWake {
        let mut ac = lock(&self.ac);
        ac.refs += 1;
        match ac.state {
            WakeState::Awake => AcWake::Awake,
            WakeState::WakeRequested => AcWake::Pending,
            WakeState::Sleep => {
                if *lock(&self.ca) == WakeState::Awake {
                    ac.state = WakeState::Awake;
                    debug!("AC awake (modem already awake via CA)");
                    self.ac_changed.notify_all();
                    AcWake::AwakeViaCa
                } else {
                    ac.state = WakeState::WakeRequested;
                    debug!("AC wake requested");
                    AcWake::Request
                }
            }
        }
    }

    /// Drop an AC wake reference; true when it was the last one
    pub fn ac_wake_put(&self) -> bool {
        let mut ac = lock(&self.ac);
        ac.refs = ac.refs.saturating_sub(1);
        ac.refs == 0
    }

    /// The modem acknowledged the wake request
    ///
    /// Returns false for a stale ack (no request outstanding).
    pub fn ac_wake_acked(&self) -> bool {
        let mut ac = lock(&self.ac);
        if ac.state != WakeState::WakeRequested {
            return false;
        }
        ac.state = WakeState::Awake;
        debug!("AC awake");
        self.ac_changed.notify_all();
        true
    }

    /// Block until AC is awake or `timeout` elapses
    pub fn wait_ac_awake(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut ac = lock(&self.ac);
        loop {
            match ac.state {
                WakeState::Awake => return true,
                // A reset happened underneath us
                WakeState::Sleep => return false,
                WakeState::WakeRequested => {}
            }
            ac = match wait_deadline(&self.ac_changed, ac, deadline) {
                Ok(ac) => ac,
                Err(_) => return false,
            };
        }
    }

    /// Go to sleep if nobody holds a reference
    pub fn ac_sleep_if_idle(&self) -> bool {
        let mut ac = lock(&self.ac);
        if ac.refs > 0 || ac.state == WakeState::Sleep {
            return false;
        }
        ac.state = WakeState::Sleep;
        debug!("AC asleep");
        true
    }

    /// Modem raised its wake request; false if one is already in progress
    pub fn ca_wake_requested(&self) -> bool {
        let mut ca = lock(&self.ca);
        if *ca != WakeState::Sleep {
            return false;
        }
        *ca = WakeState::WakeRequested;
        true
    }

    pub fn ca_awake(&self) {
        *lock(&self.ca) = WakeState::Awake;
        debug!("CA awake");
    }

    /// Modem released the AP; false if CA was already asleep
    pub fn ca_sleep(&self) -> bool {
        let mut ca = lock(&self.ca);
        if *ca == WakeState::Sleep {
            return false;
        }
        *ca = WakeState::Sleep;
        debug!("CA asleep");
        true
    }

    /// Both directions back to `Sleep`, all references dropped
    pub fn reset(&self) {
        let mut ac = lock(&self.ac);
        ac.state = WakeState::Sleep;
        ac.refs = 0;
        *lock(&self.ca) = WakeState::Sleep;
        self.ac_changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ac_request_ack_cycle() {
        let power = PowerState::new();
        assert_eq!(power.ac_wake_get(), AcWake::Request);
        assert_eq!(power.ac_state(), WakeState::WakeRequested);
        assert_eq!(power.ac_wake_get(), AcWake::Pending);

        assert!(power.ac_wake_acked());
        assert_eq!(power.ac_state(), WakeState::Awake);
        assert!(!power.ac_wake_acked());

        assert!(!power.ac_wake_put());
        assert!(!power.ac_sleep_if_idle());
        assert!(power.ac_wake_put());
        assert!(power.ac_sleep_if_idle());
        assert_eq!(power.ac_state(), WakeState::Sleep);
    }

    #[test]
    fn test_ac_wake_while_ca_awake() {
        let power = PowerState::new();
        assert!(power.ca_wake_requested());
        power.ca_awake();

        assert_eq!(power.ac_wake_get(), AcWake::AwakeViaCa);
        assert_eq!(power.ac_state(), WakeState::Awake);
        assert!(power.wait_ac_awake(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_for_ack_from_other_thread() {
        let power = Arc::new(PowerState::new());
        assert_eq!(power.ac_wake_get(), AcWake::Request);

        let acker = {
            let power = power.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                power.ac_wake_acked()
            })
        };
        assert!(power.wait_ac_awake(Duration::from_secs(5)));
        assert!(acker.join().unwrap());
    }

    #[test]
    fn test_wait_times_out() {
        let power = PowerState::new();
        power.ac_wake_get();
        assert!(!power.wait_ac_awake(Duration::from_millis(20)));
        assert_eq!(power.ac_state(), WakeState::WakeRequested);
    }

    #[test]
    fn test_reset_releases_waiters() {
        let power = Arc::new(PowerState::new());
        power.ac_wake_get();
        let waiter = {
            let power = power.clone();
            thread::spawn(move || power.wait_ac_awake(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        power.reset();
        assert!(!waiter.join().unwrap());
        assert_eq!(power.ac_refs(), 0);
    }

    #[test]
    fn test_ca_cycle() {
        let power = PowerState::new();
        assert!(!power.ca_sleep());
        assert!(power.ca_wake_requested());
        assert!(!power.ca_wake_requested());
        power.ca_awake();
        assert_eq!(power.ca_state(), WakeState::Awake);
        assert!(power.ca_sleep());
        assert_eq!(power.ca_state(), WakeState::Sleep);
    }
}
