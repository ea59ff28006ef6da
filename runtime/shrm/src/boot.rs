//! Boot handshake
//!
//! Before any message flows the modem writes a boot info request as the
//! first word of the CA common FIFO. The AP answers with a boot info
//! response as the first word of the AC common FIFO and raises the common
//! msg-pending doorbell; the modem's read notification for that word
//! completes the handshake.
//!
//! ```text
//!   Init ──req──► InfoSync ──read notif──► Done
//!     ▲                                      │
//!     └──────────── modem reset ◄── Unknown ◄┘
//! ```
//!
//! Boot info word (little endian): bits 31..28 L1 type, 15..8 config,
//! 7..0 version.

use std::sync::Mutex;

use log::{info, warn};

use crate::fifo::{FifoReader, FifoWriter};
use crate::{lock, Result, ShrmError};

pub const L1_BOOT_INFO_REQ: u32 = 1;
pub const L1_BOOT_INFO_RESP: u32 = 2;
const L1_SHIFT: u32 = 28;
const CONFIG_SHIFT: u32 = 8;

/// Size of a boot info word in the FIFO
pub const BOOT_INFO_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Init,
    InfoSync,
    Done,
    Unknown,
}

/// Config and version exchanged during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfo {
    pub config: u8,
    pub version: u8,
}

impl BootInfo {
    pub fn encode(&self, l1: u32) -> u32 {
        (l1 << L1_SHIFT) | (u32::from(self.config) << CONFIG_SHIFT) | u32::from(self.version)
    }

    /// Decode a word, checking its L1 type
    pub fn decode(word: u32, expected_l1: u32) -> Result<Self> {
        if word >> L1_SHIFT != expected_l1 {
            return Err(ShrmError::BadBootInfo(word));
        }
        Ok(Self {
            config: (word >> CONFIG_SHIFT) as u8,
            version: word as u8,
        })
    }

    /// Response to a modem request under the AP's limits
    pub fn negotiate(
        request: BootInfo,
        config_mask: u8,
        version: u8,
        min_version: u8,
    ) -> Result<BootInfo> {
        if request.version < min_version {
            return Err(ShrmError::VersionMismatch {
                modem: request.version,
                minimum: min_version,
            });
        }
        Ok(BootInfo {
            config: request.config & config_mask,
            version: request.version.min(version),
        })
    }
}

fn read_word(reader: &mut FifoReader) -> Result<u32> {
    let mut raw = [0u8; BOOT_INFO_LEN];
    reader.read_into(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

/// Consume and parse the modem's boot info request
///
/// The read pointer is committed only on success.
pub fn read_boot_info_req(reader: &mut FifoReader) -> Result<BootInfo> {
    let word = read_word(reader)?;
    match BootInfo::decode(word, L1_BOOT_INFO_REQ) {
        Ok(info) => {
            reader.commit_read();
            Ok(info)
        }
        Err(e) => {
            reader.rollback();
            Err(e)
        }
    }
}

/// Write and publish the boot info response
pub fn write_boot_info_resp(writer: &mut FifoWriter, info: BootInfo) -> Result<()> {
    writer.write(&info.encode(L1_BOOT_INFO_RESP).to_le_bytes())?;
    writer.commit_write();
    Ok(())
}

/// Read a boot info response (modem side)
pub fn read_boot_info_resp(reader: &mut FifoReader) -> Result<BootInfo> {
    let word = read_word(reader)?;
    let info = BootInfo::decode(word, L1_BOOT_INFO_RESP)?;
    reader.commit_read();
    Ok(info)
}

/// Write and publish a boot info request (modem side)
pub fn write_boot_info_req(writer: &mut FifoWriter, info: BootInfo) -> Result<()> {
    writer.write(&info.encode(L1_BOOT_INFO_REQ).to_le_bytes())?;
    writer.commit_write();
    Ok(())
}

/// Handshake progress plus the negotiated parameters
pub struct BootHandshake {
    inner: Mutex<(BootState, Option<BootInfo>)>,
}

impl Default for BootHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl BootHandshake {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new((BootState::Init, None)),
        }
    }

    pub fn state(&self) -> BootState {
        lock(&self.inner).0
    }

    /// Parameters sent in the boot response, once sent
    pub fn negotiated(&self) -> Option<BootInfo> {
        lock(&self.inner).1
    }

    /// Fails with `NotReady` unless the handshake is complete
    pub fn ensure_done(&self) -> Result<()> {
        match self.state() {
            BootState::Done => Ok(()),
            state => Err(ShrmError::NotReady(state)),
        }
    }

    /// `Init → InfoSync` after the response went out
    pub fn info_synced(&self, info: BootInfo) -> bool {
        let mut inner = lock(&self.inner);
        if inner.0 != BootState::Init {
            warn!("boot info request in state {:?}", inner.0);
            return false;
        }
        *inner = (BootState::InfoSync, Some(info));
        info!(
            "boot info synced: config={:#04x} version={}",
            info.config, info.version
        );
        true
    }

    /// `InfoSync → Done` on the modem's read notification
    pub fn complete(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.0 != BootState::InfoSync {
            return false;
        }
        inner.0 = BootState::Done;
        info!("modem boot handshake done");
        true
    }

    /// Mark the handshake as failed or torn down
    pub fn invalidate(&self) {
        lock(&self.inner).0 = BootState::Unknown;
    }

    /// Back to `Init`, forgetting the negotiated parameters
    pub fn restart(&self) {
        *lock(&self.inner) = (BootState::Init, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FifoSizes;
    use crate::layout::{FifoId, SharedSegment};

    #[test]
    fn test_word_layout() {
        let info = BootInfo {
            config: 0x5A,
            version: 3,
        };
        assert_eq!(info.encode(L1_BOOT_INFO_REQ), 0x1000_5A03);
        assert_eq!(info.encode(L1_BOOT_INFO_RESP), 0x2000_5A03);
        assert_eq!(BootInfo::decode(0x1000_5A03, L1_BOOT_INFO_REQ).unwrap(), info);
        assert!(matches!(
            BootInfo::decode(0x2000_5A03, L1_BOOT_INFO_REQ),
            Err(ShrmError::BadBootInfo(0x2000_5A03))
        ));
    }

    #[test]
    fn test_negotiation() {
        let req = BootInfo {
            config: 0xF3,
            version: 4,
        };
        let resp = BootInfo::negotiate(req, 0x0F, 2, 1).unwrap();
        assert_eq!(resp, BootInfo { config: 0x03, version: 2 });

        let old = BootInfo {
            config: 0,
            version: 1,
        };
        assert!(matches!(
            BootInfo::negotiate(old, 0xFF, 3, 2),
            Err(ShrmError::VersionMismatch { modem: 1, minimum: 2 })
        ));
    }

    #[test]
    fn test_fifo_exchange() {
        let segment = SharedSegment::new(&FifoSizes::default()).unwrap();
        let mut modem_tx = FifoWriter::new(segment.clone(), FifoId::CaCommon);
        let mut ap_rx = FifoReader::new(segment.clone(), FifoId::CaCommon);
        let mut ap_tx = FifoWriter::new(segment.clone(), FifoId::AcCommon);
        let mut modem_rx = FifoReader::new(segment.clone(), FifoId::AcCommon);

        let req = BootInfo {
            config: 1,
            version: 1,
        };
        write_boot_info_req(&mut modem_tx, req).unwrap();
        assert_eq!(read_boot_info_req(&mut ap_rx).unwrap(), req);
        assert_eq!(segment.fifo(FifoId::CaCommon).shared_read_ptr(), BOOT_INFO_LEN);

        write_boot_info_resp(&mut ap_tx, req).unwrap();
        assert_eq!(read_boot_info_resp(&mut modem_rx).unwrap(), req);
    }

    #[test]
    fn test_bad_request_not_consumed() {
        let segment = SharedSegment::new(&FifoSizes::default()).unwrap();
        let mut modem_tx = FifoWriter::new(segment.clone(), FifoId::CaCommon);
        let mut ap_rx = FifoReader::new(segment.clone(), FifoId::CaCommon);

        write_boot_info_resp(&mut modem_tx, BootInfo { config: 0, version: 1 }).unwrap();
        assert!(read_boot_info_req(&mut ap_rx).is_err());
        assert_eq!(ap_rx.local_read_ptr(), 0);
        assert_eq!(segment.fifo(FifoId::CaCommon).shared_read_ptr(), 0);
    }

    #[test]
    fn test_state_transitions() {
        let boot = BootHandshake::new();
        assert_eq!(boot.state(), BootState::Init);
        assert!(matches!(boot.ensure_done(), Err(ShrmError::NotReady(BootState::Init))));
        assert!(!boot.complete());

        let info = BootInfo {
            config: 0,
            version: 1,
        };
        assert!(boot.info_synced(info));
        assert!(!boot.info_synced(info));
        assert_eq!(boot.negotiated(), Some(info));
        assert!(boot.complete());
        boot.ensure_done().unwrap();

        boot.invalidate();
        assert_eq!(boot.state(), BootState::Unknown);
        boot.restart();
        assert_eq!(boot.state(), BootState::Init);
        assert_eq!(boot.negotiated(), None);
    }
}
