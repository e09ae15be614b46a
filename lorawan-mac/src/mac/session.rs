//! Joined-device session state: everything that exists only after a
//! successful Join and is wiped by a fresh one. Mirrors the teacher's
//! `lorawan-device::session::Session`, widened to carry the full set of
//! mutable regional parameters the spec's Data Model places on the session
//! rather than on the region table (see [`crate::region`]'s module doc).

use heapless::Vec;
use lorawan::keys::{AppSKey, NewSKey, AES128};
use lorawan::maccommands::SerializableMacCommand;
use lorawan::parser::{
    DataHeader, DecryptedDataPayload, DevAddr, EncryptedDataPayload, FRMPayload,
};

use crate::error::{Error, ProtocolError};
use crate::region::{Eu868, RegionalDatabase, MAX_FCNT_GAP};

/// The FOpts budget a single frame's FHDR may carry (spec §3).
const MAX_FOPTS_BYTES: usize = 15;
/// Largest Ans payload any command in the table emits (`DevStatusAns` is the
/// widest at 2 bytes); bounds [`QueuedCommand`] without a heap.
const MAX_CMD_PAYLOAD: usize = 2;
/// Upper bound on distinct outstanding MAC answers between two downlinks.
const MAX_QUEUED_CMDS: usize = 8;

/// Result of reconstructing a 32-bit frame counter from a 16-bit wire value
/// against the last accepted 32-bit counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcntReconstruction {
    Accept(u32),
    Replay,
}

/// Reconstructs the full 32-bit downlink/uplink frame counter from the
/// truncated 16-bit value carried on the wire.
///
/// `stored` is `0xFFFF_FFFF` before any frame has ever been accepted (the
/// "unset" sentinel); any 16-bit value is then accepted unconditionally and
/// becomes the new counter. Otherwise the candidate counter is the smallest
/// value `>= stored` (modulo 2^32) whose low 16 bits equal `received`; it is
/// rejected as replay if it is not strictly greater than `stored`. The
/// [`MAX_FCNT_GAP`] cap only applies when the low 16 bits wrapped past
/// `stored_low` — a candidate that stays within the current window
/// (`received >= stored_low`) is accepted unconditionally, per spec §4.4.
pub fn reconstruct_fcnt(stored: u32, received: u16) -> FcntReconstruction {
    if stored == u32::MAX {
        return FcntReconstruction::Accept(received as u32);
    }

    let stored_low = (stored & 0xFFFF) as u16;
    let stored_high = stored & 0xFFFF_0000;

    if received >= stored_low {
        let candidate = stored_high.wrapping_add(received as u32);
        if candidate <= stored {
            return FcntReconstruction::Replay;
        }
        return FcntReconstruction::Accept(candidate);
    }

    let candidate = stored_high.wrapping_add(0x1_0000).wrapping_add(received as u32);
    if candidate <= stored || candidate - stored > MAX_FCNT_GAP {
        return FcntReconstruction::Replay;
    }
    FcntReconstruction::Accept(candidate)
}

/// A single queued MAC answer, stored as (CID, payload) rather than
/// concatenated bytes so it can be handed to
/// [`lorawan::creator::DataPayloadCreator::build`] as a
/// [`SerializableMacCommand`] — that API serializes FOpts/FRMPayload mac
/// commands itself and needs the command boundary, not a flat byte run.
#[derive(Clone, Copy)]
pub struct QueuedCommand {
    cid: u8,
    len: u8,
    payload: [u8; MAX_CMD_PAYLOAD],
}

impl QueuedCommand {
    fn new(cid: u8, bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_CMD_PAYLOAD);
        let mut payload = [0u8; MAX_CMD_PAYLOAD];
        payload[..len].copy_from_slice(&bytes[..len]);
        Self { cid, len: len as u8, payload }
    }

    /// Wire size of this command including its CID byte.
    fn wire_len(&self) -> usize {
        1 + self.len as usize
    }
}

impl SerializableMacCommand for QueuedCommand {
    fn payload_bytes(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }
    fn cid(&self) -> u8 {
        self.cid
    }
}

/// Per-session sticky/transient MAC command answer queue. Sticky answers
/// (RXParamSetupAns, RXTimingSetupAns, TXParamSetupAns, DlChannelAns) are
/// re-sent on every uplink until a downlink is received; transient answers
/// are sent exactly once.
#[derive(Default)]
pub struct FOptsQueue {
    pub(crate) sticky: Vec<QueuedCommand, MAX_QUEUED_CMDS>,
    pub(crate) transient: Vec<QueuedCommand, MAX_QUEUED_CMDS>,
}

impl FOptsQueue {
    pub fn clear_sticky(&mut self) {
        self.sticky.clear();
    }

    pub fn drain_transient(&mut self) {
        self.transient.clear();
    }

    pub fn push_sticky(&mut self, cid: u8, payload: &[u8]) {
        let _ = self.sticky.push(QueuedCommand::new(cid, payload));
    }

    pub fn push_transient(&mut self, cid: u8, payload: &[u8]) {
        let _ = self.transient.push(QueuedCommand::new(cid, payload));
    }

    /// Copies sticky then transient commands into `out`, truncating at a
    /// command boundary once the 15-byte FOpts budget (spec §4.5) would be
    /// exceeded. Returns `true` if every queued command fit.
    pub fn fill(&self, out: &mut Vec<QueuedCommand, MAX_QUEUED_CMDS>) -> bool {
        out.clear();
        let mut total = 0usize;
        for cmd in self.sticky.iter().chain(self.transient.iter()) {
            if total + cmd.wire_len() > MAX_FOPTS_BYTES {
                return false;
            }
            total += cmd.wire_len();
            let _ = out.push(*cmd);
        }
        true
    }

    /// Copies every queued command into `out` regardless of the FOpts
    /// budget, for the FRMPayload-on-port-0 overflow path.
    pub fn fill_all(&self, out: &mut Vec<QueuedCommand, MAX_QUEUED_CMDS>) {
        out.clear();
        for cmd in self.sticky.iter().chain(self.transient.iter()) {
            let _ = out.push(*cmd);
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keys {
    pub nwk_skey: NewSKey,
    pub app_skey: AppSKey,
}

/// All state that persists across uplinks for a joined device. The fields
/// below that are regional parameters (channel mask, RX1 offset, RX2,
/// current DR, TX power index, NbTrans, Max EIRP, dwell-time, max duty
/// cycle index) live here rather than on the region table because MAC
/// commands mutate them per-session, not per-region.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Session {
    pub dev_addr: DevAddr<[u8; 4]>,
    pub keys: Keys,

    pub fcnt_up: u32,
    pub fcnt_down: u32,

    pub channel_mask: ChannelMaskState,
    /// Extra uplink frequencies granted by a Join Accept's CFList, at
    /// channel indices 3.. (spec §4.7); empty until one arrives.
    pub extra_channels: heapless::Vec<u32, 5>,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    pub rx2_freq: u32,
    pub rx_delay_s: u8,

    pub tx_dr: u8,
    pub tx_power_index: u8,
    pub nb_trans: u8,
    pub max_eirp_dbm: i8,
    pub uplink_dwell_time: bool,
    pub downlink_dwell_time: bool,
    pub max_duty_cycle_index: u8,

    pub adr_ack_cnt: u32,
    pub adr_ack_cnt_confirmed_frame: u32,

    /// Remaining retransmissions for the uplink currently in flight; reset
    /// to `nb_trans` whenever a new uplink is built, decremented on every
    /// timeout, and collapsed to 0 once an ACK (or any valid downlink, for
    /// unconfirmed frames) arrives.
    pub nb_trans_cpt: u8,

    #[cfg_attr(feature = "serde", serde(skip))]
    pub fopts: FOptsQueue,
}

/// Plain channel enable/disable mask; EU868 ships at most 16 default +
/// CFList channels, well inside a `u16` bitmap.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMaskState(pub u16);

impl Default for ChannelMaskState {
    fn default() -> Self {
        Self(0x0007) // the three default EU868 join channels
    }
}

impl ChannelMaskState {
    pub fn is_enabled(&self, channel: usize) -> bool {
        channel < 16 && self.0 & (1 << channel) != 0
    }

    pub fn set(&mut self, channel: usize, enabled: bool) {
        if channel >= 16 {
            return;
        }
        if enabled {
            self.0 |= 1 << channel;
        } else {
            self.0 &= !(1 << channel);
        }
    }

    /// Applies a 16-channel `LinkADRReq` mask block to the bank it targets.
    /// EU868 has exactly one 16-channel bank (index 0); any other bank
    /// index is out of range for this region and is rejected (spec §4.5).
    /// Returns whether the bank index was valid.
    pub fn apply_bank(&mut self, bank_index: usize, value: u16) -> bool {
        if bank_index != 0 {
            return false;
        }
        self.0 = value;
        true
    }

    /// `ChMaskCntl == 6` ("all channels on") special case (spec §4.5).
    pub fn enable_all(&mut self) {
        self.0 = 0xFFFF;
    }
}

impl Session {
    pub fn new(dev_addr: DevAddr<[u8; 4]>, keys: Keys) -> Self {
        let (rx2_freq, rx2_dr) = Eu868::default_rx2();
        Self {
            dev_addr,
            keys,
            fcnt_up: 0,
            fcnt_down: u32::MAX,
            channel_mask: ChannelMaskState::default(),
            extra_channels: heapless::Vec::new(),
            rx1_dr_offset: 0,
            rx2_dr,
            rx2_freq,
            rx_delay_s: 1,
            tx_dr: 5,
            tx_power_index: 0,
            nb_trans: 1,
            max_eirp_dbm: 14,
            uplink_dwell_time: false,
            downlink_dwell_time: false,
            max_duty_cycle_index: 0,
            adr_ack_cnt: 0,
            adr_ack_cnt_confirmed_frame: 0,
            nb_trans_cpt: 1,
            fopts: FOptsQueue::default(),
        }
    }

    /// Encrypts and MICs an uplink frame. `fopts` are piggybacked in FHDR
    /// when there is no port-0 payload; `confirmed` sets the frame type.
    pub fn build_uplink<'a>(
        &mut self,
        out: &'a mut [u8],
        f_port: u8,
        payload: &[u8],
        confirmed: bool,
        adr: bool,
        adr_ack_req: bool,
    ) -> Result<&'a [u8], Error> {
        use lorawan::creator::DataPayloadCreator;
        use lorawan::default_crypto::DefaultFactory;

        if out.len() < 255 {
            return Err(Error::Fatal);
        }

        let mut creator: DataPayloadCreator<&mut [u8], DefaultFactory> =
            DataPayloadCreator::with_options(out, DefaultFactory).map_err(|_| Error::Fatal)?;

        let mut fctrl_byte = 0u8;
        if adr {
            fctrl_byte |= 1 << 7;
        }
        if adr_ack_req {
            fctrl_byte |= 1 << 6;
        }

        // FOpts carried in FHDR never exceed 15 B (spec §3, §8); if the
        // queue doesn't fit, the whole batch is instead emitted as
        // FRMPayload on port 0 with FOpts left empty this cycle, bumping
        // whatever application payload the caller asked to send.
        let mut queued = Vec::<QueuedCommand, MAX_QUEUED_CMDS>::new();
        let fits = self.fopts.fill(&mut queued);
        let (eff_f_port, eff_payload): (u8, &[u8]) = if fits {
            (f_port, payload)
        } else {
            self.fopts.fill_all(&mut queued);
            (0, &[])
        };
        let mut cmd_refs: Vec<&dyn SerializableMacCommand, MAX_QUEUED_CMDS> = Vec::new();
        for cmd in queued.iter() {
            let _ = cmd_refs.push(cmd as &dyn SerializableMacCommand);
        }
        // FOptsLen is written into FCtrl by `build()` itself from `cmd_refs`
        // when the frame isn't a port-0 MAC-only one; leave the nibble zero
        // here either way.
        let fctrl = lorawan::parser::FCtrl::new(fctrl_byte, true);

        creator
            .set_uplink(true)
            .set_confirmed(confirmed)
            .set_dev_addr(self.dev_addr)
            .set_fctrl(&fctrl)
            .set_fcnt(self.fcnt_up)
            .set_f_port(eff_f_port);

        let built = creator
            .build(eff_payload, &cmd_refs, self.keys.nwk_skey.inner(), self.keys.app_skey.inner())
            .map_err(|_| Error::Fatal)?;
        let len = built.len();
        Ok(&out[..len])
    }

    /// Verifies MIC, reconstructs the 32-bit FCntDown, and decrypts a
    /// downlink addressed to this session's DevAddr. Returns the decoded
    /// frame plus its reconstructed counter so the caller can commit it.
    pub fn receive_downlink<'a>(
        &self,
        data: &'a mut [u8],
    ) -> Result<(DecryptedDataPayload<&'a mut [u8]>, u32, bool), Error> {
        use lorawan::default_crypto::DefaultFactory;

        let enc = EncryptedDataPayload::new_with_factory(data, DefaultFactory)
            .map_err(|_| Error::Protocol(ProtocolError::PayloadTooShort))?;

        let received_fcnt = enc.fhdr().fcnt();
        let confirmed = enc.is_confirmed();
        let full = match reconstruct_fcnt(self.fcnt_down, received_fcnt) {
            FcntReconstruction::Accept(v) => v,
            FcntReconstruction::Replay => {
                return Err(Error::Protocol(ProtocolError::FcntReplay));
            }
        };

        if !enc.validate_mic(self.keys.nwk_skey.inner(), full) {
            return Err(Error::Protocol(ProtocolError::BadMic));
        }

        let dec = enc
            .decrypt(Some(self.keys.nwk_skey.inner()), Some(self.keys.app_skey.inner()), full)
            .map_err(|_| Error::Protocol(ProtocolError::PayloadTooShort))?;

        Ok((dec, full, confirmed))
    }

    /// Bookkeeping that must happen exactly once per *valid* (MIC-checked)
    /// downlink, regardless of whether it carried an application payload:
    /// ADR watchdog reset and sticky-FOpts clearing (spec §4.6, §4.5).
    pub fn on_valid_downlink(&mut self, fcnt_down: u32, ack: bool) {
        self.fcnt_down = fcnt_down;
        self.adr_ack_cnt = 0;
        self.adr_ack_cnt_confirmed_frame = 0;
        self.fopts.clear_sticky();
        self.fopts.drain_transient();
        if ack {
            self.nb_trans_cpt = 1;
        }
    }

    pub fn max_mac_payload_size(&self) -> u8 {
        Eu868::max_payload_size(self.tx_dr, self.uplink_dwell_time)
    }

    /// Uplink channels currently enabled by the channel mask: the three
    /// default join channels plus any CFList extras, each gated by its own
    /// mask bit (spec §4.4/§4.7). Used to pick a channel for the next
    /// transmission the way a multi-channel end-device must, mirroring the
    /// teacher's `DynamicChannelPlan::get_tx_dr_and_frequency`.
    pub fn enabled_tx_channels(&self) -> Vec<u32, 8> {
        let mut out = Vec::new();
        for (i, freq) in Eu868::default_join_channels().iter().enumerate() {
            if self.channel_mask.is_enabled(i) {
                let _ = out.push(*freq);
            }
        }
        for (i, freq) in self.extra_channels.iter().enumerate() {
            if self.channel_mask.is_enabled(3 + i) {
                let _ = out.push(*freq);
            }
        }
        out
    }
}

pub fn extract_mac_payload<'a>(frm: &FRMPayload<'a>) -> Option<&'a [u8]> {
    match frm {
        FRMPayload::MACCommands(cmds) => Some(cmds.data()),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fcnt_reconstruction_accepts_first_frame_unconditionally() {
        assert_eq!(reconstruct_fcnt(u32::MAX, 7), FcntReconstruction::Accept(7));
    }

    #[test]
    fn fcnt_reconstruction_rejects_replay() {
        assert_eq!(reconstruct_fcnt(0x0000_00A0, 0x009F), FcntReconstruction::Replay);
    }

    #[test]
    fn fcnt_reconstruction_wraps_16_bit_window() {
        assert_eq!(
            reconstruct_fcnt(0x0000_FFFE, 0x0001),
            FcntReconstruction::Accept(0x0001_0001)
        );
    }

    #[test]
    fn fcnt_reconstruction_rejects_beyond_gap() {
        let stored = 0x0000_0010;
        let received = ((stored as u16).wrapping_add(MAX_FCNT_GAP as u16)).wrapping_add(1);
        assert_eq!(reconstruct_fcnt(stored, received), FcntReconstruction::Replay);
    }
}
