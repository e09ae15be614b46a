//! ADR control loop (spec §4.6): the per-uplink watchdog that requests an
//! ADRAckReq once unanswered unconfirmed uplinks pile up, then steps the
//! data rate down and finally declares the link lost if the network stays
//! silent. Grounded on `lr1_stack_mac_layer.c`'s ADR state machine, the
//! part of it this crate's Non-goals keep (spec §1: "network-side ADR
//! decision algorithm" is out of scope, only the device-side reaction is
//! implemented here).

use crate::error::Error;
use crate::mac::session::Session;
use crate::region::{Eu868, RegionalDatabase, ADR_ACK_DELAY, ADR_ACK_LIMIT, ADR_LIMIT_CONF_UP, NO_RX_PACKET_CNT};

/// What the caller should do as a result of stepping the ADR counters for
/// one uplink that went unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdrAction {
    /// Nothing to do yet.
    None,
    /// Set ADRAckReq on the next uplink.
    RequestAck,
    /// Data rate was stepped down by the watchdog; keep going.
    SteppedDown,
    /// The link is considered lost (spec §7 `LinkLost`); the host should
    /// re-Join.
    LinkLost,
}

/// Call once per uplink that completes without a downlink (no RX1/RX2
/// packet, or a packet whose MIC failed). Mirrors the counters the
/// original firmware keeps: `adr_ack_cnt` for unconfirmed traffic,
/// `adr_ack_cnt_confirmed_frame` for confirmed traffic, both reset to zero
/// the moment any valid downlink arrives ([`Session::on_valid_downlink`]).
pub fn on_uplink_without_downlink(session: &mut Session, confirmed: bool) -> AdrAction {
    if confirmed {
        session.adr_ack_cnt_confirmed_frame += 1;
    } else {
        session.adr_ack_cnt += 1;
    }

    let total = session.adr_ack_cnt + session.adr_ack_cnt_confirmed_frame;
    if total >= NO_RX_PACKET_CNT {
        return AdrAction::LinkLost;
    }

    if session.adr_ack_cnt_confirmed_frame >= ADR_LIMIT_CONF_UP {
        step_down(session);
        session.adr_ack_cnt_confirmed_frame = 0;
        return AdrAction::SteppedDown;
    }

    if session.adr_ack_cnt >= ADR_ACK_LIMIT + ADR_ACK_DELAY {
        step_down(session);
        // Clamp back to ADR_ACK_LIMIT so the next step-down is paced by a
        // fresh ADR_ACK_DELAY instead of firing on every subsequent uplink
        // (spec §4.6, worked example in §8 Scenario 5).
        session.adr_ack_cnt = ADR_ACK_LIMIT;
        return AdrAction::SteppedDown;
    }

    if session.adr_ack_cnt >= ADR_ACK_LIMIT {
        return AdrAction::RequestAck;
    }

    AdrAction::None
}

fn step_down(session: &mut Session) {
    let min_dr = Eu868::min_dr();
    if session.tx_dr > min_dr {
        session.tx_dr -= 1;
    }
}

/// Whether the next uplink should carry `ADRAckReq` (spec §4.6: set once
/// `adr_ack_cnt >= ADR_ACK_LIMIT`, cleared again only by a valid downlink).
pub fn adr_ack_req(session: &Session) -> bool {
    session.adr_ack_cnt >= ADR_ACK_LIMIT
}

/// Confirmed-uplink retransmission policy (spec §4.2): decrements the
/// in-flight retry counter on every RX1+RX2 timeout without an ACK, leaving
/// `FCntUp` untouched across retries (only a fresh application uplink, or
/// an ACK, advances it). Returns `true` while there is at least one more
/// retransmission budgeted.
pub fn retransmit(session: &mut Session) -> Result<bool, Error> {
    if session.nb_trans_cpt <= 1 {
        return Ok(false);
    }
    session.nb_trans_cpt -= 1;
    Ok(true)
}

/// Resets the in-flight retry counter to `nb_trans` for a freshly built
/// uplink (spec §4.2).
pub fn arm_retransmission(session: &mut Session) {
    session.nb_trans_cpt = session.nb_trans.max(1);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mac::session::{ChannelMaskState, Keys};
    use lorawan::keys::{AppSKey, NewSKey};
    use lorawan::parser::DevAddr;

    fn session() -> Session {
        let dev_addr: DevAddr<[u8; 4]> = [0, 0, 0, 0].into();
        let keys = Keys { nwk_skey: NewSKey::from([0u8; 16]), app_skey: AppSKey::from([0u8; 16]) };
        let mut s = Session::new(dev_addr, keys);
        s.tx_dr = 5;
        s.channel_mask = ChannelMaskState::default();
        s
    }

    #[test]
    fn adr_steps_down_after_limit_plus_delay() {
        let mut s = session();
        for _ in 0..(ADR_ACK_LIMIT + ADR_ACK_DELAY - 1) {
            assert_ne!(on_uplink_without_downlink(&mut s, false), AdrAction::SteppedDown);
        }
        assert_eq!(on_uplink_without_downlink(&mut s, false), AdrAction::SteppedDown);
        assert_eq!(s.tx_dr, 4);
    }

    #[test]
    fn link_declared_lost_past_no_rx_packet_cnt() {
        let mut s = session();
        let mut last = AdrAction::None;
        for _ in 0..NO_RX_PACKET_CNT {
            last = on_uplink_without_downlink(&mut s, false);
        }
        assert_eq!(last, AdrAction::LinkLost);
    }

    #[test]
    fn retransmission_leaves_fcnt_unchanged_until_exhausted() {
        let mut s = session();
        s.nb_trans = 3;
        arm_retransmission(&mut s);
        let fcnt_before = s.fcnt_up;
        assert_eq!(retransmit(&mut s).unwrap(), true);
        assert_eq!(s.nb_trans_cpt, 2);
        assert_eq!(s.fcnt_up, fcnt_before);
        assert_eq!(retransmit(&mut s).unwrap(), true);
        assert_eq!(s.nb_trans_cpt, 1);
        assert_eq!(retransmit(&mut s).unwrap(), false);
    }
}
