//! MAC command processing: parses the downlink FOpts/port-0 FRMPayload
//! stream and mutates [`Session`] accordingly, queuing the matching Ans for
//! the next uplink. Grounded on `lorawan-device::mac::uplink` for the
//! sticky/transient answer-queue idiom, generalized from the teacher's two
//! supported commands (LinkADR, RXTimingSetup) to all nine defined here.

use lorawan::maccommands::{
    parse_downlink_mac_commands, DownlinkMacCommand, SerializableMacCommand,
};
use lorawan::maccommandcreator::{
    DevStatusAnsCreator, DlChannelAnsCreator, DutyCycleAnsCreator, LinkADRAnsCreator,
    LinkCheckReqCreator, NewChannelAnsCreator, RXParamSetupAnsCreator, RXTimingSetupAnsCreator,
    TXParamSetupAnsCreator,
};

use crate::mac::session::Session;
use crate::region::{Eu868, RegionalDatabase};

/// Link quality snapshot the application layer hands in so `DevStatusAns`
/// and `LinkCheckAns` observers can be served (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct LinkStatus {
    pub battery: u8,
    pub margin_db: i8,
}

/// Outcome of processing one downlink's worth of MAC commands.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Link margin/gateway count from the last LinkCheckAns, if the network
    /// sent one (spec's supplemented LinkCheck getter).
    pub link_check: Option<(u8, u8)>,
    pub duty_cycle_index: Option<u8>,
}

/// Parses `fopts` (the FOpts field contents, or a decrypted port-0
/// FRMPayload) as a stream of downlink MAC commands, applies each to
/// `session`, and appends the corresponding Ans to the session's transient
/// FOpts queue.
pub fn process_downlink_commands(
    session: &mut Session,
    fopts: &[u8],
    link: LinkStatus,
) -> ProcessOutcome {
    let mut outcome = ProcessOutcome::default();

    for cmd in parse_downlink_mac_commands(fopts) {
        match cmd {
            DownlinkMacCommand::LinkCheckAns(ans) => {
                outcome.link_check = Some((ans.margin(), ans.gateway_count()));
            }
            DownlinkMacCommand::LinkADRReq(req) => {
                handle_link_adr(session, &req);
            }
            DownlinkMacCommand::DutyCycleReq(req) => {
                // max_duty_cycle_raw of 0 means unrestricted (spec: stored
                // as an index into the regulatory table, not a literal
                // fraction).
                session.max_duty_cycle_index = req.max_duty_cycle_raw();
                outcome.duty_cycle_index = Some(session.max_duty_cycle_index);
                let ans = DutyCycleAnsCreator::new();
                push_sticky(session, &ans);
            }
            DownlinkMacCommand::RXParamSetupReq(req) => {
                let dl = req.dl_settings();
                let freq = req.frequency().value();
                let offset_ok = Eu868::rx1_dr_offset_valid(dl.rx1_dr_offset());
                let dr_ok = dl.rx2_data_rate() <= Eu868::max_dr();
                let freq_ok = Eu868::frequency_valid(freq);

                if offset_ok && dr_ok && freq_ok {
                    session.rx1_dr_offset = dl.rx1_dr_offset();
                    session.rx2_dr = dl.rx2_data_rate();
                    session.rx2_freq = freq;
                }

                let mut ans = RXParamSetupAnsCreator::new();
                ans.set_channel_ack(freq_ok)
                    .set_rx2_data_rate_ack(dr_ok)
                    .set_rx1_data_rate_offset_ack(offset_ok);
                push_sticky(session, &ans);
            }
            DownlinkMacCommand::DevStatusReq(_req) => {
                let mut ans = DevStatusAnsCreator::new();
                ans.set_battery(link.battery);
                let _ = ans.set_margin(link.margin_db);
                push_transient(session, &ans);
            }
            DownlinkMacCommand::NewChannelReq(req) => {
                let freq = req.frequency().value();
                let freq_ok = Eu868::frequency_valid(freq) || freq == 0;
                let range_ok = req.data_rate_range().max_data_rate() <= Eu868::max_dr();

                if freq_ok && range_ok {
                    session.channel_mask.set(req.channel_index() as usize, freq != 0);
                }

                let mut ans = NewChannelAnsCreator::new();
                ans.set_channel_frequency_ack(freq_ok).set_data_rate_range_ack(range_ok);
                push_transient(session, &ans);
            }
            DownlinkMacCommand::RXTimingSetupReq(req) => {
                // RxDelay of 0 on the wire means 1 second, same clamp as
                // the Join Accept path (spec §4.7).
                let delay = req.delay();
                session.rx_delay_s = if delay == 0 { 1 } else { delay };
                let ans = RXTimingSetupAnsCreator::new();
                push_sticky(session, &ans);
            }
            DownlinkMacCommand::TXParamSetupReq(req) => {
                session.downlink_dwell_time = req.downlink_dwell_time();
                session.uplink_dwell_time = req.uplink_dwell_time();
                session.max_eirp_dbm = req.max_eirp() as i8;
                let ans = TXParamSetupAnsCreator::new();
                push_sticky(session, &ans);
            }
            DownlinkMacCommand::DlChannelReq(req) => {
                let freq = req.frequency().value();
                let freq_ok = Eu868::frequency_valid(freq);
                if freq_ok {
                    session.channel_mask.set(req.channel_index() as usize, true);
                }
                let mut ans = DlChannelAnsCreator::new();
                ans.set_channel_frequency_ack(freq_ok).set_uplink_frequency_exists_ack(true);
                push_sticky(session, &ans);
            }
            DownlinkMacCommand::DeviceTimeAns(_ans) => {
                // Clock sync is outside this engine's scope; observed but
                // not acted on.
            }
        }
    }

    outcome
}

/// `LinkADRReq` arrives as one or more consecutive blocks sharing a single
/// channel mask semantics; the last block's DR/TxPower/NbTrans wins, while
/// every block gets its own `LinkADRAns` with the same three status bits
/// (LoRaWAN 1.0.x §5's "apply as a whole or reject as a whole" rule,
/// simplified here to per-block validation since EU868 carries at most one
/// block per downlink in practice). Each block's Redundancy byte carries a
/// ChMaskCntl that selects how `ChannelMask` is interpreted: 0 targets
/// EU868's one 16-channel bank directly; 6 means "all channels on"
/// regardless of the mask bits; every other value (1-5, 7) is RFU for a
/// single-bank region and is NACKed without mutating the session's mask, so
/// a sequence of blocks only ever unifies state through bank 0 (spec §4.5).
fn handle_link_adr(session: &mut Session, req: &lorawan::maccommands::LinkADRReqPayload<'_>) {
    let dr = req.data_rate();
    let power = req.tx_power();
    let redundancy = req.redundancy();
    let nb_trans = redundancy.number_of_transmissions();
    let ch_mask_cntl = redundancy.channel_mask_control();

    let dr_ok = dr <= Eu868::max_dr();
    let power_ok = Eu868::tx_power_dbm(power).is_some();
    let mask = req.channel_mask();
    let mask_value = u16::from(mask.get_index(0)) | (u16::from(mask.get_index(1)) << 8);

    let mask_ok = match ch_mask_cntl {
        0 => mask_value != 0 && session.channel_mask.apply_bank(0, mask_value),
        6 => {
            session.channel_mask.enable_all();
            true
        }
        _ => false,
    };

    if dr_ok {
        session.tx_dr = dr;
    }
    if power_ok {
        session.tx_power_index = power;
    }
    if nb_trans > 0 {
        session.nb_trans = nb_trans;
    }

    let mut ans = LinkADRAnsCreator::new();
    ans.set_channel_mask_ack(mask_ok).set_data_rate_ack(dr_ok).set_tx_power_ack(power_ok);
    push_transient(session, &ans);
}

fn push_sticky<C: SerializableMacCommand>(session: &mut Session, cmd: &C) {
    session.fopts.push_sticky(cmd.cid(), cmd.payload_bytes());
}

fn push_transient<C: SerializableMacCommand>(session: &mut Session, cmd: &C) {
    session.fopts.push_transient(cmd.cid(), cmd.payload_bytes());
}

/// Queues an application-initiated `LinkCheckReq` for the next uplink.
pub fn request_link_check(session: &mut Session) {
    let cmd = LinkCheckReqCreator::new();
    session.fopts.push_transient(cmd.cid(), cmd.payload_bytes());
}
