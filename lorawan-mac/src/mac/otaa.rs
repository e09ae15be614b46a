//! Over-The-Air Activation: Join Request build, Join Accept decode, session
//! derivation, and the regulatory Join back-off schedule (spec §4.7).
//! Grounded on `lr1_stack_mac_layer.c`'s join state machine: three back-off
//! tiers over a rolling hour, each scaled by the current SF's time-on-air
//! multiplier so a slower data rate doesn't blow through the duty-cycle
//! budget the tiers are meant to enforce.

use lorawan::keys::{AppKey, AppSKey, NewSKey};
use lorawan::parser::{CfList, DecryptedJoinAcceptPayload, DevNonce, EncryptedJoinAcceptPayload};

use crate::error::Error;
use crate::mac::session::{ChannelMaskState, Keys, Session};
use crate::region::{Eu868, RegionalDatabase};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct JoinCredentials {
    pub app_eui: [u8; 8],
    pub dev_eui: [u8; 8],
    pub app_key: AppKey,
}

/// Builds a Join Request into `out`, consuming and incrementing
/// `dev_nonce`. The caller is responsible for persisting the post-increment
/// value: DevNonce must never repeat for a given AppKey (spec §4.7).
pub fn build_join_request<'a>(
    out: &'a mut [u8],
    creds: &JoinCredentials,
    dev_nonce: &mut u16,
) -> Result<&'a [u8], Error> {
    use lorawan::creator::JoinRequestCreator;
    use lorawan::default_crypto::DefaultFactory;

    if out.len() < 23 {
        return Err(Error::Fatal);
    }

    let mut creator: JoinRequestCreator<&mut [u8], DefaultFactory> =
        JoinRequestCreator::with_options(out, DefaultFactory).map_err(|_| Error::Fatal)?;

    let nonce = *dev_nonce;
    creator
        .set_app_eui(creds.app_eui)
        .set_dev_eui(creds.dev_eui)
        .set_dev_nonce(DevNonce::from(nonce));

    let built = creator.build(creds.app_key.inner()).map_err(|_| Error::Fatal)?;
    let len = built.len();
    *dev_nonce = nonce.wrapping_add(1);
    Ok(&out[..len])
}

/// Decodes, MIC-verifies and key-derives a Join Accept, producing a fresh
/// [`Session`] seeded with the CFList's extra channels when present, or the
/// default three-channel mask otherwise (spec §4.7's fallback rule).
pub fn handle_join_accept(
    data: &mut [u8],
    app_key: &AppKey,
    dev_nonce: u16,
) -> Result<Session, Error> {
    use lorawan::default_crypto::DefaultFactory;

    let enc = EncryptedJoinAcceptPayload::new_with_factory(data, DefaultFactory)
        .map_err(|_| Error::Fatal)?;
    let dec: DecryptedJoinAcceptPayload<&mut [u8], DefaultFactory> = enc.decrypt(app_key);

    if !dec.validate_mic(app_key) {
        return Err(Error::Fatal);
    }

    let dev_nonce_bytes = DevNonce::from(dev_nonce);
    let nwk_skey: NewSKey = dec.derive_newskey(&dev_nonce_bytes, app_key);
    let app_skey: AppSKey = dec.derive_appskey(&dev_nonce_bytes, app_key);

    let dev_addr = dec.dev_addr().to_owned_array().into();
    let mut session = Session::new(dev_addr, Keys { nwk_skey, app_skey });

    let dl_settings = dec.dl_settings();
    session.rx1_dr_offset = dl_settings.rx1_dr_offset();
    session.rx2_dr = dl_settings.rx2_data_rate();

    // RxDelay of 0 on the wire means 1 second (spec §4.7's explicit clamp).
    let rx_delay = dec.rx_delay();
    session.rx_delay_s = if rx_delay == 0 { 1 } else { rx_delay };

    // No CFList: the device falls back to the default three join channels,
    // already enabled by `ChannelMaskState::default`. A CFList's extra
    // channels are additionally enabled at indices 3.. and their actual
    // frequencies stored on the session so later uplinks can select them
    // (spec §4.7).
    if let Some(cf_list @ CfList::DynamicChannel(_)) = dec.c_f_list() {
        let extra = Eu868::decode_cf_list(&cf_list);
        for (i, _freq) in extra.iter().enumerate() {
            session.channel_mask.set(3 + i, true);
        }
        session.extra_channels = extra;
    }

    Ok(session)
}

/// The three-tier Join regulatory back-off schedule (spec §4.7), each tier
/// covering a rolling hour window of Join attempts and each threshold
/// scaled by the current SF's `2^(SF-5)` time-on-air multiplier relative to
/// SF7 (faster data rates get shorter mandatory silences).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinBackoff {
    pub attempts_in_window: u32,
    pub spreading_factor: u8,
}

impl JoinBackoff {
    /// Minimum silence, in milliseconds, before the next Join Request may
    /// be sent, given how many attempts have already happened in the
    /// current rolling hour.
    pub fn min_silence_ms(&self) -> u32 {
        let base_ms: u32 = if self.attempts_in_window < 1 {
            0
        } else if self.attempts_in_window <= 2 {
            // Tier 1: total Join airtime during the first hour capped to
            // roughly 1% duty cycle (spec §4.7).
            36_000
        } else if self.attempts_in_window <= 12 {
            // Tier 2: following 10 attempts, 0.1% duty cycle.
            360_000
        } else {
            // Tier 3: all further attempts, 0.01% duty cycle.
            3_600_000
        };
        let sf_shift = self.spreading_factor.saturating_sub(5);
        base_ms << sf_shift.min(5)
    }
}

trait DevAddrExt {
    fn to_owned_array(self) -> [u8; 4];
}

impl<'a> DevAddrExt for lorawan::parser::DevAddr<&'a [u8]> {
    fn to_owned_array(self) -> [u8; 4] {
        let r = self.as_ref();
        [r[0], r[1], r[2], r[3]]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt_tier() {
        let b1 = JoinBackoff { attempts_in_window: 1, spreading_factor: 7 };
        let b2 = JoinBackoff { attempts_in_window: 5, spreading_factor: 7 };
        let b3 = JoinBackoff { attempts_in_window: 20, spreading_factor: 7 };
        assert!(b1.min_silence_ms() < b2.min_silence_ms());
        assert!(b2.min_silence_ms() < b3.min_silence_ms());
    }

    #[test]
    fn backoff_scales_with_spreading_factor() {
        let sf7 = JoinBackoff { attempts_in_window: 1, spreading_factor: 7 };
        let sf12 = JoinBackoff { attempts_in_window: 1, spreading_factor: 12 };
        // shift = SF-5, clamped to 5: SF7 -> 2, SF12 -> 5.
        assert_eq!(sf12.min_silence_ms(), sf7.min_silence_ms() << 3);
    }
}
