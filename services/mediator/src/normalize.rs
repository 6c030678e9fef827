//! Price normalization rules
//!
//! Maps a raw floating price to a fixed-point integer tick value with
//! direction-dependent rounding: the ask rounds up from remainder 4, the
//! bid only from remainder 6. The asymmetry widens the effective spread
//! and is contractual; both thresholds must be reproduced exactly.
//!
//! Scaling goes through `rust_decimal` so a price like 1.23456 reaches the
//! truncation step as exactly 123456, not a binary-float neighbour.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use types::errors::ProtocolError;
use types::instrument::Instrument;
use types::quotation::Side;

/// Normalize a raw price into integer ticks for the given side.
///
/// Steps: scale by the instrument multiplier, truncate to an integer,
/// split by 10 into quotient and remainder, round the quotient according
/// to the side's threshold.
pub fn normalize(
    instrument: Instrument,
    side: Side,
    raw_price: f64,
) -> Result<i64, ProtocolError> {
    if !raw_price.is_finite() || raw_price <= 0.0 {
        return Err(ProtocolError::InvalidPrice { value: raw_price });
    }

    let scaled = Decimal::from_f64(raw_price)
        .ok_or(ProtocolError::InvalidPrice { value: raw_price })?
        * Decimal::from(instrument.multiplier());

    let units = scaled
        .trunc()
        .to_i64()
        .ok_or(ProtocolError::InvalidPrice { value: raw_price })?;

    let quotient = units / 10;
    let remainder = units % 10;

    let rounds_up = match side {
        Side::Ask => remainder >= 4,
        Side::Bid => remainder >= 6,
    };

    Ok(if rounds_up { quotient + 1 } else { quotient })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_rounds_up_from_remainder_four() {
        // 1.23454 scales to 123454: quotient 12345, remainder 4
        let ticks = normalize(Instrument::EurUsd, Side::Ask, 1.23454).unwrap();
        assert_eq!(ticks, 12_346);
    }

    #[test]
    fn test_ask_rounds_down_at_remainder_three() {
        let ticks = normalize(Instrument::EurUsd, Side::Ask, 1.23453).unwrap();
        assert_eq!(ticks, 12_345);
    }

    #[test]
    fn test_bid_rounds_up_from_remainder_six() {
        let ticks = normalize(Instrument::EurUsd, Side::Bid, 1.23456).unwrap();
        assert_eq!(ticks, 12_346);
    }

    #[test]
    fn test_bid_rounds_down_at_remainder_five() {
        let ticks = normalize(Instrument::EurUsd, Side::Bid, 1.23455).unwrap();
        assert_eq!(ticks, 12_345);
    }

    #[test]
    fn test_spread_widens_between_thresholds() {
        // Same raw price, remainder 4: ask rounds up, bid rounds down
        let ask = normalize(Instrument::GbpUsd, Side::Ask, 1.23454).unwrap();
        let bid = normalize(Instrument::GbpUsd, Side::Bid, 1.23454).unwrap();
        assert_eq!(ask, 12_346);
        assert_eq!(bid, 12_345);
    }

    #[test]
    fn test_yen_pair_multiplier() {
        // 130.456 scales by 1,000 to 130456: quotient 13045, remainder 6
        let ask = normalize(Instrument::UsdJpy, Side::Ask, 130.456).unwrap();
        let bid = normalize(Instrument::UsdJpy, Side::Bid, 130.456).unwrap();
        assert_eq!(ask, 13_046);
        assert_eq!(bid, 13_046);
    }

    #[test]
    fn test_idempotent_over_renormalization() {
        // A normalized tick value, converted back to its float price,
        // must reproduce the same integer. One tick is 10 scaled units.
        for raw in [1.23451, 1.23454, 1.23456, 1.23459] {
            for side in [Side::Ask, Side::Bid] {
                let ticks = normalize(Instrument::EurUsd, side, raw).unwrap();
                let price = ticks as f64 * 10.0 / Instrument::EurUsd.multiplier() as f64;
                let again = normalize(Instrument::EurUsd, side, price).unwrap();
                assert_eq!(ticks, again, "drift for raw={} side={:?}", raw, side);
            }
        }
    }

    #[test]
    fn test_invalid_prices_rejected() {
        for raw in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.0, -1.2] {
            let err = normalize(Instrument::EurUsd, Side::Ask, raw).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidPrice { .. }));
        }
    }
}
