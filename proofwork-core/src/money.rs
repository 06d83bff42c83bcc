//! Pure fee-split arithmetic, kept free of I/O so it can be unit tested
//! exhaustively without a store or chain client.

use crate::error::ProofworkError;
use crate::models::BPS_DENOMINATOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub gross_cents: i64,
    pub platform_fee_cents: i64,
    pub proofwork_fee_cents: i64,
    pub net_cents: i64,
}

/// `platformFeeCents = floor(gross * platformFeeBps / 10000)`, zero when no
/// platform wallet is configured. `proofworkFeeCents` is capped by
/// `max_proofwork_fee_bps`. `net = gross - platformFee - proofworkFee` and
/// must be strictly positive.
pub fn split_fees(
    gross_cents: i64,
    platform_fee_bps: i32,
    platform_fee_wallet: Option<&str>,
    proofwork_fee_bps: i32,
    max_proofwork_fee_bps: i32,
) -> Result<FeeSplit, ProofworkError> {
    if gross_cents <= 0 {
        return Err(ProofworkError::validation("gross amount must be positive"));
    }

    let platform_fee_cents = if platform_fee_wallet.is_some() {
        floor_bps(gross_cents, platform_fee_bps)
    } else {
        0
    };

    let capped_proofwork_bps = proofwork_fee_bps.min(max_proofwork_fee_bps);
    let proofwork_fee_cents = floor_bps(gross_cents, capped_proofwork_bps);

    let net_cents = gross_cents - platform_fee_cents - proofwork_fee_cents;
    if net_cents <= 0 {
        return Err(ProofworkError::validation(format!(
            "fee split leaves non-positive net: gross={gross_cents} platform_fee={platform_fee_cents} proofwork_fee={proofwork_fee_cents}"
        )));
    }

    Ok(FeeSplit {
        gross_cents,
        platform_fee_cents,
        proofwork_fee_cents,
        net_cents,
    })
}

fn floor_bps(amount_cents: i64, bps: i32) -> i64 {
    (amount_cents * bps as i64) / BPS_DENOMINATOR
}

/// `1 cent = 10^(decimals-2)` base units, used to convert a cents amount
/// into an on-chain token's smallest unit (e.g. USDC has 6 decimals).
pub fn cents_to_token_base_units(cents: i64, token_decimals: u32) -> Result<u128, ProofworkError> {
    if cents < 0 {
        return Err(ProofworkError::validation("cannot convert negative cents to token units"));
    }
    if token_decimals < 2 {
        return Err(ProofworkError::validation("token decimals must be >= 2 to represent cents"));
    }
    let scale = 10u128
        .checked_pow(token_decimals - 2)
        .ok_or_else(|| ProofworkError::internal("token decimal scale overflow"))?;
    (cents as u128)
        .checked_mul(scale)
        .ok_or_else(|| ProofworkError::internal("token base unit conversion overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_scenario_from_spec() {
        // gross=1500c, platformFeeBps=250, proofworkFeeBps=100 -> platform=37, proofwork=15, net=1448
        let split = split_fees(1500, 250, Some("0xplatform"), 100, 500).unwrap();
        assert_eq!(split.platform_fee_cents, 37);
        assert_eq!(split.proofwork_fee_cents, 15);
        assert_eq!(split.net_cents, 1448);
        assert_eq!(split.gross_cents, split.net_cents + split.platform_fee_cents + split.proofwork_fee_cents);
    }

    #[test]
    fn zero_platform_fee_when_no_wallet_configured() {
        let split = split_fees(1000, 250, None, 100, 500).unwrap();
        assert_eq!(split.platform_fee_cents, 0);
    }

    #[test]
    fn proofwork_fee_bps_is_capped() {
        let split = split_fees(10_000, 0, None, 900, 100).unwrap();
        // capped at 100 bps = 1%, not 900 bps
        assert_eq!(split.proofwork_fee_cents, 100);
    }

    #[test]
    fn non_positive_net_is_rejected() {
        let result = split_fees(100, 5000, Some("0xp"), 5000, 10_000);
        assert!(result.is_err());
    }

    #[test]
    fn dispute_auto_refund_scenario_from_spec() {
        // gross=1000c, proofworkFeeBps=100 -> refund credits gross - proofworkFee = 990
        let split = split_fees(1000, 0, None, 100, 500).unwrap();
        let refund = split.gross_cents - split.proofwork_fee_cents;
        assert_eq!(refund, 990);
    }

    #[test]
    fn cents_to_usdc_base_units() {
        // USDC has 6 decimals: 1 cent = 10^4 base units
        assert_eq!(cents_to_token_base_units(1500, 6).unwrap(), 15_000_000);
    }
}
