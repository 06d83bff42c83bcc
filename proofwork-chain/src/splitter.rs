//! Splitter contract call encoding: a single on-chain call that moves
//! the net worker payment and the platform/proofwork fee legs in one
//! transaction, so all of a payout's transfers share one tx hash and
//! one nonce.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
    /// Distributes `amount` of `token` across up to three legs in one
    /// call. A leg with a zero address recipient is skipped on-chain,
    /// matching how zero-amount fee legs are encoded here.
    function split(
        address token,
        address worker,
        address platform,
        address proofwork,
        uint256 netAmount,
        uint256 platformFeeAmount,
        uint256 proofworkFeeAmount
    ) external returns (bool);
}

pub struct SplitLeg {
    pub recipient: Option<Address>,
    pub amount_base_units: U256,
}

pub struct SplitCall {
    pub token: Address,
    pub worker_leg: SplitLeg,
    pub platform_leg: SplitLeg,
    pub proofwork_leg: SplitLeg,
}

impl SplitCall {
    /// ABI-encode the call. Fee legs with a zero amount carry the zero
    /// address per the fee-split contract, matching the encoding
    /// described for the payout splitter.
    pub fn encode(&self) -> Vec<u8> {
        let call = splitCall {
            token: self.token,
            worker: self.worker_leg.recipient.unwrap_or(Address::ZERO),
            platform: self.platform_leg.recipient.unwrap_or(Address::ZERO),
            proofwork: self.proofwork_leg.recipient.unwrap_or(Address::ZERO),
            netAmount: self.worker_leg.amount_base_units,
            platformFeeAmount: self.platform_leg.amount_base_units,
            proofworkFeeAmount: self.proofwork_leg.amount_base_units,
        };
        call.abi_encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn encodes_zero_fee_leg_with_zero_address() {
        let call = SplitCall {
            token: address!("1111111111111111111111111111111111111111"),
            worker_leg: SplitLeg {
                recipient: Some(address!("2222222222222222222222222222222222222222")),
                amount_base_units: U256::from(1_448_000_000_000_000_000u128),
            },
            platform_leg: SplitLeg { recipient: None, amount_base_units: U256::ZERO },
            proofwork_leg: SplitLeg {
                recipient: Some(address!("3333333333333333333333333333333333333333")),
                amount_base_units: U256::from(15_000_000_000_000_000u128),
            },
        };
        let encoded = call.encode();
        assert!(!encoded.is_empty());
        assert_eq!(&encoded[0..4], &splitCall::SELECTOR);
    }
}
