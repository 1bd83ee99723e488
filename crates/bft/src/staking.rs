//! Read-only calls into the staking system contract.
//!
//! Both queries run through an open executor transition against the fixed
//! contract address. A failed call aborts the caller's current action
//! without advancing any state.

use crate::adapters::Transition;
use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};
use ibex_types::{Bytes, Transaction, STAKING_CONTRACT};

/// Gas limit used when querying the staking contract.
const QUERY_GAS_LIMIT: u64 = 100_000;

sol! {
    function validators() external view returns (address[] memory);
    function accountStake(address account) external view returns (uint256);
}

/// Errors from staking contract queries.
#[derive(Debug, thiserror::Error)]
pub enum StakingError {
    #[error("staking call reverted")]
    CallFailed,

    #[error("staking call execution: {0}")]
    Execution(String),

    #[error("could not decode staking return value: {0}")]
    Decode(String),
}

fn query_tx(from: Address, input: Vec<u8>, nonce: u64) -> Transaction {
    Transaction {
        nonce,
        gas_price: U256::ZERO,
        gas: QUERY_GAS_LIMIT,
        to: Some(STAKING_CONTRACT),
        value: U256::ZERO,
        input: Bytes::from(input),
        from,
        ..Default::default()
    }
}

/// Fetch the validator set from the staking contract.
pub fn query_validators(
    transition: &mut dyn Transition,
    from: Address,
) -> Result<Vec<Address>, StakingError> {
    let call = validatorsCall {};
    let nonce = transition.nonce(from);
    let output = transition
        .apply(&query_tx(from, call.abi_encode(), nonce))
        .map_err(|e| StakingError::Execution(e.to_string()))?;

    if output.failed {
        return Err(StakingError::CallFailed);
    }

    validatorsCall::abi_decode_returns(&output.return_value, true)
        .map(|ret| ret._0)
        .map_err(|e| StakingError::Decode(e.to_string()))
}

/// Fetch one account's stake from the staking contract.
pub fn query_account_stake(
    transition: &mut dyn Transition,
    account: Address,
) -> Result<U256, StakingError> {
    let call = accountStakeCall { account };
    let nonce = transition.nonce(account);
    let output = transition
        .apply(&query_tx(account, call.abi_encode(), nonce))
        .map_err(|e| StakingError::Execution(e.to_string()))?;

    if output.failed {
        return Err(StakingError::CallFailed);
    }

    accountStakeCall::abi_decode_returns(&output.return_value, true)
        .map(|ret| ret._0)
        .map_err(|e| StakingError::Decode(e.to_string()))
}
