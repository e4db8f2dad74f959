//! # External Interfaces
//!
//! Every network dependency of the engine sits behind one of the traits in
//! this module: chain state reads, pre-submission simulation, transaction
//! submission, and bridge quoting. Production wires RPC-backed
//! implementations; tests wire in-memory fakes. The settlement-call encoder
//! also lives here since it is the one place calldata is built.

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use std::time::Duration;

use crate::config::PerChainConfig;
use crate::errors::{BridgeError, ExecutionError, GasError, NonceError};
use crate::types::{
    Opportunity, SettlementCall, SimulationResult, SubmissionStatus, TxGasPrice, TxRef,
};

/// Read-side view of a chain: the seed/resync source for nonce allocation
/// and the inputs to the gas fee policy.
#[async_trait]
pub trait ChainStateProvider: Send + Sync {
    /// The sender's next nonce as the chain currently sees it.
    async fn sender_nonce(&self, chain_id: u64, sender: Address) -> Result<u64, NonceError>;

    async fn base_fee(&self, chain_id: u64) -> Result<U256, GasError>;

    /// Priority fees paid by recently included transactions, in wei.
    /// May be empty on quiet chains.
    async fn recent_tips(&self, chain_id: u64) -> Result<Vec<U256>, GasError>;

    /// USD price of the chain's native gas asset.
    async fn native_usd_price(&self, chain_id: u64) -> Result<f64, GasError>;
}

/// Pre-submission simulation of the full settlement call against current
/// chain state. Submission without a passing simulation is forbidden.
#[async_trait]
pub trait SimulationRpc: Send + Sync {
    async fn simulate(&self, call: &SettlementCall) -> Result<SimulationResult, ExecutionError>;
}

/// A way of getting a signed settlement transaction on chain: public
/// mempool or a private relay. Which one is chosen per chain and trade
/// value; the coordinator does not care beyond this trait.
#[async_trait]
pub trait SubmissionChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(
        &self,
        call: &SettlementCall,
        gas: &TxGasPrice,
        nonce: u64,
    ) -> Result<TxRef, ExecutionError>;

    async fn status(&self, tx: &TxRef) -> Result<SubmissionStatus, ExecutionError>;
}

/// One bridge quote, used to refresh a `BridgeEdge`.
#[derive(Debug, Clone)]
pub struct BridgeQuote {
    pub fee_bps: u32,
    pub flat_fee_usd: f64,
    pub estimated_latency: Duration,
    pub solver_liquidity_cap: U256,
    pub liquidity_usd: f64,
}

/// Quoting interface of a bridge provider. Implementations exist per
/// provider; the graph refresh task fans out across all of them.
#[async_trait]
pub trait BridgeQuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the provider can move `asset` between the two chains at all.
    fn supports(&self, src_chain: u64, dst_chain: u64, asset: Address) -> bool;

    async fn quote(
        &self,
        src_chain: u64,
        dst_chain: u64,
        asset: Address,
        amount: U256,
    ) -> Result<BridgeQuote, BridgeError>;
}

/// Build the settlement contract invocation for an opportunity.
///
/// The on-chain deadline is derived from the opportunity's expiry — the
/// horizon fixed at discovery time — never from the clock at encoding time,
/// so a delayed pipeline cannot stretch an opportunity's validity.
pub fn encode_settlement(
    chain: &PerChainConfig,
    opportunity: &Opportunity,
) -> Result<SettlementCall, ExecutionError> {
    let deadline = opportunity.expiry.timestamp();
    if deadline <= 0 {
        return Err(ExecutionError::Encoding(format!(
            "non-positive deadline for opportunity {}",
            opportunity.id
        )));
    }

    let route_tokens: Vec<Token> = opportunity
        .hops
        .iter()
        .map(|hop| {
            Token::Tuple(vec![
                Token::Uint(U256::from(hop.chain_id)),
                Token::Address(hop.asset),
                Token::String(hop.channel.clone()),
            ])
        })
        .collect();
    let encoded_route = ethers::abi::encode(&[Token::Array(route_tokens)]);

    let selector = ethers::utils::id("executeArbitrage(address,address,uint256,bytes,uint256,uint256)");
    let args = ethers::abi::encode(&[
        Token::Address(chain.loan_source),
        Token::Address(opportunity.loan_asset),
        Token::Uint(opportunity.loan_amount),
        Token::Bytes(encoded_route),
        Token::Uint(opportunity.min_acceptable_output),
        Token::Uint(U256::from(deadline as u64)),
    ]);

    let mut calldata = Vec::with_capacity(4 + args.len());
    calldata.extend_from_slice(&selector);
    calldata.extend_from_slice(&args);

    Ok(SettlementCall {
        chain_id: opportunity.origin_chain_id,
        sender: chain.sender,
        contract: chain.settlement_contract,
        calldata: Bytes::from(calldata),
        gas_limit: chain.default_gas_limit,
    })
}
