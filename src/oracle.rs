use crate::contracts::{IERC20, ILens};
use crate::rpc::RpcClient;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Which way a quote points. The quoting contract takes a bare boolean and
/// a reversed flag silently returns wrong magnitudes instead of failing,
/// so the direction is spelled out at this seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// Token in, native asset out (`isBuy = false`)
    Sell,
    /// Native asset in, token out (`isBuy = true`)
    Buy,
}

impl SwapDirection {
    pub fn is_buy(self) -> bool {
        matches!(self, SwapDirection::Buy)
    }
}

/// A priced route back to the native asset.
#[derive(Debug, Clone)]
pub struct Quote {
    pub router: Address,
    pub amount_out: U256,
}

/// Read-only pricing seam. Call errors never escape: an unquotable token
/// is simply not liquid and quotes to zero.
#[async_trait]
pub trait Valuation: Send + Sync {
    /// True when a tiny representative sell would return any native asset.
    async fn probe_liquidity(&self, token: Address) -> bool;

    /// Native-asset output for selling `amount_in` raw units, zero when no
    /// route exists.
    async fn quote_to_native(&self, token: Address, amount_in: U256) -> U256;

    /// Full quote including the router that would fill the sell.
    async fn quote_route(&self, token: Address, amount_in: U256) -> Option<Quote>;
}

/// Valuation backed by the exchange's lens contract.
#[derive(Clone)]
pub struct LensOracle {
    client: RpcClient,
    lens: Address,
}

impl LensOracle {
    pub fn new(client: RpcClient, lens: Address) -> Self {
        LensOracle { client, lens }
    }

    async fn get_amount_out(
        &self,
        token: Address,
        amount_in: U256,
        direction: SwapDirection,
    ) -> Result<Quote> {
        let call = ILens::getAmountOutCall {
            token,
            amountIn: amount_in,
            isBuy: direction.is_buy(),
        };
        let ret = self.client.call_contract(self.lens, &call).await?;

        Ok(Quote {
            router: ret.router,
            amount_out: ret.amountOut,
        })
    }
}

#[async_trait]
impl Valuation for LensOracle {
    async fn probe_liquidity(&self, token: Address) -> bool {
        // The zero address stands in for the native asset and never trades
        if token == Address::ZERO {
            return false;
        }

        let decimals = match self.client.call_contract(token, &IERC20::decimalsCall {}).await {
            Ok(decimals) => decimals,
            Err(e) => {
                debug!("decimals() failed for {:?}: {}", token, e);
                return false;
            }
        };

        match self
            .get_amount_out(token, probe_amount(decimals), SwapDirection::Sell)
            .await
        {
            Ok(quote) => quote.amount_out > U256::ZERO,
            Err(e) => {
                debug!("Liquidity probe failed for {:?}: {}", token, e);
                false
            }
        }
    }

    async fn quote_to_native(&self, token: Address, amount_in: U256) -> U256 {
        match self.quote_route(token, amount_in).await {
            Some(quote) => quote.amount_out,
            None => U256::ZERO,
        }
    }

    async fn quote_route(&self, token: Address, amount_in: U256) -> Option<Quote> {
        if token == Address::ZERO || amount_in.is_zero() {
            return None;
        }

        match self
            .get_amount_out(token, amount_in, SwapDirection::Sell)
            .await
        {
            Ok(quote) if quote.amount_out > U256::ZERO => Some(quote),
            Ok(_) => None,
            Err(e) => {
                debug!("Quote failed for {:?}: {}", token, e);
                None
            }
        }
    }
}

/// One thousandth of a whole token, or a single base unit for tokens with
/// fewer than three decimals.
fn probe_amount(decimals: u8) -> U256 {
    if decimals >= 3 {
        U256::from(10u64).pow(U256::from(decimals - 3))
    } else {
        U256::ONE
    }
}
