use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);

    #[derive(Debug)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    /// Liquidity lens. With `isBuy = false` it quotes a sell of `amountIn`
    /// token units into the native asset and reports the router that fills it.
    #[derive(Debug)]
    interface ILens {
        function getAmountOut(address token, uint256 amountIn, bool isBuy)
            external
            view
            returns (address router, uint256 amountOut);
    }

    #[derive(Debug)]
    interface IRouter {
        struct SellParams {
            uint256 amountIn;
            uint256 amountOutMin;
            address token;
            address to;
            uint256 deadline;
        }

        function sell(SellParams calldata p) external;
    }
}

pub fn decode_transfer_event(log: &Log) -> anyhow::Result<Transfer> {
    let log_data = log.data();
    let decoded = Transfer::decode_raw_log(log.topics(), &log_data.data)?;
    Ok(decoded)
}
