//! ERC-20 bindings shared by the chain client and every bridge adapter

use ethers::abi::AbiEncode;
use ethers::contract::abigen;
use ethers::types::{Address, Bytes, U256};

use super::TxRequest;

abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

/// `token.approve(spender, amount)` as an unsigned call
pub fn approve_call(token: Address, spender: Address, amount: U256) -> TxRequest {
    let data: Bytes = ApproveCall { spender, amount }.encode().into();
    TxRequest::call(token, data)
}
