//! Mintable ERC20 used for test assets.

use alloy::sol;

sol! {
    /// MintableERC20: `mint` credits the caller
    #[sol(rpc)]
    #[derive(Debug)]
    interface IMintableERC20 {
        function mint(uint256 value) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    #[test]
    fn test_erc20_selectors() {
        assert_eq!(hex::encode(IMintableERC20::approveCall::SELECTOR), "095ea7b3");
        assert_eq!(hex::encode(IMintableERC20::balanceOfCall::SELECTOR), "70a08231");
        assert_eq!(hex::encode(IMintableERC20::mintCall::SELECTOR), "a0712d68");
    }
}
