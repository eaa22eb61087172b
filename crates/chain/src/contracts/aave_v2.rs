//! Aave v2 protocol interfaces.

use alloy::sol;

sol! {
    /// LendingPool (subset used by the scenario)
    #[sol(rpc)]
    #[derive(Debug)]
    interface ILendingPool {
        event Deposit(address indexed reserve, address user, address indexed onBehalfOf, uint256 amount, uint16 indexed referral);
        event Withdraw(address indexed reserve, address indexed user, address indexed to, uint256 amount);
        event Borrow(address indexed reserve, address user, address indexed onBehalfOf, uint256 amount, uint256 borrowRateMode, uint256 borrowRate, uint16 indexed referral);
        event Repay(address indexed reserve, address indexed user, address indexed repayer, uint256 amount);
        event FlashLoan(address indexed target, address indexed initiator, address indexed asset, uint256 amount, uint256 premium, uint16 referralCode);
        event LiquidationCall(address indexed collateralAsset, address indexed debtAsset, address indexed user, uint256 debtToCover, uint256 liquidatedCollateralAmount, address liquidator, bool receiveAToken);

        function deposit(address asset, uint256 amount, address onBehalfOf, uint16 referralCode) external;

        function withdraw(address asset, uint256 amount, address to) external returns (uint256);

        function borrow(address asset, uint256 amount, uint256 interestRateMode, uint16 referralCode, address onBehalfOf) external;

        function repay(address asset, uint256 amount, uint256 rateMode, address onBehalfOf) external returns (uint256);

        function flashLoan(
            address receiverAddress,
            address[] calldata assets,
            uint256[] calldata amounts,
            uint256[] calldata modes,
            address onBehalfOf,
            bytes calldata params,
            uint16 referralCode
        ) external;

        function liquidationCall(
            address collateralAsset,
            address debtAsset,
            address user,
            uint256 debtToCover,
            bool receiveAToken
        ) external;

        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralETH,
            uint256 totalDebtETH,
            uint256 availableBorrowsETH,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
        );

        function getReservesList() external view returns (address[] memory);

        function paused() external view returns (bool);

        function FLASHLOAN_PREMIUM_TOTAL() external view returns (uint256);

        function getAddressesProvider() external view returns (address);
    }

    /// AaveProtocolDataProvider (reserve and user-reserve views)
    #[sol(rpc)]
    #[derive(Debug)]
    interface IProtocolDataProvider {
        function getReserveConfigurationData(address asset) external view returns (
            uint256 decimals,
            uint256 ltv,
            uint256 liquidationThreshold,
            uint256 liquidationBonus,
            uint256 reserveFactor,
            bool usageAsCollateralEnabled,
            bool borrowingEnabled,
            bool stableBorrowRateEnabled,
            bool isActive,
            bool isFrozen
        );

        function getReserveData(address asset) external view returns (
            uint256 availableLiquidity,
            uint256 totalStableDebt,
            uint256 totalVariableDebt,
            uint256 liquidityRate,
            uint256 variableBorrowRate,
            uint256 stableBorrowRate,
            uint256 averageStableBorrowRate,
            uint256 liquidityIndex,
            uint256 variableBorrowIndex,
            uint40 lastUpdateTimestamp
        );

        function getUserReserveData(address asset, address user) external view returns (
            uint256 currentATokenBalance,
            uint256 currentStableDebt,
            uint256 currentVariableDebt,
            uint256 principalStableDebt,
            uint256 scaledVariableDebt,
            uint256 stableBorrowRate,
            uint256 liquidityRate,
            uint40 stableRateLastUpdated,
            bool usageAsCollateralEnabled
        );

        function getReserveTokensAddresses(address asset) external view returns (
            address aTokenAddress,
            address stableDebtTokenAddress,
            address variableDebtTokenAddress
        );
    }

    /// LendingPoolConfigurator (emergency admin surface)
    #[sol(rpc)]
    interface ILendingPoolConfigurator {
        function setPoolPause(bool val) external;
    }

    /// LendingPoolAddressesProvider
    #[sol(rpc)]
    interface ILendingPoolAddressesProvider {
        function getEmergencyAdmin() external view returns (address);
        function getPoolAdmin() external view returns (address);
        function getPriceOracle() external view returns (address);
    }

    /// Fallback PriceOracle used by test markets (settable prices)
    #[sol(rpc)]
    interface IPriceOracle {
        function getAssetPrice(address asset) external view returns (uint256);
        function setAssetPrice(address asset, uint256 price) external;
    }

    /// AaveOracle (asset -> source registry)
    #[sol(rpc)]
    interface IAaveOracle {
        function getSourceOfAsset(address asset) external view returns (address);
        function getAssetPrice(address asset) external view returns (uint256);
        function getFallbackOracle() external view returns (address);
    }

    /// Flash loan receiver callback
    #[sol(rpc)]
    interface IFlashLoanReceiver {
        function executeOperation(
            address[] calldata assets,
            uint256[] calldata amounts,
            uint256[] calldata premiums,
            address initiator,
            bytes calldata params
        ) external returns (bool);
    }
}
