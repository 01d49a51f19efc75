use ethers::prelude::abigen;

abigen!(
    ILiquidityManager,
    r#"[
        function getLiquidity() external view returns (uint256)
        function i_localToken() external view returns (address)
        function getSupportedDestChains() external view returns (uint64[])
        function getCrossChainRebalancer(uint64 chainSelector) external view returns (address remoteRebalancer, address localBridge, address remoteToken, bool enabled)
        function latestConfigDetails() external view returns (uint32 configCount, uint32 blockNumber, bytes32 configDigest)
        event LiquidityTransferred(uint64 indexed ocrSeqNum, uint64 indexed fromChainSelector, uint64 indexed toChainSelector, address to, uint256 amount, bytes bridgeSpecificData, bytes bridgeReturnData)
        event ConfigSet(uint32 previousConfigBlockNumber, bytes32 configDigest, uint64 configCount, address[] signers, address[] transmitters, uint8 f, bytes onchainConfig, uint64 offchainConfigVersion, bytes offchainConfig)
    ]"#
);
