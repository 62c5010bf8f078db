//! Blockchain client shared by the executor tools
//!
//! Constructed once from [`ChainSettings`] and handed to tools as an `Arc`.
//! Intent builders only encode calldata; `submit_wrap` is the one path that
//! signs and submits.

use crate::config::ChainSettings;
use crate::error::AdvisorError;
use crate::models::{TransactionIntent, TxData};
use crate::Result;
use ethers::abi::{parse_abi, Abi, Token};
use ethers::prelude::*;
use ethers::utils::{format_ether, parse_ether, to_checksum};
use tracing::{info, warn};

/// Human-readable ABI fragments for the contracts we touch.
const WETH_ABI: &[&str] = &[
    "function deposit() payable",
    "function approve(address guy, uint256 wad) returns (bool)",
];

const AAVE_POOL_ABI: &[&str] = &[
    "function supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode)",
];

/// Allowance granted to the Aave pool in one approval.
const APPROVAL_AMOUNT_ETH: &str = "10000";

struct ContractBook {
    weth: Address,
    aave_pool: Address,
    weth_abi: Abi,
    aave_pool_abi: Abi,
}

impl ContractBook {
    fn new(settings: &ChainSettings) -> Result<Self> {
        Ok(Self {
            weth: parse_address("WETH_ADDRESS", &settings.weth_address)?,
            aave_pool: parse_address("AAVE_POOL_ADDRESS", &settings.aave_pool_address)?,
            weth_abi: parse_abi(WETH_ABI)
                .map_err(|e| AdvisorError::ConfigError(format!("WETH ABI: {}", e)))?,
            aave_pool_abi: parse_abi(AAVE_POOL_ABI)
                .map_err(|e| AdvisorError::ConfigError(format!("Aave pool ABI: {}", e)))?,
        })
    }
}

pub struct ChainClient {
    provider: Provider<Http>,
    signer: Option<LocalWallet>,
    wallet: Address,
    chain_id: u64,
    contracts: ContractBook,
}

impl ChainClient {
    pub fn new(settings: &ChainSettings) -> Result<Self> {
        let rpc_url = settings.rpc_url.as_deref().ok_or_else(|| {
            AdvisorError::ConfigError(
                "RPC_URL not found (also tried INFURA_URL and ALCHEMY_RPC_URL)".to_string(),
            )
        })?;

        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| AdvisorError::ConfigError(format!("Invalid RPC_URL: {}", e)))?;

        let wallet = parse_address("MY_ADDRESS", &settings.wallet_address)?;

        let signer = match settings.private_key.as_deref() {
            Some(key) => {
                let signer = key
                    .parse::<LocalWallet>()
                    .map_err(|e| AdvisorError::ConfigError(format!("Invalid PRIVATE_KEY: {}", e)))?
                    .with_chain_id(settings.chain_id);
                if signer.address() != wallet {
                    warn!(
                        signer = %to_checksum(&signer.address(), None),
                        wallet = %to_checksum(&wallet, None),
                        "PRIVATE_KEY does not control MY_ADDRESS"
                    );
                }
                Some(signer)
            }
            None => None,
        };

        Ok(Self {
            provider,
            signer,
            wallet,
            chain_id: settings.chain_id,
            contracts: ContractBook::new(settings)?,
        })
    }

    /// Confirm the node answers and serves the configured chain.
    pub async fn health_check(&self) -> Result<()> {
        let remote = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| AdvisorError::ChainError(format!("RPC unreachable: {}", e)))?;

        if remote != U256::from(self.chain_id) {
            warn!(
                expected = self.chain_id,
                actual = %remote,
                "RPC node serves a different chain"
            );
        }
        info!(chain_id = self.chain_id, "Connected to RPC node");
        Ok(())
    }

    pub fn wallet_address(&self) -> String {
        to_checksum(&self.wallet, None)
    }

    /// Latest-block ETH balance of the wallet, in ether.
    pub async fn balance_eth(&self) -> Result<f64> {
        let wei = self
            .provider
            .get_balance(self.wallet, None)
            .await
            .map_err(|e| AdvisorError::ChainError(e.to_string()))?;

        format_ether(wei)
            .parse::<f64>()
            .map_err(|e| AdvisorError::ChainError(format!("balance conversion: {}", e)))
    }

    /// `WETH.approve(aavePool, 10000 ether)` for the wallet to sign.
    pub fn approve_intent(&self) -> Result<TransactionIntent> {
        let amount = parse_ether(APPROVAL_AMOUNT_ETH)
            .map_err(|e| AdvisorError::ChainError(e.to_string()))?;
        let data = encode_call(
            &self.contracts.weth_abi,
            "approve",
            &[Token::Address(self.contracts.aave_pool), Token::Uint(amount)],
        )?;

        Ok(TransactionIntent::new(
            "正在请求 WETH 授权 (Approve)，请在钱包确认。\n授权成功后，你才能进行存款操作。",
            TxData {
                to: to_checksum(&self.contracts.weth, None),
                data,
                value: "0x0".to_string(),
            },
        ))
    }

    /// `AavePool.supply(WETH, amount, wallet, 0)` for the wallet to sign.
    pub fn supply_intent(&self, amount_str: &str) -> Result<TransactionIntent> {
        let (clean, amount) = parse_amount(amount_str)?;
        let data = encode_call(
            &self.contracts.aave_pool_abi,
            "supply",
            &[
                Token::Address(self.contracts.weth),
                Token::Uint(amount),
                Token::Address(self.wallet),
                Token::Uint(U256::zero()),
            ],
        )?;

        Ok(TransactionIntent::new(
            format!("已准备好存入 {} WETH 到 Aave，请在钱包确认。", clean),
            TxData {
                to: to_checksum(&self.contracts.aave_pool, None),
                data,
                value: "0x0".to_string(),
            },
        ))
    }

    /// Sign and submit `WETH.deposit()` carrying `amount_str` ETH. Returns
    /// the hash as soon as the node accepts the transaction.
    pub async fn submit_wrap(&self, amount_str: &str) -> Result<String> {
        let signer = self.signer.clone().ok_or_else(|| {
            AdvisorError::ConfigError("PRIVATE_KEY not configured".to_string())
        })?;
        let (_, amount) = parse_amount(amount_str)?;
        let data = self
            .contracts
            .weth_abi
            .function("deposit")
            .and_then(|f| f.encode_input(&[]))
            .map_err(|e| AdvisorError::ChainError(e.to_string()))?;

        let client = SignerMiddleware::new(self.provider.clone(), signer);
        let tx = TransactionRequest::new()
            .from(self.wallet)
            .to(self.contracts.weth)
            .value(amount)
            .data(data);

        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(|e| AdvisorError::ChainError(e.to_string()))?;
        let tx_hash = format!("{:#x}", pending.tx_hash());
        info!(tx_hash = %tx_hash, "Wrap transaction submitted");
        Ok(tx_hash)
    }

    /// Wait for one confirmation of a submitted transaction.
    pub async fn await_receipt(&self, tx_hash: &str) -> Result<()> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|e| AdvisorError::ChainError(format!("bad tx hash {}: {}", tx_hash, e)))?;

        let receipt = PendingTransaction::new(hash, &self.provider)
            .await
            .map_err(|e| AdvisorError::ChainError(e.to_string()))?;
        match receipt {
            Some(receipt) if receipt.status == Some(U64::from(0)) => Err(AdvisorError::ChainError(
                format!("transaction {} reverted", tx_hash),
            )),
            Some(_) => Ok(()),
            None => {
                warn!(tx_hash = %tx_hash, "Transaction dropped from mempool");
                Err(AdvisorError::ChainError(format!(
                    "transaction {} was dropped",
                    tx_hash
                )))
            }
        }
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| AdvisorError::ConfigError(format!("{} is not an address: {}", key, e)))
}

fn encode_call(abi: &Abi, name: &str, args: &[Token]) -> Result<String> {
    let calldata = abi
        .function(name)
        .and_then(|f| f.encode_input(args))
        .map_err(|e| AdvisorError::ChainError(format!("encode {}: {}", name, e)))?;
    Ok(format!("0x{}", hex::encode(calldata)))
}

/// Strip unit suffixes ("0.001 WETH") and convert to wei.
pub fn parse_amount(amount_str: &str) -> Result<(String, U256)> {
    let clean = amount_str
        .to_lowercase()
        .replace("weth", "")
        .replace("eth", "")
        .trim()
        .to_string();

    if clean.is_empty() || clean.starts_with('-') {
        return Err(AdvisorError::InvalidToolInput(format!(
            "'{}' is not a positive amount",
            amount_str
        )));
    }

    let wei = parse_ether(clean.as_str()).map_err(|e| {
        AdvisorError::InvalidToolInput(format!("'{}' is not an amount: {}", amount_str, e))
    })?;
    if wei.is_zero() {
        return Err(AdvisorError::InvalidToolInput(
            "amount must be greater than zero".to_string(),
        ));
    }

    Ok((clean, wei))
}
