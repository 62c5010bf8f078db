//! Executor tools: balance, approval, Aave deposit, ETH wrapping

use super::{require_chain, string_param, ChainClient, Tool};
use crate::error::AdvisorError;
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

fn amount_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "amount_str": { "type": "string", "description": description }
        },
        "required": ["amount_str"]
    })
}

fn require_amount(input: &ToolInput) -> Result<&str> {
    string_param(input, &["amount_str", "amount"]).ok_or_else(|| {
        AdvisorError::InvalidToolInput(format!("Expected 'amount_str' for {}", input.tool_name))
    })
}

pub struct BalanceTool {
    chain: Option<Arc<ChainClient>>,
}

impl BalanceTool {
    pub fn new(chain: Option<Arc<ChainClient>>) -> Self {
        Self { chain }
    }
}

#[async_trait::async_trait]
impl Tool for BalanceTool {
    fn name(&self) -> &'static str {
        "get_balance"
    }

    fn description(&self) -> &'static str {
        "查询当前连接钱包的 ETH 余额。不需要任何参数。"
    }

    async fn execute(&self, _input: &ToolInput) -> Result<ToolOutput> {
        let chain = require_chain(&self.chain)?;

        match chain.balance_eth().await {
            Ok(balance) => Ok(ToolOutput::text(format!(
                "💰 当前余额: {:.5} ETH (地址: {})",
                balance,
                chain.wallet_address()
            ))),
            Err(e) => {
                warn!(error = %e, "Balance query failed");
                Ok(ToolOutput::failure(format!("❌ 查询余额失败: {}", e)))
            }
        }
    }
}

pub struct ApproveWethTool {
    chain: Option<Arc<ChainClient>>,
}

impl ApproveWethTool {
    pub fn new(chain: Option<Arc<ChainClient>>) -> Self {
        Self { chain }
    }
}

#[async_trait::async_trait]
impl Tool for ApproveWethTool {
    fn name(&self) -> &'static str {
        "approve_weth_to_aave"
    }

    fn description(&self) -> &'static str {
        "授权 Aave 协议使用我的 WETH。在执行存钱(deposit)之前，必须先执行一次这个工具。"
    }

    async fn execute(&self, _input: &ToolInput) -> Result<ToolOutput> {
        let chain = require_chain(&self.chain)?;

        match chain.approve_intent() {
            Ok(intent) => {
                info!(to = %intent.tx_data.to, "Approval transaction prepared");
                ToolOutput::transaction(&intent)
            }
            Err(e) => Ok(ToolOutput::failure(format!("授权构建失败: {}", e))),
        }
    }
}

pub struct DepositWethTool {
    chain: Option<Arc<ChainClient>>,
}

impl DepositWethTool {
    pub fn new(chain: Option<Arc<ChainClient>>) -> Self {
        Self { chain }
    }
}

#[async_trait::async_trait]
impl Tool for DepositWethTool {
    fn name(&self) -> &'static str {
        "deposit_weth_to_aave"
    }

    fn description(&self) -> &'static str {
        "构造将 WETH 存入 Aave 的交易数据。需要先完成 approve_weth_to_aave 授权。"
    }

    fn parameters(&self) -> Value {
        amount_schema("WETH amount, e.g. \"0.001\"")
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let chain = require_chain(&self.chain)?;
        let amount = require_amount(input)?;

        match chain.supply_intent(amount) {
            Ok(intent) => {
                info!(amount = %amount, "Deposit transaction prepared");
                ToolOutput::transaction(&intent)
            }
            Err(e) => Ok(ToolOutput::failure(format!("系统配置错误: {}", e))),
        }
    }
}

/// Submit-then-confirm seam for ETH wrapping.
#[async_trait::async_trait]
pub trait EthWrapper: Send + Sync {
    /// Broadcast the wrap and return its hash.
    async fn submit_wrap(&self, amount_str: &str) -> Result<String>;

    async fn await_receipt(&self, tx_hash: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl EthWrapper for ChainClient {
    async fn submit_wrap(&self, amount_str: &str) -> Result<String> {
        ChainClient::submit_wrap(self, amount_str).await
    }

    async fn await_receipt(&self, tx_hash: &str) -> Result<()> {
        ChainClient::await_receipt(self, tx_hash).await
    }
}

pub struct SwapEthToWethTool {
    wrapper: Option<Arc<dyn EthWrapper>>,
    phase_timeout: Duration,
}

impl SwapEthToWethTool {
    pub fn new(wrapper: Option<Arc<dyn EthWrapper>>, phase_timeout: Duration) -> Self {
        Self {
            wrapper,
            phase_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SwapEthToWethTool {
    fn name(&self) -> &'static str {
        "swap_eth_to_weth"
    }

    fn description(&self) -> &'static str {
        "将 ETH 兑换为 WETH (Wrap Ether)。Aave 协议需要 WETH 才能存款。该操作会直接签名并广播交易。如果结果显示交易已提交，不要再次调用。"
    }

    fn parameters(&self) -> Value {
        amount_schema("ETH amount to wrap, e.g. \"0.001\"")
    }

    fn broadcasts(&self) -> bool {
        true
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let wrapper = require_chain(&self.wrapper)?;
        let amount = require_amount(input)?;

        let tx_hash = match timeout(self.phase_timeout, wrapper.submit_wrap(amount)).await {
            Ok(Ok(tx_hash)) => tx_hash,
            Ok(Err(e)) => {
                warn!(error = %e, "Wrap transaction failed");
                return Ok(ToolOutput::failure(format!("❌ 兑换失败: {}", e)));
            }
            // The node may or may not have accepted it
            Err(_) => {
                warn!(amount = %amount, "Wrap submission timed out, status unknown");
                return Ok(ToolOutput::failure(
                    "⚠️ 兑换交易提交超时，状态未知。请先在钱包或区块浏览器中核实，不要重复兑换。",
                ));
            }
        };

        match timeout(self.phase_timeout, wrapper.await_receipt(&tx_hash)).await {
            Ok(Ok(())) => Ok(ToolOutput::text(format!(
                "🔄 兑换成功！\n已将 {} ETH 换为 WETH。\n交易哈希: {}",
                amount, tx_hash
            ))),
            Ok(Err(e)) => {
                warn!(tx_hash = %tx_hash, error = %e, "Wrap transaction not confirmed");
                Ok(ToolOutput::failure(format!(
                    "❌ 兑换交易 {} 未能确认: {}",
                    tx_hash, e
                )))
            }
            Err(_) => {
                info!(tx_hash = %tx_hash, "Wrap submitted, confirmation still pending");
                Ok(ToolOutput::text(format!(
                    "⏳ 兑换交易已提交，等待确认: {}\n{} ETH 正在换为 WETH，请勿重复兑换，稍后可查询余额确认到账。",
                    tx_hash, amount
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainSettings;
    use crate::models::{contains_transaction_marker, TransactionIntent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offline_chain() -> Option<Arc<ChainClient>> {
        let settings = ChainSettings {
            rpc_url: Some("http://127.0.0.1:8545".to_string()),
            ..ChainSettings::default()
        };
        Some(Arc::new(ChainClient::new(&settings).unwrap()))
    }

    fn input(name: &str, parameters: Value) -> ToolInput {
        ToolInput {
            tool_name: name.to_string(),
            parameters,
        }
    }

    #[tokio::test]
    async fn test_approve_emits_transaction_payload() {
        let tool = ApproveWethTool::new(offline_chain());
        let output = tool.execute(&input("approve_weth_to_aave", json!({}))).await.unwrap();

        assert!(output.success);
        assert!(output.content.starts_with(r#"{"type":"transaction""#));
        let intent: TransactionIntent = serde_json::from_str(&output.content).unwrap();
        assert!(intent.message.contains("Approve"));
    }

    #[tokio::test]
    async fn test_deposit_emits_transaction_payload() {
        let tool = DepositWethTool::new(offline_chain());
        let output = tool
            .execute(&input("deposit_weth_to_aave", json!({"amount_str": "0.001 WETH"})))
            .await
            .unwrap();
        assert!(contains_transaction_marker(&output.content));
    }

    #[tokio::test]
    async fn test_deposit_bad_amount_is_text_failure() {
        let tool = DepositWethTool::new(offline_chain());
        let output = tool
            .execute(&input("deposit_weth_to_aave", json!({"amount_str": "lots"})))
            .await
            .unwrap();
        assert!(!output.success);
        assert!(!output.is_transaction());
    }

    #[tokio::test]
    async fn test_chain_tools_disabled_without_rpc() {
        let tool = BalanceTool::new(None);
        let result = tool.execute(&input("get_balance", json!({}))).await;
        assert!(matches!(result, Err(AdvisorError::ConfigError(_))));
    }

    fn offline_wrapper() -> Option<Arc<dyn EthWrapper>> {
        offline_chain().map(|chain| chain as Arc<dyn EthWrapper>)
    }

    struct StubWrapper {
        broadcasts: AtomicUsize,
        confirm_delay: Duration,
    }

    impl StubWrapper {
        fn new(confirm_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                broadcasts: AtomicUsize::new(0),
                confirm_delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl EthWrapper for StubWrapper {
        async fn submit_wrap(&self, _amount_str: &str) -> Result<String> {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            Ok("0xabc123".to_string())
        }

        async fn await_receipt(&self, _tx_hash: &str) -> Result<()> {
            tokio::time::sleep(self.confirm_delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_confirmation_reports_submitted_hash() {
        let wrapper = StubWrapper::new(Duration::from_secs(5));
        let tool = SwapEthToWethTool::new(Some(wrapper.clone()), Duration::from_millis(50));

        let output = tool
            .execute(&input("swap_eth_to_weth", json!({"amount_str": "0.001"})))
            .await
            .unwrap();

        assert!(output.success);
        assert!(output.content.contains("已提交，等待确认: 0xabc123"));
        assert_eq!(wrapper.broadcasts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_confirmed_swap_reports_success() {
        let wrapper = StubWrapper::new(Duration::ZERO);
        let tool = SwapEthToWethTool::new(Some(wrapper), Duration::from_millis(50));

        let output = tool
            .execute(&input("swap_eth_to_weth", json!({"amount_str": "0.001"})))
            .await
            .unwrap();
        assert!(output.content.contains("兑换成功"));
        assert!(output.content.contains("0xabc123"));
    }

    #[tokio::test]
    async fn test_swap_requires_amount() {
        let tool = SwapEthToWethTool::new(offline_wrapper(), Duration::from_secs(1));
        let result = tool.execute(&input("swap_eth_to_weth", json!({}))).await;
        assert!(matches!(result, Err(AdvisorError::InvalidToolInput(_))));
    }
}
