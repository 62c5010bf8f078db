//! Tool trait and capability sets
//!
//! Every tool is a named record {name, description, parameters, execute}.
//! The analyst and executor each get their own [`ToolRegistry`]; the two sets
//! are disjoint.

use crate::error::AdvisorError;
use crate::llm::ToolSpec;
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod chain;
pub mod knowledge;
pub mod market;
pub mod wallet;

pub use chain::ChainClient;
pub use knowledge::{KnowledgeBase, KnowledgeBaseTool};
pub use market::{CryptoNewsTool, TokenPriceTool};
pub use wallet::{ApproveWethTool, BalanceTool, DepositWethTool, EthWrapper, SwapEthToWethTool};

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    /// Tools that sign and broadcast bound their own waits. The caller must
    /// not cancel them, or a submitted transaction loses its hash.
    fn broadcasts(&self) -> bool {
        false
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Declarations handed to the language model, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared JSON-over-HTTP client for the market and search tools.
#[derive(Clone)]
pub struct HttpJsonClient {
    client: Client,
}

impl HttpJsonClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .user_agent(concat!("defi-fund-manager/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| AdvisorError::ToolError(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisorError::ToolError(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        // Some endpoints answer JSON with a text/javascript content type
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| AdvisorError::ToolError(format!("Invalid JSON response: {}", e)))
    }
}

/// Collaborators the tool sets are built from.
#[derive(Clone)]
pub struct ToolDeps {
    pub http: HttpJsonClient,
    pub chain: Option<Arc<ChainClient>>,
    pub knowledge: Arc<KnowledgeBase>,
    pub coingecko_base_url: String,
    pub search_base_url: String,
    /// Budget for each phase of a broadcasting tool (submit, confirm)
    pub tool_timeout: Duration,
}

/// Analyst capability set: price, news, knowledge base.
pub fn create_analyst_registry(deps: &ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(TokenPriceTool::new(
        deps.http.clone(),
        deps.coingecko_base_url.clone(),
    )));
    registry.register(Arc::new(CryptoNewsTool::new(
        deps.http.clone(),
        deps.search_base_url.clone(),
    )));
    registry.register(Arc::new(KnowledgeBaseTool::new(deps.knowledge.clone())));
    registry
}

/// Executor capability set: balance, approve, deposit, swap.
pub fn create_executor_registry(deps: &ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(BalanceTool::new(deps.chain.clone())));
    registry.register(Arc::new(ApproveWethTool::new(deps.chain.clone())));
    registry.register(Arc::new(DepositWethTool::new(deps.chain.clone())));
    let wrapper = deps.chain.clone().map(|chain| chain as Arc<dyn EthWrapper>);
    registry.register(Arc::new(SwapEthToWethTool::new(wrapper, deps.tool_timeout)));
    registry
}

pub(crate) fn string_param<'a>(input: &'a ToolInput, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| input.parameters.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn require_chain<T: ?Sized>(chain: &Option<Arc<T>>) -> Result<&T> {
    chain.as_deref().ok_or_else(|| {
        AdvisorError::ConfigError("RPC_URL is not configured; chain tools are disabled".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps() -> ToolDeps {
        ToolDeps {
            http: HttpJsonClient::new(Duration::from_secs(1)).unwrap(),
            chain: None,
            knowledge: Arc::new(KnowledgeBase::default()),
            coingecko_base_url: "http://127.0.0.1:9".to_string(),
            search_base_url: "http://127.0.0.1:9".to_string(),
            tool_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_capability_sets_are_disjoint() {
        let deps = deps();
        let analyst = create_analyst_registry(&deps);
        let executor = create_executor_registry(&deps);

        assert_eq!(
            analyst.list(),
            vec!["get_crypto_news", "get_token_price", "query_knowledge_base"]
        );
        assert_eq!(
            executor.list(),
            vec![
                "approve_weth_to_aave",
                "deposit_weth_to_aave",
                "get_balance",
                "swap_eth_to_weth"
            ]
        );
        for name in analyst.list() {
            assert!(executor.get(name).is_none());
        }
    }

    #[test]
    fn test_specs_follow_registry() {
        let executor = create_executor_registry(&deps());
        let specs = executor.specs();
        assert_eq!(specs.len(), 4);
        let deposit = specs.iter().find(|s| s.name == "deposit_weth_to_aave").unwrap();
        assert_eq!(deposit.parameters["required"][0], "amount_str");
    }

    #[test]
    fn test_only_swap_broadcasts() {
        let executor = create_executor_registry(&deps());
        let broadcasting: Vec<_> = executor
            .list()
            .into_iter()
            .filter(|name| executor.get(name).map(|t| t.broadcasts()).unwrap_or(false))
            .collect();
        assert_eq!(broadcasting, vec!["swap_eth_to_weth"]);
    }

    #[test]
    fn test_string_param_falls_back() {
        let input = ToolInput {
            tool_name: "get_crypto_news".to_string(),
            parameters: json!({"text": "  aave  "}),
        };
        assert_eq!(string_param(&input, &["query", "text"]), Some("aave"));
        assert_eq!(string_param(&input, &["query"]), None);
    }
}
