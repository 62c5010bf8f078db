//! Market data tools: spot price and news search

use super::{string_param, HttpJsonClient, Tool};
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Search results above this many characters are cut.
const MAX_NEWS_CHARS: usize = 1500;

/// CoinGecko ids for tickers users commonly type.
fn coingecko_id(symbol: &str) -> String {
    let lowered = symbol.trim().to_lowercase();
    match lowered.as_str() {
        "eth" | "weth" | "以太坊" => "ethereum".to_string(),
        "btc" | "比特币" => "bitcoin".to_string(),
        "usdc" => "usd-coin".to_string(),
        "usdt" => "tether".to_string(),
        "sol" => "solana".to_string(),
        _ => lowered,
    }
}

pub struct TokenPriceTool {
    http: HttpJsonClient,
    base_url: String,
}

impl TokenPriceTool {
    pub fn new(http: HttpJsonClient, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for TokenPriceTool {
    fn name(&self) -> &'static str {
        "get_token_price"
    }

    fn description(&self) -> &'static str {
        "查询加密货币的实时市场价格 (美元)。参数 symbol 默认是 'ethereum'，也可以查 'bitcoin', 'aave' 等。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "CoinGecko id such as 'ethereum' or 'bitcoin'"
                }
            }
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let symbol = coingecko_id(string_param(input, &["symbol"]).unwrap_or("ethereum"));
        let url = format!("{}/simple/price", self.base_url);

        let data = match self
            .http
            .get_json(&url, &[("ids", symbol.as_str()), ("vs_currencies", "usd")])
            .await
        {
            Ok(data) => data,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Price lookup failed");
                return Ok(ToolOutput::failure("❌ 查价失败: 网络错误或 API 限制"));
            }
        };

        match data.get(&symbol).and_then(|v| v.get("usd")) {
            Some(price) => {
                info!(symbol = %symbol, price = %price, "Price fetched");
                Ok(ToolOutput::text(format!("📈 {} 当前价格: ${}", symbol, price)))
            }
            None => Ok(ToolOutput::failure(format!(
                "❌ 未查询到 {} 的价格，请尝试使用全称 (如 ethereum 而不是 ETH)。",
                symbol
            ))),
        }
    }
}

pub struct CryptoNewsTool {
    http: HttpJsonClient,
    base_url: String,
}

impl CryptoNewsTool {
    pub fn new(http: HttpJsonClient, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for CryptoNewsTool {
    fn name(&self) -> &'static str {
        "get_crypto_news"
    }

    fn description(&self) -> &'static str {
        "获取加密货币相关的最新市场行情、新闻和情绪分析。输入搜索关键词，返回互联网上的最新数据。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search keywords" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let Some(query) = string_param(input, &["query", "text"]) else {
            return Err(crate::error::AdvisorError::InvalidToolInput(
                "Expected 'query' for get_crypto_news".to_string(),
            ));
        };

        let search_query = format!("{} 最新 行情 新闻", query);
        info!(query = %search_query, "Searching news");

        let data = match self
            .http
            .get_json(
                &format!("{}/", self.base_url),
                &[
                    ("q", search_query.as_str()),
                    ("format", "json"),
                    ("no_html", "1"),
                    ("skip_disambig", "1"),
                ],
            )
            .await
        {
            Ok(data) => data,
            Err(e) => {
                return Ok(ToolOutput::failure(format!(
                    "互联网检索暂时失败，请重试。错误信息: {}",
                    e
                )))
            }
        };

        let snippets = collect_snippets(&data);
        if snippets.is_empty() {
            return Ok(ToolOutput::text(format!("没有检索到与 '{}' 相关的最新资讯。", query)));
        }

        Ok(ToolOutput::text(truncate_chars(&snippets.join("\n"), MAX_NEWS_CHARS)))
    }
}

/// Pull the abstract and related-topic texts out of an instant-answer payload.
fn collect_snippets(data: &Value) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(text) = data.get("AbstractText").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            out.push(text.trim().to_string());
        }
    }

    let mut stack: Vec<&Value> = data
        .get("RelatedTopics")
        .and_then(Value::as_array)
        .map(|topics| topics.iter().collect())
        .unwrap_or_default();
    stack.reverse();

    while let Some(topic) = stack.pop() {
        if let Some(text) = topic.get("Text").and_then(Value::as_str) {
            out.push(text.trim().to_string());
        }
        // Grouped topics nest one level down
        if let Some(nested) = topic.get("Topics").and_then(Value::as_array) {
            stack.extend(nested.iter().rev());
        }
    }

    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...(截断)", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_aliases() {
        assert_eq!(coingecko_id("ETH"), "ethereum");
        assert_eq!(coingecko_id(" aave "), "aave");
        assert_eq!(coingecko_id("btc"), "bitcoin");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "行情".repeat(1000);
        let cut = truncate_chars(&text, MAX_NEWS_CHARS);
        assert!(cut.ends_with("...(截断)"));
        assert_eq!(cut.chars().count(), MAX_NEWS_CHARS + "...(截断)".chars().count());
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_collect_snippets_flattens_groups() {
        let data = json!({
            "AbstractText": "Ethereum is a blockchain.",
            "RelatedTopics": [
                {"Text": "ETH ETF inflows"},
                {"Name": "Layer 2", "Topics": [{"Text": "Arbitrum"}, {"Text": "Optimism"}]},
                {"Text": "Staking yields"}
            ]
        });
        assert_eq!(
            collect_snippets(&data),
            vec![
                "Ethereum is a blockchain.",
                "ETH ETF inflows",
                "Arbitrum",
                "Optimism",
                "Staking yields"
            ]
        );
    }

    #[tokio::test]
    async fn test_news_requires_query() {
        let tool = CryptoNewsTool::new(
            HttpJsonClient::new(std::time::Duration::from_secs(1)).unwrap(),
            "http://127.0.0.1:9".to_string(),
        );
        let input = ToolInput {
            tool_name: "get_crypto_news".to_string(),
            parameters: json!({}),
        };
        assert!(tool.execute(&input).await.is_err());
    }
}
