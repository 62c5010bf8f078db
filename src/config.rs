//! Environment-driven configuration
//!
//! `.env` is loaded by the binaries; everything here reads plain env vars so
//! tests can build settings by hand.

use crate::error::AdvisorError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_WETH_ADDRESS: &str = "0xfFf9976782d46CC05630D1f6eBAb18b2324d6B14";
pub const DEFAULT_AAVE_POOL_ADDRESS: &str = "0x6Ae43d3271ff6888e7Fc43Fd7321a503ff738951";
pub const DEFAULT_WALLET_ADDRESS: &str = "0xF467257a991351317A76ed5a115f7fAD525231f4";

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub chain: ChainSettings,
    pub dispatch: DispatchSettings,
    pub memory: MemorySettings,
    pub services: ServiceSettings,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChainSettings {
    /// `None` disables every chain-backed tool.
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub wallet_address: String,
    pub chain_id: u64,
    pub weth_address: String,
    pub aave_pool_address: String,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            private_key: None,
            wallet_address: DEFAULT_WALLET_ADDRESS.to_string(),
            chain_id: SEPOLIA_CHAIN_ID,
            weth_address: DEFAULT_WETH_ADDRESS.to_string(),
            aave_pool_address: DEFAULT_AAVE_POOL_ADDRESS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorMode {
    /// Deterministic keyword rules
    Rules,
    /// Gemini-backed routing, still behind the guard layer
    Llm,
}

impl FromStr for SupervisorMode {
    type Err = AdvisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rules" | "rule" => Ok(SupervisorMode::Rules),
            "llm" | "gemini" => Ok(SupervisorMode::Llm),
            other => Err(AdvisorError::ConfigError(format!(
                "SUPERVISOR_MODE must be 'rules' or 'llm', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_hops: usize,
    pub max_tool_rounds: usize,
    pub tool_timeout: Duration,
    pub supervisor_mode: SupervisorMode,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_hops: 4,
            max_tool_rounds: 6,
            tool_timeout: Duration::from_secs(30),
            supervisor_mode: SupervisorMode::Rules,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    pub max_messages: Option<usize>,
    pub idle_ttl: Option<Duration>,
    pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub coingecko_base_url: String,
    pub search_base_url: String,
    pub knowledge_dir: PathBuf,
    pub http_timeout: Duration,
    pub port: u16,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
            search_base_url: "https://api.duckduckgo.com".to_string(),
            knowledge_dir: PathBuf::from("docs"),
            http_timeout: Duration::from_secs(10),
            port: 8000,
        }
    }
}

impl Settings {
    /// Read every section from the process environment.
    pub fn from_env() -> Result<Self> {
        let llm_defaults = LlmSettings::default();
        let llm = LlmSettings {
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: non_empty("GEMINI_MODEL").unwrap_or(llm_defaults.model),
        };

        let chain_defaults = ChainSettings::default();
        let chain = ChainSettings {
            rpc_url: non_empty("RPC_URL")
                .or_else(|| non_empty("INFURA_URL"))
                .or_else(|| non_empty("ALCHEMY_RPC_URL")),
            private_key: non_empty("PRIVATE_KEY"),
            wallet_address: non_empty("MY_ADDRESS").unwrap_or(chain_defaults.wallet_address),
            chain_id: parse_var("CHAIN_ID")?.unwrap_or(chain_defaults.chain_id),
            weth_address: non_empty("WETH_ADDRESS").unwrap_or(chain_defaults.weth_address),
            aave_pool_address: non_empty("AAVE_POOL_ADDRESS")
                .unwrap_or(chain_defaults.aave_pool_address),
        };

        let dispatch_defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            max_hops: parse_var("MAX_HOPS")?.unwrap_or(dispatch_defaults.max_hops),
            max_tool_rounds: parse_var("MAX_TOOL_ROUNDS")?
                .unwrap_or(dispatch_defaults.max_tool_rounds),
            tool_timeout: parse_var::<u64>("TOOL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(dispatch_defaults.tool_timeout),
            supervisor_mode: parse_var("SUPERVISOR_MODE")?
                .unwrap_or(dispatch_defaults.supervisor_mode),
        };

        let memory = MemorySettings {
            max_messages: parse_var("SESSION_MAX_MESSAGES")?,
            idle_ttl: parse_var::<u64>("SESSION_IDLE_TTL_SECS")?.map(Duration::from_secs),
            database_url: non_empty("POSTGRES_URL").or_else(|| non_empty("DATABASE_URL")),
        };

        let service_defaults = ServiceSettings::default();
        let services = ServiceSettings {
            coingecko_base_url: non_empty("COINGECKO_BASE_URL")
                .unwrap_or(service_defaults.coingecko_base_url),
            search_base_url: non_empty("SEARCH_BASE_URL")
                .unwrap_or(service_defaults.search_base_url),
            knowledge_dir: non_empty("KNOWLEDGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(service_defaults.knowledge_dir),
            http_timeout: parse_var::<u64>("HTTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(service_defaults.http_timeout),
            port: match parse_var("PORT")? {
                Some(port) => port,
                None => parse_var("API_PORT")?.unwrap_or(service_defaults.port),
            },
        };

        if dispatch.max_hops == 0 {
            return Err(AdvisorError::ConfigError(
                "MAX_HOPS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            llm,
            chain,
            dispatch,
            memory,
            services,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match non_empty(key) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            AdvisorError::ConfigError(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
    }
}
