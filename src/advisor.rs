//! Turn entry point
//!
//! Owns the dispatch graph and the session store. One call = one user turn:
//! lock session → load history → run graph → persist new messages → answer.
//! Nothing below this layer's errors reaches the caller as a fault; they
//! come back as answer text.

use crate::agent::ToolAgent;
use crate::config::{Settings, SupervisorMode};
use crate::dispatch::{DispatchGraph, TurnOutcome};
use crate::error::AdvisorError;
use crate::llm::{GeminiModel, LanguageModel};
use crate::memory::{build_session_store, SessionLocks, SessionStore, DEFAULT_SESSION_ID};
use crate::models::{Specialist, TransactionIntent, TurnRequest, TurnResponse};
use crate::supervisor::{GeminiSupervisor, RuleSupervisor, Supervisor};
use crate::tools::{
    create_analyst_registry, create_executor_registry, ChainClient, HttpJsonClient, KnowledgeBase,
    ToolDeps,
};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const EMPTY_MESSAGE_ANSWER: &str = "尴尬了，没收到消息...";

pub struct Advisor {
    graph: DispatchGraph,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
}

impl Advisor {
    pub fn new(graph: DispatchGraph, store: Arc<dyn SessionStore>) -> Self {
        Self {
            graph,
            store,
            locks: SessionLocks::new(),
        }
    }

    /// Wire every collaborator from settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let http = HttpJsonClient::new(settings.services.http_timeout)?;

        let chain = match settings.chain.rpc_url {
            Some(_) => {
                let client = Arc::new(ChainClient::new(&settings.chain)?);
                if let Err(e) = client.health_check().await {
                    warn!(error = %e, "RPC health check failed; chain tools will report errors");
                }
                Some(client)
            }
            None => {
                warn!("No RPC endpoint configured; chain tools are disabled");
                None
            }
        };

        let deps = ToolDeps {
            http,
            chain,
            knowledge: Arc::new(KnowledgeBase::load(&settings.services.knowledge_dir)?),
            coingecko_base_url: settings.services.coingecko_base_url.clone(),
            search_base_url: settings.services.search_base_url.clone(),
            tool_timeout: settings.dispatch.tool_timeout,
        };

        let model: Arc<dyn LanguageModel> = Arc::new(GeminiModel::new(
            settings.llm.api_key.clone(),
            &settings.llm.model,
        )?);

        let supervisor: Arc<dyn Supervisor> = match settings.dispatch.supervisor_mode {
            SupervisorMode::Rules => Arc::new(RuleSupervisor::new()),
            SupervisorMode::Llm => Arc::new(GeminiSupervisor::new(model.clone())),
        };

        let dispatch = &settings.dispatch;
        let analyst = ToolAgent::new(
            Specialist::Analyst,
            model.clone(),
            create_analyst_registry(&deps),
            dispatch.max_tool_rounds,
            dispatch.tool_timeout,
        );
        let executor = ToolAgent::new(
            Specialist::Executor,
            model,
            create_executor_registry(&deps),
            dispatch.max_tool_rounds,
            dispatch.tool_timeout,
        );

        info!(
            supervisor = ?dispatch.supervisor_mode,
            max_hops = dispatch.max_hops,
            model = %settings.llm.model,
            "Advisor ready"
        );

        let graph = DispatchGraph::new(
            supervisor,
            Arc::new(analyst),
            Arc::new(executor),
            dispatch.max_hops,
        );
        Ok(Self::new(graph, build_session_store(&settings.memory)))
    }

    pub async fn handle_turn(&self, request: TurnRequest) -> TurnResponse {
        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SESSION_ID)
            .to_string();

        let text = request.text.trim();
        if text.is_empty() {
            return TurnResponse {
                answer: EMPTY_MESSAGE_ANSWER.to_string(),
                session_id,
                transaction: None,
                hops: 0,
                truncated: false,
            };
        }

        let start = Instant::now();
        match self.run(&session_id, text).await {
            Ok(outcome) => {
                info!(
                    session_id = %session_id,
                    hops = outcome.hops,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Turn answered"
                );
                TurnResponse {
                    transaction: TransactionIntent::extract(&outcome.answer),
                    answer: outcome.answer,
                    session_id,
                    hops: outcome.hops,
                    truncated: outcome.truncated,
                }
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Turn failed");
                TurnResponse {
                    answer: format!("Agent Error: {}", e),
                    session_id,
                    transaction: None,
                    hops: 0,
                    truncated: false,
                }
            }
        }
    }

    async fn run(&self, session_id: &str, text: &str) -> Result<TurnOutcome> {
        let _guard = self.locks.acquire(session_id).await;

        let mut history = self
            .store
            .load(session_id)
            .await
            .map_err(|e| AdvisorError::SessionError(format!("failed to load {}: {}", session_id, e)))?;
        let outcome = self.graph.run_turn(&mut history, text).await;

        if let Err(e) = self.store.append(session_id, &outcome.new_messages).await {
            warn!(
                session_id = %session_id,
                "Session save failed, response will still be returned: {}",
                e
            );
        }
        Ok(outcome)
    }

    /// Forget a session's history.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(session_id).await;
        self.store
            .clear(session_id)
            .await
            .map_err(|e| AdvisorError::SessionError(format!("failed to reset {}: {}", session_id, e)))
    }
}
