//! querydesk — conversational analytics bot core.
//!
//! Mediates between a chat-platform thread and a read-only SQL database:
//! inbound natural-language questions are routed by intent, answered by a
//! tool-driven SQL agent (generate → execute → format), and remembered per
//! thread so follow-ups, CSV exports, and "show me the SQL" requests reuse
//! prior work instead of regenerating it.
//!
//! The chat transport, the LLM deployment, and file upload live outside
//! this crate; [`orchestrator::Orchestrator`] is the integration surface.
//!
//! ```no_run
//! use querydesk::{AppContext, BotConfig, Orchestrator};
//!
//! # async fn run() -> Result<(), querydesk::errors::BootstrapError> {
//! let ctx = AppContext::from_config(BotConfig::default())?;
//! let orchestrator = Orchestrator::new(&ctx);
//! let reply = orchestrator.process("thread-1", "how many apps do we have?").await;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod config;
pub mod errors;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod router;
pub mod sql;
pub mod tools;

use std::sync::Arc;

pub use config::BotConfig;
pub use orchestrator::{Orchestrator, Reply};
pub use router::Intent;

use errors::BootstrapError;
use llm::{ChatProvider, OpenAiClient};
use memory::MemoryStore;
use sql::Database;
use tools::Toolbox;

/// Process-wide application context: configuration plus the pooled
/// collaborators every request shares. Constructed once at startup and
/// handed to the orchestrator, which keeps state lifetimes explicit instead
/// of hiding them in module globals.
pub struct AppContext {
    pub config: Arc<BotConfig>,
    pub memory: Arc<MemoryStore>,
    pub database: Database,
    pub provider: Arc<dyn ChatProvider>,
    pub toolbox: Arc<Toolbox>,
}

impl AppContext {
    /// Assemble a context from pre-built collaborators.
    pub fn new(config: BotConfig, database: Database, provider: Arc<dyn ChatProvider>) -> Self {
        let config = Arc::new(config);
        let memory = Arc::new(MemoryStore::new(config.memory.clone()));
        let toolbox = Arc::new(Toolbox::new(
            Arc::clone(&memory),
            database.clone(),
            Arc::clone(&provider),
            Arc::clone(&config),
        ));
        Self {
            config,
            memory,
            database,
            provider,
            toolbox,
        }
    }

    /// Build the full context from configuration: opens the database and
    /// constructs the OpenAI-compatible provider client.
    pub fn from_config(config: BotConfig) -> Result<Self, BootstrapError> {
        config.validate()?;
        let database = Database::open(&config.database_path)?;
        let provider: Arc<dyn ChatProvider> =
            Arc::new(OpenAiClient::from_config(config.llm.clone())?);
        tracing::info!(
            database = %config.database_path.display(),
            model = %config.llm.model,
            "application context initialized"
        );
        Ok(Self::new(config, database, provider))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
