use crate::constants::env;
use crate::errors::ToolError;
use crate::managers::http_tool::{HttpTool, ToolDeps};
use crate::mcp::catalog::ToolCatalog;
use crate::services::credentials::{CredentialProvider, EnvCredentialProvider};
use crate::services::logger::Logger;
use crate::services::tool_config::{load_tool_configs, ToolConfig};
use crate::services::trace::{AuditTraceSink, NoopTraceSink, TraceSink};
use crate::services::transport::{HttpExecutor, ReqwestExecutor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub catalog: ToolCatalog,
}

fn resolve_trace_path() -> Option<PathBuf> {
    std::env::var(env::TRACE_PATH)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

impl App {
    /// Loads tools from `config_path` with the default collaborators:
    /// reqwest transport, env credentials, and a JSONL trace when
    /// `HTTP_TOOL_TRACE_PATH` is set.
    pub fn initialize(config_path: &Path) -> Result<Self, ToolError> {
        let logger = Logger::new("http-tool");
        let configs = load_tool_configs(config_path)?;
        let credentials: Arc<dyn CredentialProvider> = Arc::new(EnvCredentialProvider);
        let executor: Arc<dyn HttpExecutor> = Arc::new(
            ReqwestExecutor::new(logger.child("transport")).with_credentials(credentials.clone()),
        );
        Self::build(configs, executor, credentials, resolve_trace_path(), logger)
    }

    pub fn build(
        configs: Vec<ToolConfig>,
        executor: Arc<dyn HttpExecutor>,
        credentials: Arc<dyn CredentialProvider>,
        trace_path: Option<PathBuf>,
        logger: Logger,
    ) -> Result<Self, ToolError> {
        let mut tools = Vec::with_capacity(configs.len());
        for config in configs {
            let trace: Arc<dyn TraceSink> = match trace_path.as_ref() {
                Some(path) => Arc::new(AuditTraceSink::new(logger.clone(), &config.name, path.clone())),
                None => Arc::new(NoopTraceSink),
            };
            let deps = ToolDeps::new(executor.clone())
                .with_credentials(credentials.clone())
                .with_trace(trace)
                .with_logger(logger.clone());
            let name = config.name.clone();
            let tool = HttpTool::from_config(config, deps).map_err(|err| {
                logger.error(
                    "Tool configuration rejected",
                    Some(&serde_json::json!({"tool": name, "error": err.message})),
                );
                err
            })?;
            tools.push(tool);
        }
        let catalog = ToolCatalog::new(tools)?;
        logger.info(
            "Tools loaded",
            Some(&serde_json::json!({"tools": catalog.names()})),
        );
        Ok(Self { logger, catalog })
    }
}
