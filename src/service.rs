use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use crate::config::Config;
use crate::error::ForecastError;
use crate::formatters::{
    format_degradations, format_forecast_details, format_reach_summary, FlowSummary,
};
use crate::models::{ReachRequest, SetFlowUnitRequest};
use crate::orchestrator::{ForecastOrchestrator, PhaseResult};
use crate::units::UnitPreference;

/// MCP service exposing river forecasts as tools
#[derive(Clone)]
pub struct RivrFlow {
    orchestrator: Arc<ForecastOrchestrator>,
    tool_router: ToolRouter<Self>,
}

impl RivrFlow {
    /// Creates a new service from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let units = UnitPreference::new(config.units.default);
        let orchestrator = ForecastOrchestrator::from_config(config, units)?;
        Ok(Self::with_orchestrator(Arc::new(orchestrator)))
    }

    pub fn with_orchestrator(orchestrator: Arc<ForecastOrchestrator>) -> Self {
        Self {
            orchestrator,
            tool_router: Self::tool_router(),
        }
    }

    fn render(&self, result: &PhaseResult, details: bool) -> String {
        let response = &result.response;
        let summary = FlowSummary {
            unit: self.orchestrator.units().get(),
            current_flow: self.orchestrator.current_flow(response),
            category: self.orchestrator.flow_category(response),
            return_periods: self.orchestrator.return_periods(response),
        };

        let mut output = format_reach_summary(response, &summary);
        if details {
            output.push_str(&format_forecast_details(response));
        }
        output.push_str(&format_degradations(&result.degraded));
        output
    }

    fn to_mcp_error(reach_id: &str, e: ForecastError) -> McpError {
        match e {
            ForecastError::NotFound { .. } => McpError::invalid_params(
                format!("Reach {} not found: {}", reach_id, e.user_message()),
                None,
            ),
            ForecastError::InvalidUrl { .. } => McpError::invalid_params(
                format!("Cannot request reach '{}': {}", reach_id, e),
                None,
            ),
            _ => McpError::internal_error(
                format!(
                    "Failed to load forecast for reach {}: {}{}",
                    reach_id,
                    e.user_message(),
                    if e.is_retryable() { " (retryable)" } else { "" }
                ),
                None,
            ),
        }
    }
}

#[tool_handler]
impl ServerHandler for RivrFlow {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "rivrflow-forecast".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                title: None,
                website_url: None,
            },
            instructions: Some(
                "River flow forecasts from the NOAA National Water Model. \
                Look up a reach by its identifier to get current flow, flood risk \
                and short/medium/long range forecasts."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl RivrFlow {
    /// Quick look at a reach: metadata, short range, return periods, medium range
    #[tool(description = "Get a quick overview of a river reach: current flow, flow category, return periods and the short and medium range forecasts. Provide the National Water Model reach identifier (e.g., '23021904').")]
    async fn get_reach_overview(
        &self,
        Parameters(request): Parameters<ReachRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting overview for reach: {}", request.reach_id);

        let result = self
            .orchestrator
            .load_overview_and_supplementary(&request.reach_id)
            .await
            .map_err(|e| Self::to_mcp_error(&request.reach_id, e))?;

        Ok(CallToolResult::success(vec![Content::text(
            self.render(&result, true),
        )]))
    }

    /// Full forecast for a reach
    #[tool(description = "Get the complete forecast for a river reach, including analysis, short, medium and long range horizons. Provide the National Water Model reach identifier.")]
    async fn get_reach_forecast(
        &self,
        Parameters(request): Parameters<ReachRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Getting complete forecast for reach: {}", request.reach_id);

        let result = self
            .orchestrator
            .load_complete(&request.reach_id)
            .await
            .map_err(|e| Self::to_mcp_error(&request.reach_id, e))?;

        Ok(CallToolResult::success(vec![Content::text(
            self.render(&result, true),
        )]))
    }

    /// Discards cached reach metadata and reloads everything
    #[tool(description = "Discard cached information for a river reach and reload its complete forecast. Provide the National Water Model reach identifier.")]
    async fn refresh_reach(
        &self,
        Parameters(request): Parameters<ReachRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!("Refreshing reach: {}", request.reach_id);

        let result = self
            .orchestrator
            .force_refresh(&request.reach_id)
            .await
            .map_err(|e| Self::to_mcp_error(&request.reach_id, e))?;

        Ok(CallToolResult::success(vec![Content::text(
            self.render(&result, true),
        )]))
    }

    /// Changes the preferred flow unit
    #[tool(description = "Set the preferred flow unit for all results: 'cfs' (cubic feet per second) or 'cms' (cubic meters per second). Unrecognized values reset to cfs.")]
    async fn set_flow_unit(
        &self,
        Parameters(request): Parameters<SetFlowUnitRequest>,
    ) -> Result<CallToolResult, McpError> {
        let unit = self.orchestrator.units().set_token(&request.unit);
        self.orchestrator.clear_computed_caches();

        Ok(CallToolResult::success(vec![Content::text(format!(
            "Flow unit set to {} ({})",
            unit,
            unit.symbol()
        ))]))
    }

    /// Reports the preferred flow unit
    #[tool(description = "Get the preferred flow unit currently used for results.")]
    async fn get_flow_unit(&self) -> Result<CallToolResult, McpError> {
        let unit = self.orchestrator.units().get();
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Flow unit: {} ({})",
            unit,
            unit.symbol()
        ))]))
    }
}
