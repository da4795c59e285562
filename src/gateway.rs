//! # Gateway Invocation Pipeline
//!
//! Drives one request end to end:
//!
//! ```text
//!   lookup ─► create workspace ─► stage inputs ─► invoke ─► collect ─► teardown
//!                 │                    │             │          │          ▲
//!                 │                    └─ Staging ───┼──────────┼──────────┤
//!                 │                                  └─ panic ──┤ (envelope)
//!                 └──────────────────── TeardownGuard ──────────┴──────────┘
//! ```
//!
//! Staging failures abort the request before the function runs. A panic
//! inside the function becomes a `PROCESSING_ERROR` envelope. Collection
//! failures are returned to the caller, but the workspace is torn down
//! first in every case.
//!
//! ## File Parameters
//!
//! Parameters declared as `InputFile` (or `array` of `InputFile`) must be
//! supplied as uploads; a plain parameter value for them is rejected so that
//! functions only ever see paths inside their own workspace. A missing
//! required single file is a staging error; a missing file list is passed
//! as an empty array and left for the function to validate.

use crate::collect::{CollectedOutput, OutputSink, collect_outputs};
use crate::config::GatewayConfig;
use crate::constants::generate_request_id;
use crate::context::RequestContext;
use crate::envelope::{ErrorCode, ResultEnvelope};
use crate::error::{Error, Result};
use crate::function::{FunctionRegistry, Params, PrefabFunction};
use crate::manifest::FunctionDecl;
use crate::storage::ArtifactStore;
use crate::workspace::{StagingSource, TeardownGuard, Workspace, WorkspaceManager};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Requests and Responses
// =============================================================================

/// A file supplied for an `InputFile` parameter.
#[derive(Debug, Clone)]
pub struct InputUpload {
    pub parameter: String,
    pub source: StagingSource,
}

/// A request to run one function.
#[derive(Debug, Clone, Default)]
pub struct InvocationRequest {
    /// Caller-chosen request id; generated when absent.
    pub request_id: Option<String>,
    pub function: String,
    /// Non-file parameters.
    pub params: Params,
    pub inputs: Vec<InputUpload>,
}

impl InvocationRequest {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_input(mut self, parameter: impl Into<String>, source: StagingSource) -> Self {
        self.inputs.push(InputUpload {
            parameter: parameter.into(),
            source,
        });
        self
    }
}

/// The outcome of a completed invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResponse {
    pub request_id: String,
    /// Envelope as returned by the function (after the failure invariant).
    pub envelope: ResultEnvelope,
    /// Persisted output files.
    pub outputs: Vec<CollectedOutput>,
}

// =============================================================================
// Gateway
// =============================================================================

/// Hosts prefab functions behind request-scoped workspaces.
pub struct Gateway {
    workspaces: WorkspaceManager,
    sink: Arc<dyn OutputSink>,
    registry: FunctionRegistry,
}

impl Gateway {
    pub fn new(
        workspaces: WorkspaceManager,
        sink: Arc<dyn OutputSink>,
        registry: FunctionRegistry,
    ) -> Self {
        Self {
            workspaces,
            sink,
            registry,
        }
    }

    /// Builds a gateway with the configured workspace root and artifact store.
    pub fn from_config(config: &GatewayConfig, registry: FunctionRegistry) -> Result<Self> {
        let workspaces = WorkspaceManager::with_path(config.workspace_root.clone())?;
        let store = ArtifactStore::with_path(config.artifact_root.clone())?;
        Ok(Self::new(workspaces, Arc::new(store), registry))
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Runs a function inside a fresh workspace.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse> {
        let function = self
            .registry
            .get(&request.function)
            .ok_or_else(|| Error::FunctionNotFound(request.function.clone()))?;
        let decl = function.declaration().clone();

        let request_id = request.request_id.unwrap_or_else(generate_request_id);
        let workspace = self.workspaces.create(&request_id)?;
        let guard = TeardownGuard::new(&self.workspaces, &request_id);

        let params = self.stage_inputs(&workspace, &decl, request.params, request.inputs)?;

        info!("Invoking {} for request {}", decl.name, request_id);
        let ctx = RequestContext::for_workspace(&workspace);
        let mut envelope = run_isolated(function, params, ctx).await;
        normalize_failure(&mut envelope, &decl.name);
        envelope.enforce_failure_invariant(&decl);

        let collected = collect_outputs(&workspace, &envelope, &decl, self.sink.as_ref());

        if let Err(e) = guard.finish() {
            warn!("Request {} completed but teardown failed: {}", request_id, e);
        }

        let report = collected?;
        debug!(
            "Request {} finished: success={}, outputs={}",
            request_id,
            envelope.success,
            report.collected.len()
        );

        Ok(InvocationResponse {
            request_id,
            envelope,
            outputs: report.collected,
        })
    }

    /// Stages uploads and merges their paths into the parameters.
    fn stage_inputs(
        &self,
        workspace: &Workspace,
        decl: &FunctionDecl,
        mut params: Params,
        inputs: Vec<InputUpload>,
    ) -> Result<Params> {
        for param in decl.input_file_params() {
            if params.contains_key(&param.name) {
                return Err(Error::Staging {
                    parameter: param.name.clone(),
                    reason: "file parameters must be supplied as uploads".to_string(),
                });
            }
        }

        let mut single_staged = HashSet::new();
        for upload in inputs {
            let param = decl
                .parameter(&upload.parameter)
                .filter(|p| p.accepts_files())
                .ok_or_else(|| Error::Staging {
                    parameter: upload.parameter.clone(),
                    reason: format!("not declared as an input file of {}", decl.name),
                })?;

            if param.is_input_file() && !single_staged.insert(param.name.clone()) {
                return Err(Error::Staging {
                    parameter: param.name.clone(),
                    reason: "multiple files supplied for a single-file parameter".to_string(),
                });
            }

            let staged = self
                .workspaces
                .stage_input(workspace, &param.name, upload.source)?;
            let value = Value::String(staged.path.to_string_lossy().into_owned());

            if param.is_input_file_list() {
                if let Value::Array(items) = params
                    .entry(param.name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()))
                {
                    items.push(value);
                }
            } else {
                params.insert(param.name.clone(), value);
            }
        }

        for param in decl.input_file_params() {
            if params.contains_key(&param.name) {
                continue;
            }
            if param.is_input_file_list() {
                params.insert(param.name.clone(), Value::Array(Vec::new()));
            } else if param.required {
                return Err(Error::Staging {
                    parameter: param.name.clone(),
                    reason: "required input file not provided".to_string(),
                });
            }
        }

        Ok(params)
    }
}

/// Runs a function on its own task so a panic cannot escape the gateway.
async fn run_isolated(
    function: Arc<dyn PrefabFunction>,
    params: Params,
    ctx: RequestContext,
) -> ResultEnvelope {
    let name = function.name().to_string();
    match tokio::spawn(async move { function.invoke(params, ctx).await }).await {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Function {} aborted: {}", name, e);
            ResultEnvelope::failure(
                ErrorCode::ProcessingError,
                format!("function {} aborted: {}", name, e),
            )
        }
    }
}

/// Fills in a code and message for failures reported without them.
fn normalize_failure(envelope: &mut ResultEnvelope, function: &str) {
    if envelope.success || envelope.is_well_formed() {
        return;
    }
    warn!("{} reported a failure without error details", function);
    envelope.error_code.get_or_insert(ErrorCode::ProcessingError);
    envelope
        .error
        .get_or_insert_with(|| format!("{} failed without an error message", function));
}
