//! Prefab function trait and registry.
//!
//! A prefab function takes named JSON parameters plus a [`RequestContext`]
//! and always answers with a [`ResultEnvelope`]. It never returns an
//! infrastructure error: anything that goes wrong inside it is reported
//! through the envelope's `error_code`.

use crate::context::RequestContext;
use crate::envelope::ResultEnvelope;
use crate::error::{Error, Result};
use crate::manifest::{FunctionDecl, Manifest};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Named parameters passed to a function.
pub type Params = Map<String, Value>;

/// A function deployable behind the gateway.
#[async_trait]
pub trait PrefabFunction: Send + Sync {
    /// Static declaration of parameters and return fields.
    fn declaration(&self) -> &FunctionDecl;

    /// Function name (from the declaration).
    fn name(&self) -> &str {
        &self.declaration().name
    }

    /// Runs the function.
    ///
    /// Parameters declared as `InputFile` hold absolute paths into the
    /// request workspace.
    async fn invoke(&self, params: Params, ctx: RequestContext) -> ResultEnvelope;
}

/// Decodes named parameters into a typed struct.
pub fn decode_params<T: DeserializeOwned>(params: Params) -> Result<T> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| Error::InvalidParameters(e.to_string()))
}

/// Registry of functions served by a gateway.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: Vec<Arc<dyn PrefabFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function after validating its declaration.
    pub fn register(&mut self, function: Arc<dyn PrefabFunction>) -> Result<()> {
        function.declaration().validate()?;
        if self.get(function.name()).is_some() {
            return Err(Error::FunctionAlreadyRegistered(function.name().to_string()));
        }
        self.functions.push(function);
        Ok(())
    }

    /// Gets a function by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn PrefabFunction>> {
        self.functions.iter().find(|f| f.name() == name).cloned()
    }

    /// Registered function names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Builds the manifest describing every registered function.
    pub fn manifest(&self, name: impl Into<String>, version: impl Into<String>) -> Manifest {
        Manifest {
            name: name.into(),
            version: version.into(),
            functions: self
                .functions
                .iter()
                .map(|f| f.declaration().clone())
                .collect(),
        }
    }
}
