//! Function manifests.
//!
//! A manifest is the static descriptor of every function a prefab exposes:
//! parameter names and types, and return field names and types. The gateway
//! reads it to decide which parameters need staging (`InputFile`) and which
//! result fields need collection (`OutputFile`).
//!
//! ```json
//! {
//!   "name": "video-processing",
//!   "version": "0.1.0",
//!   "functions": [{
//!     "name": "trim_video",
//!     "parameters": [
//!       { "name": "video_path", "type": "InputFile", "required": true },
//!       { "name": "start_time", "type": "number", "required": true }
//!     ],
//!     "returns": [{ "name": "output_file", "type": "OutputFile" }]
//!   }]
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Declared type of a parameter or return field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "array")]
    Array,
    #[serde(rename = "object")]
    Object,
    /// File staged by the gateway before invocation.
    InputFile,
    /// File produced by the function and collected after it returns.
    OutputFile,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
            Self::InputFile => write!(f, "InputFile"),
            Self::OutputFile => write!(f, "OutputFile"),
        }
    }
}

/// A declared function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    /// Element type for `array` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ParamType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDecl {
    /// An optional parameter of the given type.
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            items: None,
            required: false,
            description: String::new(),
            default: None,
        }
    }

    /// A required parameter of the given type.
    pub fn required(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            required: true,
            ..Self::new(name, kind)
        }
    }

    /// A required list of input files.
    pub fn input_file_list(name: impl Into<String>) -> Self {
        Self {
            items: Some(ParamType::InputFile),
            ..Self::required(name, ParamType::Array)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// True for a single staged file.
    pub fn is_input_file(&self) -> bool {
        self.kind == ParamType::InputFile
    }

    /// True for an array of staged files.
    pub fn is_input_file_list(&self) -> bool {
        self.kind == ParamType::Array && self.items == Some(ParamType::InputFile)
    }

    /// True if the gateway stages files for this parameter.
    pub fn accepts_files(&self) -> bool {
        self.is_input_file() || self.is_input_file_list()
    }
}

/// A declared return field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ReturnDecl {
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
        }
    }

    pub fn is_output_file(&self) -> bool {
        self.kind == ParamType::OutputFile
    }
}

/// Declaration of one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamDecl>,
    #[serde(default)]
    pub returns: Vec<ReturnDecl>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            returns: Vec::new(),
        }
    }

    /// Adds a parameter.
    pub fn param(mut self, param: ParamDecl) -> Self {
        self.parameters.push(param);
        self
    }

    /// Adds a return field.
    pub fn returns(mut self, name: impl Into<String>, kind: ParamType) -> Self {
        self.returns.push(ReturnDecl::new(name, kind));
        self
    }

    /// Looks up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParamDecl> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameters the gateway must stage files for.
    pub fn input_file_params(&self) -> impl Iterator<Item = &ParamDecl> {
        self.parameters.iter().filter(|p| p.accepts_files())
    }

    /// Return fields the gateway must collect.
    pub fn output_file_fields(&self) -> impl Iterator<Item = &str> {
        self.returns
            .iter()
            .filter(|r| r.is_output_file())
            .map(|r| r.name.as_str())
    }

    /// Checks the declaration for structural errors.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidManifest("function name cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(Error::InvalidManifest(format!(
                    "{}: duplicate parameter '{}'",
                    self.name, param.name
                )));
            }
            if param.kind == ParamType::OutputFile || param.items == Some(ParamType::OutputFile) {
                return Err(Error::InvalidManifest(format!(
                    "{}: parameter '{}' cannot be an OutputFile",
                    self.name, param.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for ret in &self.returns {
            if !seen.insert(ret.name.as_str()) {
                return Err(Error::InvalidManifest(format!(
                    "{}: duplicate return field '{}'",
                    self.name, ret.name
                )));
            }
            if ret.kind == ParamType::InputFile {
                return Err(Error::InvalidManifest(format!(
                    "{}: return field '{}' cannot be an InputFile",
                    self.name, ret.name
                )));
            }
        }

        Ok(())
    }
}

/// A prefab's complete function manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
}

impl Manifest {
    /// Parses and validates a manifest.
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content)
            .map_err(|e| Error::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Loads and validates a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Looks up a function by name.
    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Validates every function and rejects duplicate names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for function in &self.functions {
            function.validate()?;
            if !seen.insert(function.name.as_str()) {
                return Err(Error::InvalidManifest(format!(
                    "duplicate function '{}'",
                    function.name
                )));
            }
        }
        Ok(())
    }
}
