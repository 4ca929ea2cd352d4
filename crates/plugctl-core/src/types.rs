use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ComponentState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    #[default]
    Unknown,
    Uploaded,
    UploadError,
    Registering,
    Registered,
    RegisterError,
    Deployed,
}

impl ComponentState {
    pub fn all() -> &'static [ComponentState] {
        &[
            ComponentState::Unknown,
            ComponentState::Uploaded,
            ComponentState::UploadError,
            ComponentState::Registering,
            ComponentState::Registered,
            ComponentState::RegisterError,
            ComponentState::Deployed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentState::Unknown => "UNKNOWN",
            ComponentState::Uploaded => "UPLOADED",
            ComponentState::UploadError => "UPLOAD_ERROR",
            ComponentState::Registering => "REGISTERING",
            ComponentState::Registered => "REGISTERED",
            ComponentState::RegisterError => "REGISTER_ERROR",
            ComponentState::Deployed => "DEPLOYED",
        }
    }

    /// States from which `register_component` may start.
    pub fn can_start_registration(self) -> bool {
        matches!(
            self,
            ComponentState::Uploaded | ComponentState::RegisterError | ComponentState::Deployed
        )
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentState::all()
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown component state: {s}"))
    }
}

// ---------------------------------------------------------------------------
// SourceLanguage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceLanguage {
    Java,
    Cpp,
    Python,
}

impl SourceLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceLanguage::Java => "java",
            SourceLanguage::Cpp => "c++",
            SourceLanguage::Python => "python",
        }
    }
}

impl fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "java" => Ok(SourceLanguage::Java),
            "c++" | "cpp" => Ok(SourceLanguage::Cpp),
            "python" => Ok(SourceLanguage::Python),
            _ => Err("sourceLanguage must be java, c++, or python".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Detection,
    Markup,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Detection => "DETECTION",
            ActionType::Markup => "MARKUP",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ValueType
// ---------------------------------------------------------------------------

/// Declared type of an algorithm property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
}
