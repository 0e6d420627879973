use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/**
 * \brief Fixed set of model identifiers the completion endpoint accepts.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Model {
    #[default]
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-5-nano")]
    Gpt5Nano,
    #[serde(rename = "gpt-5-mini")]
    Gpt5Mini,
    #[serde(rename = "gpt-5")]
    Gpt5,
    #[serde(rename = "gpt-5.1")]
    Gpt51,
    #[serde(rename = "claude-3-5-sonnet-latest")]
    Claude35Sonnet,
    #[serde(rename = "claude-3-5-haiku-latest")]
    Claude35Haiku,
    #[serde(rename = "o1-mini")]
    O1Mini,
    #[serde(rename = "o3-mini")]
    O3Mini,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gpt4o => "gpt-4o",
            Model::Gpt4oMini => "gpt-4o-mini",
            Model::Gpt5Nano => "gpt-5-nano",
            Model::Gpt5Mini => "gpt-5-mini",
            Model::Gpt5 => "gpt-5",
            Model::Gpt51 => "gpt-5.1",
            Model::Claude35Sonnet => "claude-3-5-sonnet-latest",
            Model::Claude35Haiku => "claude-3-5-haiku-latest",
            Model::O1Mini => "o1-mini",
            Model::O3Mini => "o3-mini",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Model::Gpt4o => "GPT-4o",
            Model::Gpt4oMini => "GPT-4o Mini",
            Model::Gpt5Nano => "GPT-5 Nano",
            Model::Gpt5Mini => "GPT-5 Mini",
            Model::Gpt5 => "GPT-5",
            Model::Gpt51 => "GPT-5.1",
            Model::Claude35Sonnet => "Claude 3.5 Sonnet",
            Model::Claude35Haiku => "Claude 3.5 Haiku",
            Model::O1Mini => "o1 Mini",
            Model::O3Mini => "o3 Mini",
        }
    }

    /**
     * \brief All models in display order.
     */
    pub fn all() -> &'static [Model] {
        &[
            Model::Gpt4o,
            Model::Gpt4oMini,
            Model::Gpt5Nano,
            Model::Gpt5Mini,
            Model::Gpt5,
            Model::Gpt51,
            Model::Claude35Sonnet,
            Model::Claude35Haiku,
            Model::O1Mini,
            Model::O3Mini,
        ]
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Model::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| anyhow!("unknown model: {}", s))
    }
}

/**
 * \brief Holds the model attached to every outbound request.
 */
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSelector {
    current: Model,
}

impl ModelSelector {
    pub fn new(model: Model) -> Self {
        Self { current: model }
    }

    pub fn current(&self) -> Model {
        self.current
    }

    pub fn set(&mut self, model: Model) {
        self.current = model;
    }
}
