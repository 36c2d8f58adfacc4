use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A machine declared as data, so it can be exported or driven from the command line.
///
/// Events are plain strings; a transition reacts to the event whose text equals its `event`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MachineDescription {
    pub name: String,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub initial: Option<String>,

    #[serde(default)]
    pub states: Vec<StateDescription>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateKindDescription {
    Plain,
    Final,
    NestedMachine,
    ShallowHistory,
    DeepHistory,
    Choice,
}

impl Default for StateKindDescription {
    fn default() -> Self {
        StateKindDescription::Plain
    }
}

impl StateKindDescription {
    pub fn is_pseudo(self) -> bool {
        matches!(
            self,
            StateKindDescription::ShallowHistory | StateKindDescription::DeepHistory | StateKindDescription::Choice)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateDescription {
    /// Unnamed states are allowed but cannot be referred to by transitions.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub kind: StateKindDescription,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub initial: Option<String>,

    #[serde(default)]
    pub states: Vec<StateDescription>,

    #[serde(default)]
    pub transitions: Vec<TransitionDescription>,

    /// History states only: where to go when nothing was remembered yet.
    #[serde(default)]
    pub default: Option<String>,

    /// Choice states only: target picked by the name of the event that led here.
    #[serde(default)]
    pub routes: BTreeMap<String, String>,

    /// Choice states only: target when no route matches.
    #[serde(default)]
    pub otherwise: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransitionDescription {
    pub event: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub target: Option<String>,

    /// Several targets, one per parallel region.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl TransitionDescription {
    /// Every target named, `target` first.  Empty for a transition that stays put.
    pub fn all_targets(&self) -> Vec<&str> {
        self.target.iter().chain(self.targets.iter()).map(String::as_str).collect()
    }
}

impl MachineDescription {
    pub fn from_reader(reader: impl Read) -> anyhow::Result<Self> {
        let description = serde_json::from_reader(reader)?;
        Ok(description)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}
