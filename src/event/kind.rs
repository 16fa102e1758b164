//! Request kinds supported by the bridge.
//!
//! Each kind pairs an outbound request event with exactly one inbound response
//! event and names the payload fields forwarded with the request.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum RequestKind {
    #[strum(serialize = "create-design")]
    #[serde(rename = "create-design")]
    CreateDesign,
    #[strum(serialize = "simulate-design")]
    #[serde(rename = "simulate-design")]
    SimulateDesign,
    #[strum(serialize = "random-simulation-design")]
    #[serde(rename = "random-simulation-design")]
    RandomSimulationDesign,
}

const CREATE_DESIGN_FIELDS: &[&str] = &["strategy", "name"];
const SIMULATE_DESIGN_FIELDS: &[&str] = &[
    "mode",
    "name",
    "assumptions",
    "guarantees",
    "inputs",
    "outputs",
    "choice",
];
const RANDOM_SIMULATION_FIELDS: &[&str] = &[
    "mode",
    "name",
    "assumptions",
    "guarantees",
    "inputs",
    "outputs",
    "iterations",
];

impl RequestKind {
    /// Outbound event name.
    pub fn request_event(&self) -> &'static str {
        match self {
            RequestKind::CreateDesign => "create-design",
            RequestKind::SimulateDesign => "simulate-design",
            RequestKind::RandomSimulationDesign => "random-simulation-design",
        }
    }

    /// Inbound event name carrying the answer to [`Self::request_event`].
    pub fn response_event(&self) -> &'static str {
        match self {
            RequestKind::CreateDesign => "design-created",
            RequestKind::SimulateDesign => "design-simulated",
            RequestKind::RandomSimulationDesign => "receive-random-simulation-design",
        }
    }

    /// Payload fields forwarded with the request.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            RequestKind::CreateDesign => CREATE_DESIGN_FIELDS,
            RequestKind::SimulateDesign => SIMULATE_DESIGN_FIELDS,
            RequestKind::RandomSimulationDesign => RANDOM_SIMULATION_FIELDS,
        }
    }

    /// Whether the kind runs a simulation and therefore carries a `mode`.
    pub fn is_simulation(&self) -> bool {
        !matches!(self, RequestKind::CreateDesign)
    }

    pub fn from_request_event(event: &str) -> Option<Self> {
        Self::iter().find(|kind| kind.request_event() == event)
    }

    pub fn from_response_event(event: &str) -> Option<Self> {
        Self::iter().find(|kind| kind.response_event() == event)
    }
}

/// Design generation strategies understood by the design service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    StrategyRandom,
    StrategyAnother,
}
