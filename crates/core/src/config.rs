//! Interceptor configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::StatusFlag;
use crate::errors::{Error, Result};

pub const RETIRED_PROPERTY_ENV: &str = "ENTITY_EVENTS_RETIRED_PROPERTY";
pub const VOIDED_PROPERTY_ENV: &str = "ENTITY_EVENTS_VOIDED_PROPERTY";
pub const DISPATCH_POLICY_ENV: &str = "ENTITY_EVENTS_DISPATCH_POLICY";

const DEFAULT_RETIRED_PROPERTY: &str = "retired";
const DEFAULT_VOIDED_PROPERTY: &str = "voided";

/// What the interceptor does when the sink rejects an event mid-dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Keep firing the remaining events, then report the failures.
    #[default]
    ContinueOnError,
    /// Stop at the first failure and report it.
    StopOnError,
}

impl FromStr for DispatchPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue_on_error" | "continue" => Ok(DispatchPolicy::ContinueOnError),
            "stop_on_error" | "stop" => Ok(DispatchPolicy::StopOnError),
            other => Err(Error::InvalidConfigValue(format!(
                "{}: unknown dispatch policy '{}'",
                DISPATCH_POLICY_ENV, other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterceptorConfig {
    /// Property holding the retirement flag on retireable types.
    pub retired_property: String,
    /// Property holding the void flag on voidable types.
    pub voided_property: String,
    pub dispatch_policy: DispatchPolicy,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            retired_property: DEFAULT_RETIRED_PROPERTY.to_string(),
            voided_property: DEFAULT_VOIDED_PROPERTY.to_string(),
            dispatch_policy: DispatchPolicy::default(),
        }
    }
}

impl InterceptorConfig {
    /// Reads the configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let retired_property = property_name(RETIRED_PROPERTY_ENV, lookup(RETIRED_PROPERTY_ENV))?
            .unwrap_or(defaults.retired_property);
        let voided_property = property_name(VOIDED_PROPERTY_ENV, lookup(VOIDED_PROPERTY_ENV))?
            .unwrap_or(defaults.voided_property);
        let dispatch_policy = match lookup(DISPATCH_POLICY_ENV) {
            Some(raw) => raw.parse()?,
            None => defaults.dispatch_policy,
        };

        Ok(Self {
            retired_property,
            voided_property,
            dispatch_policy,
        })
    }

    /// Name of the property backing `flag`.
    pub fn flag_property(&self, flag: StatusFlag) -> &str {
        match flag {
            StatusFlag::Retired => &self.retired_property,
            StatusFlag::Voided => &self.voided_property,
        }
    }
}

fn property_name(key: &str, value: Option<String>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err(Error::InvalidConfigValue(format!(
                    "{} must not be empty",
                    key
                )))
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
    }
}
