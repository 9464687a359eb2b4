//! Adapter settings.
//!
//! Settings are read from TOML and merged with environment variables prefixed
//! with `SPOTX_ADAPTER__`. For example `SPOTX_ADAPTER__ADAPTER__ENDPOINT`
//! overrides `adapter.endpoint`.

use std::str;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::constants::{
    BIDDER_CODE, DEFAULT_AD_TEXT, DEFAULT_CURRENCY, DEFAULT_ENDPOINT, DEFAULT_PLAYER_BASE_URL,
    DEFAULT_SDK_NAME, DEFAULT_TTL_SECONDS, DEFAULT_VAST_BASE_URL,
};
use crate::error::AdapterError;

pub const ENVIRONMENT_VARIABLE_PREFIX: &str = "SPOTX_ADAPTER";
pub const ENVIRONMENT_VARIABLE_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AdapterSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bidder_code")]
    #[validate(length(min = 1))]
    pub bidder_code: String,
    /// Base URL the channel id is appended to. Must end with `/`.
    #[serde(default = "default_endpoint")]
    #[validate(url, custom(function = "validate_base_url"))]
    pub endpoint: String,
    #[serde(default = "default_sdk_name")]
    pub sdk_name: String,
    #[serde(default = "default_ttl_seconds")]
    #[validate(range(min = 1))]
    pub ttl_seconds: u32,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RendererSettings {
    #[serde(default = "default_player_base_url")]
    #[validate(url)]
    pub player_base_url: String,
    #[serde(default = "default_vast_base_url")]
    #[validate(url)]
    pub vast_base_url: String,
    #[serde(default = "default_ad_text")]
    pub ad_text: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate(nested)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    #[validate(nested)]
    pub renderer: RendererSettings,
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    if value.ends_with('/') {
        Ok(())
    } else {
        let mut err = ValidationError::new("trailing_slash");
        err.message = Some("must end with '/'".into());
        Err(err)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_bidder_code() -> String {
    BIDDER_CODE.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_sdk_name() -> String {
    DEFAULT_SDK_NAME.to_string()
}

fn default_ttl_seconds() -> u32 {
    DEFAULT_TTL_SECONDS
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_player_base_url() -> String {
    DEFAULT_PLAYER_BASE_URL.to_string()
}

fn default_vast_base_url() -> String {
    DEFAULT_VAST_BASE_URL.to_string()
}

fn default_ad_text() -> String {
    DEFAULT_AD_TEXT.to_string()
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bidder_code: default_bidder_code(),
            endpoint: default_endpoint(),
            sdk_name: default_sdk_name(),
            ttl_seconds: default_ttl_seconds(),
            default_currency: default_currency(),
        }
    }
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            player_base_url: default_player_base_url(),
            vast_base_url: default_vast_base_url(),
            ad_text: default_ad_text(),
        }
    }
}

impl Settings {
    /// Load the settings embedded in the crate, merged with the environment.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the embedded TOML or an
    /// environment override does not produce valid settings.
    pub fn new() -> Result<Self, Report<AdapterError>> {
        let toml_bytes = include_bytes!("../spotx-adapter.toml");
        let toml_str = str::from_utf8(toml_bytes).change_context(AdapterError::Configuration {
            message: "embedded settings are not valid UTF-8".to_string(),
        })?;

        Self::from_toml(toml_str)
    }

    /// Parse settings from a TOML string and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the TOML cannot be parsed or
    /// the merged settings fail validation.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<AdapterError>> {
        let environment = Environment::default()
            .prefix(ENVIRONMENT_VARIABLE_PREFIX)
            .separator(ENVIRONMENT_VARIABLE_SEPARATOR);

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let config = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .change_context(AdapterError::Configuration {
                message: "failed to build configuration".to_string(),
            })?;

        let settings: Self =
            config
                .try_deserialize()
                .change_context(AdapterError::Configuration {
                    message: "failed to deserialize settings".to_string(),
                })?;

        settings.validate().map_err(|err| {
            Report::new(AdapterError::Configuration {
                message: format!("settings validation failed: {err}"),
            })
        })?;

        Ok(settings)
    }
}
