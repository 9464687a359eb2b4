//! Bid request descriptors and the SpotX bidder params they carry.
//!
//! Hosts hand bidder params over as loosely typed JSON: numbers arrive as
//! strings, flags as `0`/`1`, unset values as empty strings. The raw JSON is
//! kept on the descriptor and parsed into [`SpotxParams`] on demand, with the
//! lenient deserializers below normalising those shapes.

use std::collections::HashMap;
use std::fmt;

use error_stack::{Report, ResultExt};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::AdapterError;
use crate::renderer::OutstreamFunction;

/// One ad slot offered to the adapter by the host framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequestDescriptor {
    /// Framework-assigned identifier, echoed back as `request_id` on bids.
    pub bid_id: String,
    #[serde(default)]
    pub bidder: String,
    #[serde(default)]
    pub ad_unit_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_types: Option<MediaTypes>,
    /// Raw bidder params as supplied by the publisher.
    #[serde(default)]
    pub params: Json,
    /// Identifiers stored by the host's first-party id module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crumbs: Option<Crumbs>,
    /// Custom render hook replacing the default player injection.
    #[serde(skip)]
    pub outstream_function: Option<OutstreamFunction>,
}

impl BidRequestDescriptor {
    /// Create a descriptor for the given bid id and raw params.
    #[must_use]
    pub fn new(bid_id: impl Into<String>, params: Json) -> Self {
        Self {
            bid_id: bid_id.into(),
            bidder: crate::constants::BIDDER_CODE.to_string(),
            ad_unit_code: String::new(),
            media_types: None,
            params,
            crumbs: None,
            outstream_function: None,
        }
    }

    /// Parse the raw params into typed SpotX params.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidParams`] when params is not an object or
    /// `params.video` is missing or not an object.
    pub fn spotx_params(&self) -> Result<SpotxParams, Report<AdapterError>> {
        SpotxParams::from_json(&self.params)
    }

    /// First-party common id, if the host discovered one.
    #[must_use]
    pub fn pubcid(&self) -> Option<&str> {
        self.crumbs
            .as_ref()
            .and_then(|crumbs| crumbs.pubcid.as_deref())
            .filter(|pubcid| !pubcid.is_empty())
    }

    /// Player size declared on the ad unit's video media type.
    #[must_use]
    pub fn declared_player_size(&self) -> Option<(u32, u32)> {
        self.media_types
            .as_ref()
            .and_then(|media| media.video.as_ref())
            .and_then(|video| video.player_size.first())
            .map(|size| (size[0], size[1]))
    }

    /// Write a backfilled value into `params.video`.
    pub(crate) fn set_video_param(&mut self, key: &str, value: Json) {
        if let Some(video) = self
            .params
            .get_mut("video")
            .and_then(Json::as_object_mut)
        {
            video.insert(key.to_string(), value);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaTypes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMediaType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMediaType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub player_size: Vec<[u32; 2]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Crumbs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubcid: Option<String>,
}

/// Typed view of the `params` object of a SpotX descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotxParams {
    pub video: VideoParams,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub secure: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price_floor: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub number_of_ads: Option<u32>,
}

impl SpotxParams {
    /// Parse typed params from the raw descriptor JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidParams`] when the JSON does not have the
    /// expected shape.
    pub fn from_json(params: &Json) -> Result<Self, Report<AdapterError>> {
        if !params.get("video").is_some_and(Json::is_object) {
            return Err(Report::new(AdapterError::InvalidParams {
                message: "video params is missing or is incorrect".to_string(),
            }));
        }

        serde_json::from_value(params.clone()).change_context(AdapterError::InvalidParams {
            message: "video params could not be parsed".to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoParams {
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub slot: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub video_slot: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub content_width: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub content_height: Option<u32>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub ad_mute: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub hide_skin: Option<bool>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub ad_volume: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ad_unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub custom: Option<serde_json::Map<String, Json>>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub mimes: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub start_delay: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub outstream_static: Option<bool>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub outstream_options: Option<OutstreamOptions>,
}

impl VideoParams {
    /// Names of mandatory params that are absent, in declaration order.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.channel_id.is_none() {
            missing.push("channel_id");
        }
        if self.slot.is_none() {
            missing.push("slot");
        }
        if self.video_slot.is_none() {
            missing.push("video_slot");
        }
        missing
    }
}

/// Player options forwarded to the vendor and used by the renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutstreamOptions {
    /// Id of an iframe whose document should receive the player script.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub in_iframe: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub ad_mute: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub playersize_auto_adapt: Option<bool>,
    /// Extra `data-spotx_*` attributes set on the player script.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_override: HashMap<String, String>,
}

/// Strings and numbers become strings; `null` and `""` are unset.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientStringVisitor;

    impl<'de> Visitor<'de> for LenientStringVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok((!value.is_empty()).then(|| value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(LenientStringVisitor)
}

/// Any value of `T`; `null` and `""` are unset.
pub(crate) fn lenient_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: de::DeserializeOwned,
{
    match Option::<Json>::deserialize(deserializer)? {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) if s.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(de::Error::custom),
    }
}

/// Numbers and numeric strings; `null` and `""` are unset.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Json>::deserialize(deserializer)? {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Json::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected a number, got \"{s}\""))),
        Some(Json::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(de::Error::custom(format!("expected a number, got {other}"))),
    }
}

/// Non-negative integers, rounding fractional values.
pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match lenient_f64(deserializer)? {
        None => Ok(None),
        Some(value) if value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX) => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rounded = value.round() as u32;
            Ok(Some(rounded))
        }
        Some(value) => Err(de::Error::custom(format!("number {value} is out of range"))),
    }
}

/// Booleans, `0`/`1` style numbers and strings; `null` and `""` are unset.
pub(crate) fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Json>::deserialize(deserializer)? {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Bool(b)) => Ok(Some(b)),
        Some(Json::Number(n)) => Ok(Some(n.as_f64().is_some_and(|v| v != 0.0))),
        Some(Json::String(s)) => match s.trim() {
            "" => Ok(None),
            "0" | "false" => Ok(Some(false)),
            _ => Ok(Some(true)),
        },
        Some(other) => Err(de::Error::custom(format!("expected a flag, got {other}"))),
    }
}
