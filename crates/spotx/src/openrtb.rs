//! SpotX flavour of the OpenRTB 2.3 bid request and response.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::params::{lenient_f64, lenient_string, lenient_u32};

/// Bid request posted to the SpotX endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPayload {
    /// Channel id of the auction's first descriptor.
    pub id: String,
    pub imp: Vec<Imp>,
    pub site: Site,
    pub device: Device,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regs: Option<Regs>,
    pub ext: RequestExt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imp {
    /// Numeric id used to match response bids back to this impression.
    pub id: u64,
    pub secure: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidfloor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
}

impl Imp {
    /// Key under which this impression is correlated with response bids.
    #[must_use]
    pub fn correlation_key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub w: u32,
    pub h: u32,
    pub mimes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdelay: Option<u8>,
    pub ext: VideoExt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoExt {
    pub player_width: u32,
    pub player_height: u32,
    pub sdk_name: String,
    pub content_page_url: String,
    #[serde(rename = "versionOrtb")]
    pub version_ortb: String,
    #[serde(rename = "bidId")]
    pub bid_id: String,
    #[serde(rename = "videoSlot")]
    pub video_slot: String,
    #[serde(default)]
    pub outstream_static: bool,
    /// Optional fields, present only when the publisher set them.
    #[serde(default, flatten)]
    pub optional: Map<String, Value>,
}

impl VideoExt {
    #[must_use]
    pub fn ad_unit(&self) -> Option<&str> {
        self.optional.get("ad_unit").and_then(Value::as_str)
    }

    #[must_use]
    pub fn ad_mute(&self) -> bool {
        self.optional
            .get("ad_mute")
            .and_then(Value::as_u64)
            .is_some_and(|v| v != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub page: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub h: u32,
    pub w: u32,
    pub dnt: u8,
    pub language: String,
    pub make: String,
    pub ua: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub ext: UserExt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserExt {
    /// GDPR consent string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<String>,
    /// First-party common id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fpc: Option<String>,
}

impl UserExt {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consent.is_none() && self.fpc.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regs {
    pub ext: RegsExt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegsExt {
    pub gdpr: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestExt {
    pub wrap_response: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_ads: Option<u32>,
}

/// Bid response returned by SpotX.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorResponse {
    /// Echo of the channel id.
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cur: Option<String>,
    #[serde(default, deserialize_with = "array_or_empty")]
    pub seatbid: Vec<SeatBid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeatBid {
    /// Raw bids, parsed one at a time so a malformed bid only loses itself.
    #[serde(default, deserialize_with = "array_or_empty")]
    pub bid: Vec<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub seat: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorBid {
    /// Impression id, sent back as a number or a string.
    #[serde(default, deserialize_with = "lenient_string")]
    pub impid: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub crid: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub w: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<BidExt>,
}

impl VendorBid {
    /// Parse one raw bid of a seat.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the bid does not have the expected shape.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        self.ext
            .as_ref()
            .and_then(|ext| ext.cache_key.as_deref())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidExt {
    #[serde(default, deserialize_with = "lenient_string")]
    pub cache_key: Option<String>,
}

/// Arrays deserialize element-wise; any other JSON value is an empty list.
fn array_or_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(serde::de::Error::custom))
            .collect(),
        _ => Ok(Vec::new()),
    }
}
