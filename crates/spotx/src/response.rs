//! Response interpreter.

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::BIDDER_CODE;
use crate::error::AdapterError;
use crate::openrtb::{VendorBid, VendorResponse, VideoExt};
use crate::params::{BidRequestDescriptor, OutstreamOptions};
use crate::renderer::{Renderer, RendererConfig};
use crate::request::{CorrelatedImp, OutboundRequest};
use crate::settings::Settings;

/// Media type enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Banner,
    Video,
    Native,
}

/// A bid in the shape the host framework expects.
#[derive(Debug, Clone, Serialize)]
pub struct InterpretedBid {
    /// Id of the descriptor this bid answers.
    pub request_id: String,
    pub currency: String,
    pub cpm: f64,
    pub creative_id: String,
    pub ttl: u32,
    pub net_revenue: bool,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub video_slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vast_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer: Option<Renderer>,
}

/// Interpret a SpotX response body.
///
/// An empty body or a response without seat bids yields no bids. Bids that
/// are malformed or cannot be matched to an impression of `request` are
/// skipped with a warning.
///
/// # Errors
///
/// Returns [`AdapterError::Response`] when the body is not a JSON object of
/// the expected shape.
pub fn interpret_response(
    settings: &Settings,
    body: &[u8],
    request: &OutboundRequest,
) -> Result<Vec<InterpretedBid>, Report<AdapterError>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        log::debug!("{BIDDER_CODE}: empty response body");
        return Ok(Vec::new());
    }

    let response: VendorResponse =
        serde_json::from_slice(body).change_context(AdapterError::Response {
            message: "failed to parse SpotX response".to_string(),
        })?;

    let currency = response
        .cur
        .clone()
        .unwrap_or_else(|| settings.adapter.default_currency.clone());
    let channel_id = response
        .id
        .clone()
        .unwrap_or_else(|| request.payload.id.clone());

    let mut bids = Vec::new();
    for raw_bid in response.seatbid.iter().flat_map(|seat| &seat.bid) {
        let vendor_bid = match VendorBid::from_value(raw_bid) {
            Ok(vendor_bid) => vendor_bid,
            Err(err) => {
                log::warn!("{BIDDER_CODE}: skipping malformed bid: {err}");
                continue;
            }
        };
        let Some(impid) = vendor_bid.impid.as_deref() else {
            log::warn!("{BIDDER_CODE}: skipping bid without impid");
            continue;
        };
        let Some(correlated) = request.correlation.get(impid) else {
            log::warn!("{BIDDER_CODE}: skipping bid for unknown impid {impid}");
            continue;
        };
        let Some(video_ext) = correlated.imp.video.as_ref().map(|video| &video.ext) else {
            log::warn!("{BIDDER_CODE}: skipping bid for impid {impid} without a video block");
            continue;
        };
        let Some(cpm) = vendor_bid.price else {
            log::warn!("{BIDDER_CODE}: skipping bid for impid {impid} without a price");
            continue;
        };

        let mut bid = InterpretedBid {
            request_id: video_ext.bid_id.clone(),
            currency: currency.clone(),
            cpm,
            creative_id: vendor_bid.crid.clone().unwrap_or_default(),
            ttl: settings.adapter.ttl_seconds,
            net_revenue: true,
            channel_id: channel_id.clone(),
            cache_key: vendor_bid.cache_key().map(ToString::to_string),
            video_slot: video_ext.video_slot.clone(),
            vast_url: None,
            media_type: Some(MediaType::Video),
            width: vendor_bid.w,
            height: vendor_bid.h,
            renderer: None,
        };

        attach_renderer(settings, &mut bid, &vendor_bid, correlated, video_ext);
        bids.push(bid);
    }

    log::debug!("{BIDDER_CODE}: interpreted {} bid(s)", bids.len());
    Ok(bids)
}

/// Set the VAST URL and renderer of a video bid, logging when that is not
/// possible. The bid is kept either way.
fn attach_renderer(
    settings: &Settings,
    bid: &mut InterpretedBid,
    vendor_bid: &VendorBid,
    correlated: &CorrelatedImp,
    video_ext: &VideoExt,
) {
    let Some(cache_key) = vendor_bid.cache_key() else {
        log::warn!(
            "{BIDDER_CODE}: bid {} has no cache_key, no renderer attached",
            bid.request_id
        );
        return;
    };

    let vast_url = match vast_url(&settings.renderer.vast_base_url, cache_key) {
        Ok(url) => url,
        Err(err) => {
            log::warn!("{BIDDER_CODE}: prebid renderer setup failed: {err:?}");
            return;
        }
    };

    let outstream_options = video_ext
        .optional
        .get("outstream_options")
        .and_then(|value| serde_json::from_value::<OutstreamOptions>(value.clone()).ok());

    bid.vast_url = Some(vast_url);
    bid.renderer = Some(Renderer::new(
        settings.renderer.player_base_url.clone(),
        RendererConfig {
            ad_text: settings.renderer.ad_text.clone(),
            player_width: video_ext.player_width,
            player_height: video_ext.player_height,
            content_page_url: video_ext.content_page_url.clone(),
            outstream_static: video_ext.outstream_static,
            ad_mute: video_ext.ad_mute(),
            outstream_options,
            outstream_function: correlated.outstream_function.clone(),
        },
    ));
}

fn vast_url(base: &str, cache_key: &str) -> Result<String, Report<AdapterError>> {
    let mut url = Url::parse(base).change_context(AdapterError::Configuration {
        message: format!("invalid VAST base URL '{base}'"),
    })?;
    url.query_pairs_mut().append_pair("key", cache_key);
    Ok(url.to_string())
}

/// Point each descriptor at the cache key of the bid answering it, so ad
/// server targeting looks the creative up by cache key. When several bids
/// answer the same descriptor the last one wins.
pub fn rekey_descriptors(descriptors: &mut [BidRequestDescriptor], bids: &[InterpretedBid]) {
    for descriptor in descriptors {
        let cache_key = bids
            .iter()
            .rfind(|bid| bid.request_id == descriptor.bid_id)
            .and_then(|bid| bid.cache_key.as_deref());
        if let Some(cache_key) = cache_key {
            log::debug!(
                "{BIDDER_CODE}: rekeying bid {} to {cache_key}",
                descriptor.bid_id
            );
            descriptor.bid_id = cache_key.to_string();
        }
    }
}
