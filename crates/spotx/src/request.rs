//! Request builder.
//!
//! Turns the descriptors of one auction into a single OpenRTB request for
//! the SpotX endpoint, plus the correlation table the response interpreter
//! uses to match bids back to their impressions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use error_stack::{Report, ResultExt};
use http::Method;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value as Json};
use url::Url;

use crate::constants::{BIDDER_CODE, DEFAULT_MIMES, ORTB_VERSION};
use crate::error::AdapterError;
use crate::openrtb::{
    Device, Imp, OutboundPayload, Regs, RegsExt, RequestExt, Site, User, UserExt, Video, VideoExt,
};
use crate::page::{PageEnvironment, Size};
use crate::params::{BidRequestDescriptor, SpotxParams, VideoParams};
use crate::renderer::OutstreamFunction;
use crate::settings::Settings;

/// GDPR consent data supplied by the host's consent module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GdprConsent {
    #[serde(default)]
    pub consent_string: Option<String>,
    /// `None` when applicability is unknown.
    #[serde(default)]
    pub gdpr_applies: Option<bool>,
}

/// Snapshot of the auction the descriptors belong to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionContext {
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub gdpr_consent: Option<GdprConsent>,
    /// Every descriptor of the auction, valid or not.
    #[serde(default)]
    pub bids: Vec<BidRequestDescriptor>,
}

/// An impression as sent, with the render hook of the descriptor it came from.
#[derive(Debug, Clone)]
pub struct CorrelatedImp {
    pub imp: Imp,
    pub outstream_function: Option<OutstreamFunction>,
}

/// Impressions of one request keyed by impression id.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    entries: HashMap<String, CorrelatedImp>,
}

impl CorrelationTable {
    /// Build a table from a payload alone, without render hooks.
    #[must_use]
    pub fn from_payload(payload: &OutboundPayload) -> Self {
        Self {
            entries: payload
                .imp
                .iter()
                .map(|imp| {
                    (
                        imp.correlation_key(),
                        CorrelatedImp {
                            imp: imp.clone(),
                            outstream_function: None,
                        },
                    )
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, impid: &str) -> Option<&CorrelatedImp> {
        self.entries.get(impid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// HTTP request the host performs on the adapter's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "WireRequest")]
pub struct OutboundRequest {
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    pub url: String,
    pub payload: OutboundPayload,
    #[serde(skip)]
    pub correlation: CorrelationTable,
}

/// Serialized form of [`OutboundRequest`]; the correlation table is rebuilt
/// from the payload.
#[derive(Deserialize)]
struct WireRequest {
    method: String,
    url: String,
    payload: OutboundPayload,
}

impl TryFrom<WireRequest> for OutboundRequest {
    type Error = http::method::InvalidMethod;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let correlation = CorrelationTable::from_payload(&wire.payload);
        Ok(Self {
            method: Method::from_bytes(wire.method.as_bytes())?,
            url: wire.url,
            payload: wire.payload,
            correlation,
        })
    }
}

fn serialize_method<S>(method: &Method, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(method.as_str())
}

/// An optional `video.ext` field, sent only when the extractor yields a value.
struct OptionalExtField {
    key: &'static str,
    extract: fn(&VideoParams) -> Option<Json>,
}

const OPTIONAL_EXT_FIELDS: &[OptionalExtField] = &[
    OptionalExtField {
        key: "ad_mute",
        extract: ad_mute_field,
    },
    OptionalExtField {
        key: "hide_skin",
        extract: hide_skin_field,
    },
    OptionalExtField {
        key: "ad_volume",
        extract: ad_volume_field,
    },
    OptionalExtField {
        key: "ad_unit",
        extract: ad_unit_field,
    },
    OptionalExtField {
        key: "custom",
        extract: custom_field,
    },
    OptionalExtField {
        key: "outstream_options",
        extract: outstream_options_field,
    },
];

fn ad_mute_field(video: &VideoParams) -> Option<Json> {
    video.ad_mute.map(|muted| json!(u8::from(muted)))
}

fn hide_skin_field(video: &VideoParams) -> Option<Json> {
    video.hide_skin.map(|hidden| json!(u8::from(hidden)))
}

fn ad_volume_field(video: &VideoParams) -> Option<Json> {
    video.ad_volume.map(|volume| json!(volume))
}

fn ad_unit_field(video: &VideoParams) -> Option<Json> {
    video.ad_unit.clone().map(Json::String)
}

fn custom_field(video: &VideoParams) -> Option<Json> {
    video
        .custom
        .clone()
        .filter(|custom| !custom.is_empty())
        .map(Json::Object)
}

fn outstream_options_field(video: &VideoParams) -> Option<Json> {
    video
        .outstream_options
        .as_ref()
        .and_then(|options| serde_json::to_value(options).ok())
        .filter(|value| value.as_object().is_some_and(|fields| !fields.is_empty()))
}

fn optional_ext_fields(video: &VideoParams) -> Map<String, Json> {
    OPTIONAL_EXT_FIELDS
        .iter()
        .filter_map(|field| (field.extract)(video).map(|value| (field.key.to_string(), value)))
        .collect()
}

static LAST_IMP_ID: AtomicU64 = AtomicU64::new(0);

/// Next impression id: the current time in milliseconds, bumped past the
/// previous id when several are issued within the same millisecond.
fn next_imp_id() -> u64 {
    let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    let mut last = LAST_IMP_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last.saturating_add(1));
        match LAST_IMP_ID.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Build the outbound request for a non-empty list of valid descriptors.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidRequest`] when `descriptors` is empty or the
/// auction's first descriptor has no channel id,
/// [`AdapterError::InvalidParams`] when any descriptor's params cannot be
/// parsed, and [`AdapterError::Configuration`] when the endpoint is not a
/// valid base URL.
pub fn build_requests(
    settings: &Settings,
    descriptors: &[BidRequestDescriptor],
    context: &AuctionContext,
    page: &dyn PageEnvironment,
) -> Result<OutboundRequest, Report<AdapterError>> {
    let Some(first_input) = descriptors.first() else {
        return Err(Report::new(AdapterError::InvalidRequest {
            message: "no bid requests to send".to_string(),
        }));
    };
    let lead = context.bids.first().unwrap_or(first_input);
    let lead_params = lead.spotx_params()?;

    let channel_id = lead_params.video.channel_id.clone().ok_or_else(|| {
        Report::new(AdapterError::InvalidRequest {
            message: format!("bid {} has no channel_id", lead.bid_id),
        })
    })?;

    let page_url = context
        .referrer
        .clone()
        .filter(|referrer| !referrer.is_empty())
        .unwrap_or_else(|| page.location());
    let page_secure = page_url.starts_with("https:");
    let content_size = content_size(lead, &lead_params, page);

    let mut imps = Vec::with_capacity(descriptors.len());
    let mut correlation = HashMap::with_capacity(descriptors.len());
    let mut pubcid = None;

    for descriptor in descriptors {
        let params = descriptor.spotx_params()?;
        let imp = build_imp(settings, descriptor, &params, &page_url, page_secure, content_size);

        if let Some(found) = descriptor.pubcid() {
            pubcid = Some(found.to_string());
        }

        correlation.insert(
            imp.correlation_key(),
            CorrelatedImp {
                imp: imp.clone(),
                outstream_function: descriptor.outstream_function.clone(),
            },
        );
        imps.push(imp);
    }

    let mut user_ext = UserExt {
        fpc: pubcid,
        ..UserExt::default()
    };
    let mut regs = None;
    if let Some(consent) = &context.gdpr_consent {
        user_ext.consent = consent.consent_string.clone();
        regs = consent.gdpr_applies.map(|applies| Regs {
            ext: RegsExt {
                gdpr: u8::from(applies),
            },
        });
    }

    let payload = OutboundPayload {
        id: channel_id.clone(),
        imp: imps,
        site: Site {
            id: String::new(),
            page: page_url,
            content: "content".to_string(),
        },
        device: device(page),
        user: (!user_ext.is_empty()).then_some(User { ext: user_ext }),
        regs,
        ext: RequestExt {
            wrap_response: 1,
            number_of_ads: lead_params.number_of_ads,
        },
    };

    let url = endpoint_url(&settings.adapter.endpoint, &channel_id)?;
    log::debug!(
        "{BIDDER_CODE}: built request for {} impression(s) to {url}",
        payload.imp.len()
    );

    Ok(OutboundRequest {
        method: Method::POST,
        url,
        payload,
        correlation: CorrelationTable {
            entries: correlation,
        },
    })
}

fn build_imp(
    settings: &Settings,
    descriptor: &BidRequestDescriptor,
    params: &SpotxParams,
    page_url: &str,
    page_secure: bool,
    content_size: Size,
) -> Imp {
    let video = &params.video;

    let ext = VideoExt {
        player_width: content_size.width,
        player_height: content_size.height,
        sdk_name: settings.adapter.sdk_name.clone(),
        content_page_url: page_url.to_string(),
        version_ortb: ORTB_VERSION.to_string(),
        bid_id: descriptor.bid_id.clone(),
        video_slot: video.video_slot.clone().unwrap_or_default(),
        outstream_static: video.outstream_static.unwrap_or(false),
        optional: optional_ext_fields(video),
    };

    let mimes = video
        .mimes
        .clone()
        .filter(|mimes| !mimes.is_empty())
        .unwrap_or_else(|| DEFAULT_MIMES.iter().map(ToString::to_string).collect());

    Imp {
        id: next_imp_id(),
        secure: u8::from(page_secure || params.secure.unwrap_or(false)),
        bidfloor: params.price_floor,
        video: Some(Video {
            w: content_size.width,
            h: content_size.height,
            mimes,
            startdelay: video.start_delay.map(u8::from),
            ext,
        }),
    }
}

/// Shared content size: explicit params, then the declared player size,
/// then the viewport.
fn content_size(lead: &BidRequestDescriptor, params: &SpotxParams, page: &dyn PageEnvironment) -> Size {
    let declared = lead.declared_player_size();
    let viewport = page.viewport();
    Size::new(
        params
            .video
            .content_width
            .or(declared.map(|(width, _)| width))
            .unwrap_or(viewport.width),
        params
            .video
            .content_height
            .or(declared.map(|(_, height)| height))
            .unwrap_or(viewport.height),
    )
}

fn device(page: &dyn PageEnvironment) -> Device {
    let screen = page.screen();
    let navigator = page.navigator();
    let language = navigator
        .language
        .as_deref()
        .and_then(|tag| tag.split('-').next())
        .unwrap_or_default()
        .to_string();

    Device {
        h: screen.height,
        w: screen.width,
        dnt: u8::from(navigator.do_not_track),
        language,
        make: navigator.vendor.unwrap_or_default(),
        ua: navigator.user_agent,
    }
}

fn endpoint_url(endpoint: &str, channel_id: &str) -> Result<String, Report<AdapterError>> {
    let mut url = Url::parse(endpoint).change_context(AdapterError::Configuration {
        message: format!("invalid endpoint '{endpoint}'"),
    })?;
    url.path_segments_mut()
        .map_err(|()| {
            Report::new(AdapterError::Configuration {
                message: format!("endpoint '{endpoint}' cannot be a base URL"),
            })
        })?
        .pop_if_empty()
        .push(channel_id);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{MediaTypes, VideoMediaType};
    use crate::test_support::tests::{descriptor, publisher_page, test_settings};

    fn outstream(bid_id: &str) -> BidRequestDescriptor {
        descriptor(
            bid_id,
            json!({"video": {
                "channel_id": 85394,
                "slot": "s1",
                "video_slot": "v1",
                "content_width": 640,
                "content_height": 360
            }}),
        )
    }

    fn build(descriptors: &[BidRequestDescriptor], context: &AuctionContext) -> OutboundRequest {
        build_requests(&test_settings(), descriptors, context, &publisher_page())
            .expect("should build request")
    }

    #[test]
    fn builds_one_impression_per_descriptor_in_order() {
        let bids = vec![outstream("bid-1"), outstream("bid-2"), outstream("bid-3")];
        let request = build(&bids, &AuctionContext::default());

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.url,
            "https://search.spotxchange.com/openrtb/2.3/dados/85394"
        );
        assert_eq!(request.payload.id, "85394");

        let bid_ids: Vec<_> = request
            .payload
            .imp
            .iter()
            .filter_map(|imp| imp.video.as_ref().map(|video| video.ext.bid_id.as_str()))
            .collect();
        assert_eq!(bid_ids, vec!["bid-1", "bid-2", "bid-3"]);

        assert_eq!(request.correlation.len(), 3);
        for imp in &request.payload.imp {
            assert!(request.correlation.get(&imp.correlation_key()).is_some());
        }
    }

    #[test]
    fn impression_ids_strictly_increase() {
        let bids = vec![outstream("bid-1"), outstream("bid-2")];
        let first = build(&bids, &AuctionContext::default());
        let second = build(&bids, &AuctionContext::default());

        let ids: Vec<u64> = first
            .payload
            .imp
            .iter()
            .chain(&second.payload.imp)
            .map(|imp| imp.id)
            .collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn mandatory_video_ext_fields() {
        let request = build(&[outstream("bid-1")], &AuctionContext::default());
        let json = serde_json::to_value(&request.payload).expect("should serialize");
        let ext = &json["imp"][0]["video"]["ext"];

        assert_eq!(ext["player_width"], json!(640));
        assert_eq!(ext["player_height"], json!(360));
        assert_eq!(ext["sdk_name"], json!("Prebid 1+"));
        assert_eq!(
            ext["content_page_url"],
            json!("https://publisher.example/article")
        );
        assert_eq!(ext["versionOrtb"], json!("2.3"));
        assert_eq!(ext["bidId"], json!("bid-1"));
        assert_eq!(ext["videoSlot"], json!("v1"));
        assert_eq!(ext["outstream_static"], json!(false));
        for key in ["ad_mute", "hide_skin", "ad_volume", "ad_unit", "custom"] {
            assert!(ext.get(key).is_none(), "{key} should be omitted");
        }

        assert_eq!(
            json["imp"][0]["video"]["mimes"],
            json!(["application/javascript", "video/mp4", "video/webm"])
        );
        assert!(json["imp"][0]["video"].get("startdelay").is_none());
        assert!(json["imp"][0].get("bidfloor").is_none());
        assert_eq!(json["ext"], json!({"wrap_response": 1}));
        assert_eq!(
            json["site"],
            json!({"id": "", "page": "https://publisher.example/article", "content": "content"})
        );
    }

    #[test]
    fn optional_fields_follow_params() {
        let bid = descriptor(
            "bid-1",
            json!({
                "video": {
                    "channel_id": 85394,
                    "slot": "s1",
                    "video_slot": "v1",
                    "ad_mute": 1,
                    "hide_skin": false,
                    "ad_volume": "40",
                    "ad_unit": "outstream",
                    "custom": {"param1": "a"},
                    "mimes": ["video/mp4"],
                    "start_delay": true,
                    "outstream_static": true,
                    "outstream_options": {"in_iframe": "frame1"}
                },
                "price_floor": 1.5,
                "secure": 1,
                "number_of_ads": "2"
            }),
        );
        let context = AuctionContext {
            referrer: Some("http://referrer.example/".to_string()),
            ..AuctionContext::default()
        };
        let request = build(&[bid], &context);
        let json = serde_json::to_value(&request.payload).expect("should serialize");
        let imp = &json["imp"][0];
        let ext = &imp["video"]["ext"];

        assert_eq!(ext["ad_mute"], json!(1));
        assert_eq!(ext["hide_skin"], json!(0));
        assert_eq!(ext["ad_volume"], json!(40));
        assert_eq!(ext["ad_unit"], json!("outstream"));
        assert_eq!(ext["custom"], json!({"param1": "a"}));
        assert_eq!(ext["outstream_options"], json!({"in_iframe": "frame1"}));
        assert_eq!(ext["outstream_static"], json!(true));
        assert_eq!(ext["content_page_url"], json!("http://referrer.example/"));
        assert_eq!(imp["video"]["mimes"], json!(["video/mp4"]));
        assert_eq!(imp["video"]["startdelay"], json!(1));
        assert_eq!(imp["bidfloor"], json!(1.5));
        assert_eq!(imp["secure"], json!(1));
        assert_eq!(json["ext"]["number_of_ads"], json!(2));
    }

    #[test]
    fn secure_follows_page_protocol_or_param() {
        let insecure = AuctionContext {
            referrer: Some("http://publisher.example/".to_string()),
            ..AuctionContext::default()
        };
        let request = build(&[outstream("bid-1")], &insecure);
        assert_eq!(request.payload.imp[0].secure, 0);

        let request = build(&[outstream("bid-1")], &AuctionContext::default());
        assert_eq!(request.payload.imp[0].secure, 1);
    }

    #[test]
    fn content_size_falls_back_to_declared_size_then_viewport() {
        let mut declared = descriptor(
            "bid-1",
            json!({"video": {"channel_id": 1, "slot": "s1", "video_slot": "v1"}}),
        );
        declared.media_types = Some(MediaTypes {
            video: Some(VideoMediaType {
                context: Some("outstream".to_string()),
                player_size: vec![[480, 270]],
            }),
        });
        let request = build(&[declared], &AuctionContext::default());
        let video = request.payload.imp[0].video.as_ref().expect("video block");
        assert_eq!((video.w, video.h), (480, 270));

        let bare = descriptor(
            "bid-1",
            json!({"video": {"channel_id": 1, "slot": "s1", "video_slot": "v1"}}),
        );
        let request = build(&[bare], &AuctionContext::default());
        let video = request.payload.imp[0].video.as_ref().expect("video block");
        assert_eq!((video.w, video.h), (1280, 720));
    }

    #[test]
    fn channel_and_size_come_from_first_auction_descriptor() {
        let lead = descriptor(
            "lead",
            json!({"video": {
                "channel_id": "111",
                "slot": "s1",
                "video_slot": "v1",
                "content_width": 300,
                "content_height": 200
            }}),
        );
        let context = AuctionContext {
            bids: vec![lead],
            ..AuctionContext::default()
        };
        let request = build(&[outstream("bid-1")], &context);

        assert_eq!(request.payload.id, "111");
        assert!(request.url.ends_with("/dados/111"));
        let video = request.payload.imp[0].video.as_ref().expect("video block");
        assert_eq!((video.ext.player_width, video.ext.player_height), (300, 200));
    }

    #[test]
    fn channel_id_is_appended_to_the_endpoint_path() {
        let mut settings = test_settings();
        settings.adapter.endpoint = "https://search.spotxchange.com/openrtb/2.3/dados".to_string();

        let request = build_requests(
            &settings,
            &[outstream("bid-1")],
            &AuctionContext::default(),
            &publisher_page(),
        )
        .expect("should build request");
        assert_eq!(
            request.url,
            "https://search.spotxchange.com/openrtb/2.3/dados/85394"
        );
    }

    #[test]
    fn device_block_uses_navigator_signals() {
        let request = build(&[outstream("bid-1")], &AuctionContext::default());
        let device = &request.payload.device;

        assert_eq!((device.w, device.h), (1920, 1080));
        assert_eq!(device.dnt, 1);
        assert_eq!(device.language, "en");
        assert_eq!(device.make, "Google Inc.");
        assert_eq!(device.ua, "Mozilla/5.0 (test)");
    }

    #[test]
    fn user_block_omitted_without_consent_or_pubcid() {
        let request = build(&[outstream("bid-1")], &AuctionContext::default());
        assert!(request.payload.user.is_none());
        assert!(request.payload.regs.is_none());
    }

    #[test]
    fn consent_and_pubcid_populate_user_and_regs() {
        let mut bid = outstream("bid-1");
        bid.crumbs = Some(crate::params::Crumbs {
            pubcid: Some("pubcid-1".to_string()),
        });
        let context = AuctionContext {
            gdpr_consent: Some(GdprConsent {
                consent_string: Some("BOJ8RZsOJ8RZsABAB8AAAAAZ".to_string()),
                gdpr_applies: Some(true),
            }),
            ..AuctionContext::default()
        };

        let request = build(&[bid], &context);
        let json = serde_json::to_value(&request.payload).expect("should serialize");

        assert_eq!(
            json["user"],
            json!({"ext": {"consent": "BOJ8RZsOJ8RZsABAB8AAAAAZ", "fpc": "pubcid-1"}})
        );
        assert_eq!(json["regs"], json!({"ext": {"gdpr": 1}}));
    }

    #[test]
    fn unknown_gdpr_applicability_omits_regs() {
        let context = AuctionContext {
            gdpr_consent: Some(GdprConsent {
                consent_string: Some("consent".to_string()),
                gdpr_applies: None,
            }),
            ..AuctionContext::default()
        };
        let request = build(&[outstream("bid-1")], &context);

        assert!(request.payload.regs.is_none());
        assert_eq!(
            request
                .payload
                .user
                .as_ref()
                .and_then(|user| user.ext.consent.as_deref()),
            Some("consent")
        );
    }

    #[test]
    fn render_hooks_travel_in_correlation_table() {
        let mut bid = outstream("bid-1");
        bid.outstream_function = Some(OutstreamFunction::new(|_| {}));
        let request = build(&[bid], &AuctionContext::default());

        let key = request.payload.imp[0].correlation_key();
        let entry = request.correlation.get(&key).expect("imp is correlated");
        assert!(entry.outstream_function.is_some());
    }

    #[test]
    fn empty_descriptor_list_is_rejected() {
        let err = build_requests(
            &test_settings(),
            &[],
            &AuctionContext::default(),
            &publisher_page(),
        )
        .expect_err("empty input should fail");
        assert!(matches!(
            err.current_context(),
            AdapterError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn malformed_params_fail_the_request() {
        let bids = vec![outstream("bid-1"), descriptor("bid-2", json!({"video": 3}))];
        let err = build_requests(
            &test_settings(),
            &bids,
            &AuctionContext::default(),
            &publisher_page(),
        )
        .expect_err("malformed params should fail");
        assert!(matches!(
            err.current_context(),
            AdapterError::InvalidParams { .. }
        ));
    }

    #[test]
    fn request_json_rebuilds_correlation_table() {
        let request = build(&[outstream("bid-1")], &AuctionContext::default());
        let json = serde_json::to_string(&request).expect("should serialize");
        assert!(json.contains("\"method\":\"POST\""));

        let parsed: OutboundRequest = serde_json::from_str(&json).expect("should parse");
        assert_eq!(parsed.method, Method::POST);
        assert_eq!(parsed.payload, request.payload);
        let key = request.payload.imp[0].correlation_key();
        assert!(parsed.correlation.get(&key).is_some());
    }
}
