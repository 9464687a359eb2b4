pub const BIDDER_CODE: &str = "spotx";
pub const ORTB_VERSION: &str = "2.3";

pub const DEFAULT_ENDPOINT: &str = "https://search.spotxchange.com/openrtb/2.3/dados/";
pub const DEFAULT_PLAYER_BASE_URL: &str = "https://js.spotx.tv/easi/v1/";
pub const DEFAULT_VAST_BASE_URL: &str = "https://search.spotxchange.com/ad/vast.html";
pub const DEFAULT_SDK_NAME: &str = "Prebid 1+";
pub const DEFAULT_AD_TEXT: &str = "SpotX Outstream Video Ad via Prebid.js";

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_TTL_SECONDS: u32 = 360;

pub const DEFAULT_MIMES: &[&str] = &["application/javascript", "video/mp4", "video/webm"];

pub const AD_UNIT_OUTSTREAM: &str = "outstream";
pub const AD_DONE_FUNCTION_NAME: &str = "mySpotXAdDoneFunction";
pub const DATA_ATTRIBUTE_PREFIX: &str = "data-spotx_";
