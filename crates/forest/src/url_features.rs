//! Lexical URL features
//!
//! Produces the feature vector the browser extension sends to the service, in
//! the order the model was trained on: eight string-derived features followed
//! by three network-derived ones (DNS record, web traffic, iframe scan). The
//! network probes need outbound requests and are not performed here; they take
//! the value the extension reports when a probe fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::{Host, Url};

/// Feature names in vector order
pub const URL_FEATURE_NAMES: [&str; 11] = [
    "having_ip",
    "have_at_sign",
    "url_length",
    "url_depth",
    "redirection",
    "https_domain",
    "tiny_url",
    "prefix_suffix",
    "dns_record",
    "web_traffic",
    "iframe",
];

/// URLs at least this many UTF-16 code units long are flagged by `url_length`
const LONG_URL_UNITS: usize = 54;

/// Value of a network-derived feature whose probe was not run
pub const NETWORK_FEATURE_FALLBACK: u8 = 1;

static SHORTENING_SERVICES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"bit\.ly|goo\.gl|shorte\.st|go2l\.ink|x\.co|ow\.ly|t\.co|tinyurl|tr\.im|is\.gd|cli\.gs|",
        r"yfrog\.com|migre\.me|ff\.im|tiny\.cc|url4\.eu|twit\.ac|su\.pr|twurl\.nl|snipurl\.com|",
        r"short\.to|BudURL\.com|ping\.fm|post\.ly|Just\.as|bkite\.com|snipr\.com|fic\.kr|loopt\.us|",
        r"doiop\.com|short\.ie|kl\.am|wp\.me|rubyurl\.com|om\.ly|to\.ly|bit\.do|lnkd\.in|db\.tt|",
        r"qr\.ae|adf\.ly|bitly\.com|cur\.lv|tinyurl\.com|ity\.im|q\.gs|",
        r"po\.st|bc\.vc|twitthis\.com|u\.to|j\.mp|buzurl\.com|cutt\.us|u\.bb|yourls\.org|",
        r"prettylinkpro\.com|scrnch\.me|filoops\.info|vzturl\.com|qr\.net|1url\.com|tweez\.me|v\.gd|",
        r"link\.zip\.net"
    ))
    .expect("shortening service pattern is valid")
});

/// Extracted lexical features of one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UrlFeatures {
    pub having_ip: u8,
    pub have_at_sign: u8,
    pub url_length: u8,
    pub url_depth: u32,
    pub redirection: u8,
    pub https_domain: u8,
    pub tiny_url: u8,
    pub prefix_suffix: u8,
    pub dns_record: u8,
    pub web_traffic: u8,
    pub iframe: u8,
}

impl UrlFeatures {
    /// Feature vector in [`URL_FEATURE_NAMES`] order
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            f64::from(self.having_ip),
            f64::from(self.have_at_sign),
            f64::from(self.url_length),
            f64::from(self.url_depth),
            f64::from(self.redirection),
            f64::from(self.https_domain),
            f64::from(self.tiny_url),
            f64::from(self.prefix_suffix),
            f64::from(self.dns_record),
            f64::from(self.web_traffic),
            f64::from(self.iframe),
        ]
    }
}

/// Stateless extractor; features that need a parsed URL fall back to `0` when
/// the input does not parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlFeatureExtractor;

impl UrlFeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, raw: &str) -> UrlFeatures {
        let parsed = Url::parse(raw).ok();
        let hostname = parsed.as_ref().and_then(Url::host_str).unwrap_or_default();

        UrlFeatures {
            having_ip: flag(matches!(
                parsed.as_ref().and_then(Url::host),
                Some(Host::Ipv4(_)) | Some(Host::Ipv6(_))
            )),
            have_at_sign: flag(raw.contains('@')),
            url_length: flag(utf16_len(raw) >= LONG_URL_UNITS),
            url_depth: parsed.as_ref().map_or(0, path_depth),
            redirection: redirection(raw),
            https_domain: flag(hostname.contains("https")),
            tiny_url: flag(SHORTENING_SERVICES.is_match(raw)),
            prefix_suffix: flag(hostname.contains('-')),
            dns_record: NETWORK_FEATURE_FALLBACK,
            web_traffic: NETWORK_FEATURE_FALLBACK,
            iframe: NETWORK_FEATURE_FALLBACK,
        }
    }
}

fn flag(condition: bool) -> u8 {
    u8::from(condition)
}

fn path_depth(url: &Url) -> u32 {
    url.path().split('/').filter(|segment| !segment.is_empty()).count() as u32
}

// Lengths and positions are counted the way the extension's JavaScript
// strings count them.
fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

// A `//` past the scheme separator means the URL embeds a redirect.
fn redirection(raw: &str) -> u8 {
    match raw.rfind("//") {
        Some(pos) if utf16_len(&raw[..pos]) > 7 => 1,
        _ => 0,
    }
}
