//! Frame metadata and the embedding checks run before dispatch.
//!
//! The host serializes the embed attributes plus a `_context` object into
//! the frame's `name` attribute (or its URL fragment). The checks here
//! decide whether this frame may run the requested vendor type for the
//! page that embedded it.

use std::collections::BTreeMap;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::data::ConfigData;
use crate::error::FrameError;
use crate::settings::FrameSettings;

/// Host name always treated as a default frame in local development.
const LOCAL_ADS_HOST: &str = "ads.localhost";

/// Tag name of embeds restricted to `amp_embed_allowed` types.
pub const AMP_EMBED_TAG: &str = "AMP-EMBED";

const CONTEXT_KEY: &str = "_context";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameMode {
    pub test: bool,
    pub local_dev: bool,
    pub canary: bool,
}

/// What the host tells the frame about itself and its embedding page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameMetadata {
    /// URL the frame document itself was served from.
    pub frame_location: String,
    /// Location of the embedding page.
    pub location: Option<String>,
    pub canonical_url: Option<String>,
    pub source_url: Option<String>,
    pub referrer: Option<String>,
    pub page_view_id: Option<String>,
    pub client_id: Option<String>,
    pub is_primary: bool,
    pub tag_name: Option<String>,
    /// Ancestor origins, nearest first. Empty when the browser does not
    /// expose them.
    pub ancestor_origins: Vec<String>,
    /// False when the bootstrap was loaded as a top level document.
    pub is_framed: bool,
    pub mode: FrameMode,
    pub experiment_toggles: BTreeMap<String, bool>,
    #[serde(skip)]
    pub data: ConfigData,
}

impl Default for FrameMetadata {
    fn default() -> Self {
        Self {
            frame_location: String::new(),
            location: None,
            canonical_url: None,
            source_url: None,
            referrer: None,
            page_view_id: None,
            client_id: None,
            is_primary: true,
            tag_name: None,
            ancestor_origins: Vec::new(),
            is_framed: true,
            mode: FrameMode::default(),
            experiment_toggles: BTreeMap::new(),
            data: ConfigData::default(),
        }
    }
}

impl FrameMetadata {
    /// Builds metadata from an attribute object whose `_context` member holds
    /// the frame context and whose remaining members are the embed data.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if `_context` or the data are
    /// malformed.
    pub fn from_attributes(mut attributes: Map<String, Value>) -> Result<Self, Report<FrameError>> {
        let context = attributes
            .remove(CONTEXT_KEY)
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut metadata: Self =
            serde_json::from_value(context).change_context(FrameError::Configuration {
                message: "Invalid frame context".to_string(),
            })?;
        metadata.data = serde_json::from_value(Value::Object(attributes)).change_context(
            FrameError::Configuration {
                message: "Invalid embed data".to_string(),
            },
        )?;
        Ok(metadata)
    }

    /// Parses the JSON the host writes into the frame `name` attribute:
    /// `{"attributes": {...}}`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if the name is not valid JSON or
    /// lacks an attribute object.
    pub fn from_name_attribute(name: &str) -> Result<Self, Report<FrameError>> {
        let mut parsed: Map<String, Value> =
            serde_json::from_str(name).change_context(FrameError::Configuration {
                message: "Frame name is not a JSON object".to_string(),
            })?;
        match parsed.remove("attributes") {
            Some(Value::Object(attributes)) => Self::from_attributes(attributes),
            _ => Err(Report::new(FrameError::Configuration {
                message: "Frame name has no attributes object".to_string(),
            })),
        }
    }

    /// Host of the frame document, lowercased.
    #[must_use]
    pub fn frame_hostname(&self) -> Option<String> {
        hostname(&self.frame_location)
    }
}

/// Parses the frame URL fragment, which carries the attributes as JSON.
///
/// Some browsers hand back the fragment percent-encoded; since the payload
/// always starts with `{"`, an encoded payload starts with `{%22`. Returns an
/// empty object for an empty fragment and `None` when parsing fails.
#[must_use]
pub fn parse_fragment(fragment: &str) -> Option<Map<String, Value>> {
    let json = fragment.strip_prefix('#').unwrap_or(fragment);
    if json.is_empty() {
        return Some(Map::new());
    }
    let decoded = if json.starts_with("{%22") {
        urlencoding::decode(json).ok()?.into_owned()
    } else {
        json.to_string()
    };
    serde_json::from_str(&decoded).ok()
}

/// Fails when the bootstrap runs as a top level document.
///
/// # Errors
///
/// Returns [`FrameError::NotFramed`].
pub fn ensure_framed(metadata: &FrameMetadata) -> Result<(), Report<FrameError>> {
    if metadata.is_framed {
        Ok(())
    } else {
        Err(Report::new(FrameError::NotFramed {
            location: metadata.frame_location.clone(),
        }))
    }
}

/// Checks the nearest ancestor origin against the origin the host claims.
///
/// Passes when ancestor origins are unavailable; the origin is then simply
/// not validated.
///
/// # Errors
///
/// Returns [`FrameError::ParentOriginMismatch`].
pub fn validate_parent_origin(
    metadata: &FrameMetadata,
    parent_origin: &str,
) -> Result<(), Report<FrameError>> {
    let Some(ancestor) = metadata.ancestor_origins.first() else {
        return Ok(());
    };
    if ancestor == parent_origin {
        Ok(())
    } else {
        Err(Report::new(FrameError::ParentOriginMismatch {
            ancestor: ancestor.clone(),
            parent: parent_origin.to_string(),
        }))
    }
}

/// Checks that this frame intended to run `vendor`.
///
/// Every type may run on the default third-party host, on hosts matching
/// the third-party frame pattern, and on `ads.localhost`. Custom frames may
/// run the default custom-frame types plus whatever they allowlist.
///
/// # Errors
///
/// Returns [`FrameError::TypeNotAllowed`], or [`FrameError::Configuration`]
/// for a bad frame pattern.
pub fn validate_allowed_types(
    metadata: &FrameMetadata,
    settings: &FrameSettings,
    vendor: &str,
    allowed_types: Option<&[String]>,
) -> Result<(), Report<FrameError>> {
    let host = metadata.frame_hostname().unwrap_or_default();

    if host == settings.third_party_host.to_ascii_lowercase()
        || settings.third_party_frame_regex()?.is_match(&host)
        || host == LOCAL_ADS_HOST
    {
        return Ok(());
    }
    if settings
        .default_allowed_types_in_custom_frame
        .iter()
        .any(|allowed| allowed == vendor)
    {
        return Ok(());
    }
    if allowed_types.is_some_and(|types| types.iter().any(|allowed| allowed == vendor)) {
        return Ok(());
    }

    Err(Report::new(FrameError::TypeNotAllowed {
        vendor: vendor.to_string(),
    }))
}

/// Checks that the embedding page's host is one of `allowed_hostnames` or a
/// subdomain of one.
///
/// The nearest ancestor origin is preferred since it cannot be forged; the
/// referrer is the fallback. On a proxy cache origin the source host is
/// recovered from the referrer.
///
/// # Errors
///
/// Returns [`FrameError::InvalidEmbeddingHost`], or
/// [`FrameError::Configuration`] when the referrer is missing.
pub fn validate_allowed_embedding_origins(
    metadata: &FrameMetadata,
    settings: &FrameSettings,
    allowed_hostnames: &[String],
) -> Result<(), Report<FrameError>> {
    let Some(referrer) = metadata.referrer.as_deref().filter(|r| !r.is_empty()) else {
        return Err(Report::new(FrameError::Configuration {
            message: format!("Referrer expected: {}", metadata.frame_location),
        }));
    };

    let ancestor = metadata
        .ancestor_origins
        .first()
        .map_or(referrer, String::as_str);

    let host = if settings.proxy_origin_regex()?.is_match(ancestor) {
        source_url(referrer).as_deref().and_then(hostname)
    } else {
        hostname(ancestor)
    }
    .unwrap_or_default();

    let allowed = allowed_hostnames.iter().any(|allowed| {
        let allowed = allowed.to_ascii_lowercase();
        host == allowed || host.ends_with(&format!(".{allowed}"))
    });

    if allowed {
        Ok(())
    } else {
        Err(Report::new(FrameError::InvalidEmbeddingHost {
            host,
            allowed: allowed_hostnames.join(","),
        }))
    }
}

/// Whether `vendor` may be embedded with `tag_name`.
#[must_use]
pub fn is_tag_name_allowed(settings: &FrameSettings, vendor: &str, tag_name: Option<&str>) -> bool {
    if tag_name.is_some_and(|tag| tag.eq_ignore_ascii_case(AMP_EMBED_TAG)) {
        return settings.amp_embed_allowed.iter().any(|allowed| allowed == vendor);
    }
    true
}

/// Recovers the publisher URL from a proxy cache URL such as
/// `https://cdn.example/c/s/publisher.test/page.html`.
///
/// URLs not in the cache layout are returned unchanged.
#[must_use]
pub fn source_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut segments = parsed.path().trim_start_matches('/').splitn(2, '/');
    let (Some(kind), Some(rest)) = (segments.next(), segments.next()) else {
        return Some(url.to_string());
    };
    if !matches!(kind, "c" | "v" | "a" | "i") {
        return Some(url.to_string());
    }
    let (scheme, rest) = match rest.strip_prefix("s/") {
        Some(rest) => ("https", rest),
        None => ("http", rest),
    };
    Some(format!("{scheme}://{rest}"))
}

fn hostname(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
}
