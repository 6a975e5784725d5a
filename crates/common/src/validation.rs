//! Validation of embed configuration data before a renderer runs.
//!
//! Validation never copies `data`; callers keep using the original map
//! once it passes.

use error_stack::Report;

use crate::context::ExecutionContext;
use crate::data::{ConfigData, TYPE_KEY};
use crate::error::FrameError;

/// Keys the host may always attach regardless of the vendor's key lists.
const HOST_RESERVED_KEYS: &[&str] = &[TYPE_KEY, "ampSlotIndex", "_context"];

/// One entry of a vendor's required key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredKey<'a> {
    /// The key must be present and non-empty.
    Key(&'a str),
    /// Exactly one of the keys must be present.
    OneOf(&'a [&'a str]),
}

impl<'a> From<&'a str> for RequiredKey<'a> {
    fn from(key: &'a str) -> Self {
        Self::Key(key)
    }
}

/// How keys outside of the required and optional lists are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// Unlisted keys are accepted; the optional list is documentation.
    #[default]
    Permissive,
    /// Unlisted keys fail with [`FrameError::UnexpectedParameter`].
    Strict,
}

/// Checks that every required key is present and non-empty.
///
/// # Errors
///
/// Returns [`FrameError::MissingParameter`] naming the first missing key in
/// `required` order.
pub fn validate_data(
    data: &ConfigData,
    required: &[&str],
    optional: &[&str],
) -> Result<(), Report<FrameError>> {
    let required: Vec<RequiredKey<'_>> = required.iter().copied().map(RequiredKey::Key).collect();
    validate_data_with_mode(data, &required, optional, ValidationMode::Permissive)
}

/// Full form of [`validate_data`] supporting exactly-one-of groups and
/// strict mode.
///
/// # Errors
///
/// Returns [`FrameError::MissingParameter`], [`FrameError::ConflictingParameters`]
/// or, in strict mode, [`FrameError::UnexpectedParameter`].
pub fn validate_data_with_mode(
    data: &ConfigData,
    required: &[RequiredKey<'_>],
    optional: &[&str],
    mode: ValidationMode,
) -> Result<(), Report<FrameError>> {
    let vendor = data.vendor_type().unwrap_or("embed");

    for entry in required {
        match entry {
            RequiredKey::Key(key) => {
                if !data.has(key) {
                    return Err(Report::new(FrameError::MissingParameter {
                        vendor: vendor.to_string(),
                        key: (*key).to_string(),
                    }));
                }
            }
            RequiredKey::OneOf(keys) => validate_exactly_one(data, keys)?,
        }
    }

    if mode == ValidationMode::Strict {
        let listed = |key: &str| {
            HOST_RESERVED_KEYS.contains(&key)
                || optional.contains(&key)
                || required.iter().any(|entry| match entry {
                    RequiredKey::Key(k) => *k == key,
                    RequiredKey::OneOf(keys) => keys.contains(&key),
                })
        };
        if let Some(unexpected) = data.keys().find(|key| !listed(*key)) {
            return Err(Report::new(FrameError::UnexpectedParameter {
                vendor: vendor.to_string(),
                key: unexpected.to_string(),
            }));
        }
    }

    Ok(())
}

/// Validates `data` with the mode configured on the frame.
///
/// Renderers call this rather than [`validate_data_with_mode`] so that the
/// deployment decides whether undeclared keys are tolerated.
///
/// # Errors
///
/// See [`validate_data_with_mode`].
pub fn validate_vendor_data(
    ctx: &ExecutionContext,
    data: &ConfigData,
    required: &[RequiredKey<'_>],
    optional: &[&str],
) -> Result<(), Report<FrameError>> {
    validate_data_with_mode(data, required, optional, ctx.validation_mode())
}

/// Checks that exactly one of `alternatives` is present.
///
/// # Errors
///
/// Returns [`FrameError::MissingParameter`] when none is present and
/// [`FrameError::ConflictingParameters`] when more than one is.
pub fn validate_exactly_one(
    data: &ConfigData,
    alternatives: &[&str],
) -> Result<(), Report<FrameError>> {
    let vendor = data.vendor_type().unwrap_or("embed");
    let present = alternatives.iter().filter(|key| data.has(key)).count();
    match present {
        1 => Ok(()),
        0 => Err(Report::new(FrameError::MissingParameter {
            vendor: vendor.to_string(),
            key: format!("one of [{}]", alternatives.join(", ")),
        })),
        _ => Err(Report::new(FrameError::ConflictingParameters {
            vendor: vendor.to_string(),
            keys: alternatives.join(", "),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_when_required_key_present() {
        let data = ConfigData::new().with("sid", "abc");
        assert!(validate_data(&data, &["sid"], &[]).is_ok());
    }

    #[test]
    fn missing_required_key_is_named() {
        let data = ConfigData::new();
        let err = validate_data(&data, &["sid"], &[]).expect_err("sid is required");
        assert!(matches!(
            err.current_context(),
            FrameError::MissingParameter { key, .. } if key == "sid"
        ));
        assert!(err.to_string().contains("sid"));
    }

    #[test]
    fn reports_first_missing_key_in_order() {
        let data = ConfigData::new().with("b", "1");
        let err = validate_data(&data, &["a", "b", "c"], &[]).expect_err("a is missing");
        assert!(matches!(
            err.current_context(),
            FrameError::MissingParameter { key, .. } if key == "a"
        ));
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let data = ConfigData::new().with("sid", "");
        assert!(validate_data(&data, &["sid"], &[]).is_err());
    }

    #[test]
    fn permissive_mode_accepts_unlisted_keys() {
        let data = ConfigData::new().with("sid", "abc").with("extra", "x");
        assert!(validate_data(&data, &["sid"], &["zone"]).is_ok());
    }

    #[test]
    fn strict_mode_rejects_unlisted_keys() {
        let data = ConfigData::new()
            .with("type", "acme")
            .with("sid", "abc")
            .with("zone", "1")
            .with("extra", "x");
        let err = validate_data_with_mode(
            &data,
            &[RequiredKey::Key("sid")],
            &["zone"],
            ValidationMode::Strict,
        )
        .expect_err("extra is not listed");
        assert!(matches!(
            err.current_context(),
            FrameError::UnexpectedParameter { key, vendor } if key == "extra" && vendor == "acme"
        ));
    }

    #[test]
    fn exactly_one_group() {
        let one = ConfigData::new().with("article", "auto");
        assert!(validate_exactly_one(&one, &["article", "video"]).is_ok());

        let none = ConfigData::new();
        assert!(matches!(
            validate_exactly_one(&none, &["article", "video"])
                .expect_err("none present")
                .current_context(),
            FrameError::MissingParameter { .. }
        ));

        let both = ConfigData::new().with("article", "auto").with("video", "auto");
        assert!(matches!(
            validate_exactly_one(&both, &["article", "video"])
                .expect_err("both present")
                .current_context(),
            FrameError::ConflictingParameters { .. }
        ));
    }

    #[test]
    fn one_of_group_inside_required_list() {
        let data = ConfigData::new().with("publisher", "p").with("video", "auto");
        let required = [
            RequiredKey::Key("publisher"),
            RequiredKey::OneOf(&["article", "video"]),
        ];
        assert!(validate_data_with_mode(&data, &required, &[], ValidationMode::Strict).is_ok());
    }
}
