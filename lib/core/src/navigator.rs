use reqwest::Url;

use crate::error::CheckoutError;

/// Query parameter the gateway appends to the return URL
pub const REFERENCE_QUERY_PARAM: &str = "reference";

/// The host's location bar
pub trait Navigator: Send + Sync {
    /// The URL currently shown to the user
    fn current_url(&self) -> String;

    /// Replace the visible URL without navigating or adding a history entry
    fn replace_url(&self, url: &str);

    /// Leave the current view for `url`
    fn navigate(&self, url: &str);
}

/// A return URL with the gateway's reference parameter split off
#[derive(Debug, PartialEq)]
pub struct ReturnUrl {
    /// First non-empty `reference` value, if any
    pub reference: Option<String>,
    /// The URL without any `reference` parameter. `None` when there was none to strip.
    pub stripped: Option<String>,
}

/// Splits the reference parameter off `url`, keeping other parameters and the fragment.
pub fn take_reference(url: &str) -> Result<ReturnUrl, CheckoutError> {
    let mut parsed =
        Url::parse(url).map_err(|e| CheckoutError::InvalidUrl(format!("{url}: {e}")))?;

    let mut found = false;
    let mut reference = None;
    let mut kept = Vec::new();
    for (key, value) in parsed.query_pairs() {
        if key == REFERENCE_QUERY_PARAM {
            found = true;
            if reference.is_none() && !value.is_empty() {
                reference = Some(value.into_owned());
            }
        } else {
            kept.push((key.into_owned(), value.into_owned()));
        }
    }

    if !found {
        return Ok(ReturnUrl {
            reference: None,
            stripped: None,
        });
    }

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(ReturnUrl {
        reference,
        stripped: Some(parsed.to_string()),
    })
}

/// Resolves `path` against the current location
pub fn resolve(current_url: &str, path: &str) -> String {
    Url::parse(current_url)
        .and_then(|base| base.join(path))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| path.to_string())
}
