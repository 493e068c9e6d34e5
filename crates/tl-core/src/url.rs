//! URL slicing for the classification hot path
//!
//! These functions avoid allocations where they can and work directly on
//! string slices. Only URLs with an authority component (`scheme://host`)
//! have a host.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

// =============================================================================
// Scheme
// =============================================================================

/// Offset just past `scheme://`, or `None` for URLs without an authority
/// (`about:blank`, `data:...`).
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let colon = url.find(':')?;
    let scheme = &url[..colon];
    let valid = !scheme.is_empty()
        && scheme
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'));

    (valid && url[colon..].starts_with("://")).then_some(colon + 3)
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Byte range of the host inside `url`: userinfo and port excluded,
/// brackets of an IPv6 literal kept.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let rest = &url[scheme_end..];
    let authority = match rest.find(|c: char| matches!(c, '/' | '?' | '#')) {
        Some(end) => &rest[..end],
        None => rest,
    };

    let host_start = authority.rfind('@').map_or(0, |at| at + 1);
    let host = &authority[host_start..];
    let host_len = if host.starts_with('[') {
        host.find(']')? + 1
    } else {
        host.find(':').unwrap_or(host.len())
    };

    let start = scheme_end + host_start;
    Some((start, start + host_len))
}

/// Host of a URL without port, userinfo or trailing dot.
/// Returns `None` when the URL has no (or an empty) host.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (start, end) = get_host_position(url)?;
    let host = url[start..end].trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Host of a URL, lowercased. Borrows when the host is already lowercase.
#[inline]
pub fn extract_host_lowercase(url: &str) -> Option<Cow<'_, str>> {
    let host = extract_host(url)?;
    if host.bytes().any(|b| b.is_ascii_uppercase()) {
        Some(Cow::Owned(host.to_ascii_lowercase()))
    } else {
        Some(Cow::Borrowed(host))
    }
}

// =============================================================================
// Path Extraction
// =============================================================================

/// Path of a URL without query or fragment. A URL without an explicit
/// path yields "/".
#[inline]
pub fn extract_path(url: &str) -> &str {
    let Some(scheme_end) = get_scheme_end(url) else {
        return "/";
    };

    let rest = &url[scheme_end..];
    let path = match rest.find(|c: char| matches!(c, '/' | '?' | '#')) {
        Some(start) if rest.as_bytes()[start] == b'/' => &rest[start..],
        _ => return "/",
    };

    match path.find(|c: char| matches!(c, '?' | '#')) {
        Some(end) => &path[..end],
        None => path,
    }
}

/// Percent-decoded form of a path. Borrows when there is nothing to
/// decode; invalid UTF-8 after decoding is replaced.
pub fn decode_path(path: &str) -> Cow<'_, str> {
    percent_decode_str(path).decode_utf8_lossy()
}

// =============================================================================
// Reversed Labels
// =============================================================================

/// Host labels from the TLD inwards: `ads.example.com` yields
/// `com`, `example`, `ads`.
#[inline]
pub fn reversed_labels(host: &str) -> std::str::RSplit<'_, char> {
    host.rsplit('.')
}

// =============================================================================
// Page Keys
// =============================================================================

/// Normalize a page URL into a ledger key: the fragment is dropped and the
/// scheme and host are lowercased. Everything else is kept verbatim.
pub fn normalize_page_url(url: &str) -> String {
    let url = url.trim();
    let url = match url.find('#') {
        Some(pos) => &url[..pos],
        None => url,
    };

    match get_host_position(url) {
        Some((_, host_end)) => {
            let mut key = String::with_capacity(url.len());
            key.push_str(&url[..host_end].to_ascii_lowercase());
            key.push_str(&url[host_end..]);
            key
        }
        None => url.to_string(),
    }
}
