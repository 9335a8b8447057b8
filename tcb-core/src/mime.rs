//! Response MIME type resolution

/// MIME reported when neither an inferred nor a stated type is available
pub const UNKNOWN_MIME: &str = "unknown";

/// Resolve the MIME type attributed to a response.
///
/// The inferred type wins unless it is missing, empty or `unknown`
/// (any case); then the type stated in the response headers is used.
/// With neither available the result is `unknown`.
pub fn effective_mime(inferred: Option<&str>, stated: Option<&str>) -> String {
    let inferred = inferred.filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case(UNKNOWN_MIME));
    let stated = stated.filter(|m| !m.is_empty());
    inferred.or(stated).unwrap_or(UNKNOWN_MIME).to_string()
}

/// Normalize a `Content-Type` header value: parameters dropped, lower-cased.
pub fn normalize_content_type(value: &str) -> Option<String> {
    let essence = value.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

/// Guess a MIME type from body content.
///
/// Used when the host proxy does not supply its own inferred type. Only
/// recognised signatures produce a type; anything else is `None` so the
/// stated `Content-Type` decides.
pub fn infer_mime(body: &[u8]) -> Option<&'static str> {
    if body.is_empty() {
        return None;
    }

    // Binary formats by magic bytes
    if body.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if body.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if body.starts_with(b"GIF87a") || body.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if body.len() >= 12 && body.starts_with(b"RIFF") && &body[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if body.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }
    if body.starts_with(&[0x1F, 0x8B]) {
        return Some("application/gzip");
    }
    if body.starts_with(b"PK\x03\x04") {
        return Some("application/zip");
    }

    let text = std::str::from_utf8(body).ok()?;
    let text = text.trim_start_matches('\u{feff}').trim_start();

    if (text.starts_with('{') || text.starts_with('['))
        && serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok()
    {
        return Some("application/json");
    }

    let head: String = text.chars().take(64).collect::<String>().to_ascii_lowercase();
    if head.starts_with("<?xml") {
        return Some("application/xml");
    }
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Some("text/html");
    }

    None
}
