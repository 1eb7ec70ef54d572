//! First-part extraction from `multipart/form-data` upload bodies.
//!
//! The upload endpoint only processes the first part of a multipart body.
//! Its `Content-Disposition` must be `form-data` and carry a `name`
//! parameter (the blob name); its `Content-Type` defaults to
//! `application/x-binary` when absent. This is a synchronous parser over the
//! already-collected body bytes.

use bytes::Bytes;

/// Default mime type for parts that do not declare one.
const DEFAULT_PART_CONTENT_TYPE: &str = "application/x-binary";

/// Errors from multipart parsing.
#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    /// The body contains no parts.
    #[error("empty multipart request")]
    Empty,

    /// The first part's `Content-Disposition` could not be parsed.
    #[error("failed to parse Content-Disposition of part number 1: {0}")]
    BadDisposition(String),

    /// The first part's disposition is not `form-data`.
    #[error("unsupported ContentDisposition mediaType of part number 1: {0}")]
    NotFormData(String),
}

/// The first part of a multipart upload body.
#[derive(Debug)]
pub struct FirstPart {
    /// The blob name, from the disposition's `name` parameter.
    pub name: String,
    /// The part's content type.
    pub content_type: String,
    /// The payload.
    pub data: Bytes,
}

/// Extract the boundary from a `multipart/form-data; boundary=...` value.
///
/// Returns `None` when the value is not multipart/form-data or declares no
/// boundary.
#[must_use]
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    let media_type = parts.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    for param in parts {
        if let Some(value) = param.trim().strip_prefix("boundary=") {
            let boundary = value.trim_matches('"');
            if !boundary.is_empty() {
                return Some(boundary.to_owned());
            }
        }
    }
    None
}

/// Parse the first part out of a multipart body.
pub fn parse_first_part(body: &[u8], boundary: &str) -> Result<FirstPart, MultipartError> {
    let delimiter = format!("--{boundary}");
    let end_delimiter = format!("--{boundary}--");

    let part = first_part_bytes(body, delimiter.as_bytes(), end_delimiter.as_bytes())
        .ok_or(MultipartError::Empty)?;

    let (headers, data) = split_headers_body(part)
        .ok_or_else(|| MultipartError::BadDisposition("missing part headers".to_owned()))?;

    let disposition = header_value(headers, "content-disposition")
        .ok_or_else(|| MultipartError::BadDisposition("missing Content-Disposition".to_owned()))?;

    let media_type = disposition
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if media_type != "form-data" {
        return Err(MultipartError::NotFormData(media_type));
    }

    let name = disposition_param(&disposition, "name")
        .ok_or_else(|| MultipartError::BadDisposition(disposition.clone()))?;

    let content_type = header_value(headers, "content-type")
        .unwrap_or_else(|| DEFAULT_PART_CONTENT_TYPE.to_owned());

    Ok(FirstPart {
        name,
        content_type,
        data: Bytes::copy_from_slice(data),
    })
}

/// Slice out the bytes of the first part, between the opening delimiter and
/// the next delimiter (or end delimiter).
fn first_part_bytes<'a>(
    body: &'a [u8],
    delimiter: &[u8],
    end_delimiter: &[u8],
) -> Option<&'a [u8]> {
    let start = find_bytes(body, delimiter)? + delimiter.len();
    let mut remaining = &body[start..];
    remaining = remaining.strip_prefix(b"\r\n").unwrap_or(remaining);

    if remaining.starts_with(b"--") {
        // The opening delimiter was already the end delimiter.
        return None;
    }

    let end = find_bytes(remaining, delimiter)
        .or_else(|| find_bytes(remaining, end_delimiter))
        .unwrap_or(remaining.len());
    let part = &remaining[..end];
    let part = part.strip_suffix(b"\r\n").unwrap_or(part);
    if part.is_empty() {
        None
    } else {
        Some(part)
    }
}

/// Split a part into its header block and body at the first `\r\n\r\n`.
fn split_headers_body(part: &[u8]) -> Option<(&[u8], &[u8])> {
    let separator = b"\r\n\r\n";
    find_bytes(part, separator).map(|pos| (&part[..pos], &part[pos + separator.len()..]))
}

/// Find a header line (case-insensitive name) and return its value.
fn header_value(headers: &[u8], name: &str) -> Option<String> {
    let headers = String::from_utf8_lossy(headers);
    for line in headers.split("\r\n") {
        let Some((line_name, value)) = line.split_once(':') else {
            continue;
        };
        if line_name.trim().eq_ignore_ascii_case(name) {
            return Some(value.trim().to_owned());
        }
    }
    None
}

/// Extract a `param="value"` or `param=value` parameter from a disposition.
fn disposition_param(disposition: &str, param: &str) -> Option<String> {
    for piece in disposition.split(';').skip(1) {
        let Some((key, value)) = piece.trim().split_once('=') else {
            continue;
        };
        if key.eq_ignore_ascii_case(param) {
            return Some(value.trim_matches('"').to_owned());
        }
    }
    None
}

/// Find the position of a needle in a haystack.
fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
