pub mod exclusions;
pub mod logging;
pub mod setting;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

// RFC 3986 unreserved characters stay as they are.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const URI_PATH: &AsciiSet = &URI_COMPONENT.remove(b'/');

/// Percent-encodes a query value or a single path segment.
pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Percent-encodes an object key, keeping `/` separators intact.
pub fn encode_uri_path(value: &str) -> String {
    utf8_percent_encode(value, URI_PATH).to_string()
}
