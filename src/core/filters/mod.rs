//! Built-in filters available through the default registry.
mod access_log;
mod authorize;
mod invoke;
mod response_headers;

pub use access_log::AccessLogFilter;
pub use authorize::AuthorizeFilter;
pub use invoke::InvokeFilter;
pub use response_headers::ResponseHeadersFilter;
