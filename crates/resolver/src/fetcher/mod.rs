pub mod client;
pub mod cookies;
pub mod http;
pub mod request;

pub use client::{DEFAULT_UA, build_client};
pub use cookies::{CookieJar, merge_cookie_header};
pub use http::Fetcher;
pub use request::{EmbedRequest, FetchRequest, FetchResponse, RequestBody};
