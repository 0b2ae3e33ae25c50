pub mod board;
pub mod browser;
pub mod http;
pub mod traits;
pub mod types;

pub use board::BoardExtractor;
pub use browser::BrowserFetcher;
pub use http::HttpFetcher;
pub use traits::Fetcher;
pub use types::{Layout, LayoutKind, PageRequest};
