//! Plain-HTTP browsing tools: pages are fetched with reqwest, reduced with
//! scraper, and addressed by numbered interactive elements.

mod page;
mod session;
mod tools;

pub use session::PageSession;
pub use tools::toolset;
