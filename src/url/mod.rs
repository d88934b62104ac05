//! URL handling module for Forum-Harvest
//!
//! Every URL the crawler compares, stores, or marks visited goes through
//! [`UrlNormalizer`] first.

mod normalize;

pub use normalize::{normalize_url, same_site, UrlNormalizer, DEFAULT_SESSION_PARAMS};
