#![doc = include_str!("../README.md")]

include!(concat!(env!("OUT_DIR"), "/proto/mod.rs"));

/// Bounded cache of decompressed blocks plus the object lookup on top
pub mod cache;
/// Blob body decoding into element blocks
pub mod decode;
/// Decoded OSM objects and the iterators over them
pub mod element;
/// Error type shared by the whole crate
pub mod error;
/// Block descriptors and the random-access block index
pub mod index;
/// JSON result document writer
pub mod output;
/// Reduction of arbitrary objects to coordinates
pub mod resolve;
/// The linear scan for URL-bearing tags
pub mod scan;
/// Streaming blob reader feeding the linear scan
pub mod stream;

pub use cache::{BlockCache, DEFAULT_CACHE_SIZE};
pub use element::{Element, ElementBlock, ItemType, Location};
pub use error::{Error, Result};
pub use index::{BlockIndex, BlockStart};
pub use osmdata::*;
pub use osmformat::*;
pub use resolve::{LocationResolver, DEFAULT_RELATION_OVERRIDES};
