use std::collections::{HashMap, HashSet};

use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

use crate::element::{Element, ItemType, Location};
use crate::error::Result;
use crate::resolve::LocationResolver;
use crate::stream::PbfStream;

/// Tag keys whose values are worth checking for URLs. This list is highly
/// debatable; suggestions welcome.
pub const URL_TAG_KEYS: &[&str] = &[
    "brand:website",
    "contact:takeaway",
    "contact:url",
    "contact:webcam",
    "contact:website",
    "destination:url",
    "facebook",
    "fee:source",
    "flickr",
    "heritage:website",
    "image:0",
    "image2",
    "image:streetsign",
    "inscription:url",
    "instagram",
    "internet",
    "market:flea_market:opening_hours:url",
    "memorial:website",
    "menu:url",
    "name:etymology:website",
    "network:website",
    "note:url",
    "opening_hours:url",
    "operator:website",
    "picture",
    "post_office:website",
    "rail_trail:website",
    "railway:source",
    "source:1",
    "source:2",
    "source_2",
    "source2",
    "source:3",
    "source:heritage",
    "source:image",
    "source:office",
    "source:old_ref",
    "source:operator",
    "source:payment:contactless",
    "source:phone",
    "source:railway:radio",
    "source:railway:speed_limit_distant:speed",
    "source:railway:speed_limit:speed",
    "source:ref",
    "source_url",
    "source:url",
    "source:website",
    "symbol:url",
    "url",
    "url:official",
    "url:timetable",
    "video_2",
    "webcam",
    "website",
    "website_1",
    "website2",
    "website:booking",
    "website:DDB",
    "website:en",
    "website:LfDH",
    "website:menu",
    "website:orders",
    "website:regulation",
    "website:stock",
    "website:VDMT",
    "xmas:url",
];

/// Stand-in for objects that cannot be resolved at all; roughly the middle
/// of Germany, so such findings stay visible on a map.
pub const FALLBACK_LOCATION: Location = Location { lon: 10.0, lat: 50.0 };

/// Above this many back-references for a single occurrence, the object is a
/// candidate for the relation override table.
pub const EXPENSIVE_RESOLUTION_THRESHOLD: u64 = 1000;

/// One URL-bearing tag on one object, with the object located.
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub item_type: ItemType,
    pub id: i64,
    pub key: String,
    pub location: Location,
}

/// All occurrences grouped by URL.
pub type UrlRecords = HashMap<String, Vec<Occurrence>>;

#[derive(Debug, Default)]
pub struct ScanStats {
    pub unique_urls: usize,
    pub occurrences: u64,
    pub backrefs: u64,
    pub most_expensive: Option<(ItemType, i64, u64)>,
}

fn looks_like_url(value: &str) -> bool {
    value.as_bytes().starts_with(b"http")
}

/// The one linear pass: finds URL-bearing tags and resolves each carrying
/// object to a coordinate through the given resolver.
pub struct UrlScanner<'a> {
    resolver: &'a LocationResolver<'a>,
    url_tag_keys: HashSet<&'static str>,
    expensive_threshold: u64,
    records: UrlRecords,
    occurrences: u64,
    most_expensive: Option<(ItemType, i64, u64)>,
}

impl<'a> UrlScanner<'a> {
    pub fn new(
        resolver: &'a LocationResolver<'a>,
        url_tag_keys: &[&'static str],
        expensive_threshold: u64,
    ) -> Self {
        UrlScanner {
            resolver,
            url_tag_keys: url_tag_keys.iter().copied().collect(),
            expensive_threshold,
            // We expect to find nearly a million URLs.
            records: HashMap::with_capacity(100_000),
            occurrences: 0,
            most_expensive: None,
        }
    }

    /// Consume the stream and return the per-URL records plus counters.
    /// `expected_blobs` only sizes the progress bar.
    pub fn run(mut self, stream: PbfStream, expected_blobs: u64) -> Result<(UrlRecords, ScanStats)> {
        let progress = ProgressBar::new(expected_blobs).with_style(
            ProgressStyle::with_template("[{bar:30}] {pos}/{len} blobs: {per_sec} {elapsed}")
                .expect("static progress template"),
        );

        for batch in stream.blocks() {
            for block in &batch? {
                for element in block.elements() {
                    self.process(&element)?;
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        let stats = ScanStats {
            unique_urls: self.records.len(),
            occurrences: self.occurrences,
            backrefs: self.resolver.backrefs(),
            most_expensive: self.most_expensive,
        };
        Ok((self.records, stats))
    }

    fn process(&mut self, element: &Element<'_>) -> Result<()> {
        for (key, value) in element.tags() {
            // Checking the first four bytes is cheap and rules out most
            // values, so do that before the key lookup.
            if !looks_like_url(value) {
                continue;
            }
            if !self.url_tag_keys.contains(key) {
                continue;
            }

            let backrefs_before = self.resolver.backrefs();
            let resolved = self.resolver.resolve(element)?;
            let cost = self.resolver.backrefs() - backrefs_before;
            if cost > self.most_expensive.map_or(0, |(_, _, c)| c) {
                self.most_expensive = Some((element.item_type(), element.id(), cost));
            }

            let location = match resolved {
                Some(location) => location,
                None => {
                    warn!(
                        "cannot resolve object {}{} to any location",
                        element.item_type().as_char(),
                        element.id()
                    );
                    FALLBACK_LOCATION
                }
            };
            if cost > self.expensive_threshold {
                warn!(
                    "very expensive resolution: {}{} took {} backrefs, consider overriding to {:.6}, {:.6}",
                    element.item_type().as_char(),
                    element.id(),
                    cost,
                    location.lon,
                    location.lat
                );
            }

            self.records
                .entry(value.to_string())
                .or_default()
                .push(Occurrence {
                    item_type: element.item_type(),
                    id: element.id(),
                    key: key.to_string(),
                    location,
                });
            self.occurrences += 1;
        }
        Ok(())
    }
}
