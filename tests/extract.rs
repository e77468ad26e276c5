mod support;

use std::collections::HashSet;

use osm_url_extract::cache::BlockCache;
use osm_url_extract::index::BlockIndex;
use osm_url_extract::output::ResultWriter;
use osm_url_extract::resolve::{LocationResolver, DEFAULT_RELATION_OVERRIDES};
use osm_url_extract::scan::{UrlScanner, EXPENSIVE_RESOLUTION_THRESHOLD, URL_TAG_KEYS};
use osm_url_extract::stream::PbfStream;
use osm_url_extract::{ItemType, Location};
use support::*;

fn open_cache(file: &tempfile::NamedTempFile) -> BlockCache {
    BlockCache::new(BlockIndex::open(file.path()).unwrap(), 64)
}

fn resolve_via_lookup(
    cache: &BlockCache,
    resolver: &LocationResolver<'_>,
    item_type: ItemType,
    id: i64,
) -> Option<Location> {
    let mut resolved: osm_url_extract::Result<Option<Location>> = Ok(None);
    assert!(cache
        .visit(item_type, id, |element| resolved = resolver.resolve(&element))
        .unwrap());
    resolved.unwrap()
}

#[test]
fn way_resolves_through_its_first_surviving_node_ref() {
    // Nodes 7 and 8 do not exist in the file; node 9 does.
    let file = pbf_file(vec![
        TestBlock::Dense(vec![node(9, 12.3, 45.6)]),
        TestBlock::Ways(vec![way(42, &[7, 8, 9], &[])]),
    ]);
    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, &[]);

    let location = resolve_via_lookup(&cache, &resolver, ItemType::Way, 42).unwrap();
    assert!((location.lon - 12.3).abs() < 1e-6);
    assert!((location.lat - 45.6).abs() < 1e-6);
    assert_eq!(resolver.backrefs(), 3);
}

#[test]
fn way_with_only_dead_refs_resolves_to_nothing() {
    let file = pbf_file(vec![
        TestBlock::Dense(vec![node(1, 0.1, 0.1)]),
        TestBlock::Ways(vec![way(77, &[5, 6], &[])]),
    ]);
    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, &[]);

    assert_eq!(resolve_via_lookup(&cache, &resolver, ItemType::Way, 77), None);
}

#[test]
fn overridden_relation_short_circuits_without_lookups() {
    // Relation 20828 references a node that does not exist; the override
    // table answers before any member is chased.
    let file = pbf_file(vec![TestBlock::Relations(vec![relation(
        20828,
        &[(ItemType::Node, 555)],
        &[],
    )])]);
    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, DEFAULT_RELATION_OVERRIDES);

    let location =
        resolve_via_lookup(&cache, &resolver, ItemType::Relation, 20828).unwrap();
    assert!((location.lon - 9.424950).abs() < 1e-9);
    assert!((location.lat - 54.832655).abs() < 1e-9);
    assert_eq!(resolver.backrefs(), 0);
}

#[test]
fn relations_resolve_recursively_through_relations() {
    // Relation 3 -> relation 2 -> node 1.
    let file = pbf_file(vec![
        TestBlock::Dense(vec![node(1, 1.0, 2.0)]),
        TestBlock::Relations(vec![
            relation(2, &[(ItemType::Node, 1)], &[]),
            relation(3, &[(ItemType::Relation, 2)], &[]),
        ]),
    ]);
    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, &[]);

    let location = resolve_via_lookup(&cache, &resolver, ItemType::Relation, 3).unwrap();
    assert!((location.lon - 1.0).abs() < 1e-6);
    assert!((location.lat - 2.0).abs() < 1e-6);
    // One lookup for relation 3's member, one for relation 2's member.
    assert_eq!(resolver.backrefs(), 2);
}

#[test]
fn relation_member_order_prefers_nodes_over_deeper_paths() {
    // The node member is listed last, but must still be tried first.
    let file = pbf_file(vec![
        TestBlock::Dense(vec![node(1, 5.0, 6.0), node(2, 7.0, 8.0)]),
        TestBlock::Ways(vec![way(4, &[2], &[])]),
        TestBlock::Relations(vec![relation(
            9,
            &[(ItemType::Way, 4), (ItemType::Node, 1)],
            &[],
        )]),
    ]);
    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, &[]);

    let location = resolve_via_lookup(&cache, &resolver, ItemType::Relation, 9).unwrap();
    assert!((location.lon - 5.0).abs() < 1e-6);
    assert_eq!(resolver.backrefs(), 1);
}

#[test]
fn cyclic_relations_terminate_without_a_location() {
    // 2 -> 3 -> 2, no coordinates anywhere in the closure.
    let file = pbf_file(vec![TestBlock::Relations(vec![
        relation(2, &[(ItemType::Relation, 3)], &[]),
        relation(3, &[(ItemType::Relation, 2)], &[]),
    ])]);
    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, &[]);

    assert_eq!(
        resolve_via_lookup(&cache, &resolver, ItemType::Relation, 2),
        None
    );
}

#[test]
fn end_to_end_extraction_writes_the_expected_document() {
    let file = pbf_file_zlib(vec![
        TestBlock::Dense(vec![
            tagged_node(1, 12.5, 47.5, &[("website", "https://example.com")]),
            node(2, 13.0, 48.0),
        ]),
        TestBlock::Ways(vec![way(10, &[2], &[("url", "http://foo.example/baz")])]),
        TestBlock::Relations(vec![relation(
            5,
            &[(ItemType::Node, 1)],
            &[("website", "https://example.com")],
        )]),
    ]);

    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, DEFAULT_RELATION_OVERRIDES);
    let scanner = UrlScanner::new(&resolver, URL_TAG_KEYS, EXPENSIVE_RESOLUTION_THRESHOLD);
    let stream = PbfStream::from_path(file.path()).unwrap();
    let (records, stats) = scanner.run(stream, cache.block_count() as u64).unwrap();

    assert_eq!(stats.unique_urls, 2);
    assert_eq!(stats.occurrences, 3);
    // One backref for the way's node, one for the relation's node.
    assert_eq!(stats.backrefs, 2);

    let out = tempfile::NamedTempFile::new().unwrap();
    ResultWriter::create(out.path())
        .unwrap()
        .write(&records)
        .unwrap();

    let text = std::fs::read_to_string(out.path()).unwrap();
    assert!(text.contains("\"x\":13.000000"), "{text}");
    assert!(text.contains("\"y\":47.500000"), "{text}");

    let document: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(document["v"], 2);
    assert_eq!(document["type"], "monitor-osm-domains extraction results");

    let findings = document["findings"].as_array().unwrap();
    assert_eq!(findings.len(), 2);
    // Findings are sorted by URL.
    assert_eq!(findings[0]["url"], "http://foo.example/baz");
    assert_eq!(findings[1]["url"], "https://example.com");

    let way_occ = findings[0]["occ"].as_array().unwrap();
    assert_eq!(way_occ.len(), 1);
    assert_eq!(way_occ[0]["t"], "w");
    assert_eq!(way_occ[0]["id"], 10);
    assert_eq!(way_occ[0]["k"], "url");
    assert_eq!(way_occ[0]["x"].as_f64().unwrap(), 13.0);
    assert_eq!(way_occ[0]["y"].as_f64().unwrap(), 48.0);

    // Scan batches complete in nondeterministic order, so compare the
    // node and relation occurrences as a set.
    let example_occ: HashSet<(String, i64, String)> = findings[1]["occ"]
        .as_array()
        .unwrap()
        .iter()
        .map(|occ| {
            (
                occ["t"].as_str().unwrap().to_string(),
                occ["id"].as_i64().unwrap(),
                occ["k"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    let expected: HashSet<(String, i64, String)> = [
        ("n".to_string(), 1, "website".to_string()),
        ("r".to_string(), 5, "website".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(example_occ, expected);
}

#[test]
fn unresolvable_occurrences_fall_back_to_the_sentinel_point() {
    // A way with a URL tag whose node refs are all missing.
    let file = pbf_file(vec![
        TestBlock::Dense(vec![node(1, 0.1, 0.1)]),
        TestBlock::Ways(vec![way(30, &[400, 500], &[("website", "https://lost.example")])]),
    ]);

    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, &[]);
    let scanner = UrlScanner::new(&resolver, URL_TAG_KEYS, EXPENSIVE_RESOLUTION_THRESHOLD);
    let stream = PbfStream::from_path(file.path()).unwrap();
    let (records, _) = scanner.run(stream, cache.block_count() as u64).unwrap();

    let occurrences = &records["https://lost.example"];
    assert_eq!(occurrences.len(), 1);
    assert_eq!(occurrences[0].location.lon, 10.0);
    assert_eq!(occurrences[0].location.lat, 50.0);
}

#[test]
fn tags_outside_the_allowlist_are_ignored() {
    let file = pbf_file(vec![TestBlock::Dense(vec![
        tagged_node(1, 0.5, 0.5, &[("description", "https://not-a-url-tag.example")]),
        tagged_node(2, 0.6, 0.6, &[("website", "yes")]),
    ])]);

    let cache = open_cache(&file);
    let resolver = LocationResolver::new(&cache, &[]);
    let scanner = UrlScanner::new(&resolver, URL_TAG_KEYS, EXPENSIVE_RESOLUTION_THRESHOLD);
    let stream = PbfStream::from_path(file.path()).unwrap();
    let (records, stats) = scanner.run(stream, cache.block_count() as u64).unwrap();

    assert!(records.is_empty());
    assert_eq!(stats.occurrences, 0);
}
