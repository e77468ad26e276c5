use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use osm_url_extract::cache::{BlockCache, DEFAULT_CACHE_SIZE};
use osm_url_extract::index::BlockIndex;
use osm_url_extract::output::ResultWriter;
use osm_url_extract::resolve::{LocationResolver, DEFAULT_RELATION_OVERRIDES};
use osm_url_extract::scan::{UrlScanner, EXPENSIVE_RESOLUTION_THRESHOLD, URL_TAG_KEYS};
use osm_url_extract::stream::PbfStream;

/// Extract URL-bearing tags from an OSM PBF export, together with a
/// coordinate for every referencing object.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Input .osm.pbf file, sorted by type then id
    input: PathBuf,
    /// Output JSON file
    output: PathBuf,
}

fn run(args: &Args) -> anyhow::Result<()> {
    // Fail early: try to open the output for writing first.
    let writer = ResultWriter::create(&args.output)
        .with_context(|| format!("cannot open {} for writing", args.output.display()))?;

    info!("indexing blocks of {}", args.input.display());
    let index = BlockIndex::open(&args.input)
        .with_context(|| format!("cannot index {}", args.input.display()))?;
    info!("{} data blocks", index.block_count());

    let cache = BlockCache::new(index, DEFAULT_CACHE_SIZE);
    let resolver = LocationResolver::new(&cache, DEFAULT_RELATION_OVERRIDES);

    info!("linear scan of {}", args.input.display());
    let stream = PbfStream::from_path(&args.input)?;
    let scanner = UrlScanner::new(&resolver, URL_TAG_KEYS, EXPENSIVE_RESOLUTION_THRESHOLD);
    let (records, stats) = scanner.run(stream, cache.block_count() as u64)?;

    info!(
        "found {} unique URLs in {} values, executed {} back-references",
        stats.unique_urls, stats.occurrences, stats.backrefs
    );
    if let Some((item_type, id, backrefs)) = stats.most_expensive {
        info!(
            "most expensive occurrence was {}{} with {} backrefs",
            item_type.as_char(),
            id,
            backrefs
        );
    }

    info!("writing {}", args.output.display());
    writer
        .write(&records)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
