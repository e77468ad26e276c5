use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Serialize, Serializer};
use serde_json::ser::Formatter;

use crate::element::ItemType;
use crate::scan::{Occurrence, UrlRecords};

#[derive(Serialize)]
struct Document<'a> {
    v: u32,
    #[serde(rename = "type")]
    kind: &'static str,
    findings: Vec<Finding<'a>>,
}

#[derive(Serialize)]
struct Finding<'a> {
    url: &'a str,
    occ: Vec<OccurrenceRecord<'a>>,
}

#[derive(Serialize)]
struct OccurrenceRecord<'a> {
    #[serde(serialize_with = "item_type_char")]
    t: ItemType,
    id: i64,
    k: &'a str,
    x: f64,
    y: f64,
}

fn item_type_char<S: Serializer>(item_type: &ItemType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_char(item_type.as_char())
}

/// Renders coordinates with six fractional digits, like printf `%f`, but
/// independent of any locale.
struct SixDigitFloats;

impl Formatter for SixDigitFloats {
    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        write!(writer, "{value:.6}")
    }
}

/// Writes the extraction result document. Create it before doing any real
/// work, so an unwritable output path fails immediately.
pub struct ResultWriter {
    out: BufWriter<File>,
}

impl ResultWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(ResultWriter {
            out: BufWriter::new(File::create(path)?),
        })
    }

    pub fn write(mut self, records: &UrlRecords) -> io::Result<()> {
        render(&mut self.out, records)?;
        self.out.flush()
    }
}

fn render<W: Write>(mut out: W, records: &UrlRecords) -> io::Result<()> {
    let mut findings: Vec<(&String, &Vec<Occurrence>)> = records.iter().collect();
    findings.sort_by_key(|&(url, _)| url);

    let document = Document {
        v: 2,
        kind: "monitor-osm-domains extraction results",
        findings: findings
            .into_iter()
            .map(|(url, occurrences)| Finding {
                url,
                occ: occurrences
                    .iter()
                    .map(|occurrence| OccurrenceRecord {
                        t: occurrence.item_type,
                        id: occurrence.id,
                        k: &occurrence.key,
                        x: occurrence.location.lon,
                        y: occurrence.location.lat,
                    })
                    .collect(),
            })
            .collect(),
    };

    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SixDigitFloats);
    document.serialize(&mut serializer)?;
    Ok(())
}
