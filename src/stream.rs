use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use quick_protobuf::{BytesReader, MessageRead};
use rayon::iter::{ParallelBridge, ParallelIterator};

use crate::decode;
use crate::element::ElementBlock;
use crate::error::{Error, Result};
use crate::index::{read_exactly, MAX_BLOB_HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::BlobHeader;

const BUF_SIZE: usize = 1024 * 1024; // 1MB
const MAX_QUEUED_BATCHES: usize = 256;

/// Sequential blob reader for the one linear pass over the file. Entirely
/// separate from the random-access side: it holds its own file handle and
/// never touches the block index.
pub struct PbfStream {
    reader: BufReader<File>,
}

impl PbfStream {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(PbfStream {
            reader: BufReader::with_capacity(BUF_SIZE, file),
        })
    }

    /// Decode all data blobs on a thread pool, yielding one batch of
    /// element blocks per blob. Batches arrive in completion order, not
    /// file order. The first error (framing, I/O or decode) ends the
    /// stream.
    pub fn blocks(self) -> BlockBatches {
        let num_threads = rayon::current_num_threads();
        let (blob_tx, blob_rx) =
            crossbeam_channel::bounded::<Result<Arc<[u8]>>>(num_threads);
        let (batch_tx, batch_rx) =
            crossbeam_channel::bounded::<Result<Vec<ElementBlock>>>(MAX_QUEUED_BATCHES);

        // Read raw blobs sequentially on a dedicated thread.
        std::thread::spawn(move || {
            let mut stream = self;
            loop {
                match stream.next_blob() {
                    Ok(Some(blob)) => {
                        if blob_tx.send(Ok(blob)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = blob_tx.send(Err(err));
                        break;
                    }
                }
            }
        });

        // Fan the decompression and decoding out to a pool.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to create thread pool");
        std::thread::spawn(move || {
            pool.install(|| {
                blob_rx.into_iter().par_bridge().for_each(|blob| {
                    let batch = blob.and_then(|bytes| decode::decode_blob(&bytes));
                    let _ = batch_tx.send(batch);
                });
            });
        });

        BlockBatches { rx: batch_rx }
    }

    // Raw blobs have different sizes; the length prefix and blob header
    // say how far the body extends.
    fn next_blob(&mut self) -> Result<Option<Arc<[u8]>>> {
        loop {
            let mut prefix = [0u8; 4];
            match self.reader.read_exact(&mut prefix) {
                Ok(()) => {}
                // Clean end of the blob sequence.
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(err) => return Err(err.into()),
            }

            let header_size = u32::from_be_bytes(prefix);
            if header_size > MAX_BLOB_HEADER_SIZE {
                return Err(Error::BadFraming("oversized BlobHeader"));
            }
            let mut header_bytes = vec![0u8; header_size as usize];
            read_exactly(
                &mut self.reader,
                &mut header_bytes,
                "unexpected EOF in blob header",
            )?;

            let mut reader = BytesReader::from_bytes(&header_bytes);
            let header = BlobHeader::from_reader(&mut reader, &header_bytes)?;
            if header.datasize <= 0 {
                return Err(Error::BadFraming("BlobHeader.datasize missing or zero"));
            }
            let datasize = header.datasize as u32;
            if datasize > MAX_BLOCK_SIZE {
                return Err(Error::BadFraming("oversized block"));
            }

            // Skip everything that is not actual data, i.e. the OSMHeader.
            if header.type_pb != "OSMData" {
                self.reader.seek_relative(i64::from(datasize))?;
                continue;
            }

            let mut body = vec![0u8; datasize as usize];
            read_exactly(&mut self.reader, &mut body, "unexpected EOF in blob body")?;
            return Ok(Some(Arc::from(body)));
        }
    }
}

/// Iterator over decoded per-blob batches, fed by the pipeline behind
/// [`PbfStream::blocks`].
pub struct BlockBatches {
    rx: Receiver<Result<Vec<ElementBlock>>>,
}

impl Iterator for BlockBatches {
    type Item = Result<Vec<ElementBlock>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
