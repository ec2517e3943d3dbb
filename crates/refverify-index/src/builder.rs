//! Building an offline index from a JSON-lines dump.
//!
//! Each input line is one [`IndexRecord`] as JSON. Files ending in `.gz` are
//! decompressed on the fly. The database is written to a temporary file next
//! to the destination and moved into place only once the import succeeded,
//! so a failed build never clobbers a working index.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::{IndexError, IndexRecord, LocalIndex};

/// Records inserted per transaction.
const BATCH_SIZE: usize = 5_000;

/// Import JSON-lines records from `reader` into `index`.
///
/// Blank lines are skipped. `progress` is called with the running record count
/// after every committed batch. Returns the number of records imported.
pub fn import_jsonl<R: BufRead>(
    index: &mut LocalIndex,
    reader: R,
    progress: impl Fn(u64),
) -> Result<u64, IndexError> {
    let mut batch: Vec<IndexRecord> = Vec::with_capacity(BATCH_SIZE);
    let mut imported: u64 = 0;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: IndexRecord =
            serde_json::from_str(trimmed).map_err(|source| IndexError::Json {
                line: lineno + 1,
                source,
            })?;
        batch.push(record);

        if batch.len() >= BATCH_SIZE {
            imported += index.insert_batch(&batch)? as u64;
            batch.clear();
            progress(imported);
        }
    }

    if !batch.is_empty() {
        imported += index.insert_batch(&batch)? as u64;
        progress(imported);
    }

    Ok(imported)
}

/// Build a fresh index at `output` from the JSON-lines file at `input`.
pub fn build_index(
    input: &Path,
    output: &Path,
    progress: impl Fn(u64),
) -> Result<u64, IndexError> {
    let file = File::open(input)?;
    let is_gz = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let raw: Box<dyn Read> = if is_gz {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".refverify-index-")
        .suffix(".db")
        .tempfile_in(dir)?;

    let count = {
        let mut index = LocalIndex::create(tmp.path())?;
        let count = import_jsonl(&mut index, BufReader::new(raw), progress)?;
        index.mark_built()?;
        count
    };

    tmp.persist(output).map_err(|e| IndexError::Io(e.error))?;
    log::info!(
        "built local index at {} with {} records",
        output.display(),
        count
    );
    Ok(count)
}
