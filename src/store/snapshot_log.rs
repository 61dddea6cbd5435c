// =============================================================================
// Snapshot Log — append-only per-symbol, per-side CSV files
// =============================================================================
//
// Layout under the data root:
//
//   <root>/bids/<SYMBOL>.csv
//   <root>/asks/<SYMBOL>.csv
//
// Every file starts with the fixed header
// `timestamp,datetime_local,price,volume,current_price`.
//
// Writers: exactly one capture task per symbol. Each `append` serialises the
// whole batch into memory and issues a single write, so a crash can at worst
// truncate the final line. Readers never assume a fixed length and drop a
// truncated final row.
// =============================================================================

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::types::{normalize_symbol, Side, SnapshotRecord};

/// Canonical column set, in write order.
pub const LOG_HEADER: [&str; 5] = [
    "timestamp",
    "datetime_local",
    "price",
    "volume",
    "current_price",
];

/// How far back `append` looks for the end of the last complete line.
const TAIL_SCAN_BYTES: u64 = 64 * 1024;

/// On-disk row; column names match [`LOG_HEADER`].
#[derive(Debug, Serialize, Deserialize)]
struct LogRow {
    timestamp: i64,
    datetime_local: String,
    price: f64,
    volume: f64,
    current_price: f64,
}

impl LogRow {
    fn from_record(record: &SnapshotRecord) -> Self {
        Self {
            timestamp: record.capture_time,
            datetime_local: record.local_time.clone(),
            price: record.price,
            volume: record.volume,
            current_price: record.market_price,
        }
    }

    fn into_record(self, side: Side) -> SnapshotRecord {
        SnapshotRecord {
            capture_time: self.timestamp,
            local_time: self.datetime_local,
            price: self.price,
            volume: self.volume,
            market_price: self.current_price,
            side,
        }
    }
}

/// File-backed snapshot store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Folder holding every symbol's log for `side`.
    pub fn side_dir(&self, side: Side) -> PathBuf {
        self.root.join(side.dir_name())
    }

    /// Log file of `(symbol, side)`. Only plain alphanumeric symbols map to a
    /// path, so a log can never resolve outside its side folder.
    pub fn log_path(&self, symbol: &str, side: Side) -> Result<PathBuf, StoreError> {
        let symbol = normalize_symbol(symbol).ok_or_else(|| StoreError::InvalidSymbol {
            symbol: symbol.to_string(),
        })?;
        Ok(self.side_dir(side).join(format!("{symbol}.csv")))
    }

    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Truncate both side logs of `symbol` down to the header. Idempotent.
    ///
    /// The header is written to a sibling `.tmp` file and renamed over the log,
    /// so a crash never leaves a headerless file behind.
    pub fn reset(&self, symbol: &str) -> Result<(), StoreError> {
        for side in Side::ALL {
            let path = self.log_path(symbol, side)?;
            ensure_parent(&path)?;

            let tmp_path = path.with_extension("csv.tmp");
            fs::write(&tmp_path, header_line()).map_err(|e| StoreError::io(&tmp_path, e))?;
            fs::rename(&tmp_path, &path).map_err(|e| StoreError::io(&path, e))?;
        }
        info!(symbol = %symbol, root = %self.root.display(), "snapshot logs reset");
        Ok(())
    }

    /// Append `records` to the `(symbol, side)` log in one write.
    ///
    /// A missing or empty log gets its header first. A partial final line left
    /// by an earlier crash is cut off before writing. A log whose header is not
    /// [`LOG_HEADER`] is left untouched and reported as `LogSchemaInvalid`.
    pub fn append(
        &self,
        symbol: &str,
        side: Side,
        records: &[SnapshotRecord],
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let path = self.log_path(symbol, side)?;
        ensure_parent(&path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        repair_tail(&mut file).map_err(|e| StoreError::io(&path, e))?;

        let mut buf = Vec::with_capacity(records.len() * 64);
        match first_line(&mut file).map_err(|e| StoreError::io(&path, e))? {
            None => buf.extend_from_slice(header_line().as_bytes()),
            Some(line) => {
                let found: Vec<&str> = line
                    .trim_end_matches(['\r', '\n'])
                    .split(',')
                    .map(str::trim)
                    .collect();
                if !header_matches(&found) {
                    return Err(schema_invalid(&path, &found));
                }
                // Header-only file missing its newline.
                if !line.ends_with('\n') {
                    buf.push(b'\n');
                }
            }
        }

        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buf);
            for record in records {
                writer
                    .serialize(LogRow::from_record(record))
                    .map_err(|e| csv_to_io(&path, e))?;
            }
            writer.flush().map_err(|e| StoreError::io(&path, e))?;
        }

        file.write_all(&buf).map_err(|e| StoreError::io(&path, e))?;

        debug!(symbol = %symbol, side = %side, rows = records.len(), "snapshot rows appended");
        Ok(records.len())
    }

    // -------------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------------

    /// Every record of the `(symbol, side)` log, in append order.
    pub fn load(&self, symbol: &str, side: Side) -> Result<Vec<SnapshotRecord>, StoreError> {
        read_log(&self.log_path(symbol, side)?, side)
    }

    /// Concatenate every `*.csv` log in the `side` folder, in lexicographic
    /// file-name order.
    pub fn load_all(&self, side: Side) -> Result<Vec<SnapshotRecord>, StoreError> {
        load_folder(&self.side_dir(side), side)
    }

    /// Symbols that currently have a log on `side`, sorted.
    pub fn symbols(&self, side: Side) -> Result<Vec<String>, StoreError> {
        Ok(log_files(&self.side_dir(side))?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect())
    }
}

/// Read every `*.csv` under `folder`; see [`SnapshotStore::load_all`].
pub fn load_folder(folder: &Path, side: Side) -> Result<Vec<SnapshotRecord>, StoreError> {
    let files = log_files(folder)?;
    if files.is_empty() {
        return Err(StoreError::LogNotFound {
            path: folder.to_path_buf(),
        });
    }

    let mut records = Vec::new();
    for path in files {
        records.extend(read_log(&path, side)?);
    }
    Ok(records)
}

fn log_files(folder: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::LogNotFound {
                path: folder.to_path_buf(),
            })
        }
        Err(e) => return Err(StoreError::io(folder, e)),
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

fn read_log(path: &Path, side: Side) -> Result<Vec<SnapshotRecord>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::LogNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers().map_err(|e| csv_to_io(path, e))?.clone();
    let found: Vec<&str> = headers.iter().collect();
    if !header_matches(&found) {
        return Err(schema_invalid(path, &found));
    }

    let rows: Vec<Result<LogRow, csv::Error>> = reader.deserialize().collect();
    let last = rows.len().saturating_sub(1);
    let mut records = Vec::with_capacity(rows.len());

    for (i, row) in rows.into_iter().enumerate() {
        match row {
            Ok(row) => records.push(row.into_record(side)),
            Err(e) if i == last => {
                warn!(path = %path.display(), error = %e, "dropping truncated final row");
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                return Err(StoreError::LogCorrupt {
                    path: path.to_path_buf(),
                    line,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(records)
}

/// Same column set as [`LOG_HEADER`], each column exactly once.
fn header_matches(found: &[&str]) -> bool {
    let columns: BTreeSet<&str> = found.iter().copied().collect();
    let expected: BTreeSet<&str> = LOG_HEADER.iter().copied().collect();
    found.len() == LOG_HEADER.len() && columns == expected
}

fn schema_invalid(path: &Path, found: &[&str]) -> StoreError {
    StoreError::LogSchemaInvalid {
        path: path.to_path_buf(),
        expected: LOG_HEADER.join(","),
        found: found.join(","),
    }
}

/// First line of `file`, line ending included; `None` for an empty file.
fn first_line(file: &mut File) -> std::io::Result<Option<String>> {
    file.seek(SeekFrom::Start(0))?;
    let mut line = String::new();
    if BufReader::new(&*file).read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn header_line() -> String {
    format!("{}\n", LOG_HEADER.join(","))
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

fn csv_to_io(path: &Path, err: csv::Error) -> StoreError {
    StoreError::io(path, std::io::Error::new(ErrorKind::InvalidData, err))
}

/// If the file does not end in a newline, truncate it back to the end of its
/// last complete line.
fn repair_tail(file: &mut File) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let start = len.saturating_sub(TAIL_SCAN_BYTES);
    file.seek(SeekFrom::Start(start))?;
    let mut tail = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut tail)?;

    if tail.last() == Some(&b'\n') {
        return Ok(());
    }

    match tail.iter().rposition(|b| *b == b'\n') {
        Some(pos) => {
            let keep = start + pos as u64 + 1;
            warn!(dropped_bytes = len - keep, "truncating partial final line before append");
            file.set_len(keep)
        }
        // A single partial line longer than the scan window; leave it alone.
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(t: i64, price: f64, volume: f64, side: Side) -> SnapshotRecord {
        SnapshotRecord {
            capture_time: t,
            local_time: "2024-01-01 00:00:00".to_string(),
            price,
            volume,
            market_price: 100.0,
            side,
        }
    }

    #[test]
    fn reset_then_load_is_empty_with_valid_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        store.reset("btcusdt").unwrap();
        for side in Side::ALL {
            assert!(store.load("BTCUSDT", side).unwrap().is_empty());
            let raw = fs::read_to_string(store.log_path("BTCUSDT", side).unwrap()).unwrap();
            assert_eq!(raw, "timestamp,datetime_local,price,volume,current_price\n");
        }
    }

    #[test]
    fn reset_truncates_existing_rows_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        store.reset("ETHUSDT").unwrap();
        store
            .append("ETHUSDT", Side::Bid, &[record(1, 10.0, 1.0, Side::Bid)])
            .unwrap();
        store.reset("ETHUSDT").unwrap();
        store.reset("ETHUSDT").unwrap();

        assert!(store.load("ETHUSDT", Side::Bid).unwrap().is_empty());
    }

    #[test]
    fn append_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.reset("BTCUSDT").unwrap();

        let first = vec![record(1, 100.0, 1.0, Side::Ask), record(1, 101.0, 2.0, Side::Ask)];
        let second = vec![record(2, 99.5, 3.0, Side::Ask)];
        assert_eq!(store.append("BTCUSDT", Side::Ask, &first).unwrap(), 2);
        assert_eq!(store.append("BTCUSDT", Side::Ask, &second).unwrap(), 1);

        let loaded = store.load("BTCUSDT", Side::Ask).unwrap();
        let prices: Vec<f64> = loaded.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![100.0, 101.0, 99.5]);
        assert!(loaded.iter().all(|r| r.side == Side::Ask));
        assert_eq!(loaded[2].capture_time, 2);
    }

    #[test]
    fn append_to_missing_log_writes_header_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        store
            .append("SOLUSDT", Side::Bid, &[record(5, 20.0, 4.0, Side::Bid)])
            .unwrap();
        let loaded = store.load("SOLUSDT", Side::Bid).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn missing_log_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let err = store.load("NOPE", Side::Bid).unwrap_err();
        assert!(matches!(err, StoreError::LogNotFound { .. }));
    }

    #[test]
    fn wrong_header_is_schema_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.log_path("BTCUSDT", Side::Bid).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "timestamp,price,volume\n1,2,3\n").unwrap();

        let err = store.load("BTCUSDT", Side::Bid).unwrap_err();
        assert!(matches!(err, StoreError::LogSchemaInvalid { .. }));
    }

    #[test]
    fn headerless_empty_file_is_schema_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.log_path("BTCUSDT", Side::Ask).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();

        assert!(matches!(
            store.load("BTCUSDT", Side::Ask).unwrap_err(),
            StoreError::LogSchemaInvalid { .. }
        ));
    }

    #[test]
    fn append_to_empty_file_writes_header_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.log_path("BTCUSDT", Side::Bid).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();

        store
            .append("BTCUSDT", Side::Bid, &[record(1, 100.0, 1.0, Side::Bid)])
            .unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("timestamp,datetime_local,price,volume,current_price\n"));
        assert_eq!(store.load("BTCUSDT", Side::Bid).unwrap().len(), 1);
    }

    #[test]
    fn append_after_unterminated_header_starts_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.log_path("BTCUSDT", Side::Bid).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "timestamp,datetime_local,price,volume,current_price").unwrap();

        store
            .append("BTCUSDT", Side::Bid, &[record(1, 100.0, 1.0, Side::Bid)])
            .unwrap();
        assert_eq!(store.load("BTCUSDT", Side::Bid).unwrap().len(), 1);
    }

    #[test]
    fn append_refuses_log_with_foreign_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.log_path("BTCUSDT", Side::Ask).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let original = "timestamp,price,volume\n1,2,3\n";
        fs::write(&path, original).unwrap();

        let err = store
            .append("BTCUSDT", Side::Ask, &[record(1, 100.0, 1.0, Side::Ask)])
            .unwrap_err();
        assert!(matches!(err, StoreError::LogSchemaInvalid { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn symbols_never_escape_the_side_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        for bad in ["../../etc/secret", "BTC/USDT", "..", ""] {
            assert!(matches!(
                store.log_path(bad, Side::Bid).unwrap_err(),
                StoreError::InvalidSymbol { .. }
            ));
            assert!(matches!(
                store.load(bad, Side::Bid).unwrap_err(),
                StoreError::InvalidSymbol { .. }
            ));
            assert!(store.reset(bad).is_err());
            assert!(store
                .append(bad, Side::Bid, &[record(1, 1.0, 1.0, Side::Bid)])
                .is_err());
        }
        assert_eq!(
            store.log_path("btcusdt", Side::Bid).unwrap(),
            dir.path().join("bids").join("BTCUSDT.csv")
        );
    }

    #[test]
    fn truncated_final_row_is_dropped_and_repaired_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.reset("BTCUSDT").unwrap();
        store
            .append("BTCUSDT", Side::Bid, &[record(1, 100.0, 1.0, Side::Bid)])
            .unwrap();

        let path = store.log_path("BTCUSDT", Side::Bid).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2,2024-01-01 00:00:02,abc").unwrap();
        drop(file);

        assert_eq!(store.load("BTCUSDT", Side::Bid).unwrap().len(), 1);

        store
            .append("BTCUSDT", Side::Bid, &[record(3, 101.0, 2.0, Side::Bid)])
            .unwrap();
        let loaded = store.load("BTCUSDT", Side::Bid).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].capture_time, 3);
    }

    #[test]
    fn corrupt_middle_row_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.log_path("BTCUSDT", Side::Bid).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "timestamp,datetime_local,price,volume,current_price\n\
             1,a,oops,1,1\n\
             2,b,100,1,1\n",
        )
        .unwrap();

        assert!(matches!(
            store.load("BTCUSDT", Side::Bid).unwrap_err(),
            StoreError::LogCorrupt { .. }
        ));
    }

    #[test]
    fn load_all_concatenates_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .append("ETHUSDT", Side::Ask, &[record(1, 2000.0, 1.0, Side::Ask)])
            .unwrap();
        store
            .append("BTCUSDT", Side::Ask, &[record(1, 30000.0, 1.0, Side::Ask)])
            .unwrap();

        let all = store.load_all(Side::Ask).unwrap();
        let prices: Vec<f64> = all.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![30000.0, 2000.0]);
        assert_eq!(store.symbols(Side::Ask).unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn load_all_on_missing_or_empty_folder_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(
            store.load_all(Side::Bid).unwrap_err(),
            StoreError::LogNotFound { .. }
        ));
        fs::create_dir_all(store.side_dir(Side::Bid)).unwrap();
        assert!(matches!(
            store.load_all(Side::Bid).unwrap_err(),
            StoreError::LogNotFound { .. }
        ));
    }
}
