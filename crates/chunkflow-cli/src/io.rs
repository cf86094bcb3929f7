//! File adapters: delimited flat-file source and JSON-lines sink.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Seek, SeekFrom, Write};
use std::path::Path;

use chunkflow_engine::{ItemSink, ItemSource};
use chunkflow_types::BatchError;

use crate::record::Record;

/// Reads a delimited text file line by line, mapping columns to named
/// fields in declaration order.
#[derive(Debug)]
pub struct DelimitedFileSource {
    lines: Lines<BufReader<File>>,
    delimiter: char,
    fields: Vec<String>,
    line_no: usize,
    exhausted: bool,
}

impl DelimitedFileSource {
    /// Open `path` and position past `skip_lines` header lines.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] when the file cannot be opened or a header
    /// line cannot be read.
    pub fn open(
        path: &Path,
        delimiter: char,
        skip_lines: usize,
        fields: Vec<String>,
    ) -> Result<Self, BatchError> {
        let file = File::open(path).map_err(|err| {
            BatchError::config(
                "SOURCE_OPEN",
                format!("cannot open source file {}: {err}", path.display()),
            )
        })?;
        let mut lines = BufReader::new(file).lines();
        for i in 0..skip_lines {
            match lines.next() {
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    return Err(BatchError::internal(
                        "SOURCE_READ",
                        format!("failed reading header line {}: {err}", i + 1),
                    ));
                }
                None => break,
            }
        }
        Ok(Self {
            lines,
            delimiter,
            fields,
            line_no: skip_lines,
            exhausted: false,
        })
    }

    fn parse_line(&self, line: &str) -> Result<Record, BatchError> {
        let values: Vec<&str> = line.split(self.delimiter).collect();
        if values.len() != self.fields.len() {
            return Err(BatchError::validation(
                "COLUMN_COUNT",
                format!(
                    "line {} has {} columns, expected {}",
                    self.line_no,
                    values.len(),
                    self.fields.len()
                ),
            ));
        }
        Ok(Record::new(
            self.fields
                .iter()
                .zip(values)
                .map(|(name, value)| (name.clone(), value.trim().to_string()))
                .collect(),
        ))
    }
}

impl ItemSource<Record> for DelimitedFileSource {
    fn next_item(&mut self) -> Result<Option<Record>, BatchError> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            let Some(line) = self.lines.next() else {
                self.exhausted = true;
                return Ok(None);
            };
            let line = line.map_err(|err| {
                BatchError::internal(
                    "SOURCE_READ",
                    format!("failed reading line {}: {err}", self.line_no + 1),
                )
            })?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue; // blank lines are not items
            }
            return self.parse_line(&line).map(Some);
        }
    }
}

/// Write target of [`JsonLinesSink`]: sequential writes plus rollback.
///
/// The rollback hook is what lets the sink keep its atomic-per-chunk
/// promise over a plain file.
pub trait SinkFile: Write + Seek {
    /// Discard everything at and after `len` and reposition there.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the target can't be shrunk.
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
}

impl SinkFile for File {
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len)).map(|_| ())
    }
}

/// Appends one JSON object per record, one file write per committed chunk.
///
/// A chunk is encoded fully in memory and written with a single call; on a
/// write failure the file is rolled back to its pre-chunk length, so no
/// partial line ever survives into a resumed run.
pub struct JsonLinesSink<W: SinkFile = File> {
    file: W,
}

impl JsonLinesSink {
    /// Create (truncating) the output file.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] when the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, BatchError> {
        let file = File::create(path).map_err(|err| {
            BatchError::config(
                "SINK_CREATE",
                format!("cannot create sink file {}: {err}", path.display()),
            )
        })?;
        Ok(Self { file })
    }

    /// Open the output file positioned at its end, for resumed runs.
    ///
    /// Opened in plain write mode rather than `O_APPEND` so a failed chunk
    /// can be truncated away.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] when the file cannot be opened.
    pub fn append(path: &Path) -> Result<Self, BatchError> {
        let mut file = File::options()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|err| {
                BatchError::config(
                    "SINK_CREATE",
                    format!("cannot open sink file {}: {err}", path.display()),
                )
            })?;
        file.seek(SeekFrom::End(0)).map_err(sink_io)?;
        Ok(Self { file })
    }
}

impl<W: SinkFile> ItemSink<Record> for JsonLinesSink<W> {
    fn write_chunk(&mut self, chunk: &[Record]) -> Result<(), BatchError> {
        let mut buf = Vec::with_capacity(chunk.len() * 64);
        for record in chunk {
            serde_json::to_writer(&mut buf, record).map_err(|err| {
                BatchError::internal("SINK_ENCODE", format!("failed encoding record: {err}"))
            })?;
            buf.push(b'\n');
        }

        let start = self.file.stream_position().map_err(sink_io)?;
        match self.file.write_all(&buf).and_then(|()| self.file.flush()) {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(rollback_err) = self.file.truncate_to(start) {
                    tracing::warn!(
                        error = %rollback_err,
                        "Failed to roll back partially written chunk"
                    );
                }
                Err(sink_io(err))
            }
        }
    }
}

fn sink_io(err: std::io::Error) -> BatchError {
    BatchError::sink_commit("SINK_WRITE", format!("failed writing chunk: {err}"))
}
