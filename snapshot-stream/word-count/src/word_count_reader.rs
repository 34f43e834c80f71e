use snapshot_stream_core::{PartialAggregate, PipelineError, UnitReader, WorkUnit};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Column holding the sentences in generated input files
pub const TEXT_COLUMN: &str = "text";

/// Counts the words of one input file
///
/// Files ending in `.csv` are read as CSV with a header row; only the `text`
/// column is counted when present, every field otherwise. Any other file is
/// plain text. Words are split on whitespace and commas and counted as
/// written, so `The` and `the` are different keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCountReader;

impl WordCountReader {
    pub fn new() -> Self {
        Self
    }

    pub fn count_file(&self, path: &Path) -> Result<PartialAggregate, PipelineError> {
        let mut counts = PartialAggregate::new();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

        if is_csv {
            count_csv(path, &mut counts)?;
        } else {
            let text = fs::read_to_string(path)
                .map_err(|e| PipelineError::Input(format!("{}: {}", path.display(), e)))?;
            count_words(&text, &mut counts);
        }

        debug!(file = %path.display(), distinct = counts.len(), "counted words");
        Ok(counts)
    }
}

impl UnitReader for WordCountReader {
    fn read(&self, unit: &WorkUnit) -> Result<PartialAggregate, PipelineError> {
        self.count_file(Path::new(&unit.location))
    }
}

fn count_csv(path: &Path, counts: &mut PartialAggregate) -> Result<(), PipelineError> {
    let input_error = |e: csv::Error| PipelineError::Input(format!("{}: {}", path.display(), e));

    let mut reader = csv::Reader::from_path(path).map_err(input_error)?;
    let text_index = reader
        .headers()
        .map_err(input_error)?
        .iter()
        .position(|header| header.trim() == TEXT_COLUMN);

    for record in reader.records() {
        let record = record.map_err(input_error)?;
        match text_index {
            Some(index) => {
                if let Some(field) = record.get(index) {
                    count_words(field, counts);
                }
            }
            None => record.iter().for_each(|field| count_words(field, counts)),
        }
    }
    Ok(())
}

/// Adds every word of `text` to `counts`
pub fn count_words(text: &str, counts: &mut PartialAggregate) {
    for word in text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
    {
        *counts.entry(word.to_string()).or_insert(0) += 1;
    }
}
