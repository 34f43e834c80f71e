use crate::word_count_reader::TEXT_COLUMN;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const WORD_LIST: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "hello", "world", "python",
    "code", "generate", "csv", "file", "random", "sentence", "data", "test", "example", "text",
    "string",
];

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    pub files: usize,
    pub rows_per_file: usize,
    pub words_per_row: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            files: 20,
            rows_per_file: 1024,
            words_per_row: 10,
        }
    }
}

pub fn generate_sentence(rng: &mut impl Rng, words: usize) -> String {
    (0..words)
        .map(|_| WORD_LIST[rng.random_range(0..WORD_LIST.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

/// Writes `file_1.csv` .. `file_N.csv` into `dir`, each with a single `text`
/// column of random sentences, and returns their paths
pub fn generate_csv_files(
    dir: &Path,
    options: &GeneratorOptions,
    rng: &mut impl Rng,
) -> Result<Vec<PathBuf>, GenerateError> {
    fs::create_dir_all(dir)?;

    let mut paths = Vec::with_capacity(options.files);
    for i in 1..=options.files {
        let path = dir.join(format!("file_{}.csv", i));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([TEXT_COLUMN])?;
        for _ in 0..options.rows_per_file {
            writer.write_record([generate_sentence(rng, options.words_per_row)])?;
        }
        writer.flush()?;

        info!(file = %path.display(), rows = options.rows_per_file, "generated input file");
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_draws_from_word_list() {
        let mut rng = rand::rng();
        let sentence = generate_sentence(&mut rng, 12);
        let words: Vec<&str> = sentence.split(' ').collect();

        assert_eq!(words.len(), 12);
        assert!(words.iter().all(|w| WORD_LIST.contains(w)));
    }
}
