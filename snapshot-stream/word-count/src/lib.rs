//! The word-count problem plugged into the pipeline: a work-unit reader for
//! text and CSV files, and the random input generator.

mod word_count_reader;
pub use word_count_reader::{count_words, WordCountReader, TEXT_COLUMN};

mod generator;
pub use generator::{
    generate_csv_files, generate_sentence, GenerateError, GeneratorOptions, WORD_LIST,
};
