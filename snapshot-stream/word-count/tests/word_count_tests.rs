use snapshot_stream_core::{PipelineError, UnitReader, WorkUnit};
use snapshot_stream_word_count::{
    generate_csv_files, GeneratorOptions, WordCountReader, WORD_LIST,
};
use std::fs;

fn unit(path: &std::path::Path) -> WorkUnit {
    WorkUnit {
        id: 1,
        location: path.to_string_lossy().into_owned(),
    }
}

// ============================================================
// Reading work units
// ============================================================

#[test]
fn test_csv_only_counts_text_column() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.csv");
    fs::write(&path, "id,text\n1,hello world\n2,\"hello, again\"\n").unwrap();

    let counts = WordCountReader::new().read(&unit(&path)).unwrap();

    assert_eq!(counts.get("hello"), Some(&2));
    assert_eq!(counts.get("world"), Some(&1));
    assert_eq!(counts.get("again"), Some(&1));
    assert_eq!(counts.get("1"), None);
    assert_eq!(counts.len(), 3);
}

#[test]
fn test_csv_without_text_column_counts_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.csv");
    fs::write(&path, "left,right\nfox dog,fox\n").unwrap();

    let counts = WordCountReader::new().read(&unit(&path)).unwrap();

    assert_eq!(counts.get("fox"), Some(&2));
    assert_eq!(counts.get("dog"), Some(&1));
}

#[test]
fn test_plain_text_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    fs::write(&path, "The lazy dog\nthe LAZY fox\n").unwrap();

    let counts = WordCountReader::new().read(&unit(&path)).unwrap();

    assert_eq!(counts.get("the"), Some(&1));
    assert_eq!(counts.get("The"), Some(&1));
    assert_eq!(counts.get("lazy"), Some(&1));
    assert_eq!(counts.get("LAZY"), Some(&1));
    assert_eq!(counts.get("fox"), Some(&1));
}

#[test]
fn test_missing_file_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = WordCountReader::new()
        .read(&unit(&dir.path().join("absent.csv")))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Input(_)));
}

// ============================================================
// Generator
// ============================================================

#[test]
fn test_generated_files_round_trip_through_reader() {
    let dir = tempfile::tempdir().unwrap();
    let options = GeneratorOptions {
        files: 3,
        rows_per_file: 20,
        words_per_row: 7,
    };

    let paths = generate_csv_files(dir.path(), &options, &mut rand::rng()).unwrap();

    assert_eq!(paths.len(), 3);
    assert!(paths[0].ends_with("file_1.csv"));
    for path in &paths {
        let counts = WordCountReader::new().count_file(path).unwrap();
        assert_eq!(counts.values().sum::<i64>(), 20 * 7);
        assert!(counts.keys().all(|w| WORD_LIST.contains(&w.as_str())));
    }
}
