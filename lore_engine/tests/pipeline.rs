//! End-to-end: import into a file-backed repository, reopen it, build context.

use lore_engine::{
    FileStore, ImportError, LorebookRepository, Store, STORAGE_KEY_LOREBOOKS,
};
use lorebook::{CharacterId, LorebookPatch, NewEntry, Position};
use pretty_assertions::assert_eq;

const EXTERNAL_BOOK: &str = r#"{
    "name": "Northern Realm",
    "scanDepth": 2,
    "entries": {
        "1": {"key": ["dragon"], "content": "Dragons nest in the peaks.", "order": 2, "position": 0},
        "0": {"key": ["Ice"], "keysecondary": ["frost"], "content": "The ice never melts.",
              "caseSensitive": true, "order": 1, "position": 2},
        "2": {"key": ["[a-z]+heim"], "content": "Regex keys are imported as literals.", "position": 1},
        "3": {"key": [], "content": "Nothing triggers this.", "disable": false}
    }
}"#;

#[test]
fn test_import_persist_and_build_context() {
    let dir = tempfile::tempdir().unwrap();
    let hero = CharacterId::from("hero");

    let book_id = {
        let mut repo = LorebookRepository::new(FileStore::new(dir.path()));
        let book = repo.import_lorebook(EXTERNAL_BOOK).unwrap();
        assert_eq!(book.entries.len(), 3);
        assert_eq!(book.scan_depth, 2);

        repo.update_lorebook(
            &book.id,
            LorebookPatch {
                character_ids: Some([hero.clone()].into_iter().collect()),
                ..Default::default()
            },
        )
        .unwrap();
        repo.add_entry(
            &book.id,
            NewEntry::new("Always remember the north.")
                .constant()
                .with_priority(10)
                .with_position(Position::Bottom),
        )
        .unwrap();
        book.id
    };

    // Reopen from disk.
    let repo = LorebookRepository::new(FileStore::new(dir.path()));
    let stored = repo.get_lorebook(&book_id).unwrap().unwrap();
    assert_eq!(stored.entries.len(), 4);
    assert_eq!(stored.entries[0].content, "The ice never melts.");
    assert_eq!(
        stored.entries[0].keys,
        vec!["Ice".to_string(), "frost".to_string()]
    );

    let lore = repo
        .build_context_with_stats(&hero, "A dragon circled. Ice cracked.", None)
        .unwrap();
    assert_eq!(
        lore.text,
        "The ice never melts.\n\nDragons nest in the peaks.\n\nAlways remember the north."
    );
    assert_eq!(lore.triggered.len(), 3);

    // Case-sensitive key misses lowercase text; the regex-looking key is literal.
    let lore = repo
        .build_context(&hero, "ice and asgardheim", None)
        .unwrap();
    assert_eq!(lore, "Always remember the north.");

    // Only the last two messages are scanned.
    let messages = ["a dragon!", "quiet", "still quiet"];
    let lore = repo
        .build_context_for_messages(&hero, &messages, None)
        .unwrap();
    assert_eq!(lore.text, "Always remember the north.");
}

#[test]
fn test_corrupted_file_store_reads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileStore::new(dir.path());
    store.write(STORAGE_KEY_LOREBOOKS, "[{\"broken\": ").unwrap();

    let mut repo = LorebookRepository::new(store);
    assert!(repo.all_lorebooks().unwrap().is_empty());

    // A new write replaces the corrupted blob.
    let book = repo.import_lorebook(EXTERNAL_BOOK).unwrap();
    assert_eq!(repo.all_lorebooks().unwrap()[0].id, book.id);
}

#[test]
fn test_import_errors_surface() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = LorebookRepository::new(FileStore::new(dir.path()));

    assert!(matches!(
        repo.import_lorebook("[]"),
        Err(ImportError::UnrecognizedFormat)
    ));
    assert!(matches!(
        repo.import_card(b"\x89PNG but not really"),
        Err(ImportError::Card(_))
    ));
    assert!(!dir.path().join("lorebooks.json").exists());
}
