//! Integration tests for tag-driven organizing


use librato_importer::{
    FileOrganizer, ImportError, LibraryOrganizer, OrganizeOptions, OrganizeOutcome, PathTemplate,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use test_helpers::{init_tracing, write_tagged_flac, write_track};

struct Dirs {
    _temp: TempDir,
    inbox: std::path::PathBuf,
    library: std::path::PathBuf,
    quarantine: std::path::PathBuf,
}

fn dirs() -> Dirs {
    let temp = TempDir::new().unwrap();
    let inbox = temp.path().join("inbox");
    let library = temp.path().join("library");
    let quarantine = temp.path().join("quarantine");
    fs::create_dir_all(&inbox).unwrap();
    fs::create_dir_all(&library).unwrap();
    Dirs {
        _temp: temp,
        inbox,
        library,
        quarantine,
    }
}

fn organizer(library: &Path) -> LibraryOrganizer {
    LibraryOrganizer::new(library, PathTemplate::default())
}

fn watch_options(dirs: &Dirs) -> OrganizeOptions {
    OrganizeOptions {
        quarantine_dir: Some(dirs.quarantine.clone()),
        cleanup_empty_dirs: true,
        watch_root: Some(dirs.inbox.clone()),
    }
}

mod single_files {
    use super::*;

    #[test]
    fn test_tagged_file_is_moved_into_template_path() {
        init_tracing();
        let dirs = dirs();
        let source = dirs.inbox.join("incoming.flac");
        write_track(&source, "Artist", "Album", 3, "Song");

        let outcome = organizer(&dirs.library)
            .process_file(&source, &watch_options(&dirs))
            .unwrap();

        let expected = dirs.library.join("Artist/Album/03 - Song.flac");
        assert!(matches!(&outcome, OrganizeOutcome::Moved { target, .. } if *target == expected));
        assert!(expected.exists());
        assert!(!source.exists());

        let (album_dir, album) = outcome.cover_request().unwrap();
        assert_eq!(album_dir, dirs.library.join("Artist/Album"));
        assert_eq!(album.artist, "Artist");
        assert_eq!(album.album, "Album");
    }

    #[test]
    fn test_album_artist_takes_precedence() {
        init_tracing();
        let dirs = dirs();
        let source = dirs.inbox.join("feat.flac");
        write_tagged_flac(
            &source,
            &[
                ("ARTIST", "Guest"),
                ("ALBUMARTIST", "Band"),
                ("ALBUM", "Record"),
                ("TRACKNUMBER", "7"),
                ("TITLE", "Duet"),
            ],
        );

        let outcome = organizer(&dirs.library)
            .process_file(&source, &OrganizeOptions::default())
            .unwrap();

        assert_eq!(outcome.target(), dirs.library.join("Band/Record/07 - Duet.flac"));
    }

    #[test]
    fn test_untagged_file_is_quarantined_with_timestamp() {
        init_tracing();
        let dirs = dirs();
        let source = dirs.inbox.join("garbage.mp3");
        fs::write(&source, b"definitely not an mp3").unwrap();

        let outcome = organizer(&dirs.library)
            .process_file(&source, &watch_options(&dirs))
            .unwrap();

        let OrganizeOutcome::Quarantined { target } = outcome else {
            panic!("expected quarantine, got {outcome:?}");
        };
        assert_eq!(target.parent(), Some(dirs.quarantine.as_path()));
        assert!(target.exists());
        assert!(!source.exists());

        // 2024-01-31_12-00-00_garbage.mp3
        let name = target.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_garbage.mp3"), "{name}");
        let stamp = &name[..19];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H-%M-%S").is_ok());
    }

    #[test]
    fn test_untagged_file_without_quarantine_fails() {
        init_tracing();
        let dirs = dirs();
        let source = dirs.inbox.join("garbage.mp3");
        fs::write(&source, b"definitely not an mp3").unwrap();

        let result = organizer(&dirs.library).process_file(&source, &OrganizeOptions::default());

        assert!(matches!(result, Err(ImportError::NoMetadata(_))));
        assert!(source.exists());
    }

    #[test]
    fn test_companion_follows_tagged_sibling() {
        init_tracing();
        let dirs = dirs();
        let album = dirs.inbox.join("rip");
        fs::create_dir(&album).unwrap();
        write_track(&album.join("01.flac"), "Artist", "Album", 1, "One");
        fs::write(album.join("folder.jpg"), b"jpeg").unwrap();

        let outcome = organizer(&dirs.library)
            .process_file(&album.join("folder.jpg"), &watch_options(&dirs))
            .unwrap();

        let expected = dirs.library.join("Artist/Album/folder.jpg");
        assert_eq!(outcome.target(), expected);
        assert!(expected.exists());
        // Companions never trigger cover lookups
        assert!(outcome.cover_request().is_none());
    }

    #[test]
    fn test_companion_without_siblings() {
        init_tracing();
        let dirs = dirs();
        let lonely = dirs.inbox.join("notes.txt");
        fs::write(&lonely, b"liner notes").unwrap();

        let result = organizer(&dirs.library).process_file(&lonely, &OrganizeOptions::default());
        assert!(matches!(result, Err(ImportError::NoSiblingMusic(_))));

        let outcome = organizer(&dirs.library)
            .process_file(&lonely, &watch_options(&dirs))
            .unwrap();
        assert!(matches!(outcome, OrganizeOutcome::Quarantined { .. }));
    }

    #[test]
    fn test_file_already_in_place() {
        init_tracing();
        let dirs = dirs();
        let album_dir = dirs.library.join("Artist/Album");
        fs::create_dir_all(&album_dir).unwrap();
        let placed = album_dir.join("01 - One.flac");
        write_track(&placed, "Artist", "Album", 1, "One");

        let outcome = organizer(&dirs.library)
            .process_file(&placed, &OrganizeOptions::default())
            .unwrap();

        assert!(matches!(outcome, OrganizeOutcome::AlreadyInPlace { .. }));
        assert!(placed.exists());
    }

    #[test]
    fn test_name_clash_gets_suffix() {
        init_tracing();
        let dirs = dirs();
        let album_dir = dirs.library.join("Artist/Album");
        fs::create_dir_all(&album_dir).unwrap();
        fs::write(album_dir.join("01 - One.flac"), b"already here").unwrap();

        let source = dirs.inbox.join("again.flac");
        write_track(&source, "Artist", "Album", 1, "One");

        let outcome = organizer(&dirs.library)
            .process_file(&source, &OrganizeOptions::default())
            .unwrap();

        assert_eq!(outcome.target(), album_dir.join("01 - One-1.flac"));
        assert_eq!(fs::read(album_dir.join("01 - One.flac")).unwrap(), b"already here");
    }

    #[test]
    fn test_dry_run_leaves_files_alone() {
        init_tracing();
        let dirs = dirs();
        let source = dirs.inbox.join("incoming.flac");
        write_track(&source, "Artist", "Album", 2, "Two");

        let outcome = organizer(&dirs.library)
            .with_dry_run(true)
            .process_file(&source, &watch_options(&dirs))
            .unwrap();

        assert_eq!(
            outcome,
            OrganizeOutcome::Planned {
                target: dirs.library.join("Artist/Album/02 - Two.flac")
            }
        );
        assert!(source.exists());
        assert!(!dirs.library.join("Artist").exists());
    }
}

mod cleanup {
    use super::*;

    #[test]
    fn test_empty_source_dir_is_removed() {
        init_tracing();
        let dirs = dirs();
        let drop_dir = dirs.inbox.join("upload");
        fs::create_dir(&drop_dir).unwrap();
        let source = drop_dir.join("track.flac");
        write_track(&source, "Artist", "Album", 1, "One");

        organizer(&dirs.library)
            .process_file(&source, &watch_options(&dirs))
            .unwrap();

        assert!(!drop_dir.exists());
        assert!(dirs.inbox.exists());
    }

    #[test]
    fn test_watch_root_is_never_removed() {
        init_tracing();
        let dirs = dirs();
        let source = dirs.inbox.join("track.flac");
        write_track(&source, "Artist", "Album", 1, "One");

        organizer(&dirs.library)
            .process_file(&source, &watch_options(&dirs))
            .unwrap();

        assert!(dirs.inbox.exists());
        assert_eq!(fs::read_dir(&dirs.inbox).unwrap().count(), 0);
    }

    #[test]
    fn test_non_empty_source_dir_is_kept() {
        init_tracing();
        let dirs = dirs();
        let drop_dir = dirs.inbox.join("upload");
        fs::create_dir(&drop_dir).unwrap();
        write_track(&drop_dir.join("01.flac"), "Artist", "Album", 1, "One");
        write_track(&drop_dir.join("02.flac"), "Artist", "Album", 2, "Two");

        organizer(&dirs.library)
            .process_file(&drop_dir.join("01.flac"), &watch_options(&dirs))
            .unwrap();

        assert!(drop_dir.join("02.flac").exists());
    }

    #[test]
    fn test_cleanup_disabled() {
        init_tracing();
        let dirs = dirs();
        let drop_dir = dirs.inbox.join("upload");
        fs::create_dir(&drop_dir).unwrap();
        let source = drop_dir.join("track.flac");
        write_track(&source, "Artist", "Album", 1, "One");

        let options = OrganizeOptions {
            cleanup_empty_dirs: false,
            ..watch_options(&dirs)
        };
        organizer(&dirs.library).process_file(&source, &options).unwrap();

        assert!(drop_dir.exists());
    }
}

mod directories {
    use super::*;

    #[test]
    fn test_process_directory_moves_album_and_companions() {
        init_tracing();
        let dirs = dirs();
        let rip = dirs.inbox.join("rip");
        fs::create_dir(&rip).unwrap();
        write_track(&rip.join("a.flac"), "Artist", "Album", 1, "One");
        write_track(&rip.join("b.flac"), "Artist", "Album", 2, "Two");
        fs::write(rip.join("cover.jpg"), b"jpeg").unwrap();
        fs::write(rip.join("rip.log"), b"log").unwrap();
        fs::write(rip.join("broken.mp3"), b"not audio").unwrap();

        let summary = organizer(&dirs.library).process_directory(&dirs.inbox).unwrap();

        assert_eq!(summary.moved, 2);
        assert_eq!(summary.companions_moved, 2);
        assert_eq!(summary.untagged, 1);
        assert_eq!(summary.failed, 0);

        let album_dir = dirs.library.join("Artist/Album");
        assert!(album_dir.join("01 - One.flac").exists());
        assert!(album_dir.join("02 - Two.flac").exists());
        assert!(album_dir.join("cover.jpg").exists());
        assert!(album_dir.join("rip.log").exists());
        // Untagged audio stays where it was
        assert!(rip.join("broken.mp3").exists());

        assert_eq!(summary.albums.len(), 1);
        assert_eq!(summary.albums[&album_dir].album, "Album");
    }

    #[test]
    fn test_process_directory_dry_run() {
        init_tracing();
        let dirs = dirs();
        write_track(&dirs.inbox.join("a.flac"), "Artist", "Album", 1, "One");
        fs::write(dirs.inbox.join("cover.jpg"), b"jpeg").unwrap();

        let summary = organizer(&dirs.library)
            .with_dry_run(true)
            .process_directory(&dirs.inbox)
            .unwrap();

        assert_eq!(summary.planned, 1);
        assert_eq!(summary.moved, 0);
        assert_eq!(summary.companions_moved, 0);
        assert!(dirs.inbox.join("a.flac").exists());
        assert!(dirs.inbox.join("cover.jpg").exists());
    }

    #[test]
    fn test_process_directory_is_idempotent() {
        init_tracing();
        let dirs = dirs();
        write_track(&dirs.inbox.join("a.flac"), "Artist", "Album", 1, "One");

        let organizer = organizer(&dirs.library);
        organizer.process_directory(&dirs.inbox).unwrap();
        let second = organizer.process_directory(&dirs.library).unwrap();

        assert_eq!(second.moved, 0);
        assert_eq!(second.already_in_place, 1);
    }

    #[test]
    fn test_process_directory_rejects_files() {
        init_tracing();
        let dirs = dirs();
        let file = dirs.inbox.join("a.flac");
        write_track(&file, "Artist", "Album", 1, "One");

        assert!(organizer(&dirs.library).process_directory(&file).is_err());
    }
}
