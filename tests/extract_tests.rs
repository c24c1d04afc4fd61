mod common;

use std::time::Duration;

use common::{failed_exec, mock_session, ok_exec, quoted_arg_after, MockTransport};
use drivebay::archive::{extract, ExtractOptions};
use drivebay::errors::GatewayError;

//===============
// Test Helpers
//===============
/// Scripts an archiver invocation that populates the extraction temp dir.
fn script_extractor(
    transport: &MockTransport,
    command_prefix: &'static str,
    dest_flag: &'static str,
    files: &'static [(&'static str, &'static [u8])],
) {
    transport.add_hook(move |cmd, fs| {
        if !cmd.contains(command_prefix) {
            return None;
        }
        let dest = quoted_arg_after(cmd, dest_flag).expect("extractor command carries dest dir");
        for (name, data) in files {
            fs.add_file(&format!("{dest}/{name}"), data);
        }
        Some(ok_exec(""))
    });
}

//===============
// Happy Path
//===============
#[test]
fn extracts_tarball_into_stem_directory() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/backup.tar.gz", b"bytes"));
    transport.add_tool("tar");
    script_extractor(
        &transport,
        "tar -xzf",
        "-C",
        &[("a.txt", b"aa"), ("sub/b.txt", b"bbb")],
    );

    let report = extract(&session, "/srv/storage/backup.tar.gz", &ExtractOptions::default())
        .expect("extraction works");

    assert_eq!(report.extracted_to, "/srv/storage/backup");
    assert_eq!(report.tool, "tar");
    assert_eq!(report.file_count, 2);
    assert_eq!(report.total_bytes, 5);
    assert!(transport.file_bytes("/srv/storage/backup/sub/b.txt").is_some());
    assert!(!transport.any_path_contains(".extract-"), "temp dir is gone");
    assert!(
        transport.file_bytes("/srv/storage/backup.tar.gz").is_some(),
        "archive kept by default"
    );
}

#[test]
fn seven_zip_is_preferred_for_zip_when_present() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/photos.zip", b"zipped"));
    transport.add_tool("7z");
    transport.add_tool("unzip");
    script_extractor(&transport, "7z x -y", "-o", &[("img.jpg", b"jpg")]);

    let report =
        extract(&session, "/srv/storage/photos.zip", &ExtractOptions::default()).unwrap();
    assert_eq!(report.tool, "7z");
    assert!(!transport.commands().iter().any(|c| c.starts_with("unzip")));
}

#[test]
fn single_stream_decompresses_to_stem_file() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/notes.txt.gz", b"gz"));
    transport.add_tool("gunzip");
    transport.add_hook(|cmd, fs| {
        if !cmd.starts_with("gunzip -c") {
            return None;
        }
        // `gunzip -c 'archive' > 'dest'`
        let dest = cmd.rsplit('\'').nth(1).expect("redirect target").to_string();
        fs.add_file(&dest, b"plain text");
        Some(ok_exec(""))
    });

    let report =
        extract(&session, "/srv/storage/notes.txt.gz", &ExtractOptions::default()).unwrap();
    assert_eq!(report.extracted_to, "/srv/storage/notes.txt");
    assert!(transport
        .file_bytes("/srv/storage/notes.txt/notes.txt")
        .is_some());
}

#[test]
fn dest_option_relocates_the_extraction() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/backup.tar", b"t"));
    transport.add_tool("tar");
    script_extractor(&transport, "tar -xf", "-C", &[("f", b"x")]);

    let opts = ExtractOptions {
        dest: Some("unpacked".into()),
        ..ExtractOptions::default()
    };
    let report = extract(&session, "/srv/storage/backup.tar", &opts).unwrap();
    assert_eq!(report.extracted_to, "/srv/storage/unpacked/backup");
}

#[test]
fn delete_archive_removes_the_source() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/old.tar", b"t"));
    transport.add_tool("tar");
    script_extractor(&transport, "tar -xf", "-C", &[("f", b"x")]);

    let opts = ExtractOptions {
        delete_archive: true,
        ..ExtractOptions::default()
    };
    extract(&session, "/srv/storage/old.tar", &opts).unwrap();
    assert!(transport.file_bytes("/srv/storage/old.tar").is_none());
}

#[test]
fn overwrite_replaces_existing_directory_only_after_success() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| {
        fs.add_file("/srv/storage/backup.tar", b"t");
        fs.add_file("/srv/storage/backup/stale.txt", b"stale");
    });
    transport.add_tool("tar");
    script_extractor(&transport, "tar -xf", "-C", &[("fresh.txt", b"fresh")]);

    let opts = ExtractOptions {
        overwrite: true,
        ..ExtractOptions::default()
    };
    extract(&session, "/srv/storage/backup.tar", &opts).unwrap();
    assert!(transport.file_bytes("/srv/storage/backup/stale.txt").is_none());
    assert!(transport.file_bytes("/srv/storage/backup/fresh.txt").is_some());
}

//===============
// Failure Modes
//===============
#[test]
fn missing_archive_is_not_found() {
    let (_transport, session) = mock_session();
    let err = extract(&session, "/srv/storage/nope.zip", &ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, GatewayError::NotFound { .. }));
}

#[test]
fn unknown_suffix_is_unsupported() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/notes.txt", b"n"));
    let err = extract(&session, "/srv/storage/notes.txt", &ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, GatewayError::UnsupportedFormat { name } if name == "notes.txt"));
}

#[test]
fn existing_final_dir_without_overwrite_fails_before_any_work() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| {
        fs.add_file("/srv/storage/backup.tar", b"t");
        fs.add_dir("/srv/storage/backup");
    });
    transport.add_tool("tar");

    let err = extract(&session, "/srv/storage/backup.tar", &ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyExists { .. }));
    assert!(
        !transport.commands().iter().any(|c| c.contains("tar -xf")),
        "no extraction may start"
    );
}

#[test]
fn missing_tools_name_the_preferred_one() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/a.zip", b"z"));
    let err = extract(&session, "/srv/storage/a.zip", &ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, GatewayError::ToolUnavailable { tool } if tool == "7z"));
}

#[test]
fn failed_extraction_cleans_temp_and_reports_tool() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| {
        fs.add_file("/srv/storage/bad.tar.gz", b"corrupt");
        fs.add_file("/srv/storage/keep.txt", b"k");
    });
    transport.add_tool("tar");
    transport.add_hook(|cmd, _fs| {
        cmd.contains("tar -xzf")
            .then(|| failed_exec(2, "tar: damaged archive"))
    });

    let err = extract(&session, "/srv/storage/bad.tar.gz", &ExtractOptions::default()).unwrap_err();
    match err {
        GatewayError::Extraction {
            tool,
            exit_code,
            detail,
        } => {
            assert_eq!(tool, "tar");
            assert_eq!(exit_code, 2);
            assert!(detail.contains("damaged"));
        }
        other => panic!("expected Extraction error, got {other}"),
    }
    assert!(!transport.any_path_contains(".extract-"));
    assert!(!transport.has_dir("/srv/storage/bad"));
}

#[test]
fn overwrite_outside_root_is_forbidden() {
    // An absolute dest is fine for plain extraction, but overwrite must not
    // become an `rm -rf` of a directory outside the storage root.
    let (transport, session) = mock_session();
    transport.with_fs(|fs| {
        fs.add_file("/srv/storage/backup.tar", b"t");
        fs.add_file("/outside/backup/precious.txt", b"precious");
    });
    transport.add_tool("tar");

    let opts = ExtractOptions {
        dest: Some("/outside".into()),
        overwrite: true,
        ..ExtractOptions::default()
    };
    let err = extract(&session, "/srv/storage/backup.tar", &opts).unwrap_err();
    assert!(matches!(err, GatewayError::PathViolation { .. }));
    assert_eq!(
        transport.file_bytes("/outside/backup/precious.txt"),
        Some(b"precious".to_vec()),
        "directory outside the root must survive"
    );
    assert!(!transport.commands().iter().any(|c| c.contains("rm -rf")));
}

#[test]
fn delete_archive_outside_root_is_forbidden() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/etc/config-backup.tar", b"t"));
    transport.add_tool("tar");

    let opts = ExtractOptions {
        delete_archive: true,
        ..ExtractOptions::default()
    };
    let err = extract(&session, "/etc/config-backup.tar", &opts).unwrap_err();
    assert!(matches!(err, GatewayError::PathViolation { .. }));
    assert!(
        transport.file_bytes("/etc/config-backup.tar").is_some(),
        "archive outside the root must survive"
    );
    assert!(!transport.commands().iter().any(|c| c.contains("tar -xf")));
}

#[test]
fn short_wrapper_timeout_rides_a_longer_channel_timeout() {
    // The channel-level wait is floored well above the `timeout` wrapper's
    // limit so exit 124, not a dropped channel, reports the expiry.
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/big.tar", b"t"));
    transport.add_tool("tar");
    transport.add_hook(|cmd, fs| {
        if !cmd.starts_with("timeout 3s tar -xf") {
            return None;
        }
        let dest = quoted_arg_after(cmd, "-C").expect("tar command carries -C");
        fs.add_file(&format!("{dest}/f"), b"x");
        Some(ok_exec(""))
    });

    let opts = ExtractOptions {
        timeout: Some(Duration::from_secs(3)),
        ..ExtractOptions::default()
    };
    extract(&session, "/srv/storage/big.tar", &opts).expect("extraction works");

    let calls = transport.exec_calls();
    let (_, channel_timeout) = calls
        .iter()
        .find(|(c, _)| c.starts_with("timeout 3s tar"))
        .expect("wrapped tar command ran");
    assert_eq!(*channel_timeout, Some(Duration::from_secs(120)));
}

#[test]
fn timeout_exit_maps_to_timeout_error() {
    let (transport, session) = mock_session();
    transport.with_fs(|fs| fs.add_file("/srv/storage/huge.tar", b"t"));
    transport.add_tool("tar");
    transport.add_hook(|cmd, _fs| cmd.starts_with("timeout 3s tar").then(|| failed_exec(124, "")));

    let opts = ExtractOptions {
        timeout: Some(Duration::from_secs(3)),
        ..ExtractOptions::default()
    };
    let err = extract(&session, "/srv/storage/huge.tar", &opts).unwrap_err();
    assert!(matches!(err, GatewayError::Timeout { seconds: 3 }));
}
