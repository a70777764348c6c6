use murk_core::container::{
    container_bytes, is_container, read_container, write_atomic, write_container,
    ContainerHeader, FormatVersion,
};
use murk_core::marshal::{dumps, loads};
use murk_tests::{compile_source, init_tracing, run_code};
use murk_utils::errors::{ContainerError, DecodeError};

const PROGRAM: &str = "def greet(name):\n    return \"hi \" + name\n\nwords = [\"a\", \"b\"]\nfor w in words:\n    if w == \"b\" and True:\n        print(greet(w), None, -3)\n";

#[test]
fn round_trips_every_version() {
    init_tracing();
    let code = compile_source(PROGRAM);
    for version in [FormatVersion::V1, FormatVersion::V2, FormatVersion::V3] {
        let header = ContainerHeader::with_timestamp(version, 1_700_000_000, PROGRAM.len());
        let mut bytes = Vec::new();
        write_container(&mut bytes, &code, &header).unwrap();
        assert_eq!(bytes, container_bytes(&code, &header));
        assert_eq!(&bytes[..4], &version.magic());
        assert!(is_container(&bytes));

        let (read_header, read_code) = read_container(&bytes).unwrap();
        assert_eq!(read_header, header);
        assert_eq!(read_code, code);
        assert_eq!(run_code(&read_code), vec!["hi b None -3"]);
    }
}

#[test]
fn header_fields_follow_version() {
    let code = compile_source("x = 1\n");
    let v1 = ContainerHeader::with_timestamp(FormatVersion::V1, 5, 6);
    let v3 = ContainerHeader::with_timestamp(FormatVersion::V3, 5, 6);
    assert_eq!(v1.source_size, None);
    assert_eq!(v3.source_size, Some(6));
    assert_eq!(container_bytes(&code, &v1).len() + 8, container_bytes(&code, &v3).len());
}

#[test]
fn marshal_round_trip_and_trailing_bytes() {
    let code = compile_source(PROGRAM);
    let mut bytes = dumps(&code);
    assert_eq!(loads(&bytes).unwrap(), code);
    bytes.push(0);
    assert!(matches!(loads(&bytes), Err(DecodeError::TrailingBytes(_))));
}

#[test]
fn unknown_magic_is_rejected() {
    let code = compile_source("x = 1\n");
    let mut bytes = container_bytes(&code, &ContainerHeader::with_timestamp(FormatVersion::V2, 0, 0));
    bytes[3] = 9;
    assert!(!is_container(&bytes));
    assert!(matches!(
        read_container(&bytes),
        Err(ContainerError::Decode(DecodeError::BadMagic(_)))
    ));
}

#[test]
fn atomic_write_replaces_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mrk");
    std::fs::write(&path, b"stale").unwrap();
    let code = compile_source(PROGRAM);
    let bytes = container_bytes(&code, &ContainerHeader::new(FormatVersion::V3, PROGRAM.len()));
    write_atomic(&path, &bytes).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
