use ldfs::io::{BlockStorage, Geometry, LDisk, LDiskBuilder};
use ldfs::{ErrorKind, FileSystem, FsConfig, FsError, IntoStatus, STATUS_ERROR, STATUS_SUCCESS};
use tempfile::NamedTempFile;

const B: usize = 64;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create_test_fs() -> FileSystem<LDisk> {
    init_logging();
    let dev = LDiskBuilder::new().build().unwrap();
    FileSystem::format(dev, FsConfig::default()).unwrap()
}

fn listing(fs: &FileSystem<LDisk>) -> Vec<(String, usize)> {
    fs.list_directory()
        .map(|l| (l.name.to_string(), l.len))
        .collect()
}

fn read_all(fs: &mut FileSystem<LDisk>, name: &str) -> Vec<u8> {
    let slot = fs.open(name).unwrap();
    fs.lseek(slot, 0).unwrap();
    let mut buf = vec![0; 3 * B];
    let n = match fs.read(slot, &mut buf, (3 * B) as i64) {
        Ok(n) => n,
        Err(FsError::EmptyFile) => 0,
        Err(e) => panic!("unexpected read failure: {}", e),
    };
    buf.truncate(n);
    buf
}

#[test]
fn create_open_close_lists_empty_files() {
    let mut fs = create_test_fs();
    let names = ["aaaa", "f1tx", "Z9_-", "zzzz"];

    for name in &names {
        fs.create(name).unwrap();
        let slot = fs.open(name).unwrap();
        fs.close(slot).unwrap();
    }

    let expected: Vec<_> = names.iter().map(|n| (n.to_string(), 0)).collect();
    assert_eq!(listing(&fs), expected);
}

#[test]
fn written_bytes_read_back_for_every_size() {
    let mut fs = create_test_fs();
    fs.create("data").unwrap();
    let slot = fs.open("data").unwrap();

    for &n in &[1, 2, 63, 64, 65, 100, 127, 128, 129, 191, 192] {
        let data: Vec<u8> = (0..n).map(|i| (i * 7 % 256) as u8).collect();
        fs.lseek(slot, 0).unwrap();
        assert_eq!(fs.write(slot, &data, n as i64).unwrap(), n);

        fs.lseek(slot, 0).unwrap();
        let mut buf = vec![0; n];
        assert_eq!(fs.read(slot, &mut buf, n as i64).unwrap(), n);
        assert_eq!(buf, data, "size {}", n);
    }
}

#[test]
fn write_never_exceeds_remaining_capacity() {
    let mut fs = create_test_fs();
    fs.create("full").unwrap();
    let slot = fs.open("full").unwrap();

    let chunk = vec![0x42; 50];
    let mut total = 0;
    for _ in 0..6 {
        let n = fs.write(slot, &chunk, 50).unwrap();
        assert!(n <= 50.min(3 * B - total));
        total += n;
    }
    assert_eq!(total, 3 * B);
    assert_eq!(fs.file_len("full").unwrap(), 3 * B);
}

#[test]
fn destroy_clears_bits_and_entry() {
    let mut fs = create_test_fs();
    fs.create("gone").unwrap();
    fs.create("stay").unwrap();
    let slot = fs.open("gone").unwrap();
    fs.write(slot, &[1; 150], 150).unwrap();
    let owned: Vec<usize> = (0..64).filter(|&b| b >= 8 && fs.is_allocated(b)).collect();
    assert_eq!(owned, vec![8, 9, 10]);

    fs.destroy("gone").unwrap();

    assert!(owned.iter().all(|&b| !fs.is_allocated(b)));
    assert_eq!(listing(&fs), vec![("stay".to_string(), 0)]);
    assert!(matches!(fs.open("gone"), Err(FsError::NotFound(_))));
}

#[test]
fn seek_then_read_and_write_from_that_offset() {
    let mut fs = create_test_fs();
    fs.create("seek").unwrap();
    let slot = fs.open("seek").unwrap();
    let data: Vec<u8> = (0..150).map(|i| i as u8).collect();
    fs.write(slot, &data, 150).unwrap();
    let len = fs.file_len("seek").unwrap();
    assert_eq!(len, 3 * B);

    for &pos in &[0, 1, 63, 64, 100, 127, 128, 149] {
        fs.lseek(slot, pos as i64).unwrap();
        assert_eq!(fs.position(slot).unwrap(), pos);
        let mut buf = [0; 1];
        fs.read(slot, &mut buf, 1).unwrap();
        assert_eq!(buf[0], data[pos], "offset {}", pos);
    }

    fs.lseek(slot, 70).unwrap();
    fs.write(slot, &[0xaa, 0xbb], 2).unwrap();
    fs.lseek(slot, 69).unwrap();
    let mut buf = [0; 4];
    fs.read(slot, &mut buf, 4).unwrap();
    assert_eq!(buf, [69, 0xaa, 0xbb, 72]);

    // End-of-file cursor is valid, one past it is not.
    fs.lseek(slot, len as i64).unwrap();
    assert!(matches!(fs.read(slot, &mut buf, 1), Err(FsError::EndOfFile)));
    assert!(matches!(
        fs.lseek(slot, len as i64 + 1),
        Err(FsError::PositionOutOfRange(_))
    ));
    assert!(fs.lseek(slot, -5).is_err());
}

#[test]
fn write_at_end_of_file_grows_the_file() {
    let mut fs = create_test_fs();
    fs.create("grow").unwrap();
    let slot = fs.open("grow").unwrap();
    fs.write(slot, &[1; 64], 64).unwrap();
    assert_eq!(fs.file_len("grow").unwrap(), 64);

    fs.lseek(slot, 64).unwrap();
    assert_eq!(fs.write(slot, &[2; 3], 3).unwrap(), 3);
    assert_eq!(fs.file_len("grow").unwrap(), 128);

    fs.close(slot).unwrap();
    let content = read_all(&mut fs, "grow");
    assert_eq!(&content[..64], &[1; 64][..]);
    assert_eq!(&content[64..67], &[2; 3]);
    assert!(content[67..].iter().all(|b| *b == 0));
}

#[test]
fn save_then_load_reproduces_listing_and_contents() {
    let mut fs = create_test_fs();
    let files: Vec<(&str, Vec<u8>)> = vec![
        ("one_", b"first file".to_vec()),
        ("two_", (0..130).map(|i| i as u8).collect()),
        ("none", Vec::new()),
        ("max_", vec![0x7f; 3 * B]),
    ];
    for (i, (name, data)) in files.iter().enumerate() {
        fs.create(name).unwrap();
        let slot = fs.open(name).unwrap();
        fs.write(slot, data, data.len() as i64).unwrap();
        // Leave the last two open with dirty buffers.
        if i < 2 {
            fs.close(slot).unwrap();
        }
    }
    let before = listing(&fs);

    let tf = NamedTempFile::new().unwrap();
    fs.save(tf.path()).unwrap();

    let mut loaded: FileSystem<LDisk> =
        FileSystem::open_image(tf.path(), FsConfig::default()).unwrap();
    assert_eq!(listing(&loaded), before);
    assert_eq!(loaded.free_blocks(), fs.free_blocks());
    for (name, data) in &files {
        let content = read_all(&mut loaded, name);
        assert_eq!(&content[..data.len()], &data[..], "{}", name);
    }
}

#[test]
fn save_is_stable_across_reload() {
    let mut fs = create_test_fs();
    fs.create("abcd").unwrap();
    let slot = fs.open("abcd").unwrap();
    fs.write(slot, b"xyz", 3).unwrap();

    let first = NamedTempFile::new().unwrap();
    fs.save(first.path()).unwrap();
    let mut loaded: FileSystem<LDisk> =
        FileSystem::open_image(first.path(), FsConfig::default()).unwrap();
    let second = NamedTempFile::new().unwrap();
    loaded.save(second.path()).unwrap();

    assert_eq!(
        std::fs::read(first.path()).unwrap(),
        std::fs::read(second.path()).unwrap()
    );
}

#[test]
fn restore_replaces_state_in_place() {
    let mut fs = create_test_fs();
    fs.create("keep").unwrap();
    let tf = NamedTempFile::new().unwrap();
    fs.save(tf.path()).unwrap();

    fs.create("temp").unwrap();
    let slot = fs.open("temp").unwrap();
    fs.write(slot, &[5; 10], 10).unwrap();

    fs.restore(tf.path()).unwrap();
    assert_eq!(listing(&fs), vec![("keep".to_string(), 0)]);
    assert!(fs.open_slots().is_empty());
    assert_eq!(fs.free_blocks(), 56);
}

#[test]
fn failed_restore_leaves_file_system_untouched() {
    let mut fs = create_test_fs();
    fs.create("live").unwrap();
    let slot = fs.open("live").unwrap();
    fs.write(slot, b"still here", 10).unwrap();

    let missing = tempfile::tempdir().unwrap();
    let err = fs.restore(missing.path().join("absent.img")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);

    let garbage = NamedTempFile::new().unwrap();
    std::fs::write(garbage.path(), b"not a disk image").unwrap();
    assert!(matches!(
        fs.restore(garbage.path()),
        Err(FsError::CorruptImage(_))
    ));

    // A well-formed image of a disk that never held a file system.
    let blank = NamedTempFile::new().unwrap();
    {
        use ldfs::io::DiskImage;
        LDiskBuilder::new().build().unwrap().save_image(blank.path()).unwrap();
    }
    assert!(matches!(fs.restore(blank.path()), Err(FsError::CorruptImage(_))));

    assert_eq!(listing(&fs), vec![("live".to_string(), 64)]);
    assert_eq!(fs.position(slot).unwrap(), 10);
    fs.lseek(slot, 0).unwrap();
    let mut buf = [0; 10];
    fs.read(slot, &mut buf, 10).unwrap();
    assert_eq!(&buf, b"still here");
}

#[test]
fn restore_rejects_header_with_absurd_geometry() {
    let mut fs = create_test_fs();
    fs.create("safe").unwrap();

    let tf = NamedTempFile::new().unwrap();
    let mut bytes = b"LDSK".to_vec();
    for _ in 0..4 {
        bytes.extend_from_slice(&0x4000_0000u32.to_be_bytes());
    }
    std::fs::write(tf.path(), &bytes).unwrap();

    let err = fs.restore(tf.path()).unwrap_err();
    assert!(matches!(err, FsError::CorruptImage(_)));
    assert_eq!(listing(&fs), vec![("safe".to_string(), 0)]);
}

#[test]
fn zero_count_read_at_end_of_file_returns_zero() {
    let mut fs = create_test_fs();
    fs.create("zero").unwrap();
    let slot = fs.open("zero").unwrap();
    fs.write(slot, &[1; 10], 10).unwrap();
    fs.lseek(slot, 64).unwrap();

    assert_eq!(fs.read(slot, &mut [], 0).unwrap(), 0);
    assert_eq!(fs.read(slot, &mut [], 0).into_status(), 0);
    assert_eq!(fs.position(slot).unwrap(), 64);
}

#[test]
fn restore_rejects_image_of_other_geometry() {
    init_logging();
    let geometry = Geometry {
        cylinders: 2,
        ..Geometry::default()
    };
    let config = FsConfig::default().with_geometry(geometry);
    let mut small = FileSystem::format(LDiskBuilder::from(geometry).build().unwrap(), config).unwrap();
    let tf = NamedTempFile::new().unwrap();
    small.save(tf.path()).unwrap();

    let mut fs = create_test_fs();
    assert!(matches!(fs.restore(tf.path()), Err(FsError::CorruptImage(_))));
}

#[test]
fn scenario_seek_and_read_across_two_writes() {
    let mut fs = create_test_fs();
    fs.create("f1tx").unwrap();
    let s = fs.open("f1tx").unwrap();

    let first: Vec<u8> = (0..100).collect();
    let second: Vec<u8> = (0..5).collect();
    assert_eq!(fs.write(s, &first, 100).unwrap(), 100);
    assert_eq!(fs.write(s, &second, 5).unwrap(), 5);
    let all: Vec<u8> = first.iter().chain(second.iter()).copied().collect();

    fs.lseek(s, 23).unwrap();
    let mut buf = vec![0; 70];
    assert_eq!(fs.read(s, &mut buf, 70).unwrap(), 70);
    assert_eq!(buf, all[23..93].to_vec());
}

#[test]
fn scenario_write_past_max_size_returns_zero() {
    let mut fs = create_test_fs();
    fs.create("maxx").unwrap();
    let slot = fs.open("maxx").unwrap();

    assert_eq!(fs.write(slot, &[3; 3 * B], (3 * B) as i64).unwrap(), 3 * B);
    assert_eq!(fs.write(slot, &[4], 1).unwrap(), 0);
    assert_eq!(fs.write(slot, &[4], 1).into_status(), 0);
}

#[test]
fn scenario_overlong_write_is_partial() {
    let mut fs = create_test_fs();
    fs.create("over").unwrap();
    let slot = fs.open("over").unwrap();

    assert_eq!(fs.write(slot, &[3; 250], 250).unwrap(), 3 * B);
    assert_eq!(fs.free_blocks(), 53);
}

#[test]
fn scenario_read_of_empty_file_fails() {
    let mut fs = create_test_fs();
    fs.create("empt").unwrap();
    let slot = fs.open("empt").unwrap();
    let mut buf = [0; 8];

    let result = fs.read(slot, &mut buf, 8);
    assert!(matches!(result, Err(FsError::EmptyFile)));
    assert_eq!(fs.read(slot, &mut buf, 8).into_status(), STATUS_ERROR);
}

#[test]
fn scenario_directory_capacity() {
    let mut fs = create_test_fs();
    for i in 0..15 {
        assert_eq!(fs.create(&format!("f{:03}", i)).into_status(), STATUS_SUCCESS);
    }
    let before = listing(&fs);

    let err = fs.create("last").unwrap_err();
    assert!(matches!(err, FsError::DirectoryFull));
    assert_eq!(err.kind(), ErrorKind::Capacity);
    assert_eq!(listing(&fs), before);
}

#[test]
fn status_convention_matches_shell_expectations() {
    let mut fs = create_test_fs();

    assert_eq!(fs.create("stat").into_status(), STATUS_SUCCESS);
    assert_eq!(fs.create("stat").into_status(), STATUS_ERROR);
    assert_eq!(fs.create("toolong").into_status(), STATUS_ERROR);
    let slot = fs.open("stat").into_status();
    assert_eq!(slot, 1);
    assert_eq!(fs.open("nope").into_status(), STATUS_ERROR);
    assert_eq!(fs.write(1, b"ab", 2).into_status(), 2);
    assert_eq!(fs.lseek(1, 0).into_status(), STATUS_SUCCESS);
    assert_eq!(fs.lseek(1, 65).into_status(), STATUS_ERROR);
    assert_eq!(fs.close(0).into_status(), STATUS_ERROR);
    assert_eq!(fs.close(1).into_status(), STATUS_SUCCESS);
    assert_eq!(fs.close(1).into_status(), STATUS_ERROR);
    assert_eq!(fs.destroy("stat").into_status(), STATUS_SUCCESS);
    assert_eq!(fs.destroy("stat").into_status(), STATUS_ERROR);
}

#[test]
fn independent_instances_coexist() {
    init_logging();
    let big = Geometry {
        cylinders: 8,
        tracks_per_cylinder: 2,
        sectors_per_track: 8,
        block_len: 128,
    };
    let config = FsConfig::default().with_geometry(big).with_open_files(6);
    let mut wide = FileSystem::format(LDiskBuilder::from(big).build().unwrap(), config).unwrap();
    let mut narrow = create_test_fs();

    wide.create("wide").unwrap();
    narrow.create("narw").unwrap();
    let w = wide.open("wide").unwrap();
    let n = narrow.open("narw").unwrap();

    assert_eq!(wide.write(w, &[1; 400], 400).unwrap(), 384);
    assert_eq!(narrow.write(n, &[1; 400], 400).unwrap(), 192);
    assert_eq!(wide.disk().block_len(), 128);
    assert_eq!(listing(&narrow), vec![("narw".to_string(), 192)]);
}

#[test]
fn running_out_of_disk_fails_cleanly() {
    init_logging();
    // 32 blocks: 8 reserved, 24 for data, so eight full files.
    let geometry = Geometry {
        cylinders: 2,
        ..Geometry::default()
    };
    let config = FsConfig::default().with_geometry(geometry);
    let mut fs = FileSystem::format(LDiskBuilder::from(geometry).build().unwrap(), config).unwrap();

    for i in 0..8 {
        let name = format!("big{}", i);
        fs.create(&name).unwrap();
        let slot = fs.open(&name).unwrap();
        assert_eq!(fs.write(slot, &[9; 3 * B], (3 * B) as i64).unwrap(), 3 * B);
        fs.close(slot).unwrap();
    }
    assert_eq!(fs.free_blocks(), 0);

    fs.create("tiny").unwrap();
    let slot = fs.open("tiny").unwrap();
    let err = fs.write(slot, &[1], 1).unwrap_err();
    assert!(matches!(err, FsError::NoSpace));
    assert_eq!(fs.file_len("tiny").unwrap(), 0);

    fs.destroy("big3").unwrap();
    assert_eq!(fs.write(slot, &[1; 100], 100).unwrap(), 100);
}
