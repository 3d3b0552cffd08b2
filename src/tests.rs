//! End-to-end scenarios: whole-container behaviour, persistence, and
//! randomized churn with full invariant checking.

use crate::file::ShiftableFile;
use crate::layout::BLOCK_SIZE;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn read_all(file: &mut ShiftableFile) -> Vec<u8> {
    file.seek_set(0);
    let mut all = vec![0u8; file.size() as usize];
    let read = file.read(&mut all);
    assert_eq!(read, all.len() as u32);
    all
}

#[cfg(unix)]
fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("shf-{}-{}", name, std::process::id()))
}

#[test]
fn test_scenario_remove_word() {
    let mut file = ShiftableFile::create_in_memory().unwrap();

    assert_eq!(file.write(b"This is not a simple file."), 26);
    file.seek_set(7);
    assert_eq!(file.remove(4), 4);

    assert_eq!(file.size(), 22);
    assert_eq!(read_all(&mut file), b"This is a simple file.");
}

#[test]
fn test_scenario_insert_in_large_file() {
    let mut file = ShiftableFile::create_in_memory().unwrap();

    assert_eq!(file.write(&[b'a'; 128 << 10]), 128 << 10);
    file.seek_set(64 << 10);
    assert_eq!(file.insert(&[b'b'; 4 << 10]), 4 << 10);

    assert_eq!(file.size(), 132 << 10);

    let all = read_all(&mut file);
    assert!(all[..64 << 10].iter().all(|&b| b == b'a'));
    assert!(all[64 << 10..68 << 10].iter().all(|&b| b == b'b'));
    assert!(all[68 << 10..].iter().all(|&b| b == b'a'));
}

#[test]
fn test_scenario_remove_almost_everything() {
    let mut file = ShiftableFile::create_in_memory().unwrap();

    assert_eq!(file.write(&[b'x'; 3 << 10]), 3 << 10);
    file.seek_set(1);
    assert_eq!(file.remove(3071), 3071);

    assert_eq!(file.size(), 1);
    assert_eq!(read_all(&mut file), b"x");
}

#[cfg(unix)]
#[test]
fn test_scenario_persistence_restored() {
    use crate::store::OpenMode;
    use crate::FileFormat;

    let path = temp_path("restore");

    {
        let mut file =
            ShiftableFile::open(&path, OpenMode::CreateOrWipe, FileFormat::AutoDetect).unwrap();
        file.write(&[b'a'; 128 << 10]);
        file.seek_set(64 << 10);
        file.insert(&[b'b'; 4 << 10]);
        file.close(true).unwrap();
    }

    // Restored form is a plain file holding exactly the payload.
    let raw = std::fs::metadata(&path).unwrap().len();
    assert_eq!(raw, 132 << 10);

    {
        let mut file =
            ShiftableFile::open(&path, OpenMode::OpenExisting, FileFormat::AutoDetect).unwrap();

        assert_eq!(file.size(), 132 << 10);

        file.seek_set(64 << 10);
        let mut byte = [0u8];
        file.read(&mut byte);
        assert_eq!(byte[0], b'b');

        file.seek_set((64 << 10) - 1);
        file.read(&mut byte);
        assert_eq!(byte[0], b'a');

        file.close(false).unwrap();
    }

    // Keep-shiftable form reopens without rebuilding and reads the same.
    {
        let mut file =
            ShiftableFile::open(&path, OpenMode::OpenExisting, FileFormat::AutoDetect).unwrap();

        assert_eq!(file.size(), 132 << 10);
        file.check_integrity(true);

        file.seek_set(64 << 10);
        let mut byte = [0u8];
        file.read(&mut byte);
        assert_eq!(byte[0], b'b');
    }

    std::fs::remove_file(&path).unwrap();
}

#[cfg(unix)]
#[test]
fn test_scenario_persistence_identical_contents() {
    use crate::store::OpenMode;
    use crate::FileFormat;

    let path = temp_path("bitwise");
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 241) as u8).collect();

    {
        let mut file =
            ShiftableFile::open(&path, OpenMode::CreateOrWipe, FileFormat::AutoDetect).unwrap();
        file.write(&data);
        file.close(false).unwrap();
    }

    {
        let mut file =
            ShiftableFile::open(&path, OpenMode::OpenExisting, FileFormat::AutoDetect).unwrap();
        assert_eq!(read_all(&mut file), data);
        file.close(false).unwrap();
    }

    {
        let mut file =
            ShiftableFile::open(&path, OpenMode::OpenExisting, FileFormat::AutoDetect).unwrap();
        assert_eq!(read_all(&mut file), data);
    }

    std::fs::remove_file(&path).unwrap();
}

#[cfg(unix)]
#[test]
fn test_plain_file_promotion() {
    use crate::store::OpenMode;
    use crate::FileFormat;

    let path = temp_path("plain");
    let data: Vec<u8> = (0..10_000u32).map(|i| (i * 13) as u8).collect();
    std::fs::write(&path, &data).unwrap();

    let mut file =
        ShiftableFile::open(&path, OpenMode::OpenExisting, FileFormat::AutoDetect).unwrap();

    assert_eq!(file.size(), 10_000);
    assert_eq!(read_all(&mut file), data);

    // Edit and restore back to plain form.
    file.seek_set(5000);
    file.insert(b"wedge");
    file.close(true).unwrap();

    let restored = std::fs::read(&path).unwrap();
    assert_eq!(restored.len(), 10_005);
    assert_eq!(&restored[..5000], &data[..5000]);
    assert_eq!(&restored[5000..5005], b"wedge");
    assert_eq!(&restored[5005..], &data[5000..]);

    std::fs::remove_file(&path).unwrap();
}

#[cfg(unix)]
#[test]
fn test_dirty_file_refused() {
    use crate::error::Error;
    use crate::store::OpenMode;
    use crate::FileFormat;

    let path = temp_path("dirty");

    {
        let mut file =
            ShiftableFile::open(&path, OpenMode::CreateOrWipe, FileFormat::AutoDetect).unwrap();
        file.write(b"payload");
        file.close(false).unwrap();
    }

    // Simulate a crash mid-operation: force the state flags dirty.
    {
        let mut raw = std::fs::read(&path).unwrap();
        raw[44] = 1; // state_flags low bit: OPEN
        std::fs::write(&path, &raw).unwrap();
    }

    let result = ShiftableFile::open(&path, OpenMode::OpenExisting, FileFormat::AutoDetect);
    assert!(matches!(result, Err(Error::NotClosedCleanly)));

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_scenario_many_single_byte_inserts() {
    let mut file = ShiftableFile::create_in_memory().unwrap();

    for i in 0..1000u32 {
        file.seek_set(i * 2);
        assert_eq!(file.insert(b"q"), 1);
    }

    // Every insert past the end appends through write, zero-filling the
    // gap: the q bytes end up alternating with zeros.
    assert_eq!(file.size(), 1999);

    let all = read_all(&mut file);
    assert!(all.iter().step_by(2).all(|&b| b == b'q'));
    assert!(all.iter().skip(1).step_by(2).all(|&b| b == 0));
    assert_eq!(all.iter().filter(|&&b| b == b'q').count(), 1000);
}

#[test]
fn test_scenario_random_removals_hold_invariants() {
    init_tracing();

    let mut file = ShiftableFile::create_in_memory().unwrap();
    let mut model: Vec<u8> = (0..(1 << 20) as u32).map(|i| (i % 253) as u8).collect();

    assert_eq!(file.write(&model), 1 << 20);

    let mut rng = fastrand::Rng::with_seed(0xC0FFEE);

    for _ in 0..100 {
        let pos = rng.u32(0..=file.size());
        file.seek_set(pos);

        let removed = file.remove(8 << 10);
        let expected = (model.len() as u32 - pos).min(8 << 10);
        assert_eq!(removed, expected);
        model.drain(pos as usize..(pos + removed) as usize);

        file.check_integrity(true);
        assert_eq!(file.size() as usize, model.len());
    }

    assert_eq!(read_all(&mut file), model);
}

#[test]
fn test_mixed_edit_fuzz_matches_model() {
    init_tracing();

    let mut file = ShiftableFile::create_in_memory().unwrap();
    let mut model: Vec<u8> = Vec::new();
    let mut rng = fastrand::Rng::with_seed(7);

    for round in 0..300u32 {
        let pos = if model.is_empty() {
            0
        } else {
            rng.u32(0..=model.len() as u32)
        };
        file.seek_set(pos);

        match rng.u32(0..4) {
            0 => {
                let chunk: Vec<u8> = (0..rng.u32(1..3000)).map(|_| rng.u8(..)).collect();
                assert_eq!(file.insert(&chunk), chunk.len() as u32);
                model.splice(pos as usize..pos as usize, chunk.iter().copied());
            }
            1 => {
                let len = rng.u32(1..3000);
                let removed = file.remove(len);
                let expected = (model.len() as u32 - pos).min(len);
                assert_eq!(removed, expected);
                model.drain(pos as usize..(pos + removed) as usize);
            }
            2 => {
                let chunk: Vec<u8> = (0..rng.u32(1..2000)).map(|_| rng.u8(..)).collect();
                assert_eq!(file.write(&chunk), chunk.len() as u32);
                let end = pos as usize + chunk.len();
                if end > model.len() {
                    model.resize(end, 0);
                }
                model[pos as usize..end].copy_from_slice(&chunk);
            }
            _ => {
                let len = rng.u32(0..2000);
                let mut buf = vec![0u8; len as usize];
                let read = file.read(&mut buf);
                let expected = (model.len() as u32 - pos).min(len);
                assert_eq!(read, expected);
                assert_eq!(&buf[..read as usize], &model[pos as usize..(pos + read) as usize]);
            }
        }

        file.check_integrity(true);
        assert_eq!(file.size() as usize, model.len(), "diverged in round {round}");
    }

    assert_eq!(read_all(&mut file), model);
}

#[test]
fn test_defrag_is_idempotent() {
    let mut file = ShiftableFile::create_in_memory().unwrap();
    let mut rng = fastrand::Rng::with_seed(99);

    // Fragment the container with interleaved inserts and removals.
    file.write(&vec![1u8; 200 << 10]);
    for _ in 0..40 {
        let pos = rng.u32(0..file.size().max(1));
        file.seek_set(pos);
        file.insert(&vec![2u8; rng.usize(1..5000)]);
        let pos = rng.u32(0..file.size().max(1));
        file.seek_set(pos);
        file.remove(rng.u32(1..5000));
    }

    file.defrag();
    file.check_integrity(true);

    let first_stats = file.stats();
    let first_contents = read_all(&mut file);

    file.defrag();
    file.check_integrity(true);

    assert_eq!(file.stats(), first_stats);
    assert_eq!(read_all(&mut file), first_contents);
}

#[test]
fn test_compact_packs_blocks() {
    let mut file = ShiftableFile::create_in_memory().unwrap();

    // Many small inserts at the front leave underfull blocks behind.
    for i in 0..200u32 {
        file.seek_set(0);
        file.insert(&[i as u8; 300]);
    }

    let contents = read_all(&mut file);
    let before = file.stats().used_count;

    file.compact();
    file.check_integrity(true);

    assert!(file.stats().used_count <= before);
    assert_eq!(
        file.stats().used_count,
        (file.size() + BLOCK_SIZE - 1) / BLOCK_SIZE
    );
    assert_eq!(read_all(&mut file), contents);
}

#[test]
fn test_shrink_threshold_is_exact() {
    let mut file = ShiftableFile::create_in_memory().unwrap();
    file.write(&vec![5u8; (400 * BLOCK_SIZE) as usize]);

    let mut prev = file.stats();
    let mut shrunk = false;

    while file.size() > BLOCK_SIZE {
        file.seek_end(-(BLOCK_SIZE as i64));
        file.remove(BLOCK_SIZE);

        let stats = file.stats();

        if stats.map_size < prev.map_size {
            let total = prev.used_count + prev.free_count;

            // The trigger fired at this step and not one step earlier.
            assert!(stats.used_count < total / 4);
            assert!(prev.used_count >= total / 4);

            shrunk = true;
            break;
        }

        prev = stats;
    }

    assert!(shrunk, "mass removal never triggered a shrink");
}

#[test]
fn test_operations_on_empty_container() {
    let mut file = ShiftableFile::create_in_memory().unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(file.read(&mut buf), 0);
    assert_eq!(file.remove(10), 0);
    assert_eq!(file.insert(b""), 0);

    file.seek_set(1000);
    assert_eq!(file.tell(), 1000);
    assert_eq!(file.read(&mut buf), 0);

    file.defrag();
    file.compact();
    assert_eq!(file.size(), 0);
}
