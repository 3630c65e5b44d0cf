use test_log::test;
use volume_store::{
    Error, Needle, NeedleMapKind, SuperBlock, Volume, VolumeId, NEEDLE_INDEX_SIZE,
};

#[test]
fn write_read_delete_cycle() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;

    let volume = Volume::new(
        dir.path(),
        "",
        VolumeId(1),
        NeedleMapKind::Memory,
        SuperBlock::default(),
    )?;

    let mut n = Needle::new(42, 0x1122_3344, b"hello".to_vec());
    let written = volume.write_needle(&mut n)?;
    assert!(written > 0);

    let read = volume.read_needle(42)?;
    assert_eq!(b"hello".to_vec(), read.data);
    assert_eq!(0x1122_3344, read.cookie);
    assert_eq!(crc32fast::hash(b"hello"), read.checksum);

    let freed = volume.delete_needle(&n)?;
    assert_eq!(written, freed);
    assert!(matches!(volume.read_needle(42), Err(Error::NotFound)));

    // The index file holds the put and the tombstone
    let index_bytes = std::fs::read(dir.path().join("1.idx"))?;
    assert_eq!(2 * NEEDLE_INDEX_SIZE as usize, index_bytes.len());
    let tombstone = &index_bytes[NEEDLE_INDEX_SIZE as usize..];
    assert_eq!(42, u64::from_be_bytes(tombstone[0..8].try_into().unwrap()));
    assert_eq!(&[0u8; 8][..], &tombstone[8..16]);

    Ok(())
}

#[test]
fn appends_stay_aligned() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;

    let volume = Volume::new(
        dir.path(),
        "",
        VolumeId(1),
        NeedleMapKind::Memory,
        SuperBlock::default(),
    )?;

    for key in 1..=20u64 {
        let mut n = Needle::new(key, 1, vec![0xab; key as usize]);
        volume.write_needle(&mut n)?;
        let size = volume.size();
        assert!(size > 0);
        assert_eq!(0, size % 8, "unaligned after key {key}");
    }
    Ok(())
}

#[test]
fn identical_re_put_writes_nothing() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;

    let volume = Volume::new(
        dir.path(),
        "",
        VolumeId(1),
        NeedleMapKind::Memory,
        SuperBlock::default(),
    )?;

    let mut n = Needle::new(7, 7, b"same bytes".to_vec());
    let first = volume.write_needle(&mut n)?;
    let size_after_first = volume.size();

    let mut again = Needle::new(7, 7, b"same bytes".to_vec());
    let second = volume.write_needle(&mut again)?;
    assert_eq!(first, second);
    assert_eq!(size_after_first, volume.size());

    // Different bytes under the same key do get appended
    let mut changed = Needle::new(7, 7, b"other bytes".to_vec());
    volume.write_needle(&mut changed)?;
    assert!(volume.size() > size_after_first);
    assert_eq!(b"other bytes".to_vec(), volume.read_needle(7)?.data);

    Ok(())
}

#[test]
fn read_only_volume_refuses_writes() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let volume = Volume::new(
            dir.path(),
            "",
            VolumeId(1),
            NeedleMapKind::Memory,
            SuperBlock::default(),
        )?;
        let mut n = Needle::new(1, 1, b"data".to_vec());
        volume.write_needle(&mut n)?;
    }

    let dat = dir.path().join("1.dat");
    let mut perms = std::fs::metadata(&dat)?.permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&dat, perms)?;

    let volume = Volume::open(dir.path(), "", VolumeId(1), NeedleMapKind::Memory)?;
    assert!(volume.is_read_only());
    assert_eq!(b"data".to_vec(), volume.read_needle(1)?.data);

    let mut n = Needle::new(2, 2, b"more".to_vec());
    assert!(matches!(
        volume.write_needle(&mut n),
        Err(Error::ReadOnly(_))
    ));
    Ok(())
}
