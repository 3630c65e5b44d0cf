use test_log::test;
use volume_store::{
    DiskLocation, Needle, NeedleMapKind, SuperBlock, Volume, VolumeId,
};

fn seed_volume(dir: &std::path::Path, collection: &str, id: u32) -> volume_store::Result<()> {
    let volume = Volume::new(
        dir,
        collection,
        VolumeId(id),
        NeedleMapKind::Memory,
        SuperBlock::default(),
    )?;
    let mut n = Needle::new(1, 1, format!("{collection}/{id}").into_bytes());
    volume.write_needle(&mut n)?;
    volume.close();
    Ok(())
}

#[test]
fn discovers_existing_volumes() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;
    seed_volume(dir.path(), "", 1)?;
    seed_volume(dir.path(), "", 2)?;
    seed_volume(dir.path(), "pictures", 3)?;
    std::fs::write(dir.path().join("junk.txt"), b"not a volume")?;
    std::fs::write(dir.path().join("nan.dat"), b"")?;

    let mut location = DiskLocation::new(dir.path(), 10);
    location.load_existing_volumes(NeedleMapKind::Memory);

    assert_eq!(3, location.volume_count());
    assert!(location.has_volume(VolumeId(1)));
    assert!(location.has_volume(VolumeId(2)));
    assert!(location.has_volume(VolumeId(3)));

    let v = location.find_volume(VolumeId(3)).expect("volume 3 loaded");
    assert_eq!("pictures", v.collection());
    assert_eq!(b"pictures/3".to_vec(), v.read_needle(1)?.data);
    Ok(())
}

#[test]
fn delete_collection_removes_only_its_volumes() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;
    seed_volume(dir.path(), "", 1)?;
    seed_volume(dir.path(), "pictures", 2)?;
    seed_volume(dir.path(), "pictures", 3)?;

    let mut location = DiskLocation::new(dir.path(), 10);
    location.load_existing_volumes(NeedleMapKind::Memory);
    assert_eq!(3, location.volume_count());

    location.delete_collection("pictures")?;
    assert_eq!(1, location.volume_count());
    assert!(location.has_volume(VolumeId(1)));

    assert!(!dir.path().join("pictures_2.dat").exists());
    assert!(!dir.path().join("pictures_2.idx").exists());
    assert!(!dir.path().join("pictures_3.dat").exists());
    assert!(dir.path().join("1.dat").exists());
    Ok(())
}
