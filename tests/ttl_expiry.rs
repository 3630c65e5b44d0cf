use std::time::{SystemTime, UNIX_EPOCH};
use test_log::test;
use volume_store::{Error, Needle, NeedleMapKind, SuperBlock, Volume, VolumeId};

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn volume(dir: &std::path::Path) -> volume_store::Result<Volume> {
    Volume::new(
        dir,
        "",
        VolumeId(1),
        NeedleMapKind::Memory,
        SuperBlock::default(),
    )
}

#[test]
fn elapsed_ttl_reads_as_not_found() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;
    let volume = volume(dir.path())?;

    let mut n = Needle::new(1, 1, b"short-lived".to_vec());
    n.set_ttl("1m".parse()?);
    n.set_last_modified(now_seconds() - 120);
    volume.write_needle(&mut n)?;

    assert!(matches!(volume.read_needle(1), Err(Error::NotFound)));
    Ok(())
}

#[test]
fn unexpired_ttl_reads_normally() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;
    let volume = volume(dir.path())?;

    let mut n = Needle::new(1, 1, b"long-lived".to_vec());
    n.set_ttl("1h".parse()?);
    n.set_last_modified(now_seconds() - 120);
    volume.write_needle(&mut n)?;

    assert_eq!(b"long-lived".to_vec(), volume.read_needle(1)?.data);
    Ok(())
}

#[test]
fn ttl_without_timestamp_never_expires() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;
    let volume = volume(dir.path())?;

    let mut n = Needle::new(1, 1, b"undated".to_vec());
    n.set_ttl("1m".parse()?);
    volume.write_needle(&mut n)?;

    assert_eq!(b"undated".to_vec(), volume.read_needle(1)?.data);
    Ok(())
}

#[test]
fn volume_expiry_follows_grace_window() -> volume_store::Result<()> {
    let dir = tempfile::tempdir()?;

    let volume = Volume::new(
        dir.path(),
        "",
        VolumeId(1),
        NeedleMapKind::Memory,
        SuperBlock::new(volume_store::ReplicaPlacement::default(), "1m".parse()?),
    )?;

    let mut n = Needle::new(1, 1, b"payload".to_vec());
    n.set_last_modified(now_seconds() - 10 * 60);
    volume.write_needle(&mut n)?;

    // Unknown size limit suppresses expiry
    assert!(!volume.is_expired(0));
    assert!(volume.is_expired(1024 * 1024));
    assert!(volume.is_expired_long_enough(10));
    Ok(())
}
