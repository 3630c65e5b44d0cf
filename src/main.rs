//! Dumps the entries of a volume index file, one line per record.
//!
//! Usage: `volume-store <path/to/volume.idx>`

use std::fs::File;
use volume_store::walk_index_file;

fn main() -> volume_store::Result<()> {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: volume-store <path/to/volume.idx>");
        std::process::exit(2);
    };

    let file = File::open(&path)?;

    walk_index_file(&file, |key, offset, size| {
        println!(
            "key {key}, offset {}, size {size}, next offset {}",
            u64::from(offset) * 8,
            u64::from(offset) * 8 + u64::from(size)
        );
        Ok(())
    })
}
