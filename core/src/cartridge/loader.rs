use super::super::{GBAError, GBAResult};

use std::io::prelude::*;
use std::io::Cursor;
use std::path::Path;

use rustagb_utils::read_bin_file;
use zip::ZipArchive;

pub enum LoadRom {
    Raw(Vec<u8>),
}
type LoadRomResult = GBAResult<LoadRom>;

fn try_load_zip(data: &[u8]) -> LoadRomResult {
    let reader = Cursor::new(data);
    let mut archive = ZipArchive::new(reader)?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.name().ends_with(".gba") {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            return Ok(LoadRom::Raw(buf));
        }
    }
    Err(GBAError::CartridgeLoadError(
        "no .gba files found within the zip archive".to_owned(),
    ))
}

pub(super) fn load_from_file(path: &Path) -> LoadRomResult {
    let bytes = read_bin_file(path)?;

    match path.extension() {
        Some(extension) => match extension.to_str() {
            Some("zip") => try_load_zip(&bytes),
            Some("gba") => Ok(LoadRom::Raw(bytes)),
            _ => {
                warn!("unknown file extension, loading as raw binary file");
                Ok(LoadRom::Raw(bytes))
            }
        },
        None => Ok(LoadRom::Raw(bytes)),
    }
}

pub(super) fn load_from_bytes(bytes: Vec<u8>) -> LoadRomResult {
    // first try as zip
    if let Ok(result) = try_load_zip(&bytes) {
        return Ok(result);
    }

    // if everything else failed, load the rom as raw binary
    Ok(LoadRom::Raw(bytes))
}
