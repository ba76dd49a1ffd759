use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::PathBuf;

use serde::de::{self, Deserialize, Deserializer, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::GBAResult;

use super::BackupMemoryInterface;

/// Save memory with optional write-through persistence to a host file.
///
/// Host I/O failures never surface into the emulation: a file that stops
/// accepting writes is dropped and the buffer lives on in memory, so a
/// full disk costs the player a save file, not a crash.
#[derive(Debug)]
pub struct BackupFile {
    size: usize,
    path: Option<PathBuf>,
    file: Option<File>,
    buffer: Vec<u8>,
}

impl BackupFile {
    pub fn new(size: usize, path: Option<PathBuf>) -> GBAResult<BackupFile> {
        let mut file = None;
        let mut buffer = vec![0xff; size];
        if let Some(path) = &path {
            let mut f = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;

            let mut bytes = Vec::with_capacity(size);
            f.read_to_end(&mut bytes)?;
            let n = bytes.len().min(size);
            buffer[..n].copy_from_slice(&bytes[..n]);

            if bytes.len() != size {
                // fresh or truncated save, materialize it at full size
                f.seek(SeekFrom::Start(0))?;
                f.write_all(&buffer)?;
                f.set_len(size as u64)?;
            }

            file = Some(f);
        }

        Ok(BackupFile {
            size,
            path,
            file,
            buffer,
        })
    }

    /// A memory-only copy; keeps the path for bookkeeping but never
    /// touches the host file again.
    fn detached(size: usize, path: Option<PathBuf>, buffer: Vec<u8>) -> BackupFile {
        BackupFile {
            size,
            path,
            file: None,
            buffer,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn flush(&mut self) {
        let buffer = &self.buffer;
        if let Some(file) = &mut self.file {
            let synced = file
                .seek(SeekFrom::Start(0))
                .and_then(|_| file.write_all(buffer));
            if let Err(err) = synced {
                warn!("save file stopped accepting writes ({}), going memory-only", err);
                self.file = None;
            }
        }
    }
}

impl Clone for BackupFile {
    fn clone(&self) -> Self {
        match BackupFile::new(self.size, self.path.clone()) {
            Ok(clone) => clone,
            Err(_) => BackupFile::detached(self.size, self.path.clone(), self.buffer.clone()),
        }
    }
}

impl Serialize for BackupFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("BackupFile", 2)?;
        state.serialize_field("size", &self.size)?;
        state.serialize_field("path", &self.path)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for BackupFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BackupFileVisitor;

        impl<'de> Visitor<'de> for BackupFileVisitor {
            type Value = BackupFile;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("struct BackupFile")
            }

            fn visit_seq<V>(self, mut seq: V) -> Result<BackupFile, V::Error>
            where
                V: SeqAccess<'de>,
            {
                let size = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let path: Option<PathBuf> = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                BackupFile::new(size, path).map_err(de::Error::custom)
            }
        }

        const FIELDS: &[&str] = &["size", "path"];
        deserializer.deserialize_struct("BackupFile", FIELDS, BackupFileVisitor)
    }
}

impl BackupMemoryInterface for BackupFile {
    fn write(&mut self, offset: usize, value: u8) {
        self.buffer[offset] = value;
        if let Some(file) = &mut self.file {
            let written = file
                .seek(SeekFrom::Start(offset as u64))
                .and_then(|_| file.write_all(&[value]));
            if let Err(err) = written {
                warn!("save file stopped accepting writes ({}), going memory-only", err);
                self.file = None;
            }
        }
    }

    fn read(&self, offset: usize) -> u8 {
        self.buffer[offset]
    }

    fn resize(&mut self, new_size: usize) {
        self.size = new_size;
        self.buffer.resize(new_size, 0xff);
        self.flush();
    }
}
