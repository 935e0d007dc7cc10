use std::fs::{self, File as StdFile};
use std::io::Write;
use std::path::{Path, PathBuf};

use common::FileInfo;
use filetime::FileTime;

use crate::error::TfaError;
use crate::header::{self, DecodedHeader, BLOCK_SIZE, TYPEFLAG_REGULAR};

/// Observer of consumer-side archive progress.
pub trait TfaReaderListener: Send + Sync {
    fn total_progress(&self, _bytes_so_far: u64) {}
    fn file_start(&self, _info: &FileInfo) {}
    fn file_progress(&self, _info: &FileInfo, _bytes_in_file: u64) {}
    fn file_end(&self, _info: &FileInfo) {}
}

enum Phase {
    HeaderAcc,
    Body,
    Pad,
    Done,
}

struct CurrentEntry {
    info: FileInfo,
    mtime: u64,
    dest_path: Option<PathBuf>,
    handle: Option<StdFile>,
    remaining: u64,
    pad_remaining: usize,
    bytes_written: u64,
}

fn padded_len(size: u64) -> u64 {
    let remainder = size % BLOCK_SIZE as u64;
    if remainder == 0 {
        size
    } else {
        size + (BLOCK_SIZE as u64 - remainder)
    }
}

/// `dest`-relative paths must stay inside `dest`: no `..` component, no
/// absolute path, no empty component.
fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') {
        return false;
    }
    path.split('/').all(|c| !c.is_empty() && c != "..")
}

/// Push-based consumer that unpacks a TFA archive to a destination
/// directory as bytes arrive, without ever buffering the whole archive.
pub struct TfaReader {
    dest: PathBuf,
    header_acc: Vec<u8>,
    phase: Phase,
    current: Option<CurrentEntry>,
    bytes_so_far: u64,
    listener: Option<Box<dyn TfaReaderListener>>,
    received: Vec<FileInfo>,
}

impl TfaReader {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self::with_listener(dest, None)
    }

    pub fn with_listener(dest: impl Into<PathBuf>, listener: Option<Box<dyn TfaReaderListener>>) -> Self {
        Self {
            dest: dest.into(),
            header_acc: Vec::with_capacity(BLOCK_SIZE),
            phase: Phase::HeaderAcc,
            current: None,
            bytes_so_far: 0,
            listener,
            received: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    pub fn received_files(&self) -> &[FileInfo] {
        &self.received
    }

    fn begin_entry(&mut self, decoded: DecodedHeader) -> Result<(), TfaError> {
        if !is_safe_relative_path(&decoded.name) {
            return Err(TfaError::UnsafePath(decoded.name));
        }

        let info = FileInfo {
            name: decoded.name.clone(),
            size: decoded.size,
        };

        let (dest_path, handle) = if decoded.typeflag == TYPEFLAG_REGULAR {
            let path = self.dest.join(&decoded.name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let handle = StdFile::create(&path)?;
            (Some(path), Some(handle))
        } else {
            (None, None)
        };

        if let Some(listener) = &self.listener {
            listener.file_start(&info);
        }

        self.current = Some(CurrentEntry {
            info,
            mtime: decoded.mtime,
            dest_path,
            handle,
            remaining: decoded.size,
            pad_remaining: 0,
            bytes_written: 0,
        });
        Ok(())
    }

    fn finish_entry(&mut self) {
        let entry = self.current.take().expect("entry must be active");

        if let Some(path) = &entry.dest_path {
            if let Err(err) = filetime::set_file_mtime(path, FileTime::from_unix_time(entry.mtime as i64, 0u32)) {
                log::warn!("could not restore mtime on {path:?}: {err}");
            }
        }

        if let Some(listener) = &self.listener {
            listener.file_end(&entry.info);
        }
        self.received.push(entry.info);
    }

    /// Feeds a chunk of archive bytes in, returning how many bytes of
    /// `chunk` were consumed. Once the trailer has been seen, [`is_done`]
    /// returns `true` and any trailing bytes in `chunk` are left unconsumed.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize, TfaError> {
        let mut offset = 0;

        while offset < chunk.len() {
            match self.phase {
                Phase::HeaderAcc => {
                    let need = BLOCK_SIZE - self.header_acc.len();
                    let n = need.min(chunk.len() - offset);
                    self.header_acc.extend_from_slice(&chunk[offset..offset + n]);
                    offset += n;

                    if self.header_acc.len() == BLOCK_SIZE {
                        let mut block = [0u8; BLOCK_SIZE];
                        block.copy_from_slice(&self.header_acc);
                        self.header_acc.clear();

                        if header::is_zero_block(&block) {
                            self.phase = Phase::Done;
                        } else {
                            let decoded = header::decode(&block)?;
                            self.begin_entry(decoded)?;
                            self.phase = Phase::Body;
                        }
                    }
                }
                Phase::Body => {
                    let entry = self.current.as_mut().expect("body phase without an entry");
                    if entry.remaining == 0 {
                        let pad = (padded_len(entry.info.size) - entry.info.size) as usize;
                        entry.pad_remaining = pad;
                        self.phase = Phase::Pad;
                        continue;
                    }

                    let n = (chunk.len() - offset).min(entry.remaining as usize);
                    if let Some(handle) = &mut entry.handle {
                        handle.write_all(&chunk[offset..offset + n])?;
                    }
                    entry.remaining -= n as u64;
                    entry.bytes_written += n as u64;
                    offset += n;
                    self.bytes_so_far += n as u64;

                    if let Some(listener) = &self.listener {
                        listener.file_progress(&entry.info, entry.bytes_written);
                        listener.total_progress(self.bytes_so_far);
                    }
                }
                Phase::Pad => {
                    let entry = self.current.as_mut().expect("pad phase without an entry");
                    if entry.pad_remaining == 0 {
                        self.finish_entry();
                        self.phase = Phase::HeaderAcc;
                        continue;
                    }

                    let n = (chunk.len() - offset).min(entry.pad_remaining);
                    entry.pad_remaining -= n;
                    offset += n;
                    self.bytes_so_far += n as u64;
                }
                Phase::Done => break,
            }
        }

        Ok(offset)
    }
}
