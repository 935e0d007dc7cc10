use common::{File, FileInfo};

use crate::error::TfaError;
use crate::header::{self, BLOCK_SIZE};

/// Observer of producer-side archive progress. All methods are no-ops by
/// default so callers only implement what they care about.
pub trait TfaWriterListener: Send + Sync {
    fn total_progress(&self, _bytes_so_far: u64, _total_size: u64) {}
    fn file_start(&self, _info: &FileInfo) {}
    fn file_progress(&self, _info: &FileInfo, _bytes_in_file: u64) {}
    fn file_end(&self, _info: &FileInfo) {}
}

fn padded_len(size: u64) -> u64 {
    let remainder = size % BLOCK_SIZE as u64;
    if remainder == 0 {
        size
    } else {
        size + (BLOCK_SIZE as u64 - remainder)
    }
}

struct Entry {
    file: Box<dyn File>,
    info: FileInfo,
    mtime: u64,
    mode: u32,
    header: [u8; BLOCK_SIZE],
}

enum Phase {
    Header { offset: usize },
    Body,
    Pad { remaining: usize },
    Trailer { offset: usize },
    Done,
}

/// Pull-based producer of a TFA archive body.
///
/// `calc_size()` is exact and known up front, so callers that need a
/// `Content-Length` (FlowDrop's transfer client does) never have to buffer
/// the archive. `write_to` fills as much of the caller's buffer as it can
/// and returns how many bytes it wrote; `0` means the archive is exhausted.
pub struct TfaWriter {
    entries: Vec<Entry>,
    index: usize,
    phase: Phase,
    body_remaining: u64,
    file_bytes_written: u64,
    bytes_so_far: u64,
    total_size: u64,
    listener: Option<Box<dyn TfaWriterListener>>,
}

impl TfaWriter {
    /// Takes ownership of every entry's name, size, and timestamp up front
    /// so [`Self::calc_size`] never has to touch the underlying files again.
    pub fn new(files: Vec<Box<dyn File>>) -> Result<Self, TfaError> {
        Self::with_listener(files, None)
    }

    pub fn with_listener(
        files: Vec<Box<dyn File>>,
        listener: Option<Box<dyn TfaWriterListener>>,
    ) -> Result<Self, TfaError> {
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let info = FileInfo {
                name: file.relative_path().to_string(),
                size: file.size(),
            };
            let mtime = file.modified_time();
            let mode = file.permissions();
            let header = header::encode(&info.name, info.size, mtime, mode)?;
            entries.push(Entry {
                file,
                info,
                mtime,
                mode,
                header,
            });
        }

        let total_size = entries
            .iter()
            .map(|e| BLOCK_SIZE as u64 + padded_len(e.info.size))
            .sum::<u64>()
            + BLOCK_SIZE as u64;

        let phase = if entries.is_empty() {
            Phase::Trailer { offset: 0 }
        } else {
            Phase::Header { offset: 0 }
        };

        Ok(Self {
            entries,
            index: 0,
            phase,
            body_remaining: 0,
            file_bytes_written: 0,
            bytes_so_far: 0,
            total_size,
            listener,
        })
    }

    /// Total archive size in bytes: every entry's header, size rounded up to
    /// the next 512-byte block, plus the 512-byte trailer.
    pub fn calc_size(&self) -> u64 {
        self.total_size
    }

    fn current_info(&self) -> &FileInfo {
        &self.entries[self.index].info
    }

    /// Fills as much of `out` as the archive has left to give, returning the
    /// number of bytes written. Returns `0` only once the trailer has been
    /// fully emitted.
    pub fn write_to(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() {
            match &mut self.phase {
                Phase::Header { offset } => {
                    let header = self.entries[self.index].header;
                    let remaining = BLOCK_SIZE - *offset;
                    let n = remaining.min(out.len() - written);
                    out[written..written + n].copy_from_slice(&header[*offset..*offset + n]);
                    *offset += n;
                    written += n;

                    if *offset == BLOCK_SIZE {
                        if let Some(listener) = &self.listener {
                            listener.file_start(self.current_info());
                        }
                        self.body_remaining = self.current_info().size;
                        self.file_bytes_written = 0;
                        self.phase = Phase::Body;
                    }
                }
                Phase::Body => {
                    if self.body_remaining == 0 {
                        let pad = padded_len(self.current_info().size) - self.current_info().size;
                        self.phase = Phase::Pad {
                            remaining: pad as usize,
                        };
                        continue;
                    }

                    let n = (out.len() - written).min(self.body_remaining as usize);
                    let entry = &mut self.entries[self.index];
                    let read = entry.file.read(&mut out[written..written + n]).unwrap_or(0);

                    if read == 0 {
                        log::warn!(
                            "entry {:?} ended {} bytes short of its declared size; padding with zeros",
                            entry.info.name,
                            self.body_remaining
                        );
                        for b in &mut out[written..written + n] {
                            *b = 0;
                        }
                        self.body_remaining -= n as u64;
                        written += n;
                        self.file_bytes_written += n as u64;
                    } else {
                        if read < n {
                            for b in &mut out[written + read..written + n] {
                                *b = 0;
                            }
                        }
                        self.body_remaining -= n as u64;
                        written += n;
                        self.file_bytes_written += n as u64;
                    }

                    self.bytes_so_far += n as u64;
                    if let Some(listener) = &self.listener {
                        listener.file_progress(self.current_info(), self.file_bytes_written);
                        listener.total_progress(self.bytes_so_far, self.total_size);
                    }
                }
                Phase::Pad { remaining } => {
                    if *remaining == 0 {
                        if let Some(listener) = &self.listener {
                            listener.file_end(self.current_info());
                        }
                        self.index += 1;
                        if self.index < self.entries.len() {
                            self.phase = Phase::Header { offset: 0 };
                        } else {
                            self.phase = Phase::Trailer { offset: 0 };
                        }
                        continue;
                    }

                    let n = (out.len() - written).min(*remaining);
                    for b in &mut out[written..written + n] {
                        *b = 0;
                    }
                    *remaining -= n;
                    written += n;
                    self.bytes_so_far += n as u64;
                }
                Phase::Trailer { offset } => {
                    let remaining = BLOCK_SIZE - *offset;
                    let n = remaining.min(out.len() - written);
                    for b in &mut out[written..written + n] {
                        *b = 0;
                    }
                    *offset += n;
                    written += n;
                    self.bytes_so_far += n as u64;

                    if *offset == BLOCK_SIZE {
                        self.phase = Phase::Done;
                    }
                }
                Phase::Done => break,
            }
        }
        written
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read};

    struct MemFile {
        name: String,
        data: Vec<u8>,
        cursor: usize,
        mtime: u64,
        mode: u32,
    }

    impl File for MemFile {
        fn relative_path(&self) -> &str {
            &self.name
        }
        fn size(&self) -> u64 {
            self.data.len() as u64
        }
        fn created_time(&self) -> u64 {
            self.mtime
        }
        fn modified_time(&self) -> u64 {
            self.mtime
        }
        fn permissions(&self) -> u32 {
            self.mode
        }
        fn seek(&mut self, pos: u64) -> io::Result<()> {
            self.cursor = pos as usize;
            Ok(())
        }
        fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            let remaining = &self.data[self.cursor..];
            let n = remaining.len().min(buffer.len());
            buffer[..n].copy_from_slice(&remaining[..n]);
            self.cursor += n;
            Ok(n)
        }
    }

    #[test]
    fn calc_size_agrees_with_actual_bytes_written() {
        let files: Vec<Box<dyn File>> = vec![
            Box::new(MemFile {
                name: "a.txt".into(),
                data: b"hello world".to_vec(),
                cursor: 0,
                mtime: 1000,
                mode: 0o644,
            }),
            Box::new(MemFile {
                name: "b.txt".into(),
                data: vec![7u8; 1000],
                cursor: 0,
                mtime: 2000,
                mode: 0o644,
            }),
        ];

        let mut writer = TfaWriter::new(files).unwrap();
        let total = writer.calc_size();

        let mut written = 0u64;
        let mut buf = [0u8; 37];
        loop {
            let n = writer.write_to(&mut buf);
            if n == 0 {
                break;
            }
            written += n as u64;
        }

        assert_eq!(written, total);
        assert!(writer.is_done());
    }

    #[test]
    fn empty_archive_is_just_a_trailer() {
        let mut writer = TfaWriter::new(vec![]).unwrap();
        assert_eq!(writer.calc_size(), BLOCK_SIZE as u64);

        let mut buf = [0u8; 512];
        let n = writer.write_to(&mut buf);
        assert_eq!(n, 512);
        assert!(buf.iter().all(|&b| b == 0));
        assert!(writer.is_done());
    }
}
