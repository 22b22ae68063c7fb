//! Binary codec for the rendered-object cache file.
//!
//! File layout (all integers little-endian):
//!
//! ```text
//! offset 0   : u64  magic      = 0xFFEEDDCCFEDCFEDC
//! offset 8   : u8   version    = 1
//! offset 9   : u64  n_objects
//! offset 17  : record[0] ... record[n_objects-1]
//!
//! record     := bytestring id ‖ bytestring type ‖ bytestring json
//! bytestring := u64 length ‖ <length> raw bytes
//! ```
//!
//! A missing file reads as an empty list. Replacement is atomic: records are
//! written to a sibling `.tmp` file which is renamed onto the real path, so a
//! concurrent reader sees either the old cache or the new one, never a
//! partial write.

use crate::error::{CacheError, CacheResult};
use crate::model::{RenderedObject, RenderedObjectList};
use log::warn;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: u64 = 0xFFEE_DDCC_FEDC_FEDC;
const CURRENT_VERSION: u8 = 1;
const HEADER_SIZE: u64 = 8 + 1;

/// Rename retries tolerate transient sharing violations on platforms where a
/// concurrent reader blocks the replace.
const RENAME_RETRIES: u32 = 5;

fn read_u64(reader: &mut impl Read) -> CacheResult<u64> {
    let mut buffer = [0u8; 8];
    read_exact(reader, &mut buffer)?;
    Ok(u64::from_le_bytes(buffer))
}

fn read_u8(reader: &mut impl Read) -> CacheResult<u8> {
    let mut buffer = [0u8; 1];
    read_exact(reader, &mut buffer)?;
    Ok(buffer[0])
}

fn read_exact(reader: &mut impl Read, buffer: &mut [u8]) -> CacheResult<()> {
    reader.read_exact(buffer).map_err(|error| {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            CacheError::Truncated
        } else {
            CacheError::Io(error)
        }
    })
}

fn read_string(reader: &mut impl Read) -> CacheResult<String> {
    let length = read_u64(reader)?;
    let length = usize::try_from(length).map_err(|_| CacheError::Truncated)?;
    let mut buffer = vec![0u8; length];
    read_exact(reader, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| CacheError::BadFormat)
}

fn read_object(reader: &mut impl Read) -> CacheResult<RenderedObject> {
    let id = read_string(reader)?;
    let egil_type = read_string(reader)?;
    let json = read_string(reader)?;
    Ok(RenderedObject::new(id, egil_type, json))
}

/// Read a cache file.
///
/// A missing file is not an error and yields an empty list. A wrong magic
/// number is [`CacheError::BadFormat`]; a version byte above the current one
/// is [`CacheError::UnsupportedVersion`]; a short file is
/// [`CacheError::Truncated`].
pub fn read(path: &Path) -> CacheResult<RenderedObjectList> {
    if !path.exists() {
        return Ok(RenderedObjectList::new());
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let magic = read_u64(&mut reader)?;
    if magic != MAGIC {
        return Err(CacheError::BadFormat);
    }

    let version = read_u8(&mut reader)?;
    if version > CURRENT_VERSION {
        return Err(CacheError::UnsupportedVersion {
            found: version,
            supported: CURRENT_VERSION,
        });
    }

    let n_objects = read_u64(&mut reader)?;
    let mut objects = RenderedObjectList::new();
    for _ in 0..n_objects {
        objects.add(read_object(&mut reader)?);
    }
    Ok(objects)
}

fn string_size(value: &str) -> u64 {
    8 + value.len() as u64
}

fn object_size(object: &RenderedObject) -> u64 {
    string_size(object.id()) + string_size(object.egil_type()) + string_size(object.json())
}

/// Worst-case size of the cache file a run can produce.
///
/// For every current id the larger of the current and cached encodings is
/// counted, since a failed update keeps whichever is in the new list, and
/// every cached-only record is counted in full, since a failed delete (or a
/// render failure) retains it. Used to pre-allocate the temporary file so a
/// full disk is discovered before any SCIM traffic has been sent.
pub fn size_estimate(current: &RenderedObjectList, cached: &RenderedObjectList) -> u64 {
    let mut total = HEADER_SIZE + 8;

    for object in current.iter() {
        let mut size = object_size(object);
        if let Some(cached_object) = cached.get(object.id()) {
            size = size.max(object_size(cached_object));
        }
        total += size;
    }

    for object in cached.iter() {
        if !current.contains(object.id()) {
            total += object_size(object);
        }
    }

    total
}

fn temp_file_for(path: &Path) -> PathBuf {
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".tmp");
    path.with_file_name(file_name)
}

fn open_temp_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).read(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Pre-allocate by plainly writing filler bytes. Slower than fallocate but
/// works on every platform and defeats sparse-file optimizations that would
/// make the reservation meaningless.
fn pre_allocate(file: &mut File, size: u64) -> CacheResult<()> {
    const BLOCK_SIZE: usize = 1024;
    let block = [0xFFu8; BLOCK_SIZE];

    let mut written: u64 = 0;
    while written < size {
        file.write_all(&block).map_err(|error| {
            CacheError::Io(std::io::Error::new(
                error.kind(),
                format!("failed to pre-allocate cache file (not enough disk space?): {error}"),
            ))
        })?;
        written += BLOCK_SIZE as u64;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(())
}

fn write_u64(writer: &mut impl Write, value: u64) -> CacheResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_string(writer: &mut impl Write, value: &str) -> CacheResult<()> {
    write_u64(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn write_object(writer: &mut impl Write, object: &RenderedObject) -> CacheResult<()> {
    write_string(writer, object.id())?;
    write_string(writer, object.egil_type())?;
    write_string(writer, object.json())?;
    Ok(())
}

fn rename_with_retries(from: &Path, to: &Path) -> CacheResult<()> {
    for attempt in 1..=RENAME_RETRIES {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(error) if attempt < RENAME_RETRIES => {
                let delay = std::time::Duration::from_secs(u64::from(attempt) * 10);
                warn!(
                    "failed to overwrite old cache file with new: {error}; will retry in {} seconds",
                    delay.as_secs()
                );
                std::thread::sleep(delay);
            }
            Err(error) => {
                return Err(CacheError::Io(std::io::Error::new(
                    error.kind(),
                    format!("failed to overwrite old cache file with new: {error}"),
                )));
            }
        }
    }
    unreachable!("rename loop always returns")
}

/// Write a cache file atomically.
///
/// Records go to `<path>.tmp`, pre-allocated to `estimate` bytes, truncated
/// back to the true length, then renamed onto `path` (with retries and
/// backoff against transient sharing violations). The previous cache stays
/// readable at `path` until the rename lands.
pub fn write(path: &Path, objects: &RenderedObjectList, estimate: u64) -> CacheResult<()> {
    let temp_path = temp_file_for(path);
    let mut file = open_temp_file(&temp_path)?;

    pre_allocate(&mut file, estimate)?;

    let true_length;
    {
        let mut writer = BufWriter::new(&mut file);
        write_u64(&mut writer, MAGIC)?;
        writer.write_all(&[CURRENT_VERSION])?;
        write_u64(&mut writer, objects.len() as u64)?;
        for object in objects.iter() {
            write_object(&mut writer, object)?;
        }
        writer.flush()?;
        true_length = writer.stream_position()?;
    }

    file.set_len(true_length)?;
    file.sync_all()?;
    drop(file);

    rename_with_retries(&temp_path, path)
}

/// Write without a separately computed reservation; the estimate degenerates
/// to the exact size of the list being written.
pub fn write_exact(path: &Path, objects: &RenderedObjectList) -> CacheResult<()> {
    let empty = RenderedObjectList::new();
    write(path, objects, size_estimate(objects, &empty))
}
