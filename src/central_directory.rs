//! A minimal, purpose-built reader of the ZIP end-of-central-directory
//! record and central directory.
//!
//! This is *not* a general ZIP parser: it exists only to give
//! [`crate::remote_zip::RemoteZip`] the one thing the `zip` crate's public
//! API doesn't reliably expose — every member's exact local-header offset,
//! in central-directory order — so the facade can build the position→size
//! map described in the data model. Decompression, CRC validation and all
//! other ZIP semantics are left entirely to the `zip` crate.
//!
//! Every fixed-size record below (the EOCD, the ZIP64 locator, the ZIP64
//! EOCD record, and the whole central directory) is read with exactly one
//! `read_exact` call sized to that record, then parsed out of the resulting
//! in-memory buffer. `RemoteIO` only sizes a fetch to the *one* read that
//! missed its current window (see `remote_io::choose_fetch`); a loop of
//! several small unseeked reads against the lazy handle directly — one
//! `read_u16`/`read_u32` per field — would see every read after the first
//! hit an already-exhausted buffer. The original implementation this crate
//! is modeled on avoids exactly this trap by slurping the whole central
//! directory into a local `BytesIO` before parsing a single entry out of it.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::RemoteZipError;

const EOCD_SIG: u32 = 0x0605_4b50;
const EOCD64_LOCATOR_SIG: u32 = 0x0706_4b50;
const EOCD64_SIG: u32 = 0x0606_4b50;
const CENTRAL_DIR_SIG: u32 = 0x0201_4b50;
const MIN_EOCD_LEN: u64 = 22;
const ZIP64_LOCATOR_LEN: u64 = 20;
const ZIP64_EOCD_FIXED_LEN: u64 = 56;
const INITIAL_PROBE: u64 = 64 * 1024;

/// A single member's name and the absolute offset of its local file header,
/// in the order the central directory lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLocation {
    pub name: String,
    pub header_offset: u64,
}

/// Everything the facade needs from the central directory: the members in
/// directory order, and the offset at which the central directory itself
/// begins (the sentinel for the position→size map).
#[derive(Debug, Clone)]
pub struct CentralDirectoryInfo {
    pub members: Vec<MemberLocation>,
    pub central_directory_start: u64,
}

fn io_err(e: io::Error) -> RemoteZipError {
    RemoteZipError::RemoteIo(e)
}

/// A read that failed against an already fully in-memory buffer: the
/// archive itself is short or malformed, not a transport problem.
fn corrupt(e: io::Error) -> RemoteZipError {
    RemoteZipError::CentralDirectory(format!("truncated or malformed record: {e}"))
}

fn rfind_signature(buf: &[u8], sig: u32) -> Option<usize> {
    let needle = sig.to_le_bytes();
    buf.windows(4).rposition(|w| w == needle)
}

/// Read one fixed-size record in a single `read_exact` call, after seeking
/// to it. Never issue more than one read against `io` for the same record:
/// see the module docs for why a second, unseeked read is unsafe here.
fn read_fixed_chunk<S: Read + Seek>(io: &mut S, at: u64, len: u64) -> Result<Vec<u8>, RemoteZipError> {
    io.seek(SeekFrom::Start(at)).map_err(io_err)?;
    let mut buf = vec![0u8; len as usize];
    io.read_exact(&mut buf).map_err(io_err)?;
    Ok(buf)
}

/// Scan backward from the file tail for the EOCD signature, escalating the
/// probe size until it's found (or the whole file has been searched).
/// Returns the absolute offset of the signature together with the tail
/// bytes fetched to find it, so the caller can parse the fixed EOCD fields
/// straight out of that buffer without a second read.
fn find_eocd<S: Read + Seek>(io: &mut S, file_size: u64) -> Result<(u64, Vec<u8>), RemoteZipError> {
    let mut probe = INITIAL_PROBE.max(MIN_EOCD_LEN);
    loop {
        let probe_len = probe.min(file_size);
        let tail_start = file_size - probe_len;
        let buf = read_fixed_chunk(io, tail_start, probe_len)?;
        if let Some(pos) = rfind_signature(&buf, EOCD_SIG) {
            return Ok((tail_start + pos as u64, buf[pos..].to_vec()));
        }
        if probe_len >= file_size {
            return Err(RemoteZipError::CentralDirectory(
                "end-of-central-directory signature not found".to_string(),
            ));
        }
        probe = (probe * 4).min(file_size);
    }
}

/// Find the ZIP64 extra-field's 64-bit relative header offset, given whether
/// the preceding 32-bit uncompressed/compressed size fields were themselves
/// ZIP64 sentinels (which determines the offset's position within the
/// variable-order ZIP64 extra field payload).
fn extract_zip64_header_offset(
    extra: &[u8],
    uncompressed_is_64: bool,
    compressed_is_64: bool,
) -> Option<u64> {
    let mut cursor = extra;
    while cursor.len() >= 4 {
        let tag = u16::from_le_bytes([cursor[0], cursor[1]]);
        let size = u16::from_le_bytes([cursor[2], cursor[3]]) as usize;
        if cursor.len() < 4 + size {
            break;
        }
        let data = &cursor[4..4 + size];
        if tag == 0x0001 {
            let mut skip = 0usize;
            if uncompressed_is_64 {
                skip += 8;
            }
            if compressed_is_64 {
                skip += 8;
            }
            if data.len() >= skip + 8 {
                let bytes: [u8; 8] = data[skip..skip + 8].try_into().ok()?;
                return Some(u64::from_le_bytes(bytes));
            }
            return None;
        }
        cursor = &cursor[4 + size..];
    }
    None
}

/// Locate and read the end-of-central-directory record (following the
/// ZIP64 locator/record when the classic fields are the `0xFFFF`/`0xFFFFFFFF`
/// sentinel), then walk the central directory to collect every member's name
/// and local-header offset.
pub fn read_central_directory<S: Read + Seek>(
    io: &mut S,
) -> Result<CentralDirectoryInfo, RemoteZipError> {
    let file_size = io.seek(SeekFrom::End(0)).map_err(io_err)?;
    let (eocd_offset, eocd_tail) = find_eocd(io, file_size)?;

    // `eocd_tail` starts at the signature itself; the fixed fields we want
    // follow it directly, all still inside this one already-fetched slice.
    let mut eocd_fields = Cursor::new(&eocd_tail[4..]);
    let _disk_number = eocd_fields.read_u16::<LittleEndian>().map_err(corrupt)?;
    let _disk_with_cd = eocd_fields.read_u16::<LittleEndian>().map_err(corrupt)?;
    let entries_this_disk = eocd_fields.read_u16::<LittleEndian>().map_err(corrupt)?;
    let total_entries32 = eocd_fields.read_u16::<LittleEndian>().map_err(corrupt)?;
    let cd_size32 = eocd_fields.read_u32::<LittleEndian>().map_err(corrupt)?;
    let cd_offset32 = eocd_fields.read_u32::<LittleEndian>().map_err(corrupt)?;

    let needs_zip64 = entries_this_disk == 0xFFFF
        || total_entries32 == 0xFFFF
        || cd_size32 == 0xFFFF_FFFF
        || cd_offset32 == 0xFFFF_FFFF;

    let (total_entries, cd_offset, cd_size) = if needs_zip64 {
        if eocd_offset < ZIP64_LOCATOR_LEN {
            return Err(RemoteZipError::CentralDirectory(
                "ZIP64 sentinel fields present but file too short for a ZIP64 locator"
                    .to_string(),
            ));
        }
        let locator = read_fixed_chunk(io, eocd_offset - ZIP64_LOCATOR_LEN, ZIP64_LOCATOR_LEN)?;
        let mut fields = Cursor::new(&locator[..]);
        let sig = fields.read_u32::<LittleEndian>().map_err(corrupt)?;
        if sig != EOCD64_LOCATOR_SIG {
            return Err(RemoteZipError::CentralDirectory(
                "expected a ZIP64 end-of-central-directory locator".to_string(),
            ));
        }
        let _disk_with_eocd64 = fields.read_u32::<LittleEndian>().map_err(corrupt)?;
        let eocd64_offset = fields.read_u64::<LittleEndian>().map_err(corrupt)?;

        let record = read_fixed_chunk(io, eocd64_offset, ZIP64_EOCD_FIXED_LEN)?;
        let mut fields = Cursor::new(&record[..]);
        let sig = fields.read_u32::<LittleEndian>().map_err(corrupt)?;
        if sig != EOCD64_SIG {
            return Err(RemoteZipError::CentralDirectory(
                "expected a ZIP64 end-of-central-directory record".to_string(),
            ));
        }
        let _record_size = fields.read_u64::<LittleEndian>().map_err(corrupt)?;
        let _version_made_by = fields.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _version_needed = fields.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _disk_number = fields.read_u32::<LittleEndian>().map_err(corrupt)?;
        let _disk_with_cd = fields.read_u32::<LittleEndian>().map_err(corrupt)?;
        let _entries_this_disk64 = fields.read_u64::<LittleEndian>().map_err(corrupt)?;
        let total_entries64 = fields.read_u64::<LittleEndian>().map_err(corrupt)?;
        let cd_size64 = fields.read_u64::<LittleEndian>().map_err(corrupt)?;
        let cd_offset64 = fields.read_u64::<LittleEndian>().map_err(corrupt)?;
        (total_entries64, cd_offset64, cd_size64)
    } else {
        (total_entries32 as u64, cd_offset32 as u64, cd_size32 as u64)
    };

    // Read everything from the central directory's start to the end of the
    // file in one call, and parse every entry out of that in-memory copy.
    // This is the one-shot-slurp-then-parse-locally discipline the original
    // implementation relies on; it also happens to leave this same span
    // already buffered in `RemoteIO` for when `zip::ZipArchive::new`
    // re-walks the same central directory right after this returns.
    if cd_offset > file_size {
        return Err(RemoteZipError::CentralDirectory(
            "central directory offset falls outside the file".to_string(),
        ));
    }
    let remainder_len = file_size - cd_offset;
    if cd_size > remainder_len {
        return Err(RemoteZipError::CentralDirectory(
            "central directory size exceeds the file's remaining length".to_string(),
        ));
    }
    let remainder = read_fixed_chunk(io, cd_offset, remainder_len)?;
    let mut entries = Cursor::new(&remainder[..cd_size as usize]);

    let mut members = Vec::with_capacity(total_entries as usize);
    for _ in 0..total_entries {
        let sig = entries.read_u32::<LittleEndian>().map_err(corrupt)?;
        if sig != CENTRAL_DIR_SIG {
            return Err(RemoteZipError::CentralDirectory(format!(
                "expected central directory file header signature, found 0x{sig:08x}"
            )));
        }
        let _version_made_by = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _version_needed = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _flags = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _method = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _mod_time = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _mod_date = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _crc32 = entries.read_u32::<LittleEndian>().map_err(corrupt)?;
        let compressed_size32 = entries.read_u32::<LittleEndian>().map_err(corrupt)?;
        let uncompressed_size32 = entries.read_u32::<LittleEndian>().map_err(corrupt)?;
        let name_len = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let extra_len = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let comment_len = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _disk_number_start = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _internal_attrs = entries.read_u16::<LittleEndian>().map_err(corrupt)?;
        let _external_attrs = entries.read_u32::<LittleEndian>().map_err(corrupt)?;
        let header_offset32 = entries.read_u32::<LittleEndian>().map_err(corrupt)?;

        let mut name_buf = vec![0u8; name_len as usize];
        entries.read_exact(&mut name_buf).map_err(corrupt)?;
        let name = String::from_utf8_lossy(&name_buf).into_owned();

        let mut extra_buf = vec![0u8; extra_len as usize];
        entries.read_exact(&mut extra_buf).map_err(corrupt)?;

        let header_offset = if header_offset32 == 0xFFFF_FFFF {
            extract_zip64_header_offset(
                &extra_buf,
                uncompressed_size32 == 0xFFFF_FFFF,
                compressed_size32 == 0xFFFF_FFFF,
            )
            .ok_or_else(|| {
                RemoteZipError::CentralDirectory(format!(
                    "entry {name} needs a ZIP64 extra field for its header offset but none was found"
                ))
            })?
        } else {
            header_offset32 as u64
        };

        let mut comment_buf = vec![0u8; comment_len as usize];
        entries.read_exact(&mut comment_buf).map_err(corrupt)?;

        members.push(MemberLocation { name, header_offset });
    }

    Ok(CentralDirectoryInfo {
        members,
        central_directory_start: cd_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_fetcher::FileRangeFetcher;
    use crate::remote_io::RemoteIO;
    use std::io::Write;

    fn central_dir_entry(name: &str, header_offset: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CENTRAL_DIR_SIG.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes()); // version made by
        buf.extend_from_slice(&20u16.to_le_bytes()); // version needed
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // method
        buf.extend_from_slice(&0u16.to_le_bytes()); // mod time
        buf.extend_from_slice(&0u16.to_le_bytes()); // mod date
        buf.extend_from_slice(&0u32.to_le_bytes()); // crc32
        buf.extend_from_slice(&10u32.to_le_bytes()); // compressed size
        buf.extend_from_slice(&10u32.to_le_bytes()); // uncompressed size
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // extra len
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment len
        buf.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        buf.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        buf.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        buf.extend_from_slice(&header_offset.to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf
    }

    fn eocd(entry_count: u16, cd_size: u32, cd_offset: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&EOCD_SIG.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&entry_count.to_le_bytes());
        buf.extend_from_slice(&entry_count.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment length
        buf
    }

    fn build_directory(entries: &[Vec<u8>], cd_offset: u32) -> Vec<u8> {
        let cd_size: u32 = entries.iter().map(|e| e.len() as u32).sum();
        let mut archive = vec![0u8; cd_offset as usize];
        for e in entries {
            archive.extend_from_slice(e);
        }
        archive.extend_from_slice(&eocd(entries.len() as u16, cd_size, cd_offset));
        archive
    }

    #[test]
    fn reads_two_member_directory() {
        let e1 = central_dir_entry("a.txt", 0);
        let e2 = central_dir_entry("b.txt", 100);
        let archive = build_directory(&[e1, e2], 1000);

        let mut cursor = Cursor::new(archive);
        let info = read_central_directory(&mut cursor).unwrap();
        assert_eq!(info.central_directory_start, 1000);
        assert_eq!(info.members.len(), 2);
        assert_eq!(info.members[0].name, "a.txt");
        assert_eq!(info.members[0].header_offset, 0);
        assert_eq!(info.members[1].name, "b.txt");
        assert_eq!(info.members[1].header_offset, 100);
    }

    #[test]
    fn directory_order_need_not_be_sorted_by_offset() {
        // b.txt's local header comes first in the file, but the central
        // directory lists a.txt first; directory order must be preserved in
        // the returned Vec (only the position→size map sorts by offset).
        let e1 = central_dir_entry("a.txt", 500);
        let e2 = central_dir_entry("b.txt", 0);
        let archive = build_directory(&[e1, e2], 1000);

        let mut cursor = Cursor::new(archive);
        let info = read_central_directory(&mut cursor).unwrap();
        assert_eq!(info.members[0].name, "a.txt");
        assert_eq!(info.members[0].header_offset, 500);
        assert_eq!(info.members[1].name, "b.txt");
        assert_eq!(info.members[1].header_offset, 0);
    }

    #[test]
    fn missing_eocd_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8; 100]);
        assert!(read_central_directory(&mut cursor).is_err());
    }

    /// A large central directory (2000 entries), read over a real `RemoteIO`
    /// with a tiny initial buffer so the first probe fetch cannot possibly
    /// contain the whole thing. Before the one-shot-slurp fix, the entry
    /// loop's second and later field reads per entry would hit an exhausted
    /// buffer the moment the first entry's 4-byte signature read installed
    /// a 4-byte-wide fetch.
    #[test]
    fn large_directory_over_remote_io_with_small_initial_buffer() {
        let mut entries = Vec::new();
        let mut offset = 0u32;
        for i in 0..2000 {
            let name = format!("file_{i:05}.bin");
            entries.push(central_dir_entry(&name, offset));
            offset += 40; // pretend local entries are 40 bytes each
        }
        let cd_offset = offset;
        let archive = build_directory(&entries, cd_offset);

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&archive).unwrap();

        let fetcher = FileRangeFetcher::new(tmp.path());
        let mut io = RemoteIO::with_initial_buffer_size(Box::new(fetcher), 512);

        let info = read_central_directory(&mut io).unwrap();
        assert_eq!(info.members.len(), 2000);
        assert_eq!(info.members[0].name, "file_00000.bin");
        assert_eq!(info.members[0].header_offset, 0);
        assert_eq!(info.members[1999].name, "file_01999.bin");
        assert_eq!(info.members[1999].header_offset, 1999 * 40);
        assert_eq!(info.central_directory_start, cd_offset as u64);
    }
}
