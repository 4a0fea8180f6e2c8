//! Container traversal: rewrites every class entry of a zip-family archive,
//! recursing into nested archives, and writes a new archive with the same
//! entry order.

use std::io::{Cursor, Read, Seek, Write};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::config::ConversionConfig;
use crate::error::ArchiveError;
use crate::filter::MemberFilter;
use crate::report::Report;
use crate::stub::{self, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Class,
    Archive,
    Resource,
}

pub fn is_class_file(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".class")
}

pub fn is_archive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".jar") || lower.ends_with(".zip")
}

pub fn classify(name: &str) -> EntryKind {
    if is_class_file(name) {
        EntryKind::Class
    } else if is_archive(name) {
        EntryKind::Archive
    } else {
        EntryKind::Resource
    }
}

// Upper bound on preallocation from the declared entry size, which the archive may misstate.
const MAX_SIZE_HINT: u64 = 1 << 20;

/// An entry ready to be written. The checksum is computed from `bytes`, never copied from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntryUnit {
    pub name: String,
    pub kind: EntryKind,
    pub bytes: Vec<u8>,
    pub crc32: u32,
    pub method: CompressionMethod,
}

impl ArchiveEntryUnit {
    pub fn new(name: String, bytes: Vec<u8>, method: CompressionMethod) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        Self {
            kind: classify(&name),
            name,
            crc32: hasher.finalize(),
            bytes,
            method,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Traversal {
    pub filter: MemberFilter,
    pub method: CompressionMethod,
    pub include_resources: bool,
    pub max_depth: usize,
}

impl Traversal {
    pub fn new(cfg: &ConversionConfig) -> Self {
        Self {
            filter: cfg.member_filter(),
            method: cfg.compression(),
            include_resources: cfg.include_non_class_resources,
            max_depth: cfg.max_nesting_depth,
        }
    }

    /// Rewrites `input` into `output` entry by entry, in input order. `depth` is 0 for a
    /// top-level archive. A bad class entry is reported and skipped; a failure of the archive
    /// stream itself, or of any nested archive, aborts this archive.
    pub fn transform<R, W>(
        &self,
        input: &mut ZipArchive<R>,
        output: &mut ZipWriter<W>,
        label: &str,
        depth: usize,
        report: &mut Report,
    ) -> Result<(), ArchiveError>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        report.stats.archives += 1;
        for i in 0..input.len() {
            let (name, is_dir, bytes) = {
                let mut entry = input
                    .by_index(i)
                    .map_err(|e| ArchiveError::Entry(e, format!("{label}#{i}")))?;
                let name = entry.name().to_string();
                let mut bytes = Vec::with_capacity(entry.size().min(MAX_SIZE_HINT) as usize);
                if !entry.is_dir() {
                    entry
                        .read_to_end(&mut bytes)
                        .map_err(|e| ArchiveError::Read(e, format!("{label}!{name}")))?;
                }
                (name, entry.is_dir(), bytes)
            };

            if is_dir {
                if self.include_resources {
                    output
                        .add_directory(name.as_str(), entry_options(self.method))
                        .map_err(|e| ArchiveError::StartEntry(e, name.clone()))?;
                }
                continue;
            }

            match classify(&name) {
                EntryKind::Class => {
                    debug!(entry = %name, "process entry");
                    match stub::process(bytes, &self.filter) {
                        Ok(outcome) => {
                            report.stats.record(&outcome);
                            match outcome {
                                Outcome::Stub(bytes) | Outcome::Unchanged(bytes) => {
                                    self.write_entry(output, ArchiveEntryUnit::new(name, bytes, self.method))?;
                                }
                                Outcome::Ignore(reason) => {
                                    debug!(entry = %name, ?reason, "skip entry");
                                }
                            }
                        }
                        Err(e) => report.warn(format!("{label}!{name}: {e}")),
                    }
                }
                EntryKind::Archive => {
                    debug!(entry = %name, "process entry");
                    let nested = self.transform_nested(bytes, &name, depth + 1, report)?;
                    self.write_entry(output, ArchiveEntryUnit::new(name, nested, self.method))?;
                }
                EntryKind::Resource if self.include_resources => {
                    report.stats.resources += 1;
                    self.write_entry(output, ArchiveEntryUnit::new(name, bytes, self.method))?;
                }
                EntryKind::Resource => {
                    debug!(entry = %name, "skip entry");
                    report.stats.skipped += 1;
                }
            }
        }
        Ok(())
    }

    pub fn transform_nested(
        &self,
        bytes: Vec<u8>,
        name: &str,
        depth: usize,
        report: &mut Report,
    ) -> Result<Vec<u8>, ArchiveError> {
        if depth > self.max_depth {
            return Err(ArchiveError::NestingTooDeep(name.to_string(), self.max_depth));
        }
        let mut input = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ArchiveError::Open(e, name.to_string()))?;
        let mut output = ZipWriter::new(Cursor::new(Vec::new()));
        self.transform(&mut input, &mut output, name, depth, report)?;
        let cursor = output
            .finish()
            .map_err(|e| ArchiveError::Finish(e, name.to_string()))?;
        Ok(cursor.into_inner())
    }

    fn write_entry<W: Write + Seek>(
        &self,
        output: &mut ZipWriter<W>,
        unit: ArchiveEntryUnit,
    ) -> Result<(), ArchiveError> {
        debug!(
            entry = %unit.name,
            kind = ?unit.kind,
            size = unit.bytes.len(),
            crc32 = format_args!("{:08x}", unit.crc32),
            "dump entry"
        );
        output
            .start_file(unit.name.as_str(), entry_options(unit.method))
            .map_err(|e| ArchiveError::StartEntry(e, unit.name.clone()))?;
        output
            .write_all(&unit.bytes)
            .map_err(|e| ArchiveError::Write(e, unit.name))?;
        Ok(())
    }
}

/// Fixed 1980-01-01 timestamps so repeated runs produce identical archives.
fn entry_options(method: CompressionMethod) -> FileOptions {
    FileOptions::default()
        .compression_method(method)
        .last_modified_time(DateTime::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::RETURN;
    use crate::classfile::{AccessFlags, ClassUnit, MethodBody, parse_class};
    use crate::filter::VisibilityMask;
    use crate::stub::has_stub_marker;

    fn class_bytes(name: &str) -> Vec<u8> {
        let mut unit = ClassUnit::new(name, Some("java/lang/Object"), AccessFlags::PUBLIC).unwrap();
        unit.add_method(AccessFlags::PUBLIC, "run", "()V", Some((0, 1, vec![RETURN], &[])))
            .unwrap();
        unit.to_bytes()
    }

    fn anonymous_bytes(name: &str) -> Vec<u8> {
        let mut unit = ClassUnit::new(name, Some("java/lang/Object"), AccessFlags::empty()).unwrap();
        unit.add_inner_class(name, None, None, AccessFlags::empty())
            .unwrap();
        unit.to_bytes()
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content).unwrap();
            }
        }
        zip.finish().unwrap().into_inner()
    }

    fn read_zip(bytes: &[u8]) -> Vec<(String, Vec<u8>, u32, CompressionMethod)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut content = Vec::new();
                entry.read_to_end(&mut content).unwrap();
                (
                    entry.name().to_string(),
                    content,
                    entry.crc32(),
                    entry.compression(),
                )
            })
            .collect()
    }

    fn traversal(include_resources: bool) -> Traversal {
        Traversal {
            filter: MemberFilter::new(VisibilityMask::all(), false),
            method: CompressionMethod::Stored,
            include_resources,
            max_depth: 4,
        }
    }

    fn crc(bytes: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(bytes);
        hasher.finalize()
    }

    #[test]
    fn classify_by_suffix() {
        assert_eq!(classify("a/B.class"), EntryKind::Class);
        assert_eq!(classify("lib/b.JAR"), EntryKind::Archive);
        assert_eq!(classify("lib/c.zip"), EntryKind::Archive);
        assert_eq!(classify("META-INF/MANIFEST.MF"), EntryKind::Resource);
    }

    #[test]
    fn entry_unit_checksum_is_fresh() {
        let unit = ArchiveEntryUnit::new("x.txt".into(), b"hello".to_vec(), CompressionMethod::Stored);
        assert_eq!(unit.crc32, 0x3610a686);
        assert_eq!(unit.kind, EntryKind::Resource);
    }

    #[test]
    fn nested_archives_are_stubbed_recursively() {
        let inner = zip_bytes(&[("Y.class", &class_bytes("Y"))]);
        let outer = zip_bytes(&[("X.class", &class_bytes("X")), ("b.jar", &inner)]);

        let mut report = Report::default();
        let out = traversal(true)
            .transform_nested(outer, "a.jar", 0, &mut report)
            .unwrap();

        let entries = read_zip(&out);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "X.class");
        assert_eq!(entries[1].0, "b.jar");
        for (_, content, crc32, method) in &entries {
            assert_eq!(*crc32, crc(content));
            assert_eq!(*method, CompressionMethod::Stored);
        }

        let x = parse_class(&entries[0].1).unwrap();
        assert!(has_stub_marker(&x));
        assert_eq!(x.methods[0].body, MethodBody::Absent);

        let nested = read_zip(&entries[1].1);
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].0, "Y.class");
        assert!(has_stub_marker(&parse_class(&nested[0].1).unwrap()));

        assert_eq!(report.stats.archives, 2);
        assert_eq!(report.stats.stubbed, 2);
    }

    #[test]
    fn surviving_entries_keep_their_order() {
        let input = zip_bytes(&[
            ("p/", b""),
            ("p/A.class", &class_bytes("p/A")),
            ("p/A$1.class", &anonymous_bytes("p/A$1")),
            ("p/B.class", &class_bytes("p/B")),
            ("p/notes.txt", b"notes"),
            ("p/C.class", &class_bytes("p/C")),
        ]);

        let mut report = Report::default();
        let out = traversal(true)
            .transform_nested(input, "in.jar", 0, &mut report)
            .unwrap();
        let names: Vec<String> = read_zip(&out).into_iter().map(|e| e.0).collect();
        assert_eq!(
            names,
            vec!["p/", "p/A.class", "p/B.class", "p/notes.txt", "p/C.class"]
        );
        assert_eq!(report.stats.ignored, 1);
        assert_eq!(report.stats.resources, 1);
    }

    #[test]
    fn resources_are_skipped_on_request() {
        let input = zip_bytes(&[("p/", b""), ("a.txt", b"a"), ("A.class", &class_bytes("A"))]);
        let mut report = Report::default();
        let out = traversal(false)
            .transform_nested(input, "in.jar", 0, &mut report)
            .unwrap();
        let names: Vec<String> = read_zip(&out).into_iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["A.class"]);
        assert_eq!(report.stats.skipped, 1);
    }

    #[test]
    fn malformed_class_entries_are_skipped_with_a_warning() {
        let input = zip_bytes(&[("Bad.class", b"not a class"), ("A.class", &class_bytes("A"))]);
        let mut report = Report::default();
        let out = traversal(true)
            .transform_nested(input, "in.jar", 0, &mut report)
            .unwrap();
        let names: Vec<String> = read_zip(&out).into_iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["A.class"]);
        assert_eq!(report.stats.errors, 1);
        assert!(report.warnings[0].contains("Bad.class"));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let mut bytes = zip_bytes(&[("A.class", &class_bytes("A"))]);
        for _ in 0..3 {
            bytes = zip_bytes(&[("inner.jar", &bytes)]);
        }
        let mut shallow = traversal(true);
        shallow.max_depth = 2;
        let err = shallow
            .transform_nested(bytes.clone(), "top.jar", 0, &mut Report::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NestingTooDeep(_, 2)));

        assert!(traversal(true)
            .transform_nested(bytes, "top.jar", 0, &mut Report::default())
            .is_ok());
    }

    #[test]
    fn broken_nested_archive_aborts_the_container() {
        let outer = zip_bytes(&[("A.class", &class_bytes("A")), ("b.jar", b"garbage")]);
        let err = traversal(true)
            .transform_nested(outer, "a.jar", 0, &mut Report::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Open(_, name) if name == "b.jar"));
    }

    /// A single-entry archive written by hand. `method` goes into the headers as is, and
    /// `claimed_size` replaces the uncompressed size with a zip64 extra field.
    fn crafted_zip(name: &str, content: &[u8], method: u16, claimed_size: Option<u64>) -> Vec<u8> {
        let checksum = crc(content);
        let size = content.len() as u32;
        let mut out = Vec::new();

        out.extend_from_slice(&0x04034b50u32.to_le_bytes());
        for field in [45u16, 0, method, 0, 0x21] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(content);

        let mut extra = Vec::new();
        let mut uncompressed = size;
        if let Some(claimed) = claimed_size {
            extra.extend_from_slice(&0x0001u16.to_le_bytes());
            extra.extend_from_slice(&8u16.to_le_bytes());
            extra.extend_from_slice(&claimed.to_le_bytes());
            uncompressed = u32::MAX;
        }

        let directory_start = out.len() as u32;
        out.extend_from_slice(&0x02014b50u32.to_le_bytes());
        for field in [45u16, 45, 0, method, 0, 0x21] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        for field in [name.len() as u16, extra.len() as u16, 0, 0, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&extra);
        let directory_size = out.len() as u32 - directory_start;

        out.extend_from_slice(&0x06054b50u32.to_le_bytes());
        for field in [0u16, 0, 1, 1] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&directory_size.to_le_bytes());
        out.extend_from_slice(&directory_start.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn misstated_entry_size_does_not_drive_allocation() {
        let input = crafted_zip("a.txt", b"hi", 0, Some(1 << 62));
        let mut report = Report::default();
        let out = traversal(true)
            .transform_nested(input, "huge.jar", 0, &mut report)
            .unwrap();
        let entries = read_zip(&out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "a.txt");
        assert_eq!(entries[0].1, b"hi");
        assert_eq!(report.stats.resources, 1);
    }

    #[test]
    fn unsupported_compression_method_is_an_archive_error() {
        let input = crafted_zip("a.txt", b"hi", 12, None);
        let err = traversal(true)
            .transform_nested(input, "bzip.jar", 0, &mut Report::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Entry(..) | ArchiveError::Read(..)));
    }

    #[test]
    fn truncated_central_directory_is_an_archive_error() {
        let mut input = zip_bytes(&[("A.class", &class_bytes("A")), ("r.txt", b"r")]);
        input.truncate(input.len() - 30);
        let err = traversal(true)
            .transform_nested(input, "cut.jar", 0, &mut Report::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Open(_, name) if name == "cut.jar"));
    }

    #[test]
    fn checksum_mismatch_is_an_archive_error() {
        let mut input = crafted_zip("r.txt", b"hello world", 0, None);
        let at = input
            .windows(11)
            .position(|w| w == b"hello world")
            .unwrap();
        input[at] = b'j';
        let err = traversal(true)
            .transform_nested(input, "crc.jar", 0, &mut Report::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Read(_, name) if name == "crc.jar!r.txt"));
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        let input = zip_bytes(&[("X.class", &class_bytes("X")), ("r.txt", b"r")]);
        let t = traversal(true);
        let first = t
            .transform_nested(input, "a.jar", 0, &mut Report::default())
            .unwrap();
        let second = t
            .transform_nested(first.clone(), "a.jar", 0, &mut Report::default())
            .unwrap();
        assert_eq!(first, second);
    }
}
