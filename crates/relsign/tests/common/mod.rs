#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use relsign::{Archive, Profiles, SelectionRules};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

pub const MTIME: u64 = 1_700_000_000;

pub fn rules() -> SelectionRules {
    SelectionRules::standard().expect("standard rules")
}

pub fn profiles() -> Profiles {
    Profiles::default()
}

pub fn archive(path: &Path) -> Archive {
    Archive::new(path, &rules()).expect("known archive kind")
}

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write file");
}

/// Builds a zip with deflated entries, a fixed timestamp and an archive comment.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create zip");
    let mut writer = ZipWriter::new(file);
    writer.set_comment("release build");

    let modified = DateTime::from_date_and_time(2024, 2, 6, 12, 30, 10).expect("date");
    for (name, data) in entries {
        let method = if name.ends_with(".txt") {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(modified)
            .unix_permissions(0o755);
        writer.start_file(*name, options).expect("start file");
        writer.write_all(data).expect("write entry");
    }

    writer.finish().expect("finish zip");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipRecord {
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub modified: Option<DateTime>,
    pub mode: Option<u32>,
}

pub fn read_zip(path: &Path) -> (BTreeMap<String, ZipRecord>, Vec<u8>) {
    let mut archive = ZipArchive::new(File::open(path).expect("open zip")).expect("read zip");
    let mut records = BTreeMap::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).expect("entry");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("entry data");
        records.insert(
            entry.name().to_string(),
            ZipRecord {
                data,
                compression: entry.compression(),
                modified: entry.last_modified(),
                mode: entry.unix_mode(),
            },
        );
    }

    let comment = archive.comment().to_vec();
    (records, comment)
}

pub enum TarFixture<'a> {
    File(&'a str, &'a [u8], u32),
    Dir(&'a str),
    /// PAX extended header applying to the entry that follows it.
    Pax(&'a [(&'a str, &'a str)]),
}

/// Encodes `"<len> <key>=<value>\n"` records; `len` counts its own digits.
pub fn pax_records(records: &[(&str, &str)]) -> Vec<u8> {
    let mut data = Vec::new();
    for (key, value) in records {
        let body = format!(" {key}={value}\n");
        let mut len = body.len() + 1;
        while len.to_string().len() + body.len() != len {
            len += 1;
        }
        data.extend_from_slice(format!("{len}{body}").as_bytes());
    }
    data
}

/// Builds a gzip-compressed GNU tar. Long names become GNU long-name records.
pub fn write_tar_gz(path: &Path, entries: &[TarFixture<'_>]) {
    let file = File::create(path).expect("create tar.gz");
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(MTIME);
        header.set_uid(1000);
        header.set_gid(1000);
        match entry {
            TarFixture::File(name, data, mode) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                builder
                    .append_data(&mut header, name, *data)
                    .expect("append file");
            }
            TarFixture::Dir(name) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder
                    .append_data(&mut header, name, std::io::empty())
                    .expect("append dir");
            }
            TarFixture::Pax(records) => {
                let data = pax_records(records);
                header.set_entry_type(tar::EntryType::XHeader);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                builder
                    .append_data(&mut header, "PaxHeader/entry", data.as_slice())
                    .expect("append pax header");
            }
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .expect("finish tar.gz");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarRecord {
    pub name: String,
    pub kind: tar::EntryType,
    pub data: Vec<u8>,
    pub mode: u32,
    pub mtime: u64,
}

pub fn read_tar_gz(path: &Path) -> Vec<TarRecord> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).expect("open tar.gz")));
    let mut records = Vec::new();

    for entry in archive.entries().expect("entries") {
        let mut entry = entry.expect("entry");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("entry data");
        let header = entry.header();
        records.push(TarRecord {
            name: entry.path().expect("path").to_string_lossy().into_owned(),
            kind: header.entry_type(),
            data,
            mode: header.mode().expect("mode"),
            mtime: header.mtime().expect("mtime"),
        });
    }

    records
}

/// Every record including PAX and GNU extension headers, names as stored.
pub fn read_tar_gz_raw(path: &Path) -> Vec<TarRecord> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).expect("open tar.gz")));
    let mut records = Vec::new();

    for entry in archive.entries().expect("entries").raw(true) {
        let mut entry = entry.expect("entry");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("entry data");
        let header = entry.header();
        records.push(TarRecord {
            name: String::from_utf8_lossy(&header.path_bytes()).into_owned(),
            kind: header.entry_type(),
            data,
            mode: header.mode().expect("mode"),
            mtime: header.mtime().expect("mtime"),
        });
    }

    records
}

/// Names of every file in `dir` whose name ends in `.partial`.
pub fn partial_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".partial"))
                .collect()
        })
        .unwrap_or_default()
}
