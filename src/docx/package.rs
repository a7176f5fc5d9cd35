use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// A docx container loaded into memory, entry order preserved.
///
/// Entry metadata (compression, timestamp, unix mode) is kept so a rewrite
/// with no replacements reproduces an archive Word accepts unchanged.
pub struct DocPackage {
    pub entries: Vec<PackageEntry>,
}

pub struct PackageEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl PackageEntry {
    pub fn is_xml(&self) -> bool {
        !self.is_dir && self.name.to_lowercase().ends_with(".xml")
    }
}

impl DocPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open docx: {}", path.display()))?;
        let mut zip = ZipArchive::new(f).context("read zip")?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data).context("read zip entry")?;
            entries.push(PackageEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entry(&self, name: &str) -> Option<&PackageEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn xml_entries(&self) -> impl Iterator<Item = &PackageEntry> {
        self.entries.iter().filter(|e| e.is_xml())
    }

    /// Write the archive to `path`, substituting entry bodies from
    /// `replacements` (keyed by entry name) where present.
    pub fn write(
        &self,
        path: &Path,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<()> {
        let f = File::create(path)
            .with_context(|| format!("create output docx: {}", path.display()))?;
        let mut zout = ZipWriter::new(f);
        for ent in &self.entries {
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
                continue;
            }
            let data = replacements.get(&ent.name).map(|d| d.as_slice());
            zout.start_file(&ent.name, opts)
                .with_context(|| format!("start zip file: {}", ent.name))?;
            zout.write_all(data.unwrap_or(&ent.data))
                .with_context(|| format!("write zip file: {}", ent.name))?;
        }
        zout.finish().context("finish zip")?;
        Ok(())
    }
}
