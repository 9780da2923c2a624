use std::fs;
use std::path::{Path, PathBuf};

use lzz_core::archive::model::Archive;
use lzz_core::context::Context;
use lzz_core::error::{LzzError, Result};
use lzz_core::scan::{ScanOptions, scan_file};
use lzz_core::write::{WriteMode, write_file_level};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::presentation::cli::Mode;

impl From<Mode> for WriteMode {
    fn from(m: Mode) -> WriteMode {
        match m {
            Mode::Fast => WriteMode::Fast,
            Mode::Hc => WriteMode::Hc,
            Mode::Flat => WriteMode::Flat,
        }
    }
}

/// At most 6 ASCII bytes, dot included, as the wire format requires.
fn extension_of(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let mut s = String::from(".");
            s.extend(ext.chars().filter(char::is_ascii).take(5));
            s
        }
        None => ".".to_string(),
    }
}

fn mime_of(extension: &str) -> &'static str {
    match extension {
        ".txt" | ".md" => "text/plain",
        ".rs" | ".c" | ".h" | ".py" | ".sh" => "text/plain",
        ".html" | ".htm" => "text/html",
        ".css" => "text/css",
        ".js" => "text/javascript",
        ".json" => "application/json",
        ".xml" => "text/xml",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".svg" => "image/svg+xml",
        ".pdf" => "application/pdf",
        ".wav" => "audio/wav",
        ".ogg" => "audio/ogg",
        ".mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

fn rel_display(path: &Path, roots: &[PathBuf]) -> String {
    for r in roots {
        if path == r {
            // A root named on the command line enters under its own name.
            return path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
        }
        if let Ok(p) = path.strip_prefix(r) {
            return p.to_string_lossy().to_string();
        }
    }
    path.to_string_lossy().to_string()
}

pub fn handle_pack(out: PathBuf, inputs: Vec<PathBuf>, mode: Mode, level: i32) -> Result<()> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut dirs: Vec<PathBuf> = Vec::new();
    for root in &inputs {
        for e in WalkDir::new(root).follow_links(false) {
            let e = e.map_err(|e| LzzError::Format(e.to_string()))?;
            let p = e.path();
            if e.file_type().is_dir() {
                dirs.push(p.to_path_buf());
            } else if e.file_type().is_file() {
                files.push(p.to_path_buf());
            }
        }
    }
    dirs.sort();
    files.sort();

    let ctx = Arc::new(Context::new());
    let title = out
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut arc = Archive::create(ctx, &title)?;

    for d in &dirs {
        // Roots are implicit; their contents carry the structure.
        if inputs.iter().any(|r| r == d) {
            continue;
        }
        let rel = rel_display(d, &inputs);
        if !rel.is_empty() {
            arc.add_folder(&rel)?;
        }
    }
    for f in &files {
        let rel = rel_display(f, &inputs);
        let ext = extension_of(f);
        let data = fs::read(f)?;
        arc.add_entry(&rel, &ext, mime_of(&ext), None, Some(&data))?;
    }
    arc.finalize()?;

    let written = write_file_level(&arc, mode.into(), level, &out)?;
    println!(
        "{}: {} entries, {} bytes of chunks",
        out.display(),
        arc.len(),
        written
    );
    Ok(())
}

pub fn handle_list(archive: PathBuf) -> Result<()> {
    let ctx = Arc::new(Context::new());
    let arc = scan_file(&ctx, &archive, ScanOptions::minimal());
    for msg in arc.log().iter() {
        eprintln!("{msg}");
    }
    if arc.is_empty() {
        return Err(LzzError::Format(format!(
            "no entries in {}",
            archive.display()
        )));
    }

    let head = arc.entry(0).expect("entry 0 present");
    println!(
        "{}  entries={}  bytes={}",
        head.title().unwrap_or(""),
        head.content_count().unwrap_or(0),
        head.total_size().unwrap_or(0),
    );
    for view in arc.entries().skip(1) {
        println!(
            "{:>4}  uid={:<6} {:<6}  {:<24}  u={}",
            view.marker_id(),
            view.uid().unwrap_or(0),
            view.extension().unwrap_or_default(),
            view.mime().unwrap_or_default(),
            view.total_data_size().unwrap_or(0),
        );
        if let Some(t) = view.title() {
            println!("      {t}");
        }
    }
    Ok(())
}

pub fn handle_unpack(archive: PathBuf, dest: PathBuf) -> Result<()> {
    let ctx = Arc::new(Context::new());
    let arc = scan_file(&ctx, &archive, ScanOptions::full());
    for msg in arc.log().iter() {
        eprintln!("{msg}");
    }
    if arc.is_empty() {
        return Err(LzzError::Format(format!(
            "no entries in {}",
            archive.display()
        )));
    }

    for view in arc.entries().skip(1) {
        let Some(title) = view.title() else { continue };
        if title.is_empty() || title.contains("..") || Path::new(title).is_absolute() {
            eprintln!("skipping entry {} with unsafe path", view.marker_id());
            continue;
        }
        let target = dest.join(title);
        if view.is_nodata() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, view.data().unwrap_or_default())?;
    }
    Ok(())
}
