//! Headless entry points: prime a directory's cache, keep watching it, or
//! inspect one file. The viewer consumes the same service surface; these
//! exist so the cache can be driven and observed from a terminal.

use std::path::Path;
use std::sync::mpsc::Receiver;

use crate::debug::dbg_log;
use crate::service::{CacheConfig, CacheError, CacheEvent, CacheService};

pub fn prime(config: CacheConfig, path: &Path) {
    let (service, _events) = CacheService::start(config);
    match service.set_root(path) {
        Ok(()) => {}
        Err(CacheError::NoImages) => {
            println!("{}: no images", path.display());
            return;
        }
        Err(e) => {
            eprintln!("scanview prime: {}", e);
            return;
        }
    }

    match service.initial_thumbnails() {
        Some(Ok(map)) => println!("{} thumbnails ready", map.len()),
        Some(Err(e)) => {
            eprintln!("scanview prime: {}", e);
            return;
        }
        None => return,
    }

    if let Err(e) = service.flush_barrier().wait() {
        eprintln!("scanview prime: persist failed: {}", e);
        return;
    }
    let status = service.status();
    println!(
        "cached: {} of {} files ({} flushes)",
        status.cached, status.files, status.flushes
    );
}

pub fn watch(config: CacheConfig, path: &Path) {
    let (service, events) = CacheService::start(config);
    match service.set_root(path) {
        Ok(()) => {}
        Err(CacheError::NoImages) => println!("{}: no images yet, watching", path.display()),
        Err(e) => {
            eprintln!("scanview watch: {}", e);
            return;
        }
    }
    if let Some(Ok(map)) = service.initial_thumbnails() {
        println!("{} thumbnails ready, watching {}", map.len(), path.display());
    }

    print_events(&events);
}

fn print_events(events: &Receiver<CacheEvent>) {
    for event in events {
        match event {
            CacheEvent::ThumbnailAdded { filename, preview } => {
                println!("+ {} ({} preview bytes)", filename, preview.len());
            }
            CacheEvent::ThumbnailRemoved { filename } => {
                println!("- {}", filename);
            }
            CacheEvent::GenerationStatus(busy) => {
                dbg_log!("generation {}", if busy { "started" } else { "idle" });
            }
            CacheEvent::FileListChanged { current, total } => {
                dbg_log!(
                    "file list: {} files, current {}",
                    total,
                    current.as_deref().unwrap_or("-")
                );
            }
        }
    }
}

/// Walk the directory with next_file until `target` comes up, then print
/// what the viewer would receive for it.
pub fn show(config: CacheConfig, path: &Path, target: &str) {
    let (service, _events) = CacheService::start(config);
    if let Err(e) = service.set_root(path) {
        eprintln!("scanview show: {}", e);
        return;
    }
    let _ = service.initial_thumbnails();

    loop {
        match service.next_file() {
            Ok(payload) if payload.filename == target => {
                println!(
                    "{}: {} bytes, {} annotations",
                    payload.filename,
                    payload.bytes.len(),
                    payload.annotations.len()
                );
                match service.thumbnail(target) {
                    Ok(Some(preview)) => println!("preview: {} bytes", preview.len()),
                    Ok(None) => println!("preview: not cached"),
                    Err(e) => eprintln!("preview: {}", e),
                }
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                eprintln!("scanview show: {}: {}", target, e);
                return;
            }
        }
    }
}
