use crate::error::MixError;
use rand::Rng;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions accepted as background music, compared case-insensitively.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a"];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Audio files directly inside `dir`, sorted by path. A missing directory is
/// an empty catalog.
pub fn list_tracks(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut tracks: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| is_audio_file(path))
        .collect();
    tracks.sort();
    tracks
}

pub fn choose_track<R: Rng + ?Sized>(tracks: &[PathBuf], rng: &mut R) -> Option<PathBuf> {
    if tracks.is_empty() {
        return None;
    }
    Some(tracks[rng.gen_range(0..tracks.len())].clone())
}

/// Picks one background track from `dir` uniformly at random.
pub fn select_track<R: Rng + ?Sized>(dir: &Path, rng: &mut R) -> Result<PathBuf, MixError> {
    choose_track(&list_tracks(dir), rng).ok_or_else(|| MixError::NoBackgroundTrackFound {
        dir: dir.to_path_buf(),
    })
}
