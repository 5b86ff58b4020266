// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! JSON file helpers.
//!
//! The helpers are blocking. They back the durable lease store, which is called from the single
//! dispatch task and must complete before the next request is handled.

use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};

/// Reads a JSON file, returning `None` if the file does not exist.
pub fn read_json<P, T>(path: P) -> std::io::Result<Option<T>>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let buf = match fs::read(path.as_ref()) {
        Ok(buf) => buf,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(std::io::Error::other)
}

/// Serializes `content` to JSON and atomically replaces the file at `path`.
///
/// The document is written and synced to a temporary sibling first and then renamed over the
/// target, so readers observe either the old or the new content, never a partial write.
pub fn write_json_atomic(path: impl AsRef<Path>, content: &impl Serialize) -> std::io::Result<()> {
    let path = path.as_ref();
    let buf = serde_json::to_vec_pretty(content).map_err(std::io::Error::other)?;
    let tmp = tmp_sibling(path);

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Returns a temporary path in the system's temp directory, prefixed with the current thread name.
pub fn get_tmp_path<S: AsRef<str>>(name: S) -> PathBuf {
    let path = std::env::temp_dir();
    let current_thread = std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .replace("::", "_");
    path.join(format!("{}_{}", current_thread, name.as_ref()))
}
