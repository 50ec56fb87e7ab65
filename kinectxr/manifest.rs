/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The runtime manifest the OpenXR loader consumes to discover us.

use crate::instance::RUNTIME_NAME;

use serde::{Deserialize, Serialize};

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FILE_FORMAT_VERSION: &str = "1.0.0";

/// Overrides discovery when set; checked before the default locations.
pub const RUNTIME_JSON_ENV: &str = "XR_RUNTIME_JSON";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RuntimeManifest {
    pub file_format_version: String,
    pub runtime: RuntimeEntry,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RuntimeEntry {
    pub name: String,
    pub library_path: PathBuf,
}

impl RuntimeManifest {
    pub fn new(library_path: impl Into<PathBuf>) -> RuntimeManifest {
        RuntimeManifest {
            file_format_version: FILE_FORMAT_VERSION.to_owned(),
            runtime: RuntimeEntry {
                name: RUNTIME_NAME.to_owned(),
                library_path: library_path.into(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(path, json + "\n")
    }
}

/// Where the loader looks for an active runtime manifest, in priority
/// order.
pub fn discovery_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = env::var_os(RUNTIME_JSON_ENV) {
        paths.push(PathBuf::from(path));
    }
    if let Some(home) = env::var_os("HOME") {
        paths.push(
            Path::new(&home).join(".config/openxr/1/active_runtime.json"),
        );
    }
    paths.push(PathBuf::from(
        "/usr/local/share/openxr/1/active_runtime.json",
    ));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_uses_the_loader_schema() {
        let manifest = RuntimeManifest::new("/usr/local/lib/libkinectxr.dylib");
        let json = manifest.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["file_format_version"], "1.0.0");
        assert_eq!(value["runtime"]["name"], "Kinect XR Runtime");
        assert_eq!(
            value["runtime"]["library_path"],
            "/usr/local/lib/libkinectxr.dylib"
        );
    }

    #[test]
    fn manifest_round_trips() {
        let manifest = RuntimeManifest::new("libkinectxr.dylib");
        let parsed: RuntimeManifest =
            serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn discovery_ends_with_the_system_path() {
        let paths = discovery_paths();
        assert_eq!(
            paths.last().unwrap(),
            Path::new("/usr/local/share/openxr/1/active_runtime.json")
        );
    }
}
