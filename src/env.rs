use crate::errors::PackErr;
use anyhow::{Error, Result};
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// When this variable is set (non-empty), the library is not injected into
/// dependency lists; used while developing against unreleased builds.
pub const LOCAL_DEV_MODE_VAR: &str = "RAY_RUNTIME_ENV_LOCAL_DEV_MODE";

/// Identity stamped into descriptors that carry dependency fields, so
/// workers resolve a build matching the driver.
const LIB_COMMIT: &str = env!("CARGO_PKG_VERSION");

fn bad<S: Into<String>>(msg: S) -> Error {
    PackErr::BadDescriptor(msg.into()).into()
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_owned))
        .collect()
}

/// Manifest paths are taken relative to the working directory when one is
/// declared.
fn resolve_manifest(file: &Path, working_dir: Option<&Path>) -> PathBuf {
    match working_dir {
        Some(dir) if file.is_relative() => dir.join(file),
        _ => file.to_path_buf(),
    }
}

/// Validated runtime environment descriptor.
///
/// The canonical form always carries the `working_dir`, `py_modules`,
/// `conda`, `pip` and `env_vars` keys (null when unset), keeps the
/// remaining recognized keys only when given, and collapses to `{}` when
/// every value is null. Worker caches test for the empty environment
/// without parsing, so this shape is part of the wire contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeEnv {
    dict: Map<String, Value>,
}

impl RuntimeEnv {
    /// Validates a raw descriptor mapping.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let raw = match raw {
            Value::Object(map) => map,
            _ => return Err(bad("runtime env must be a mapping")),
        };
        let mut dict = Map::new();

        let working_dir = match raw.get("working_dir") {
            Some(Value::String(dir)) => {
                dict.insert("working_dir".to_owned(), Value::String(dir.clone()));
                Some(PathBuf::from(dir))
            }
            Some(_) => return Err(bad("`working_dir` must be a string")),
            None => {
                dict.insert("working_dir".to_owned(), Value::Null);
                None
            }
        };

        match raw.get("py_modules") {
            Some(modules) => {
                string_list(modules).ok_or_else(|| bad("`py_modules` must be a list of strings"))?;
                dict.insert("py_modules".to_owned(), modules.clone());
            }
            None => {
                dict.insert("py_modules".to_owned(), Value::Null);
            }
        }

        dict.insert("conda".to_owned(), Value::Null);
        if let Some(conda) = raw.get("conda") {
            if cfg!(windows) {
                return Err(PackErr::Unsupported("the `conda` field").into());
            }
            match conda {
                Value::String(spec) => {
                    let file = Path::new(spec);
                    match file.extension().and_then(|e| e.to_str()) {
                        Some("yaml") | Some("yml") => {
                            let file = resolve_manifest(file, working_dir.as_deref());
                            let text = fs::read_to_string(&file).map_err(|_| {
                                bad(format!("can't find conda YAML file {}", file.display()))
                            })?;
                            let manifest: serde_yaml::Value =
                                serde_yaml::from_str(&text).map_err(|err| {
                                    bad(format!(
                                        "invalid conda file {}: {}",
                                        file.display(),
                                        err
                                    ))
                                })?;
                            let manifest = serde_json::to_value(manifest).map_err(|err| {
                                bad(format!("invalid conda file {}: {}", file.display(), err))
                            })?;
                            dict.insert("conda".to_owned(), manifest);
                        }
                        _ => {
                            info!("using preinstalled conda environment: {}", spec);
                            dict.insert("conda".to_owned(), Value::String(spec.clone()));
                        }
                    }
                }
                Value::Object(_) => {
                    dict.insert("conda".to_owned(), conda.clone());
                }
                Value::Null => (),
                _ => return Err(bad("`conda` must be a string or a mapping")),
            }
        }

        dict.insert("pip".to_owned(), Value::Null);
        if let Some(pip) = raw.get("pip") {
            if cfg!(windows) {
                return Err(PackErr::Unsupported("the `pip` field").into());
            }
            if matches!(raw.get("conda"), Some(conda) if !conda.is_null()) {
                return Err(bad(
                    "the `pip` and `conda` fields cannot both be specified; to use pip \
                     with conda, list the pip dependencies inside the conda manifest",
                ));
            }
            match pip {
                Value::String(spec) => {
                    let file = resolve_manifest(Path::new(spec), working_dir.as_deref());
                    let text = fs::read_to_string(&file)
                        .map_err(|_| bad(format!("{} is not a valid file", file.display())))?;
                    dict.insert("pip".to_owned(), Value::String(text));
                }
                Value::Array(_) => {
                    let deps = string_list(pip)
                        .ok_or_else(|| bad("`pip` must be a string or a list of strings"))?;
                    dict.insert("pip".to_owned(), Value::String(deps.join("\n") + "\n"));
                }
                _ => return Err(bad("`pip` must be a string or a list of strings")),
            }
        }

        if let Some(uris) = raw.get("uris") {
            string_list(uris).ok_or_else(|| bad("`uris` must be a list of strings"))?;
            dict.insert("uris".to_owned(), uris.clone());
        }

        if let Some(container) = raw.get("container") {
            if !container.is_object() {
                return Err(bad("`container` must be a mapping"));
            }
            dict.insert("container".to_owned(), container.clone());
        }

        dict.insert("env_vars".to_owned(), Value::Null);
        if let Some(env_vars) = raw.get("env_vars") {
            match env_vars {
                Value::Object(vars) if vars.values().all(Value::is_string) => {
                    dict.insert("env_vars".to_owned(), env_vars.clone());
                }
                _ => return Err(bad("`env_vars` must be a map of strings to strings")),
            }
        }

        if let Some(excludes) = raw.get("excludes") {
            string_list(excludes).ok_or_else(|| bad("`excludes` must be a list of strings"))?;
            dict.insert("excludes".to_owned(), excludes.clone());
        }

        if let Some(uri) = raw.get("_packaging_uri") {
            let uri = uri
                .as_str()
                .ok_or_else(|| bad("`_packaging_uri` must be a string"))?;
            dict.insert("_packaging_uri".to_owned(), Value::String(uri.to_owned()));
            // Workers learn the packaging source through their environment.
            if let Some(slot) = dict.get_mut("env_vars") {
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Some(vars) = slot.as_object_mut() {
                    vars.insert(
                        "RAY_PACKAGING_URI".to_owned(),
                        Value::String(uri.to_owned()),
                    );
                }
            }
        }

        if let Some(release) = raw.get("_ray_release") {
            dict.insert("_ray_release".to_owned(), release.clone());
        }

        let has_deps = ["pip", "conda"]
            .iter()
            .any(|key| dict.get(*key).map_or(false, |v| !v.is_null()));
        match raw.get("_ray_commit") {
            Some(commit) => {
                dict.insert("_ray_commit".to_owned(), commit.clone());
            }
            None if has_deps => {
                dict.insert("_ray_commit".to_owned(), Value::String(LIB_COMMIT.to_owned()));
            }
            None => (),
        }

        let local_dev = env::var(LOCAL_DEV_MODE_VAR).map_or(false, |v| !v.is_empty());
        if local_dev {
            dict.insert("_inject_current_ray".to_owned(), Value::Bool(true));
        } else if let Some(inject) = raw.get("_inject_current_ray") {
            dict.insert("_inject_current_ray".to_owned(), inject.clone());
        }

        if dict.values().all(Value::is_null) {
            dict.clear();
        }
        Ok(RuntimeEnv { dict })
    }

    /// The validated record as a plain mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.dict
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.dict.get("working_dir").and_then(Value::as_str)
    }

    pub fn py_modules(&self) -> Vec<PathBuf> {
        self.dict
            .get("py_modules")
            .and_then(string_list)
            .map(|mods| mods.into_iter().map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    pub fn excludes(&self) -> Vec<String> {
        self.dict
            .get("excludes")
            .and_then(string_list)
            .unwrap_or_default()
    }

    /// The pinned URI list, if packaging has already happened.
    pub fn uris(&self) -> Option<Vec<String>> {
        self.dict.get("uris").and_then(string_list)
    }

    pub fn set_uris(&mut self, uris: Vec<String>) {
        self.dict.insert(
            "uris".to_owned(),
            Value::Array(uris.into_iter().map(Value::String).collect()),
        );
    }

    /// Canonical sorted-key serialization.
    ///
    /// Worker caches key on this string, so it must not depend on the
    /// order the caller assembled the raw mapping in.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.dict)?)
    }
}
