//! Directory-based persistence for result containers.
//!
//! A container is written to `{path}/{exp_name}_{exp_id}/`: tabular entries
//! as CSV files with a header row, everything else as JSON. Loading inverts
//! the layout, routing `variables_*` and `parameters_*` files back into
//! their nested sections.

use std::fs;
use std::path::{Path, PathBuf};

use crate::datadict::{DataDict, Entry};
use crate::error::SimError;
use crate::frame::DataFrame;
use crate::value::{AttrMap, Value};

/// Column names restored as index levels when reading tabular files.
const INDEX_CANDIDATES: [&str; 4] = ["sample_id", "iteration", "obj_id", "t"];

/// Default root output directory: `MODEL_OUTPUT_DIR` when set, otherwise
/// `<cwd>/model_output`. Resolved once at the call site, never cached
/// globally.
pub fn model_output_dir() -> PathBuf {
    match std::env::var_os("MODEL_OUTPUT_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("model_output"),
    }
}

/// Highest existing numeric suffix among directories named `{name}_{id}`.
fn last_exp_id(name: &str, path: &Path) -> Result<Option<u64>, SimError> {
    let prefix = format!("{name}_");
    let mut max_id = None;
    for dir_entry in fs::read_dir(path)? {
        let file_name = dir_entry?.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(suffix) = file_name.strip_prefix(&prefix) {
            if let Ok(id) = suffix.parse::<u64>() {
                max_id = Some(max_id.map_or(id, |m: u64| m.max(id)));
            }
        }
    }
    Ok(max_id)
}

fn write_json(path: &Path, entry: &Entry, key: &str) -> bool {
    match serde_json::to_string(entry) {
        Ok(text) => match fs::write(path, text) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("Warning: object '{key}' could not be saved. (Reason: {e})");
                let _ = fs::remove_file(path);
                false
            }
        },
        Err(e) => {
            eprintln!("Warning: object '{key}' could not be saved. (Reason: {e})");
            let _ = fs::remove_file(path);
            false
        }
    }
}

impl DataDict {
    /// Write this container to `{path}/{exp_name}_{exp_id}/`.
    ///
    /// `exp_name` defaults to `info.model_type` (spaces become underscores);
    /// `exp_id` defaults to one past the highest existing id for that name.
    /// Entries that cannot be serialized are skipped with a warning; the save
    /// itself continues. Returns the directory written to.
    pub fn save(
        &self,
        exp_name: Option<&str>,
        exp_id: Option<u64>,
        path: &Path,
        display: bool,
    ) -> Result<PathBuf, SimError> {
        fs::create_dir_all(path)?;

        let exp_name = match exp_name {
            Some(name) => name.to_string(),
            None => self
                .info_value("model_type")
                .and_then(Value::as_str)
                .unwrap_or("Unnamed")
                .to_string(),
        }
        .replace(' ', "_");

        let exp_id = match exp_id {
            Some(id) => id,
            None => last_exp_id(&exp_name, path)?.map_or(1, |id| id + 1),
        };

        let dir = path.join(format!("{exp_name}_{exp_id}"));
        fs::create_dir_all(&dir)?;

        for (key, entry) in self.iter() {
            match entry {
                Entry::Frame(frame) => {
                    frame.write_csv(&dir.join(format!("{key}.csv")))?;
                }
                Entry::Dict(section) => {
                    for (sub, sub_entry) in section.iter() {
                        match sub_entry {
                            Entry::Frame(frame) => {
                                frame.write_csv(&dir.join(format!("{key}_{sub}.csv")))?;
                            }
                            Entry::Map(_) | Entry::Value(_) | Entry::List(_) => {
                                write_json(
                                    &dir.join(format!("{key}_{sub}.json")),
                                    sub_entry,
                                    &format!("{key}.{sub}"),
                                );
                            }
                            _ => {
                                eprintln!(
                                    "Warning: object '{key}.{sub}' could not be saved. \
                                     (Reason: unsupported nesting)"
                                );
                            }
                        }
                    }
                }
                _ => {
                    write_json(&dir.join(format!("{key}.json")), entry, key);
                }
            }
        }

        if display {
            println!("Data saved to {}", dir.display());
        }
        Ok(dir)
    }

    /// Read a container back from `{path}/{exp_name}_{exp_id}/`.
    ///
    /// With `exp_name` omitted, the most recently modified experiment
    /// directory is chosen; with `exp_id` omitted, the highest id for that
    /// name. A file that cannot be decoded becomes a null entry with a
    /// warning instead of aborting the load; finding no matching experiment
    /// at all is a hard error.
    pub fn load(
        exp_name: Option<&str>,
        exp_id: Option<u64>,
        path: &Path,
        display: bool,
    ) -> Result<DataDict, SimError> {
        let not_found = |name: &str| SimError::ExperimentNotFound {
            name: name.to_string(),
            path: path.to_path_buf(),
        };

        let exp_name = match exp_name {
            Some(name) => name.replace(' ', "_"),
            None => latest_experiment_name(path).ok_or_else(|| not_found("<any>"))?,
        };

        let exp_id = match exp_id {
            Some(id) => id,
            None => last_exp_id(&exp_name, path)
                .unwrap_or(None)
                .ok_or_else(|| not_found(&exp_name))?,
        };

        let dir = path.join(format!("{exp_name}_{exp_id}"));
        if !dir.is_dir() {
            return Err(not_found(&exp_name));
        }
        if display {
            println!("Loading from directory {}", dir.display());
        }

        let mut file_names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        file_names.sort();

        let mut out = DataDict::new();
        for file_name in file_names {
            let (stem, ext) = match file_name.rsplit_once('.') {
                Some((stem, ext)) => (stem.to_string(), ext.to_string()),
                None => (file_name.clone(), String::new()),
            };
            let entry = load_file(&dir.join(&file_name), &ext, display);
            if let Some(sub) = stem.strip_prefix("variables_") {
                nested_section(&mut out, "variables").set(sub, entry);
            } else if let Some(sub) = stem.strip_prefix("parameters_") {
                nested_section(&mut out, "parameters").set(sub, entry);
            } else {
                out.set(stem, entry);
            }
        }
        Ok(out)
    }
}

fn nested_section<'a>(out: &'a mut DataDict, key: &str) -> &'a mut DataDict {
    if !matches!(out.get(key), Some(Entry::Dict(_))) {
        out.set(key, DataDict::new());
    }
    match out.get_mut(key) {
        Some(Entry::Dict(dd)) => dd,
        _ => unreachable!("section was just inserted as a dict"),
    }
}

/// The stem of the most recently modified experiment directory, split before
/// its trailing `_<id>` suffix.
fn latest_experiment_name(path: &Path) -> Option<String> {
    let mut latest: Option<(std::time::SystemTime, String)> = None;
    for dir_entry in fs::read_dir(path).ok()? {
        let dir_entry = dir_entry.ok()?;
        if !dir_entry.path().is_dir() {
            continue;
        }
        let name = dir_entry.file_name().to_str()?.to_string();
        let modified = dir_entry.metadata().ok()?.modified().ok()?;
        if latest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            latest = Some((modified, name));
        }
    }
    let (_, name) = latest?;
    Some(name.rsplit_once('_').map_or(name.clone(), |(n, _)| n.to_string()))
}

/// Decode one file. Unrecognized extensions and decode failures become a
/// null entry with a warning rather than an error.
fn load_file(path: &Path, ext: &str, display: bool) -> Entry {
    if display {
        print!("Loading {} - ", path.display());
    }
    let result: Result<Entry, SimError> = match ext {
        "csv" => DataFrame::read_csv(path, &INDEX_CANDIDATES).map(Entry::Frame),
        "json" => read_json(path),
        _ => Err(SimError::UnsupportedFormat(ext.to_string())),
    };
    match result {
        Ok(entry) => {
            if display {
                println!("Successful");
            }
            entry
        }
        Err(e) => {
            if display {
                println!("Error: {e}");
            } else {
                eprintln!("Warning: could not load {}: {e}", path.display());
            }
            Entry::Null
        }
    }
}

fn read_json(path: &Path) -> Result<Entry, SimError> {
    let text = fs::read_to_string(path)?;
    if text.trim_start().starts_with('{') {
        let map: AttrMap = serde_json::from_str(&text)?;
        Ok(Entry::Map(map))
    } else {
        let value: Value = serde_json::from_str(&text)?;
        Ok(Entry::Value(value))
    }
}
