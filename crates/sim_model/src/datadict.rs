//! The nested result container for simulation output.
//!
//! A [DataDict] is an ordered heterogeneous map: values can be scalars,
//! tables, plain maps, lists, or nested containers. The keys `info`,
//! `parameters`, `variables` and `reporters` carry reserved semantics when
//! present but nothing is structurally mandatory.

use std::fmt;

use serde::ser::{Error as SerError, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::frame::DataFrame;
use crate::value::{AttrMap, Value};

/// One value inside a [DataDict].
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    /// A plain scalar or flat list value.
    Value(Value),
    /// A list of per-run entries that could not be merged into one table.
    List(Vec<Entry>),
    /// A flat ordered mapping, e.g. the `info` metadata block.
    Map(AttrMap),
    /// Tabular data.
    Frame(DataFrame),
    /// A nested container, e.g. the `variables` section.
    Dict(DataDict),
    /// Placeholder for an entry that could not be read back from disk.
    Null,
}

impl Entry {
    pub fn as_frame(&self) -> Option<&DataFrame> {
        match self {
            Entry::Frame(df) => Some(df),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&DataDict> {
        match self {
            Entry::Dict(dd) => Some(dd),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&AttrMap> {
        match self {
            Entry::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Entry {
    fn from(v: Value) -> Self {
        Entry::Value(v)
    }
}

impl From<AttrMap> for Entry {
    fn from(m: AttrMap) -> Self {
        Entry::Map(m)
    }
}

impl From<DataFrame> for Entry {
    fn from(df: DataFrame) -> Self {
        Entry::Frame(df)
    }
}

impl From<DataDict> for Entry {
    fn from(dd: DataDict) -> Self {
        Entry::Dict(dd)
    }
}

/// JSON serialization covers scalar, list, and map entries. Tables are
/// persisted separately as CSV; attempting to serialize them (or a null
/// placeholder) here is an error, which the save path turns into a
/// skip-with-warning.
impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Entry::Value(v) => v.serialize(serializer),
            Entry::Map(m) => m.serialize(serializer),
            Entry::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Entry::Frame(_) => Err(S::Error::custom("tabular entry is not JSON-serializable")),
            Entry::Dict(_) => Err(S::Error::custom("nested container is not JSON-serializable")),
            Entry::Null => Err(S::Error::custom("unreadable entry is not JSON-serializable")),
        }
    }
}

/// Ordered heterogeneous container for one run's or one experiment's output.
#[derive(Clone, Debug, Default)]
pub struct DataDict {
    entries: Vec<(String, Entry)>,
}

impl DataDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert or overwrite, keeping the original position on overwrite.
    pub fn set(&mut self, key: impl Into<String>, entry: impl Into<Entry>) {
        let key = key.into();
        let entry = entry.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = entry,
            None => self.entries.push((key, entry)),
        }
    }

    pub fn delete(&mut self, key: &str) -> Option<Entry> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    // Typed accessors for the reserved sections ----------------------------- //

    pub fn frame(&self, key: &str) -> Option<&DataFrame> {
        self.get(key).and_then(Entry::as_frame)
    }

    pub fn dict(&self, key: &str) -> Option<&DataDict> {
        self.get(key).and_then(Entry::as_dict)
    }

    pub fn map(&self, key: &str) -> Option<&AttrMap> {
        self.get(key).and_then(Entry::as_map)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.get(key).and_then(Entry::as_value)
    }

    /// Shortcut into the `info` metadata block.
    pub fn info_value(&self, key: &str) -> Option<&Value> {
        self.map("info").and_then(|m| m.get(key))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: bool) -> fmt::Result {
        if !indent {
            write!(f, "DataDict {{")?;
        }
        let pad = if indent { "    " } else { "" };
        for (k, v) in self.iter() {
            write!(f, "\n{pad}'{k}':")?;
            match v {
                Entry::Value(Value::Str(s)) => {
                    if s.chars().count() > 30 {
                        let head: String = s.chars().take(30).collect();
                        write!(f, " '{head}...' (length {})", s.len())?;
                    } else {
                        write!(f, " '{s}'")?;
                    }
                }
                Entry::Value(v) => write!(f, " {v} ({})", v.kind_name())?,
                Entry::Frame(df) => {
                    let (c, r) = (df.n_cols(), df.n_rows());
                    write!(
                        f,
                        " DataFrame with {c} variable{} and {r} row{}",
                        if c != 1 { "s" } else { "" },
                        if r != 1 { "s" } else { "" },
                    )?;
                }
                Entry::Dict(dd) => dd.fmt_indented(f, true)?,
                Entry::Map(m) => {
                    let n = m.len();
                    write!(
                        f,
                        " Dictionary with {n} key{}",
                        if n != 1 { "s" } else { "" }
                    )?;
                }
                Entry::List(items) => {
                    let n = items.len();
                    write!(
                        f,
                        " List with {n} entr{}",
                        if n != 1 { "ies" } else { "y" }
                    )?;
                }
                Entry::Null => write!(f, " None")?,
            }
        }
        if !indent {
            write!(f, "\n}}")?;
        }
        Ok(())
    }
}

impl PartialEq for DataDict {
    /// Deep structural equality, independent of key order. Tabular sections
    /// compare by full content.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map(|o| o == v).unwrap_or(false))
    }
}

impl fmt::Display for DataDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_frame() -> DataFrame {
        let mut df = DataFrame::with_columns(["t"], ["x"]);
        df.push_row(vec![Value::Int(0)], vec![Value::Int(1)]);
        df
    }

    #[test]
    fn equality_is_deep_and_order_independent() {
        let mut a = DataDict::new();
        a.set("reporters", small_frame());
        a.set("info", AttrMap::from([("completed", true)]));

        let mut b = DataDict::new();
        b.set("info", AttrMap::from([("completed", true)]));
        b.set("reporters", small_frame());

        assert_eq!(a, b);

        // Changing table content breaks equality.
        let mut df = small_frame();
        df.add_constant_column("y", Value::Int(2));
        b.set("reporters", df);
        assert_ne!(a, b);

        // Missing key breaks equality.
        b.delete("reporters");
        assert_ne!(a, b);
    }

    #[test]
    fn display_summarizes_nested_structure() {
        let mut vars = DataDict::new();
        vars.set("Agent", small_frame());
        vars.set("MyModel", small_frame());

        let mut dd = DataDict::new();
        dd.set("info", AttrMap::from([("model_type", "MyModel")]));
        dd.set("variables", vars);
        dd.set("count", Value::Int(3));

        let repr = dd.to_string();
        assert!(repr.starts_with("DataDict {"));
        assert!(repr.contains("'info': Dictionary with 1 key"));
        assert!(repr.contains("'Agent': DataFrame with 1 variable and 1 row"));
        assert!(repr.contains("'count': 3 (int)"));
        assert!(repr.ends_with("\n}"));
    }

    #[test]
    fn overwrite_keeps_key_position() {
        let mut dd = DataDict::new();
        dd.set("a", Value::Int(1));
        dd.set("b", Value::Int(2));
        dd.set("a", Value::Int(9));
        let keys: Vec<_> = dd.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
