// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Flat string-keyed PICS map (spec.md §6, §9 "string-keyed PICS map" note):
//! values are a tagged variant of {bool, integer, string}, loaded from a
//! base YAML file and overlaid with device-discovered items.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PicsValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PicsDevice {
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub product: String,
}

/// On-disk shape of a PICS YAML document (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PicsFile {
    pub name: String,
    #[serde(default)]
    pub device: PicsDevice,
    #[serde(default)]
    pub items: IndexMap<String, PicsValue>,
}

/// An in-memory PICS manifest. Insertion order is preserved (`IndexMap`) so
/// a written-out PICS file reads in the same order items were discovered.
#[derive(Debug, Clone, Default)]
pub struct PicsMap {
    items: IndexMap<String, PicsValue>,
}

impl PicsMap {
    pub fn new() -> Self {
        Self { items: IndexMap::new() }
    }

    /// Loads a base protocol-level PICS file (spec.md §4.5: "a base
    /// protocol-level PICS file is loaded first").
    pub fn load_base_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading PICS base file {}", path.display()))?;
        let file: PicsFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing PICS base file {}", path.display()))?;
        Ok(Self { items: file.items })
    }

    pub fn set(&mut self, key: impl Into<String>, value: PicsValue) {
        self.items.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&PicsValue> {
        self.items.get(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PicsValue)> {
        self.items.iter()
    }

    /// Overlays `other` onto `self`, device-discovered items overwriting
    /// same-keyed base entries.
    pub fn overlay(&mut self, other: PicsMap) {
        for (k, v) in other.items {
            self.items.insert(k, v);
        }
    }
}
