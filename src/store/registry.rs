//! Ordered class registry.
//!
//! Class ids are positional: the class at index `i` has id `i + 1`. Deleting a
//! class therefore shifts the ids of every later class, and the store has to
//! resynchronize the ids it denormalizes into annotations.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IapError;

/// A 1-based class identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub u32);

impl ClassId {
    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    fn index(&self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An RGB display color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Rgb(r, g, b)
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(c: Rgb) -> Self {
        [c.0, c.1, c.2]
    }
}

/// Fixed palette cycled by insertion order for classes created without an
/// explicit color.
pub const PALETTE: [Rgb; 12] = [
    Rgb(230, 25, 75),
    Rgb(60, 180, 75),
    Rgb(0, 130, 200),
    Rgb(245, 130, 48),
    Rgb(145, 30, 180),
    Rgb(70, 240, 240),
    Rgb(240, 50, 230),
    Rgb(210, 245, 60),
    Rgb(250, 190, 212),
    Rgb(0, 128, 128),
    Rgb(170, 110, 40),
    Rgb(128, 0, 0),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassEntry {
    pub name: String,
    pub color: Rgb,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassRegistry {
    entries: Vec<ClassEntry>,
    hidden: BTreeSet<String>,
    // Counts every class ever added so palette picks stay stable after deletes.
    added: usize,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &ClassEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (ClassId::new(i as u32 + 1), e))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.id_of(name).is_some()
    }

    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| ClassId::new(i as u32 + 1))
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassEntry> {
        id.index().and_then(|i| self.entries.get(i))
    }

    pub fn entry(&self, name: &str) -> Option<&ClassEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn color_of(&self, name: &str) -> Option<Rgb> {
        self.entry(name).map(|e| e.color)
    }

    /// Registers a class with the next palette color.
    pub fn add(&mut self, name: &str) -> Result<ClassId, IapError> {
        let color = PALETTE[self.added % PALETTE.len()];
        self.add_with_color(name, color)
    }

    pub fn add_with_color(&mut self, name: &str, color: Rgb) -> Result<ClassId, IapError> {
        let name = validate_name(name)?;
        if self.contains(name) {
            return Err(IapError::invalid(format!("class '{name}' already exists")));
        }
        self.entries.push(ClassEntry {
            name: name.to_string(),
            color,
        });
        self.added += 1;
        log::debug!("registered class '{}' as id {}", name, self.entries.len());
        Ok(ClassId::new(self.entries.len() as u32))
    }

    /// Returns the id of `name`, registering it first if unknown.
    pub fn ensure(&mut self, name: &str) -> Result<ClassId, IapError> {
        match self.id_of(name) {
            Some(id) => Ok(id),
            None => self.add(name),
        }
    }

    /// Renames in place; the id and color are kept.
    ///
    /// Only the registry is touched. Use `AnnotationStore::rename_class` so
    /// annotations follow.
    pub(crate) fn rename(&mut self, old: &str, new: &str) -> Result<ClassId, IapError> {
        let new = validate_name(new)?;
        let id = self
            .id_of(old)
            .ok_or_else(|| IapError::invalid(format!("unknown class '{old}'")))?;
        if old != new && self.contains(new) {
            return Err(IapError::invalid(format!("class '{new}' already exists")));
        }
        self.entries[id.0 as usize - 1].name = new.to_string();
        if self.hidden.remove(old) {
            self.hidden.insert(new.to_string());
        }
        Ok(id)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Result<ClassEntry, IapError> {
        let id = self
            .id_of(name)
            .ok_or_else(|| IapError::invalid(format!("unknown class '{name}'")))?;
        self.hidden.remove(name);
        Ok(self.entries.remove(id.0 as usize - 1))
    }

    pub fn recolor(&mut self, name: &str, color: Rgb) -> Result<(), IapError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| IapError::invalid(format!("unknown class '{name}'")))?;
        entry.color = color;
        Ok(())
    }

    pub fn is_visible(&self, name: &str) -> bool {
        !self.hidden.contains(name)
    }

    pub fn set_visible(&mut self, name: &str, visible: bool) {
        if visible {
            self.hidden.remove(name);
        } else if self.contains(name) {
            self.hidden.insert(name.to_string());
        }
    }
}

fn validate_name(name: &str) -> Result<&str, IapError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(IapError::invalid("class name must not be empty"));
    }
    Ok(trimmed)
}
