//! codec/type_table — таблица дескрипторов типов (путь -> плотный id).
//!
//! Нумерация в порядке первого появления; id независимы от id объектов.

use std::collections::HashMap;

use crate::error::{SnapError, SnapResult};
use crate::metrics::record_type_interned;

#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    paths: Vec<String>,
    ids: HashMap<String, u32>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Восстановить таблицу из записи (пути непустые и уникальны).
    pub fn from_paths(paths: &[String]) -> SnapResult<Self> {
        let mut t = Self::new();
        for p in paths {
            if p.is_empty() || t.ids.contains_key(p) {
                return Err(SnapError::malformed(format!("bad or duplicate type path '{}'", p)));
            }
            t.ids.insert(p.clone(), t.paths.len() as u32);
            t.paths.push(p.clone());
        }
        Ok(t)
    }

    /// id пути; новый путь получает следующий id.
    pub fn intern(&mut self, path: &str) -> u32 {
        if let Some(&id) = self.ids.get(path) {
            return id;
        }
        let id = self.paths.len() as u32;
        self.paths.push(path.to_string());
        self.ids.insert(path.to_string(), id);
        record_type_interned();
        id
    }

    pub fn path_of(&self, id: u32) -> Option<&str> {
        self.paths.get(id as usize).map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn into_paths(self) -> Vec<String> {
        self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_first_seen_and_deduplicated() {
        let mut t = TypeTable::new();
        assert_eq!(t.intern("res://b"), 0);
        assert_eq!(t.intern("res://a"), 1);
        assert_eq!(t.intern("res://b"), 0);
        assert_eq!(t.len(), 2);
        assert_eq!(t.path_of(1), Some("res://a"));
        assert_eq!(t.intern("res://a"), 1);
        assert_eq!(t.path_of(7), None);
        assert_eq!(t.into_paths(), vec!["res://b".to_string(), "res://a".to_string()]);
    }

    #[test]
    fn from_paths_rejects_duplicates() {
        let ok = TypeTable::from_paths(&["x".into(), "y".into()]).unwrap();
        assert_eq!(ok.path_of(1), Some("y"));
        assert_eq!(ok.path_of(2), None);
        assert!(TypeTable::from_paths(&["x".into(), "x".into()]).is_err());
        assert!(TypeTable::from_paths(&["".into()]).is_err());
    }
}
