//! graph/registry — декларации типов для ObjectGraph.
//!
//! TypeDecl — статические метаданные типа: путь-дескриптор, режим сохранения
//! новых экземпляров, упорядоченные группы полей (расширяются только
//! добавлением новых групп/полей в конец) и значения полей по умолчанию.

use std::collections::HashMap;

use crate::error::{SnapError, SnapResult};
use crate::host::PersistMode;
use crate::value::Value;

/// Ключ загруженного типа в реестре.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey(usize);

impl TypeKey {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    path: String,
    mode: PersistMode,
    groups: Vec<Vec<String>>,
    defaults: HashMap<String, Value>,
}

impl TypeDecl {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            mode: PersistMode::None,
            groups: Vec::new(),
            defaults: HashMap::new(),
        }
    }

    /// Режим сохранения, который получают новые экземпляры.
    pub fn mode(mut self, mode: PersistMode) -> Self {
        self.mode = mode;
        self
    }

    /// Добавить группу полей.
    pub fn group<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_value<S: Into<String>, V: Into<Value>>(mut self, name: S, v: V) -> Self {
        self.defaults.insert(name.into(), v.into());
        self
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn persist_mode(&self) -> PersistMode {
        self.mode
    }

    #[inline]
    pub fn field_groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    pub fn declares(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.iter().any(|n| n == name))
    }

    /// Значение по умолчанию для поля (Nil, если не задано).
    pub fn default_for(&self, name: &str) -> Value {
        self.defaults.get(name).cloned().unwrap_or_default()
    }

    /// Имя экземпляра по умолчанию: последний сегмент пути без расширения.
    pub fn default_name(&self) -> String {
        let tail = self.path.rsplit(['/', ':']).next().unwrap_or(&self.path);
        let stem = tail.split('.').next().unwrap_or(tail);
        if stem.is_empty() {
            "Object".to_string()
        } else {
            stem.to_string()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    decls: Vec<TypeDecl>,
    by_path: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, decl: TypeDecl) -> SnapResult<TypeKey> {
        if decl.path.is_empty() {
            return Err(SnapError::contract("type path must not be empty"));
        }
        if self.by_path.contains_key(&decl.path) {
            return Err(SnapError::contract(format!(
                "type '{}' is already registered",
                decl.path
            )));
        }
        let key = self.decls.len();
        self.by_path.insert(decl.path.clone(), key);
        self.decls.push(decl);
        Ok(TypeKey(key))
    }

    /// Builder-вариант register() для цепочек в тестах/демо.
    pub fn with(mut self, decl: TypeDecl) -> SnapResult<Self> {
        self.register(decl)?;
        Ok(self)
    }

    pub fn lookup(&self, path: &str) -> Option<TypeKey> {
        self.by_path.get(path).copied().map(TypeKey)
    }

    pub fn decl(&self, key: TypeKey) -> &TypeDecl {
        &self.decls[key.0]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut reg = TypeRegistry::new();
        let k = reg
            .register(
                TypeDecl::new("res://bodies/planet.type")
                    .mode(PersistMode::Ephemeral)
                    .group(["name", "mass"])
                    .group(["albedo"])
                    .default_value("albedo", 0.3),
            )
            .unwrap();

        assert_eq!(reg.lookup("res://bodies/planet.type"), Some(k));
        let d = reg.decl(k);
        assert_eq!(d.field_groups().len(), 2);
        assert!(d.declares("albedo"));
        assert!(!d.declares("radius"));
        assert_eq!(d.default_for("albedo"), Value::Float(0.3));
        assert_eq!(d.default_for("mass"), Value::Nil);
        assert_eq!(d.default_name(), "planet");
    }

    #[test]
    fn duplicate_path_rejected() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDecl::new("a")).unwrap();
        assert!(reg.register(TypeDecl::new("a")).unwrap_err().is_contract());
        assert!(reg.register(TypeDecl::new("")).is_err());
    }
}
