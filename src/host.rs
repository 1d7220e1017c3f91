//! host — граница между кодеком и живым графом.
//!
//! Кодек ничего не знает о том, как устроено дерево объектов. Всё, что ему
//! нужно, хост отдаёт через PersistHost:
//! - режим сохранения объекта (PersistMode);
//! - структурные связи (parent/children/индекс среди соседей);
//! - стабильный путь от якоря и поиск по нему;
//! - дескриптор типа и объявленные группы полей;
//! - чтение/запись полей;
//! - загрузку типа и создание нового экземпляра;
//! - прикрепление/перемещение ребёнка и освобождение объекта.

use serde::{Deserialize, Serialize};

use crate::error::SnapResult;
use crate::value::{ObjRef, Value};

/// Режим сохранения объекта.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// Не сохраняется; поддерево невидимо для кодека.
    #[default]
    None,
    /// Сохраняются только значения полей; объект находится по пути от якоря.
    Anchored,
    /// Сохраняются поля и структура; пересоздаётся при restore.
    Ephemeral,
}

pub trait PersistHost {
    /// Загруженный (resolved) тип, пригодный для instantiate().
    type TypeHandle: Clone;

    fn persist_mode(&self, obj: ObjRef) -> PersistMode;

    fn is_alive(&self, obj: ObjRef) -> bool;

    /// Структурный родитель; None для корня дерева и свободных объектов.
    fn parent(&self, obj: ObjRef) -> Option<ObjRef>;

    fn children(&self, obj: ObjRef) -> Vec<ObjRef>;

    fn child_count(&self, obj: ObjRef) -> usize {
        self.children(obj).len()
    }

    fn index_in_parent(&self, obj: ObjRef) -> Option<usize>;

    /// Стабильный путь от anchor до obj ("." для самого anchor).
    fn path_from(&self, anchor: ObjRef, obj: ObjRef) -> Option<String>;

    fn find_by_path(&self, anchor: ObjRef, path: &str) -> Option<ObjRef>;

    /// Загружаемый дескриптор типа объекта.
    fn type_path(&self, obj: ObjRef) -> Option<String>;

    /// Объявленные группы полей (в порядке объявления).
    fn field_groups(&self, obj: ObjRef) -> Vec<Vec<String>>;

    fn get_field(&self, obj: ObjRef, name: &str) -> Option<Value>;

    fn set_field(&mut self, obj: ObjRef, name: &str, value: Value) -> SnapResult<()>;

    fn resolve_type(&self, path: &str) -> Option<Self::TypeHandle>;

    /// Группы полей, которые будет объявлять свежий экземпляр типа.
    fn declared_groups(&self, ty: &Self::TypeHandle) -> Vec<Vec<String>>;

    /// Новый экземпляр без аргументов, не прикреплённый к дереву.
    fn instantiate(&mut self, ty: &Self::TypeHandle) -> SnapResult<ObjRef>;

    fn attach_child(&mut self, parent: ObjRef, child: ObjRef) -> SnapResult<()>;

    fn move_child(&mut self, parent: ObjRef, child: ObjRef, index: usize) -> SnapResult<()>;

    /// Освободить объект вместе со структурным поддеревом.
    fn free(&mut self, obj: ObjRef);
}
