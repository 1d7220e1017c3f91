//! graph — встроенный живой граф объектов (арена) и его реализация PersistHost.
//!
//! ObjectGraph хранит объекты в арене с поколениями: ObjRef = (index, gen).
//! Освобождение слота увеличивает gen, поэтому старые хэндлы и слабые ссылки
//! становятся мёртвыми даже при переиспользовании слота.
//!
//! Структура: у объекта есть имя (уникальное среди соседей), родитель и
//! упорядоченный список детей. Объект без родителя — либо корень дерева,
//! либо свободный (freestanding) объект, доступный только через ссылки.
//!
//! Поля: любой объект может держать произвольные поля (включая транзиентные),
//! но сохраняются/восстанавливаются только объявленные в TypeDecl группы.
//! Поле "name" отображается на имя объекта.

pub mod registry;

pub use registry::{TypeDecl, TypeKey, TypeRegistry};

use std::collections::HashMap;

use crate::error::{SnapError, SnapResult};
use crate::host::{PersistHost, PersistMode};
use crate::value::{ObjRef, Value, WeakRef};

/// Имя поля, отображаемое на имя объекта.
pub const NAME_FIELD: &str = "name";

#[derive(Debug, Clone)]
struct Object {
    ty: TypeKey,
    name: String,
    mode: PersistMode,
    parent: Option<ObjRef>,
    children: Vec<ObjRef>,
    fields: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
struct ArenaSlot {
    gen: u32,
    obj: Option<Object>,
}

#[derive(Debug, Clone)]
pub struct ObjectGraph {
    registry: TypeRegistry,
    slots: Vec<ArenaSlot>,
    free_list: Vec<u32>,
    live: usize,
}

impl ObjectGraph {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    #[inline]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Число живых объектов.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Создать объект типа type_path (не прикреплён к дереву).
    pub fn spawn(&mut self, type_path: &str, name: &str) -> SnapResult<ObjRef> {
        let ty = self
            .registry
            .lookup(type_path)
            .ok_or_else(|| SnapError::resolution(format!("unknown type '{}'", type_path)))?;
        validate_name(name)?;
        Ok(self.alloc(ty, name.to_string()))
    }

    fn alloc(&mut self, ty: TypeKey, name: String) -> ObjRef {
        let obj = Object {
            ty,
            name,
            mode: self.registry.decl(ty).persist_mode(),
            parent: None,
            children: Vec::new(),
            fields: HashMap::new(),
        };
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.obj = Some(obj);
            ObjRef::new(index, slot.gen)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(ArenaSlot {
                gen: 0,
                obj: Some(obj),
            });
            ObjRef::new(index, 0)
        }
    }

    fn obj(&self, r: ObjRef) -> Option<&Object> {
        self.slots
            .get(r.index() as usize)
            .filter(|s| s.gen == r.generation())
            .and_then(|s| s.obj.as_ref())
    }

    fn obj_mut(&mut self, r: ObjRef) -> Option<&mut Object> {
        self.slots
            .get_mut(r.index() as usize)
            .filter(|s| s.gen == r.generation())
            .and_then(|s| s.obj.as_mut())
    }

    fn live_obj(&self, r: ObjRef) -> SnapResult<&Object> {
        self.obj(r)
            .ok_or_else(|| SnapError::contract(format!("{} is not alive", r)))
    }

    fn live_obj_mut(&mut self, r: ObjRef) -> SnapResult<&mut Object> {
        self.obj_mut(r)
            .ok_or_else(|| SnapError::contract(format!("{} is not alive", r)))
    }

    #[inline]
    pub fn is_alive(&self, r: ObjRef) -> bool {
        self.obj(r).is_some()
    }

    /// Прикрепить child к parent последним ребёнком.
    /// Имя child при совпадении с соседом получает суффикс "@N".
    pub fn add_child(&mut self, parent: ObjRef, child: ObjRef) -> SnapResult<()> {
        if parent == child {
            return Err(SnapError::contract("object cannot be its own child"));
        }
        self.live_obj(parent)?;
        self.live_obj(child)?;

        // Запрещаем циклы: parent не может быть потомком child.
        let mut cur = Some(parent);
        while let Some(c) = cur {
            if c == child {
                return Err(SnapError::contract(format!(
                    "{} is an ancestor of {}",
                    child, parent
                )));
            }
            cur = self.obj(c).and_then(|o| o.parent);
        }

        self.detach(child);

        let wanted = self.live_obj(child)?.name.clone();
        let unique = self.unique_child_name(parent, &wanted);

        let c = self.live_obj_mut(child)?;
        c.name = unique;
        c.parent = Some(parent);
        self.live_obj_mut(parent)?.children.push(child);
        Ok(())
    }

    fn unique_child_name(&self, parent: ObjRef, wanted: &str) -> String {
        let taken = |n: &str| {
            self.children(parent)
                .iter()
                .any(|c| self.obj(*c).map(|o| o.name == n).unwrap_or(false))
        };
        if !taken(wanted) {
            return wanted.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}@{}", wanted, n);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Отцепить объект от родителя (объект остаётся живым).
    pub fn detach(&mut self, child: ObjRef) {
        let parent = match self.obj(child).and_then(|o| o.parent) {
            Some(p) => p,
            None => return,
        };
        if let Some(p) = self.obj_mut(parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(c) = self.obj_mut(child) {
            c.parent = None;
        }
    }

    /// Переставить ребёнка на позицию index (обрезается по числу детей).
    pub fn move_child(&mut self, parent: ObjRef, child: ObjRef, index: usize) -> SnapResult<()> {
        let p = self.live_obj_mut(parent)?;
        let pos = p
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| SnapError::contract(format!("{} is not a child of {}", child, parent)))?;
        let c = p.children.remove(pos);
        let at = index.min(p.children.len());
        p.children.insert(at, c);
        Ok(())
    }

    /// Освободить объект и всё его структурное поддерево.
    /// Возвращает число освобождённых объектов.
    pub fn free(&mut self, root: ObjRef) -> usize {
        if !self.is_alive(root) {
            return 0;
        }
        self.detach(root);

        let mut stack = vec![root];
        let mut freed = 0usize;
        while let Some(r) = stack.pop() {
            let slot = &mut self.slots[r.index() as usize];
            if slot.gen != r.generation() {
                continue;
            }
            if let Some(obj) = slot.obj.take() {
                slot.gen = slot.gen.wrapping_add(1);
                self.free_list.push(r.index());
                self.live -= 1;
                freed += 1;
                stack.extend(obj.children);
            }
        }
        freed
    }

    /// Записать поле (любое имя; сохраняются только объявленные).
    pub fn set<V: Into<Value>>(&mut self, obj: ObjRef, name: &str, v: V) -> SnapResult<()> {
        let v = v.into();
        if name == NAME_FIELD {
            return self.rename(obj, v);
        }
        self.live_obj_mut(obj)?.fields.insert(name.to_string(), v);
        Ok(())
    }

    fn rename(&mut self, obj: ObjRef, v: Value) -> SnapResult<()> {
        let wanted = match v {
            Value::Str(s) => s,
            other => {
                return Err(SnapError::contract(format!(
                    "'{}' must be a string, got {}",
                    NAME_FIELD,
                    other.kind_name()
                )))
            }
        };
        validate_name(&wanted)?;
        let parent = self.live_obj(obj)?.parent;
        let name = match parent {
            Some(p) if self.live_obj(obj)?.name != wanted => self.unique_child_name(p, &wanted),
            _ => wanted,
        };
        self.live_obj_mut(obj)?.name = name;
        Ok(())
    }

    /// Прочитать поле: записанное значение, иначе default из декларации.
    /// None — объект мёртв либо поле не записано и не объявлено.
    pub fn get(&self, obj: ObjRef, name: &str) -> Option<Value> {
        let o = self.obj(obj)?;
        if name == NAME_FIELD {
            return Some(Value::Str(o.name.clone()));
        }
        if let Some(v) = o.fields.get(name) {
            return Some(v.clone());
        }
        let decl = self.registry.decl(o.ty);
        if decl.declares(name) {
            Some(decl.default_for(name))
        } else {
            None
        }
    }

    pub fn set_mode(&mut self, obj: ObjRef, mode: PersistMode) -> SnapResult<()> {
        self.live_obj_mut(obj)?.mode = mode;
        Ok(())
    }

    pub fn mode(&self, obj: ObjRef) -> PersistMode {
        self.obj(obj).map(|o| o.mode).unwrap_or_default()
    }

    pub fn name(&self, obj: ObjRef) -> Option<&str> {
        self.obj(obj).map(|o| o.name.as_str())
    }

    pub fn type_of(&self, obj: ObjRef) -> Option<&str> {
        self.obj(obj).map(|o| self.registry.decl(o.ty).path())
    }

    pub fn parent(&self, obj: ObjRef) -> Option<ObjRef> {
        self.obj(obj).and_then(|o| o.parent)
    }

    pub fn children(&self, obj: ObjRef) -> &[ObjRef] {
        self.obj(obj).map(|o| o.children.as_slice()).unwrap_or(&[])
    }

    /// Ребёнок по имени.
    pub fn child(&self, parent: ObjRef, name: &str) -> Option<ObjRef> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.name(*c) == Some(name))
    }

    /// Найти объект по пути "A/B/C" от anchor ("." — сам anchor).
    pub fn find(&self, anchor: ObjRef, path: &str) -> Option<ObjRef> {
        self.obj(anchor)?;
        if path == "." || path.is_empty() {
            return Some(anchor);
        }
        let mut cur = anchor;
        for seg in path.split('/') {
            cur = self.child(cur, seg)?;
        }
        Some(cur)
    }

    /// Путь от anchor до obj; None, если obj не лежит под anchor.
    pub fn path_of(&self, anchor: ObjRef, obj: ObjRef) -> Option<String> {
        if anchor == obj {
            return self.obj(anchor).map(|_| ".".to_string());
        }
        let mut segs: Vec<&str> = Vec::new();
        let mut cur = obj;
        loop {
            let o = self.obj(cur)?;
            segs.push(o.name.as_str());
            match o.parent {
                Some(p) if p == anchor => break,
                Some(p) => cur = p,
                None => return None,
            }
        }
        segs.reverse();
        Some(segs.join("/"))
    }

    /// Удобный конструктор слабой ссылки.
    pub fn weak(&self, obj: ObjRef) -> WeakRef {
        if self.is_alive(obj) {
            WeakRef::new(obj)
        } else {
            WeakRef::dead()
        }
    }

    /// Разыменовать слабую ссылку.
    pub fn upgrade(&self, w: &WeakRef) -> Option<ObjRef> {
        w.target().filter(|r| self.is_alive(*r))
    }
}

fn validate_name(name: &str) -> SnapResult<()> {
    if name.is_empty() || name == "." || name.contains('/') {
        return Err(SnapError::contract(format!("invalid object name '{}'", name)));
    }
    Ok(())
}

impl PersistHost for ObjectGraph {
    type TypeHandle = TypeKey;

    fn persist_mode(&self, obj: ObjRef) -> PersistMode {
        self.mode(obj)
    }

    fn is_alive(&self, obj: ObjRef) -> bool {
        ObjectGraph::is_alive(self, obj)
    }

    fn parent(&self, obj: ObjRef) -> Option<ObjRef> {
        ObjectGraph::parent(self, obj)
    }

    fn children(&self, obj: ObjRef) -> Vec<ObjRef> {
        ObjectGraph::children(self, obj).to_vec()
    }

    fn child_count(&self, obj: ObjRef) -> usize {
        ObjectGraph::children(self, obj).len()
    }

    fn index_in_parent(&self, obj: ObjRef) -> Option<usize> {
        let p = ObjectGraph::parent(self, obj)?;
        ObjectGraph::children(self, p).iter().position(|c| *c == obj)
    }

    fn path_from(&self, anchor: ObjRef, obj: ObjRef) -> Option<String> {
        self.path_of(anchor, obj)
    }

    fn find_by_path(&self, anchor: ObjRef, path: &str) -> Option<ObjRef> {
        self.find(anchor, path)
    }

    fn type_path(&self, obj: ObjRef) -> Option<String> {
        self.type_of(obj).map(str::to_string)
    }

    fn field_groups(&self, obj: ObjRef) -> Vec<Vec<String>> {
        self.obj(obj)
            .map(|o| self.registry.decl(o.ty).field_groups().to_vec())
            .unwrap_or_default()
    }

    fn get_field(&self, obj: ObjRef, name: &str) -> Option<Value> {
        self.get(obj, name)
    }

    fn set_field(&mut self, obj: ObjRef, name: &str, value: Value) -> SnapResult<()> {
        let o = self.live_obj(obj)?;
        let decl = self.registry.decl(o.ty);
        if !decl.declares(name) {
            return Err(SnapError::contract(format!(
                "type '{}' does not declare field '{}'",
                decl.path(),
                name
            )));
        }
        self.set(obj, name, value)
    }

    fn resolve_type(&self, path: &str) -> Option<TypeKey> {
        self.registry.lookup(path)
    }

    fn declared_groups(&self, ty: &TypeKey) -> Vec<Vec<String>> {
        self.registry.decl(*ty).field_groups().to_vec()
    }

    fn instantiate(&mut self, ty: &TypeKey) -> SnapResult<ObjRef> {
        let name = self.registry.decl(*ty).default_name();
        Ok(self.alloc(*ty, name))
    }

    fn attach_child(&mut self, parent: ObjRef, child: ObjRef) -> SnapResult<()> {
        self.add_child(parent, child)
    }

    fn move_child(&mut self, parent: ObjRef, child: ObjRef, index: usize) -> SnapResult<()> {
        ObjectGraph::move_child(self, parent, child, index)
    }

    fn free(&mut self, obj: ObjRef) {
        ObjectGraph::free(self, obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(TypeDecl::new("res://node.type").mode(PersistMode::Anchored).group(["name", "hp"]))
            .unwrap()
            .with(TypeDecl::new("res://mob.type").mode(PersistMode::Ephemeral).group(["name"]))
            .unwrap()
    }

    #[test]
    fn sibling_names_are_made_unique() {
        let mut g = ObjectGraph::new(registry());
        let root = g.spawn("res://node.type", "Root").unwrap();
        let a = g.spawn("res://mob.type", "Mob").unwrap();
        let b = g.spawn("res://mob.type", "Mob").unwrap();
        g.add_child(root, a).unwrap();
        g.add_child(root, b).unwrap();
        assert_eq!(g.name(a), Some("Mob"));
        assert_eq!(g.name(b), Some("Mob@2"));
        assert_eq!(g.find(root, "Mob@2"), Some(b));
    }

    #[test]
    fn path_roundtrip_and_cycles() {
        let mut g = ObjectGraph::new(registry());
        let root = g.spawn("res://node.type", "Root").unwrap();
        let x = g.spawn("res://node.type", "X").unwrap();
        let y = g.spawn("res://node.type", "Y").unwrap();
        g.add_child(root, x).unwrap();
        g.add_child(x, y).unwrap();

        assert_eq!(g.path_of(root, y).as_deref(), Some("X/Y"));
        assert_eq!(g.path_of(root, root).as_deref(), Some("."));
        assert_eq!(g.path_of(x, root), None);
        assert_eq!(g.find(root, "X/Y"), Some(y));
        assert_eq!(g.find(root, "X/Z"), None);

        assert!(g.add_child(y, root).is_err(), "cycle must be rejected");
    }

    #[test]
    fn free_kills_subtree_and_handles() {
        let mut g = ObjectGraph::new(registry());
        let root = g.spawn("res://node.type", "Root").unwrap();
        let x = g.spawn("res://node.type", "X").unwrap();
        let y = g.spawn("res://mob.type", "Y").unwrap();
        g.add_child(root, x).unwrap();
        g.add_child(x, y).unwrap();
        let w = g.weak(y);

        assert_eq!(g.free(x), 2);
        assert!(!g.is_alive(x) && !g.is_alive(y));
        assert!(g.children(root).is_empty());
        assert_eq!(g.upgrade(&w), None);

        // слот переиспользуется, но старый хэндл остаётся мёртвым
        let z = g.spawn("res://mob.type", "Z").unwrap();
        assert!(g.is_alive(z));
        assert!(!g.is_alive(y));
        assert_eq!(g.live_count(), 2);
    }

    #[test]
    fn defaults_name_field_and_declared_set() {
        let mut g = ObjectGraph::new(registry());
        let n = g.spawn("res://node.type", "N").unwrap();
        assert_eq!(g.get(n, "hp"), Some(Value::Nil));
        assert_eq!(g.get(n, "transient"), None);

        g.set(n, "transient", 5i64).unwrap();
        assert_eq!(g.get(n, "transient"), Some(Value::Int(5)));

        assert!(PersistHost::set_field(&mut g, n, "transient", Value::Int(1))
            .unwrap_err()
            .is_contract());
        PersistHost::set_field(&mut g, n, "name", Value::from("Renamed")).unwrap();
        assert_eq!(g.name(n), Some("Renamed"));
    }

    #[test]
    fn move_child_clamps() {
        let mut g = ObjectGraph::new(registry());
        let root = g.spawn("res://node.type", "Root").unwrap();
        let a = g.spawn("res://mob.type", "A").unwrap();
        let b = g.spawn("res://mob.type", "B").unwrap();
        g.add_child(root, a).unwrap();
        g.add_child(root, b).unwrap();
        g.move_child(root, a, 99).unwrap();
        assert_eq!(g.children(root), &[b, a]);
        g.move_child(root, a, 0).unwrap();
        assert_eq!(g.children(root), &[a, b]);
    }
}
