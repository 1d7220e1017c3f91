//! value — живые значения полей объектов графа.
//!
//! Value — то, что лежит в полях объектов до кодирования и после декодирования:
//! скаляры, строки, сильные/слабые ссылки на объекты (ObjRef), типизированные
//! массивы (Array) и словари (Dict). Callable/Handle существуют только "вживую"
//! и сохранению не подлежат.
//!
//! Контейнеры владеют своими элементами (копируются по значению), поэтому
//! разделяемые между полями контейнеры после snapshot/restore становятся
//! независимыми копиями.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{SnapError, SnapResult};

/// Генерационный хэндл объекта в арене хоста.
/// Слот, освобождённый (или переиспользованный), делает старый хэндл "мёртвым".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    index: u32,
    gen: u32,
}

impl ObjRef {
    #[inline]
    pub fn new(index: u32, gen: u32) -> Self {
        Self { index, gen }
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.gen
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}v{}", self.index, self.gen)
    }
}

/// Слабая ссылка: не удерживает объект; может быть создана уже мёртвой.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeakRef(Option<ObjRef>);

impl WeakRef {
    pub fn new(target: ObjRef) -> Self {
        Self(Some(target))
    }

    pub fn dead() -> Self {
        Self(None)
    }

    /// Хэндл, на который указывает ссылка (живость проверяет хост).
    #[inline]
    pub fn target(&self) -> Option<ObjRef> {
        self.0
    }
}

/// Тип элемента контейнера.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElemType {
    Any,
    Bool,
    Int,
    Float,
    Str,
    /// Ссылка на объект; Some(path) — конкретный тип (дескриптор), None — любой объект.
    Object(Option<String>),
    Weak,
    Array,
    Dict,
}

impl ElemType {
    pub(crate) const KIND_ANY: i64 = 0;
    pub(crate) const KIND_BOOL: i64 = 1;
    pub(crate) const KIND_INT: i64 = 2;
    pub(crate) const KIND_FLOAT: i64 = 3;
    pub(crate) const KIND_STR: i64 = 4;
    pub(crate) const KIND_OBJECT: i64 = 5;
    pub(crate) const KIND_WEAK: i64 = 6;
    pub(crate) const KIND_ARRAY: i64 = 7;
    pub(crate) const KIND_DICT: i64 = 8;

    pub(crate) fn kind_code(&self) -> i64 {
        match self {
            ElemType::Any => Self::KIND_ANY,
            ElemType::Bool => Self::KIND_BOOL,
            ElemType::Int => Self::KIND_INT,
            ElemType::Float => Self::KIND_FLOAT,
            ElemType::Str => Self::KIND_STR,
            ElemType::Object(_) => Self::KIND_OBJECT,
            ElemType::Weak => Self::KIND_WEAK,
            ElemType::Array => Self::KIND_ARRAY,
            ElemType::Dict => Self::KIND_DICT,
        }
    }

    /// Скалярные типы без ссылок: такие массивы копируются "как есть".
    #[inline]
    pub fn is_packable(&self) -> bool {
        matches!(self, ElemType::Bool | ElemType::Int | ElemType::Float)
    }

    /// Может ли тип служить типом ключа словаря.
    #[inline]
    pub fn is_key_type(&self) -> bool {
        matches!(
            self,
            ElemType::Any | ElemType::Bool | ElemType::Int | ElemType::Str | ElemType::Object(_)
        )
    }

    pub fn accepts(&self, v: &Value) -> bool {
        match (self, v) {
            (ElemType::Any, _) => true,
            (ElemType::Bool, Value::Bool(_)) => true,
            (ElemType::Int, Value::Int(_)) => true,
            (ElemType::Float, Value::Float(_)) => true,
            (ElemType::Str, Value::Str(_)) => true,
            (ElemType::Object(_), Value::Object(_) | Value::Nil) => true,
            (ElemType::Weak, Value::Weak(_)) => true,
            (ElemType::Array, Value::Array(_)) => true,
            (ElemType::Dict, Value::Dict(_)) => true,
            _ => false,
        }
    }

    pub fn accepts_key(&self, k: &Key) -> bool {
        match (self, k) {
            (ElemType::Any, _) => true,
            (ElemType::Bool, Key::Bool(_)) => true,
            (ElemType::Int, Key::Int(_)) => true,
            (ElemType::Str, Key::Str(_)) => true,
            (ElemType::Object(_), Key::Object(_)) => true,
            _ => false,
        }
    }
}

/// Ключ словаря.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Str(String),
    Object(ObjRef),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl From<ObjRef> for Key {
    fn from(r: ObjRef) -> Self {
        Key::Object(r)
    }
}

/// Массив с (опциональной) типизацией элементов.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    elem: ElemType,
    items: Vec<Value>,
}

impl Array {
    pub fn untyped(items: Vec<Value>) -> Self {
        Self {
            elem: ElemType::Any,
            items,
        }
    }

    /// Типизированный массив; каждый элемент обязан соответствовать elem.
    pub fn typed(elem: ElemType, items: Vec<Value>) -> SnapResult<Self> {
        if let Some(bad) = items.iter().find(|v| !elem.accepts(v)) {
            return Err(SnapError::contract(format!(
                "array of {:?} cannot hold a {} element",
                elem,
                bad.kind_name()
            )));
        }
        Ok(Self { elem, items })
    }

    pub fn ints<I: IntoIterator<Item = i64>>(items: I) -> Self {
        Self {
            elem: ElemType::Int,
            items: items.into_iter().map(Value::Int).collect(),
        }
    }

    pub fn floats<I: IntoIterator<Item = f64>>(items: I) -> Self {
        Self {
            elem: ElemType::Float,
            items: items.into_iter().map(Value::Float).collect(),
        }
    }

    pub fn bools<I: IntoIterator<Item = bool>>(items: I) -> Self {
        Self {
            elem: ElemType::Bool,
            items: items.into_iter().map(Value::Bool).collect(),
        }
    }

    #[inline]
    pub fn elem(&self) -> &ElemType {
        &self.elem
    }

    #[inline]
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, v: Value) -> SnapResult<()> {
        if !self.elem.accepts(&v) {
            return Err(SnapError::contract(format!(
                "array of {:?} cannot hold a {} element",
                self.elem,
                v.kind_name()
            )));
        }
        self.items.push(v);
        Ok(())
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }
}

/// Упорядоченный словарь с типами ключа и значения.
#[derive(Debug, Clone, PartialEq)]
pub struct Dict {
    key: ElemType,
    value: ElemType,
    entries: BTreeMap<Key, Value>,
}

impl Default for Dict {
    fn default() -> Self {
        Self::untyped()
    }
}

impl Dict {
    pub fn untyped() -> Self {
        Self {
            key: ElemType::Any,
            value: ElemType::Any,
            entries: BTreeMap::new(),
        }
    }

    pub fn typed(key: ElemType, value: ElemType) -> SnapResult<Self> {
        if !key.is_key_type() {
            return Err(SnapError::contract(format!(
                "{:?} cannot be used as a dictionary key type",
                key
            )));
        }
        Ok(Self {
            key,
            value,
            entries: BTreeMap::new(),
        })
    }

    /// Вставить пару; возвращает прежнее значение ключа.
    pub fn insert<K: Into<Key>, V: Into<Value>>(&mut self, k: K, v: V) -> SnapResult<Option<Value>> {
        let k = k.into();
        let v = v.into();
        if !self.key.accepts_key(&k) {
            return Err(SnapError::contract(format!(
                "dictionary keyed by {:?} cannot take key {:?}",
                self.key, k
            )));
        }
        if !self.value.accepts(&v) {
            return Err(SnapError::contract(format!(
                "dictionary of {:?} values cannot hold a {}",
                self.value,
                v.kind_name()
            )));
        }
        Ok(self.entries.insert(k, v))
    }

    pub fn get(&self, k: &Key) -> Option<&Value> {
        self.entries.get(k)
    }

    #[inline]
    pub fn key_type(&self) -> &ElemType {
        &self.key
    }

    #[inline]
    pub fn value_type(&self) -> &ElemType {
        &self.value
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Значение поля.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(ObjRef),
    Weak(WeakRef),
    Array(Array),
    Dict(Dict),
    /// Живое замыкание/колбэк — не сериализуется.
    Callable(String),
    /// Непрозрачный хэндл ОС — не сериализуется.
    Handle(u64),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Weak(_) => "weak reference",
            Value::Array(_) => "array",
            Value::Dict(_) => "dictionary",
            Value::Callable(_) => "callable",
            Value::Handle(_) => "OS handle",
        }
    }

    pub fn as_object(&self) -> Option<ObjRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_weak(&self) -> Option<WeakRef> {
        match self {
            Value::Weak(w) => Some(*w),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Object(r)
    }
}

impl From<WeakRef> for Value {
    fn from(w: WeakRef) -> Self {
        Value::Weak(w)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Self {
        Value::Dict(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_array_rejects_foreign_elements() {
        let err = Array::typed(ElemType::Int, vec![Value::Int(1), Value::Str("x".into())]).unwrap_err();
        assert!(err.is_contract());

        let mut a = Array::ints([1, 2]);
        assert!(a.push(Value::Float(1.5)).is_err());
        a.push(Value::Int(3)).unwrap();
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn object_typed_array_takes_nil() {
        let r = ObjRef::new(4, 1);
        let a = Array::typed(ElemType::Object(None), vec![Value::Object(r), Value::Nil]).unwrap();
        assert_eq!(a.items()[0].as_object(), Some(r));
    }

    #[test]
    fn dict_checks_key_and_value_types() {
        assert!(Dict::typed(ElemType::Float, ElemType::Any).is_err());

        let mut d = Dict::typed(ElemType::Str, ElemType::Int).unwrap();
        d.insert("a", 1i64).unwrap();
        assert!(d.insert(5i64, 1i64).is_err());
        assert!(d.insert("b", "two").is_err());
        assert_eq!(d.insert("a", 7i64).unwrap(), Some(Value::Int(1)));
        assert_eq!(d.get(&Key::from("a")), Some(&Value::Int(7)));
    }

    #[test]
    fn dead_weak_has_no_target() {
        assert_eq!(WeakRef::dead().target(), None);
        let r = ObjRef::new(0, 0);
        assert_eq!(WeakRef::new(r).target(), Some(r));
    }
}
