//! codec/value_codec — кодирование/декодирование значений полей.
//!
//! Правила кодирования (рекурсивно):
//! - bool/int/float/nil -> без изменений (NaN/±inf -> ошибка контракта:
//!   в JSON у них нет представления);
//! - строка -> "!" + текст;
//! - ссылка на объект -> "*<id>" (id берётся/назначается через IdentityResolver);
//! - слабая ссылка -> "~<id>" для живой цели, "~" для мёртвой;
//! - непустой массив bool/int/float -> копия элементов без тегов (быстрый путь);
//! - прочие массивы -> [e0', e1', ..., [kind, type_id]] (метаданные в хвосте);
//! - словарь -> {"<key'>": v', ..., "": [key_kind, key_type_id, val_kind, val_type_id]};
//!   ключи: "!s" строка, "#n" целое, "?1"/"?0" bool, "*id" объект. Настоящий
//!   ключ никогда не кодируется пустой строкой.
//! - callable/OS handle -> ошибка контракта.
//!
//! Декодирование — обратное преобразование по форме слота (тег строки,
//! хвостовой элемент последовательности), без внешней схемы.

use std::collections::BTreeMap;

use log::warn;

use super::record::Slot;
use crate::error::{SnapError, SnapResult};
use crate::metrics::record_dead_weak;
use crate::value::{Array, Dict, ElemType, Key, ObjRef, Value, WeakRef};

pub const STR_TAG: char = '!';
pub const OBJ_TAG: char = '*';
pub const WEAK_TAG: char = '~';
pub const INT_KEY_TAG: char = '#';
pub const BOOL_KEY_TAG: char = '?';

/// Зарезервированный ключ словаря с метаданными типов.
pub const DICT_META_KEY: &str = "";

/// type_id в метаданных, когда тип объекта не задан/неприменим.
pub const NO_TYPE: i64 = -1;

/// Источник id объектов и типов на стороне кодирования.
pub trait IdentityResolver {
    /// id для живого объекта (может назначить новый и поставить объект в очередь).
    fn resolve(&mut self, obj: ObjRef) -> SnapResult<u32>;

    fn type_id(&mut self, path: &str) -> u32;

    fn is_alive(&self, obj: ObjRef) -> bool;
}

/// Обратная сторона: id -> объект, type_id -> путь.
pub trait IdentityLookup {
    fn object(&self, id: u32) -> Option<ObjRef>;

    fn type_path(&self, id: u32) -> Option<&str>;
}

pub struct ValueEncoder<'a, R: IdentityResolver + ?Sized> {
    resolver: &'a mut R,
    max_depth: usize,
}

impl<'a, R: IdentityResolver + ?Sized> ValueEncoder<'a, R> {
    pub fn new(resolver: &'a mut R, max_depth: usize) -> Self {
        Self {
            resolver,
            max_depth,
        }
    }

    pub fn encode(&mut self, v: &Value) -> SnapResult<Slot> {
        self.encode_at(v, 0)
    }

    fn encode_at(&mut self, v: &Value, depth: usize) -> SnapResult<Slot> {
        match v {
            Value::Nil => Ok(Slot::Nil),
            Value::Bool(b) => Ok(Slot::Bool(*b)),
            Value::Int(n) => Ok(Slot::Int(*n)),
            Value::Float(x) => finite(*x),
            Value::Str(s) => Ok(Slot::Str(format!("{STR_TAG}{s}"))),
            Value::Object(r) => self.encode_object(*r),
            Value::Weak(w) => self.encode_weak(w),
            Value::Array(a) => self.encode_array(a, depth + 1),
            Value::Dict(d) => self.encode_dict(d, depth + 1),
            Value::Callable(_) | Value::Handle(_) => Err(SnapError::contract(format!(
                "a {} value cannot be persisted",
                v.kind_name()
            ))),
        }
    }

    fn encode_object(&mut self, r: ObjRef) -> SnapResult<Slot> {
        if !self.resolver.is_alive(r) {
            // сильная ссылка на уже освобождённый объект ведёт себя как null
            warn!("encode: reference to freed {} written as nil", r);
            return Ok(Slot::Nil);
        }
        let id = self.resolver.resolve(r)?;
        Ok(Slot::Str(format!("{OBJ_TAG}{id}")))
    }

    fn encode_weak(&mut self, w: &WeakRef) -> SnapResult<Slot> {
        match w.target().filter(|r| self.resolver.is_alive(*r)) {
            Some(r) => {
                let id = self.resolver.resolve(r)?;
                Ok(Slot::Str(format!("{WEAK_TAG}{id}")))
            }
            None => {
                record_dead_weak();
                Ok(Slot::Str(WEAK_TAG.to_string()))
            }
        }
    }

    fn check_depth(&self, depth: usize) -> SnapResult<()> {
        if depth > self.max_depth {
            return Err(SnapError::contract(format!(
                "container nesting exceeds {} level(s)",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn encode_array(&mut self, a: &Array, depth: usize) -> SnapResult<Slot> {
        self.check_depth(depth)?;

        if a.elem().is_packable() && !a.is_empty() {
            let items = a
                .items()
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Ok(Slot::Bool(*b)),
                    Value::Int(n) => Ok(Slot::Int(*n)),
                    Value::Float(x) => finite(*x),
                    other => Err(SnapError::contract(format!(
                        "packed array holds a {}",
                        other.kind_name()
                    ))),
                })
                .collect::<SnapResult<Vec<_>>>()?;
            return Ok(Slot::Seq(items));
        }

        let mut out = Vec::with_capacity(a.len() + 1);
        for item in a.items() {
            out.push(self.encode_at(item, depth)?);
        }
        let (kind, type_id) = self.elem_meta(a.elem());
        out.push(Slot::Seq(vec![Slot::Int(kind), Slot::Int(type_id)]));
        Ok(Slot::Seq(out))
    }

    fn encode_dict(&mut self, d: &Dict, depth: usize) -> SnapResult<Slot> {
        self.check_depth(depth)?;

        let mut out = BTreeMap::new();
        for (k, v) in d.iter() {
            let key = self.encode_key(k)?;
            let val = self.encode_at(v, depth)?;
            out.insert(key, val);
        }
        let (kk, kt) = self.elem_meta(d.key_type());
        let (vk, vt) = self.elem_meta(d.value_type());
        out.insert(
            DICT_META_KEY.to_string(),
            Slot::Seq(vec![Slot::Int(kk), Slot::Int(kt), Slot::Int(vk), Slot::Int(vt)]),
        );
        Ok(Slot::Map(out))
    }

    fn encode_key(&mut self, k: &Key) -> SnapResult<String> {
        match k {
            Key::Str(s) => Ok(format!("{STR_TAG}{s}")),
            Key::Int(n) => Ok(format!("{INT_KEY_TAG}{n}")),
            Key::Bool(b) => Ok(format!("{BOOL_KEY_TAG}{}", if *b { 1 } else { 0 })),
            Key::Object(r) => {
                if !self.resolver.is_alive(*r) {
                    return Err(SnapError::contract(format!(
                        "dictionary key references freed {}",
                        r
                    )));
                }
                let id = self.resolver.resolve(*r)?;
                Ok(format!("{OBJ_TAG}{id}"))
            }
        }
    }

    fn elem_meta(&mut self, elem: &ElemType) -> (i64, i64) {
        let type_id = match elem {
            ElemType::Object(Some(path)) => self.resolver.type_id(path) as i64,
            _ => NO_TYPE,
        };
        (elem.kind_code(), type_id)
    }
}

#[inline]
fn finite(x: f64) -> SnapResult<Slot> {
    if x.is_finite() {
        Ok(Slot::Float(x))
    } else {
        Err(SnapError::contract(format!("float {} has no stored form", x)))
    }
}

pub struct ValueDecoder<'a, L: IdentityLookup + ?Sized> {
    lookup: &'a L,
    max_depth: usize,
}

impl<'a, L: IdentityLookup + ?Sized> ValueDecoder<'a, L> {
    pub fn new(lookup: &'a L, max_depth: usize) -> Self {
        Self { lookup, max_depth }
    }

    pub fn decode(&self, s: &Slot) -> SnapResult<Value> {
        self.decode_at(s, 0)
    }

    fn decode_at(&self, s: &Slot, depth: usize) -> SnapResult<Value> {
        match s {
            Slot::Nil => Ok(Value::Nil),
            Slot::Bool(b) => Ok(Value::Bool(*b)),
            Slot::Int(n) => Ok(Value::Int(*n)),
            Slot::Float(x) => Ok(Value::Float(*x)),
            Slot::Str(s) => self.decode_tagged(s),
            Slot::Seq(items) => {
                let depth = depth + 1;
                self.check_depth(depth)?;
                match items.split_last() {
                    Some((Slot::Seq(meta), elems)) => self.decode_explicit(elems, meta, depth),
                    _ => decode_packed(items),
                }
            }
            Slot::Map(m) => {
                let depth = depth + 1;
                self.check_depth(depth)?;
                self.decode_dict(m, depth)
            }
        }
    }

    fn check_depth(&self, depth: usize) -> SnapResult<()> {
        if depth > self.max_depth {
            return Err(SnapError::malformed(format!(
                "container nesting exceeds {} level(s)",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn object(&self, token: &str) -> SnapResult<ObjRef> {
        let id: u32 = token
            .parse()
            .map_err(|_| SnapError::malformed(format!("bad identity token '{}'", token)))?;
        self.lookup
            .object(id)
            .ok_or_else(|| SnapError::malformed(format!("identity {} is not in the record", id)))
    }

    fn decode_tagged(&self, s: &str) -> SnapResult<Value> {
        let mut chars = s.chars();
        match chars.next() {
            Some(STR_TAG) => Ok(Value::Str(chars.as_str().to_string())),
            Some(OBJ_TAG) => Ok(Value::Object(self.object(chars.as_str())?)),
            Some(WEAK_TAG) => {
                let rest = chars.as_str();
                if rest.is_empty() {
                    Ok(Value::Weak(WeakRef::dead()))
                } else {
                    Ok(Value::Weak(WeakRef::new(self.object(rest)?)))
                }
            }
            _ => Err(SnapError::malformed(format!("untagged string slot '{}'", s))),
        }
    }

    fn decode_elem(&self, kind: &Slot, type_id: &Slot) -> SnapResult<ElemType> {
        let (kind, type_id) = match (kind, type_id) {
            (Slot::Int(k), Slot::Int(t)) => (*k, *t),
            _ => {
                return Err(SnapError::malformed(format!(
                    "element metadata must be integers, got {:?}/{:?}",
                    kind, type_id
                )))
            }
        };
        Ok(match kind {
            ElemType::KIND_ANY => ElemType::Any,
            ElemType::KIND_BOOL => ElemType::Bool,
            ElemType::KIND_INT => ElemType::Int,
            ElemType::KIND_FLOAT => ElemType::Float,
            ElemType::KIND_STR => ElemType::Str,
            ElemType::KIND_OBJECT => {
                if type_id == NO_TYPE {
                    ElemType::Object(None)
                } else {
                    let path = u32::try_from(type_id)
                        .ok()
                        .and_then(|id| self.lookup.type_path(id))
                        .ok_or_else(|| {
                            SnapError::malformed(format!("element type id {} out of range", type_id))
                        })?;
                    ElemType::Object(Some(path.to_string()))
                }
            }
            ElemType::KIND_WEAK => ElemType::Weak,
            ElemType::KIND_ARRAY => ElemType::Array,
            ElemType::KIND_DICT => ElemType::Dict,
            other => {
                return Err(SnapError::malformed(format!("unknown element kind {}", other)))
            }
        })
    }

    fn decode_explicit(&self, elems: &[Slot], meta: &[Slot], depth: usize) -> SnapResult<Value> {
        if meta.len() != 2 {
            return Err(SnapError::malformed(format!(
                "array metadata has {} entries (expected 2)",
                meta.len()
            )));
        }
        let elem = self.decode_elem(&meta[0], &meta[1])?;
        let items = elems
            .iter()
            .map(|e| self.decode_at(e, depth))
            .collect::<SnapResult<Vec<_>>>()?;
        let a = Array::typed(elem, items).map_err(|e| SnapError::malformed(e.to_string()))?;
        Ok(Value::Array(a))
    }

    fn decode_dict(&self, m: &BTreeMap<String, Slot>, depth: usize) -> SnapResult<Value> {
        let meta = match m.get(DICT_META_KEY) {
            Some(Slot::Seq(meta)) if meta.len() == 4 => meta,
            _ => return Err(SnapError::malformed("dictionary without type metadata")),
        };
        let key_t = self.decode_elem(&meta[0], &meta[1])?;
        let val_t = self.decode_elem(&meta[2], &meta[3])?;
        let mut d = Dict::typed(key_t, val_t).map_err(|e| SnapError::malformed(e.to_string()))?;

        for (k, v) in m.iter().filter(|(k, _)| k.as_str() != DICT_META_KEY) {
            let key = self.decode_key(k)?;
            let val = self.decode_at(v, depth)?;
            d.insert(key, val)
                .map_err(|e| SnapError::malformed(e.to_string()))?;
        }
        Ok(Value::Dict(d))
    }

    fn decode_key(&self, k: &str) -> SnapResult<Key> {
        let mut chars = k.chars();
        let bad = || SnapError::malformed(format!("bad dictionary key '{}'", k));
        match chars.next() {
            Some(STR_TAG) => Ok(Key::Str(chars.as_str().to_string())),
            Some(INT_KEY_TAG) => chars.as_str().parse().map(Key::Int).map_err(|_| bad()),
            Some(BOOL_KEY_TAG) => match chars.as_str() {
                "1" => Ok(Key::Bool(true)),
                "0" => Ok(Key::Bool(false)),
                _ => Err(bad()),
            },
            Some(OBJ_TAG) => Ok(Key::Object(self.object(chars.as_str())?)),
            _ => Err(bad()),
        }
    }
}

/// Быстрый путь: последовательность скаляров одного вида.
fn decode_packed(items: &[Slot]) -> SnapResult<Value> {
    let first = match items.first() {
        Some(s) => s,
        None => return Ok(Value::Array(Array::untyped(Vec::new()))),
    };
    let same = |pred: fn(&Slot) -> bool| items.iter().all(pred);
    let array = match first {
        Slot::Bool(_) if same(|s| matches!(s, Slot::Bool(_))) => {
            Array::bools(items.iter().filter_map(|s| match s {
                Slot::Bool(b) => Some(*b),
                _ => None,
            }))
        }
        Slot::Int(_) if same(|s| matches!(s, Slot::Int(_))) => {
            Array::ints(items.iter().filter_map(|s| match s {
                Slot::Int(n) => Some(*n),
                _ => None,
            }))
        }
        Slot::Float(_) if same(|s| matches!(s, Slot::Float(_))) => {
            Array::floats(items.iter().filter_map(|s| match s {
                Slot::Float(x) => Some(*x),
                _ => None,
            }))
        }
        _ => {
            return Err(SnapError::malformed(
                "sequence is neither packed scalars nor carries element metadata",
            ))
        }
    };
    Ok(Value::Array(array))
}
