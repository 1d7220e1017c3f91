//! codec/teardown — снос эфемерной части дерева перед restore.
//!
//! Обходит структурное дерево от root: эфемерные поддеревья освобождаются
//! целиком, спуск идёт только через ANCHORED-объекты. Сам root не освобождается.
//!
//! Вместе с поддеревьями уходят и свободные объекты (без родителя, EPHEMERAL),
//! до которых снимок этого якоря дотянулся бы по ссылкам: сильным, слабым и
//! ключам словарей. Иначе каждый restore поверх старого графа плодил бы копии.

use std::collections::HashSet;

use log::debug;

use crate::host::{PersistHost, PersistMode};
use crate::value::{Key, ObjRef, Value};

/// Освободить все эфемерные структурные поддеревья под `root` и свободные
/// объекты, достижимые из их полей и полей anchored-объектов.
/// Возвращает число освобождённых корней (поддеревья + свободные).
pub fn free_ephemeral<H: PersistHost + ?Sized>(host: &mut H, root: ObjRef) -> usize {
    if !host.is_alive(root) {
        return 0;
    }

    let mut doomed = Vec::new();
    // объекты, чьи поля просматриваются в поисках свободных
    let mut holders = vec![root];
    let mut stack = vec![(root, false)];
    while let Some((obj, ephemeral)) = stack.pop() {
        for child in host.children(obj) {
            match host.persist_mode(child) {
                PersistMode::Ephemeral => {
                    if !ephemeral {
                        doomed.push(child);
                    }
                    holders.push(child);
                    stack.push((child, true));
                }
                PersistMode::Anchored => {
                    holders.push(child);
                    stack.push((child, ephemeral));
                }
                PersistMode::None => {}
            }
        }
    }

    let strays = reachable_freestanding(&*host, root, holders);

    for obj in doomed.iter().chain(&strays) {
        host.free(*obj);
    }
    debug!(
        "teardown: freed {} ephemeral subtree(s) and {} freestanding object(s) under {}",
        doomed.len(),
        strays.len(),
        root
    );
    doomed.len() + strays.len()
}

fn reachable_freestanding<H: PersistHost + ?Sized>(
    host: &H,
    root: ObjRef,
    mut pending: Vec<ObjRef>,
) -> Vec<ObjRef> {
    let mut seen: HashSet<ObjRef> = pending.iter().copied().collect();
    let mut found = Vec::new();
    let mut refs = Vec::new();

    while let Some(obj) = pending.pop() {
        for name in host.field_groups(obj).into_iter().flatten() {
            if let Some(v) = host.get_field(obj, &name) {
                collect_refs(&v, &mut refs);
            }
        }
        for r in refs.drain(..) {
            if r == root || !seen.insert(r) || !host.is_alive(r) {
                continue;
            }
            if host.parent(r).is_none() && host.persist_mode(r) == PersistMode::Ephemeral {
                found.push(r);
                pending.push(r);
            }
        }
    }
    found
}

fn collect_refs(v: &Value, out: &mut Vec<ObjRef>) {
    match v {
        Value::Object(r) => out.push(*r),
        Value::Weak(w) => out.extend(w.target()),
        Value::Array(a) => {
            for item in a.items() {
                collect_refs(item, out);
            }
        }
        Value::Dict(d) => {
            for (k, item) in d.iter() {
                if let Key::Object(r) = k {
                    out.push(*r);
                }
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ObjectGraph, TypeDecl, TypeRegistry};
    use crate::value::{Array, Dict};

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(TypeDecl::new("a").mode(PersistMode::Anchored).group(["link"]))
            .unwrap()
            .with(TypeDecl::new("e").mode(PersistMode::Ephemeral).group(["link"]))
            .unwrap()
            .with(TypeDecl::new("p").group(["link"]))
            .unwrap()
    }

    #[test]
    fn frees_ephemeral_keeps_anchored_and_plain() {
        let mut g = ObjectGraph::new(registry());
        let root = g.spawn("a", "Root").unwrap();
        let keep = g.spawn("a", "Keep").unwrap();
        let e1 = g.spawn("e", "E1").unwrap();
        let e1c = g.spawn("e", "E1c").unwrap();
        let e2 = g.spawn("e", "E2").unwrap();
        let plain = g.spawn("p", "Plain").unwrap();
        g.add_child(root, keep).unwrap();
        g.add_child(root, e1).unwrap();
        g.add_child(e1, e1c).unwrap();
        g.add_child(keep, e2).unwrap();
        g.add_child(root, plain).unwrap();

        assert_eq!(free_ephemeral(&mut g, root), 2);
        assert!(g.is_alive(root));
        assert!(g.is_alive(keep));
        assert!(g.is_alive(plain));
        assert!(!g.is_alive(e1));
        assert!(!g.is_alive(e1c));
        assert!(!g.is_alive(e2));
        assert_eq!(g.children(root), &[keep, plain]);
    }

    #[test]
    fn frees_freestanding_reachable_by_reference() {
        let mut g = ObjectGraph::new(registry());
        let root = g.spawn("a", "Root").unwrap();
        let e = g.spawn("e", "E").unwrap();
        let deep = g.spawn("e", "Deep").unwrap();
        g.add_child(root, e).unwrap();
        g.add_child(e, deep).unwrap();

        // root -> h1 -> h2 -> h1 (цикл), deep ~> h3 (weak), h3 как ключ словаря -> h4
        let h1 = g.spawn("e", "H1").unwrap();
        let h2 = g.spawn("e", "H2").unwrap();
        let h3 = g.spawn("e", "H3").unwrap();
        let h4 = g.spawn("e", "H4").unwrap();
        g.set(root, "link", h1).unwrap();
        g.set(h1, "link", Array::untyped(vec![h2.into()])).unwrap();
        g.set(h2, "link", h1).unwrap();
        g.set(deep, "link", g.weak(h3)).unwrap();
        let mut d = Dict::untyped();
        d.insert(h4, 1i64).unwrap();
        g.set(h3, "link", d).unwrap();

        // не ephemeral или не достижимы — остаются
        let plain = g.spawn("p", "Plain").unwrap();
        let lonely = g.spawn("e", "Lonely").unwrap();
        g.set(h4, "link", plain).unwrap();

        assert_eq!(free_ephemeral(&mut g, root), 5);
        for h in [e, deep, h1, h2, h3, h4] {
            assert!(!g.is_alive(h));
        }
        assert!(g.is_alive(root));
        assert!(g.is_alive(plain));
        assert!(g.is_alive(lonely));

        assert_eq!(free_ephemeral(&mut g, root), 0);
    }
}
