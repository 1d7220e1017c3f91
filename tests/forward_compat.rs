// tests/forward_compat.rs
//
// Группы полей расширяются аддитивно:
// - запись с [A] ложится на тип [A, B] (B остаётся по умолчанию);
// - запись с [A, B] ложится на тип только с [A] (B игнорируется);
// - укороченная группа в записи — не ошибка;
// - удлинённая группа (больше полей, чем объявлено) — Malformed.

use anyhow::{anyhow, Result};

use SnapGraph::codec::Slot;
use SnapGraph::{
    encode_snapshot, restore_snapshot, ObjRef, ObjectGraph, PersistMode, SnapConfig, TypeDecl,
    TypeRegistry, Value,
};

const CRATE: &str = "res://crate.type";

fn v1() -> Result<TypeRegistry> {
    Ok(TypeRegistry::new()
        .with(TypeDecl::new("res://room").mode(PersistMode::Anchored))?
        .with(
            TypeDecl::new(CRATE)
                .mode(PersistMode::Ephemeral)
                .group(["name", "loot"]),
        )?)
}

fn v2() -> Result<TypeRegistry> {
    Ok(TypeRegistry::new()
        .with(TypeDecl::new("res://room").mode(PersistMode::Anchored))?
        .with(
            TypeDecl::new(CRATE)
                .mode(PersistMode::Ephemeral)
                .group(["name", "loot", "weight"])
                .group(["locked"])
                .default_value("weight", 1.5)
                .default_value("locked", true),
        )?)
}

fn room_with_crate(reg: TypeRegistry) -> Result<(ObjectGraph, ObjRef, ObjRef)> {
    let mut g = ObjectGraph::new(reg);
    let room = g.spawn("res://room", "Room")?;
    let c = g.spawn(CRATE, "Crate")?;
    g.add_child(room, c)?;
    g.set(c, "loot", 12)?;
    Ok((g, room, c))
}

fn restored_crate(g: &ObjectGraph, room: ObjRef) -> Result<ObjRef> {
    g.find(room, "Crate").ok_or_else(|| anyhow!("crate was not restored"))
}

#[test]
fn old_record_onto_grown_type() -> Result<()> {
    let (g, room, _) = room_with_crate(v1()?)?;
    let rec = encode_snapshot(&g, room, &SnapConfig::default())?;
    assert_eq!(rec.structural[1].groups.len(), 1);
    assert_eq!(rec.structural[1].groups[0].len(), 2);

    let mut g2 = ObjectGraph::new(v2()?);
    let room2 = g2.spawn("res://room", "Room")?;
    restore_snapshot(&mut g2, &rec, Some(room2), &SnapConfig::default())?;

    let c = restored_crate(&g2, room2)?;
    assert_eq!(g2.get(c, "loot"), Some(Value::Int(12)));
    assert_eq!(g2.get(c, "weight"), Some(Value::Float(1.5)));
    assert_eq!(g2.get(c, "locked"), Some(Value::Bool(true)));
    Ok(())
}

#[test]
fn new_record_onto_older_type() -> Result<()> {
    let (mut g, room, c) = room_with_crate(v2()?)?;
    g.set(c, "locked", false)?;
    let rec = encode_snapshot(&g, room, &SnapConfig::default())?;
    assert_eq!(rec.structural[1].groups.len(), 2);

    // трёхпольная группа 0 не влезает в v1 ("weight" не объявлен)
    let mut g2 = ObjectGraph::new(v1()?);
    let room2 = g2.spawn("res://room", "Room")?;
    let err = restore_snapshot(&mut g2, &rec, Some(room2), &SnapConfig::default())
        .err()
        .ok_or_else(|| anyhow!("oversized group must be rejected"))?;
    assert!(err.is_malformed());
    assert!(g2.children(room2).is_empty());

    // лишняя хвостовая группа сама по себе игнорируется
    let mut trimmed = rec.clone();
    trimmed.structural[1].groups[0].truncate(2);
    restore_snapshot(&mut g2, &trimmed, Some(room2), &SnapConfig::default())?;
    let c2 = restored_crate(&g2, room2)?;
    assert_eq!(g2.get(c2, "loot"), Some(Value::Int(12)));
    assert_eq!(g2.get(c2, "locked"), None);
    Ok(())
}

#[test]
fn short_group_leaves_tail_default() -> Result<()> {
    let (g, room, _) = room_with_crate(v2()?)?;
    let mut rec = encode_snapshot(&g, room, &SnapConfig::default())?;
    rec.structural[1].groups[0].truncate(1);
    rec.structural[1].groups.truncate(1);
    assert_eq!(rec.structural[1].groups[0], vec![Slot::Str("!Crate".into())]);

    let mut g2 = ObjectGraph::new(v2()?);
    let room2 = g2.spawn("res://room", "Room")?;
    restore_snapshot(&mut g2, &rec, Some(room2), &SnapConfig::default())?;
    let c = restored_crate(&g2, room2)?;
    assert_eq!(g2.get(c, "loot"), Some(Value::Nil));
    assert_eq!(g2.get(c, "locked"), Some(Value::Bool(true)));
    Ok(())
}
