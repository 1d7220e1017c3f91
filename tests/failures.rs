// tests/failures.rs
//
// Таксономия ошибок:
// - Contract: запрещённые значения, anchored под ephemeral, ссылка на структурный
//   объект вне дерева (строгий режим), свободный не-ephemeral объект;
// - Resolution: нет якоря/пути/типа — якорь не меняется;
// - Malformed: испорченная запись — созданные объекты освобождаются.

use anyhow::{anyhow, Result};

use SnapGraph::codec::{Placement, Slot, SnapshotRecord};
use SnapGraph::{
    encode_snapshot, metrics, restore_snapshot, ObjRef, ObjectGraph, PersistMode, SnapConfig,
    SnapError, TypeDecl, TypeRegistry, Value,
};

fn registry() -> Result<TypeRegistry> {
    Ok(TypeRegistry::new()
        .with(TypeDecl::new("res://level").mode(PersistMode::Anchored).group(["title", "boss"]))?
        .with(TypeDecl::new("res://spawner").mode(PersistMode::Anchored).group(["rate"]))?
        .with(
            TypeDecl::new("res://mob.type")
                .mode(PersistMode::Ephemeral)
                .group(["name", "hp", "ally"]),
        )?
        .with(TypeDecl::new("res://plain"))?)
}

fn level(g: &mut ObjectGraph) -> Result<ObjRef> {
    let lvl = g.spawn("res://level", "Level")?;
    let sp = g.spawn("res://spawner", "Spawner")?;
    g.add_child(lvl, sp)?;
    Ok(lvl)
}

fn populated() -> Result<(ObjectGraph, ObjRef, SnapshotRecord)> {
    let mut g = ObjectGraph::new(registry()?);
    let lvl = level(&mut g)?;
    let sp = g.find(lvl, "Spawner").ok_or_else(|| anyhow!("no spawner"))?;
    let a = g.spawn("res://mob.type", "A")?;
    let b = g.spawn("res://mob.type", "B")?;
    g.add_child(sp, a)?;
    g.add_child(sp, b)?;
    g.set(a, "ally", b)?;
    g.set(lvl, "title", "Caves")?;
    let rec = encode_snapshot(&g, lvl, &SnapConfig::default())?;
    Ok((g, lvl, rec))
}

fn expect_err<T: std::fmt::Debug>(r: Result<T, SnapError>) -> Result<SnapError> {
    match r {
        Ok(v) => Err(anyhow!("expected an error, got {:?}", v)),
        Err(e) => Ok(e),
    }
}

#[test]
fn disallowed_values_are_contract_violations() -> Result<()> {
    let mut g = ObjectGraph::new(registry()?);
    let lvl = level(&mut g)?;
    g.set(lvl, "boss", Value::Handle(7))?;
    let e = expect_err(encode_snapshot(&g, lvl, &SnapConfig::default()))?;
    assert!(e.is_contract(), "{e}");
    Ok(())
}

#[test]
fn anchored_under_ephemeral_is_rejected() -> Result<()> {
    let mut g = ObjectGraph::new(registry()?);
    let lvl = level(&mut g)?;
    let m = g.spawn("res://mob.type", "M")?;
    g.add_child(lvl, m)?;
    let sp = g.spawn("res://spawner", "Nested")?;
    g.add_child(m, sp)?;
    assert!(expect_err(encode_snapshot(&g, lvl, &SnapConfig::default()))?.is_contract());
    Ok(())
}

#[test]
fn structural_reference_outside_tree() -> Result<()> {
    let mut g = ObjectGraph::new(registry()?);
    let lvl = level(&mut g)?;
    let other = level(&mut g)?;
    let sp = g.find(other, "Spawner").ok_or_else(|| anyhow!("no spawner"))?;
    let foreign = g.spawn("res://mob.type", "Foreign")?;
    g.add_child(sp, foreign)?;
    g.set(lvl, "boss", foreign)?;

    let strict = SnapConfig::default();
    assert!(expect_err(encode_snapshot(&g, lvl, &strict))?.is_contract());

    // ослабленный режим: эфемерный объект становится свободным
    let relaxed = SnapConfig::builder().strict_refs(false).build();
    let rec = encode_snapshot(&g, lvl, &relaxed)?;
    assert_eq!(rec.freestanding.len(), 1);

    // anchored-объект вне дерева не продвигается никогда
    g.set(lvl, "boss", sp)?;
    assert!(expect_err(encode_snapshot(&g, lvl, &relaxed))?.is_contract());
    Ok(())
}

#[test]
fn freestanding_must_be_ephemeral() -> Result<()> {
    let mut g = ObjectGraph::new(registry()?);
    let lvl = level(&mut g)?;
    let stray = g.spawn("res://plain", "Stray")?;
    g.set(lvl, "boss", stray)?;
    assert!(expect_err(encode_snapshot(&g, lvl, &SnapConfig::default()))?.is_contract());
    Ok(())
}

#[test]
fn missing_anchor_path_leaves_anchor_untouched() -> Result<()> {
    let (_, _, rec) = populated()?;

    let mut g2 = ObjectGraph::new(registry()?);
    let lvl2 = g2.spawn("res://level", "Level")?;
    g2.set(lvl2, "title", "Untouched")?;
    let live = g2.live_count();

    let e = expect_err(restore_snapshot(&mut g2, &rec, Some(lvl2), &SnapConfig::default()))?;
    assert!(e.is_resolution(), "{e}");
    assert_eq!(g2.get(lvl2, "title"), Some(Value::from("Untouched")));
    assert_eq!(g2.live_count(), live);
    Ok(())
}

#[test]
fn anchored_path_to_non_anchored_object() -> Result<()> {
    let (_, _, rec) = populated()?;
    let mut g2 = ObjectGraph::new(registry()?);
    let lvl2 = g2.spawn("res://level", "Level")?;
    let sp = g2.spawn("res://spawner", "Spawner")?;
    g2.set_mode(sp, PersistMode::None)?;
    g2.add_child(lvl2, sp)?;
    let e = expect_err(restore_snapshot(&mut g2, &rec, Some(lvl2), &SnapConfig::default()))?;
    assert!(e.is_resolution());
    Ok(())
}

#[test]
fn unknown_type_is_resolution_failure() -> Result<()> {
    let (_, _, mut rec) = populated()?;
    rec.type_paths[0] = "res://gone.type".into();
    let mut g2 = ObjectGraph::new(registry()?);
    let lvl2 = level(&mut g2)?;
    let live = g2.live_count();
    let e = expect_err(restore_snapshot(&mut g2, &rec, Some(lvl2), &SnapConfig::default()))?;
    assert!(e.is_resolution());
    assert_eq!(g2.live_count(), live);
    Ok(())
}

#[test]
fn malformed_value_rolls_back() -> Result<()> {
    let (_, _, mut rec) = populated()?;
    // "ally" последнего моба -> несуществующий id
    let last = rec.structural.len() - 1;
    rec.structural[last].groups[0][2] = Slot::Str("*999".into());

    let mut g2 = ObjectGraph::new(registry()?);
    let lvl2 = level(&mut g2)?;
    let live = g2.live_count();
    let before = metrics::snapshot();

    let e = expect_err(restore_snapshot(&mut g2, &rec, Some(lvl2), &SnapConfig::default()))?;
    assert!(e.is_malformed(), "{e}");
    assert_eq!(g2.live_count(), live, "fresh mobs must be freed");
    assert_eq!(g2.get(lvl2, "title"), Some(Value::Nil));

    let after = metrics::snapshot();
    assert!(after.restore_rollbacks >= before.restore_rollbacks + 1);
    assert!(after.objects_instantiated >= before.objects_instantiated + 2);
    Ok(())
}

#[test]
fn structurally_broken_records() -> Result<()> {
    let (_, _, rec) = populated()?;
    let mut g2 = ObjectGraph::new(registry()?);
    let lvl2 = level(&mut g2)?;

    let mut bad = rec.clone();
    bad.object_count += 1;
    assert!(expect_err(restore_snapshot(&mut g2, &bad, Some(lvl2), &SnapConfig::default()))?
        .is_malformed());

    let mut bad = rec.clone();
    if let Placement::Ephemeral { parent, .. } = &mut bad.structural[2].placement {
        *parent = 5;
    }
    assert!(expect_err(restore_snapshot(&mut g2, &bad, Some(lvl2), &SnapConfig::default()))?
        .is_malformed());

    let mut bad = rec.clone();
    bad.structural.clear();
    bad.object_count = 0;
    assert!(expect_err(restore_snapshot(&mut g2, &bad, Some(lvl2), &SnapConfig::default()))?
        .is_malformed());

    assert!(g2.children(g2.children(lvl2)[0]).is_empty());
    Ok(())
}

#[test]
fn anchored_record_requires_anchor() -> Result<()> {
    let (_, _, rec) = populated()?;
    let mut g2 = ObjectGraph::new(registry()?);
    let e = expect_err(restore_snapshot(&mut g2, &rec, None, &SnapConfig::default()))?;
    assert!(e.is_resolution());

    let dead = level(&mut g2)?;
    g2.free(dead);
    let e = expect_err(restore_snapshot(&mut g2, &rec, Some(dead), &SnapConfig::default()))?;
    assert!(e.is_resolution());
    Ok(())
}

#[test]
fn encode_depth_limit() -> Result<()> {
    let mut g = ObjectGraph::new(registry()?);
    let lvl = level(&mut g)?;
    let mut v = Value::Array(SnapGraph::Array::untyped(vec![]));
    for _ in 0..10 {
        v = Value::Array(SnapGraph::Array::untyped(vec![v]));
    }
    g.set(lvl, "boss", v)?;
    let shallow = SnapConfig::default().with_max_depth(4);
    assert!(expect_err(encode_snapshot(&g, lvl, &shallow))?.is_contract());
    let rec = encode_snapshot(&g, lvl, &SnapConfig::default())?;

    let mut g2 = ObjectGraph::new(registry()?);
    let lvl2 = level(&mut g2)?;
    let e = expect_err(restore_snapshot(&mut g2, &rec, Some(lvl2), &shallow))?;
    assert!(e.is_malformed());
    Ok(())
}
