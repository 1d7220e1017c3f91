//! cli/demo — небольшой пример мира для команды `demo`.
//!
//! Universe (anchored)
//!   ├── Sol (anchored system)
//!   │     ├── Earth (ephemeral body) ── orbit -> <Orbit> (freestanding)
//!   │     │     └── Moon (ephemeral body)
//!   │     └── Mars (ephemeral body)
//!   ├── Vega (anchored system)
//!   └── Camera (не сохраняется)

use crate::error::SnapResult;
use crate::graph::{ObjectGraph, TypeDecl, TypeRegistry};
use crate::host::PersistMode;
use crate::value::{Array, Dict, ElemType, ObjRef, Value};

pub const UNIVERSE_TYPE: &str = "res://universe.scene";
pub const SYSTEM_TYPE: &str = "res://system.scene";
pub const BODY_TYPE: &str = "res://body.type";
pub const ORBIT_TYPE: &str = "res://orbit.type";
pub const CAMERA_TYPE: &str = "res://camera.type";

pub fn demo_registry() -> SnapResult<TypeRegistry> {
    TypeRegistry::new()
        .with(
            TypeDecl::new(UNIVERSE_TYPE)
                .mode(PersistMode::Anchored)
                .group(["seed", "tick"])
                .default_value("tick", 0),
        )?
        .with(
            TypeDecl::new(SYSTEM_TYPE)
                .mode(PersistMode::Anchored)
                .group(["star_class"]),
        )?
        .with(
            TypeDecl::new(BODY_TYPE)
                .mode(PersistMode::Ephemeral)
                .group(["name", "mass", "tags"])
                .group(["orbit", "survey"]),
        )?
        .with(
            TypeDecl::new(ORBIT_TYPE)
                .mode(PersistMode::Ephemeral)
                .group(["radius", "period", "focus"]),
        )?
        .with(TypeDecl::new(CAMERA_TYPE).group(["zoom"]))
}

/// Якорная (anchored) часть мира; одинакова в каждом сеансе.
pub fn build_anchor(g: &mut ObjectGraph) -> SnapResult<ObjRef> {
    let universe = g.spawn(UNIVERSE_TYPE, "Universe")?;
    for (name, class) in [("Sol", "G2V"), ("Vega", "A0V")] {
        let sys = g.spawn(SYSTEM_TYPE, name)?;
        g.set(sys, "star_class", class)?;
        g.add_child(universe, sys)?;
    }
    let camera = g.spawn(CAMERA_TYPE, "Camera")?;
    g.set(camera, "zoom", 2.0)?;
    g.add_child(universe, camera)?;
    Ok(universe)
}

/// Процедурная (ephemeral) часть мира под Sol.
pub fn populate(g: &mut ObjectGraph, universe: ObjRef) -> SnapResult<()> {
    let sol = g
        .find(universe, "Sol")
        .ok_or_else(|| crate::error::SnapError::resolution("demo anchor has no 'Sol'"))?;
    g.set(universe, "seed", 1977)?;
    g.set(universe, "tick", 42)?;

    let earth = body(g, sol, "Earth", 5.97, &["home", "water"])?;
    let moon = body(g, earth, "Moon", 0.073, &["tidal"])?;
    let mars = body(g, sol, "Mars", 0.642, &[])?;

    let orbit = g.spawn(ORBIT_TYPE, "Orbit")?;
    g.set(orbit, "radius", 1.0)?;
    g.set(orbit, "period", Array::floats([365.25, 0.0]))?;
    g.set(orbit, "focus", g.weak(sol))?;
    g.set(earth, "orbit", orbit)?;

    let mut survey = Dict::typed(ElemType::Str, ElemType::Any)?;
    survey.insert("neighbour", mars)?;
    survey.insert("satellites", Array::typed(ElemType::Object(Some(BODY_TYPE.into())), vec![moon.into()])?)?;
    survey.insert("notes", Array::untyped(vec![Value::from("blue"), Value::Int(3), Value::Nil]))?;
    g.set(earth, "survey", survey)?;
    Ok(())
}

fn body(g: &mut ObjectGraph, parent: ObjRef, name: &str, mass: f64, tags: &[&str]) -> SnapResult<ObjRef> {
    let b = g.spawn(BODY_TYPE, name)?;
    g.set(b, "mass", mass)?;
    let tags = tags.iter().map(|t| Value::from(*t)).collect();
    g.set(b, "tags", Array::typed(ElemType::Str, tags)?)?;
    g.add_child(parent, b)?;
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_world_shape() {
        let mut g = ObjectGraph::new(demo_registry().unwrap());
        let u = build_anchor(&mut g).unwrap();
        populate(&mut g, u).unwrap();
        assert!(g.find(u, "Sol/Earth/Moon").is_some());
        assert!(g.find(u, "Sol/Mars").is_some());
        assert_eq!(g.children(u).len(), 3);
    }
}
