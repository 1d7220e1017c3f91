use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::codec::{SnapCodec, SnapshotRecord};
use crate::config::SnapConfig;
use crate::graph::ObjectGraph;
use crate::metrics;
use crate::store::{read_envelope, read_record, write_record};

pub mod demo;

#[derive(Parser, Debug)]
#[command(
    name = "snapgraph",
    version,
    about = "Object-graph snapshot codec: inspect, validate and demo stored records",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Сводка по сохранённой записи
    Inspect {
        #[arg(long)]
        file: PathBuf,
        /// Вывести сводку как JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Структурная проверка записи
    Validate {
        #[arg(long)]
        file: PathBuf,
    },
    /// Построить пример мира, сохранить, восстановить и сравнить
    Demo {
        #[arg(long, default_value = "snapgraph-demo.json")]
        out: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = SnapConfig::from_env();
    match cli.cmd {
        Cmd::Inspect { file, json } => inspect(&file, json, &cfg)?,
        Cmd::Validate { file } => {
            let rec = read_record(&file, &cfg)?;
            rec.validate()
                .with_context(|| format!("validate {}", file.display()))?;
            println!("OK: {} ({} object(s))", file.display(), rec.object_count);
        }
        Cmd::Demo { out } => demo(&out, cfg)?,
    }
    Ok(())
}

fn inspect(file: &Path, json: bool, cfg: &SnapConfig) -> Result<()> {
    let env = read_envelope(file, cfg)?;
    let st = env.record.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&st)?);
        return Ok(());
    }
    println!("Record {}", file.display());
    println!("  format       = {}", env.format);
    println!("  created_ms   = {}", env.created_unix_ms);
    println!("  label        = {}", env.label.as_deref().unwrap_or("-"));
    println!("  crc32        = {:08x}", env.crc32);
    println!("  objects      = {}", st.objects);
    println!("    anchored   = {}", st.anchored);
    println!("    ephemeral  = {}", st.ephemeral);
    println!("    freestand. = {}", st.freestanding);
    println!("  types        = {}", st.types);
    println!("  fields       = {}", st.fields);
    for (ty, n) in &st.per_type {
        println!("    {:<24} {}", ty, n);
    }
    Ok(())
}

fn demo(out: &Path, cfg: SnapConfig) -> Result<()> {
    let codec = SnapCodec::new(cfg.clone());

    let mut g = ObjectGraph::new(demo::demo_registry()?);
    let universe = demo::build_anchor(&mut g)?;
    demo::populate(&mut g, universe)?;
    let rec = codec.encode(&g, universe)?;
    let path = write_record(out, &rec, &cfg, Some("demo".to_string()))?;
    println!(
        "Encoded {} object(s) -> {}",
        rec.object_count,
        path.display()
    );

    // новый сеанс: только якорная часть мира
    let back = read_record(&path, &cfg)?;
    let mut g2 = ObjectGraph::new(demo::demo_registry()?);
    let universe2 = demo::build_anchor(&mut g2)?;
    codec.restore(&mut g2, &back, Some(universe2))?;
    let again = codec.encode(&g2, universe2)?;

    report_stability(&rec, &again)?;
    let m = metrics::snapshot();
    println!(
        "Metrics: encodes={} restores={} instantiated={} fields={} freestanding={}",
        m.encodes_total,
        m.restores_total,
        m.objects_instantiated,
        m.fields_replayed,
        m.freestanding_discovered
    );
    Ok(())
}

fn report_stability(first: &SnapshotRecord, second: &SnapshotRecord) -> Result<()> {
    if first != second {
        return Err(anyhow!(
            "re-encoded record differs: {} vs {} object(s)",
            first.object_count,
            second.object_count
        ));
    }
    println!("Restored and re-encoded: identical record ({} object(s))", second.object_count);
    Ok(())
}
