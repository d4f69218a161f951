//! Lifting procedures from a raw image.

use anyhow::{bail, Context, Result};
use clap::Args;
use rtlift_arch::{lift_procedures_parallel, LiftConfig, LiftedProcedure, NullHost};
use serde::Serialize;
use std::path::PathBuf;

use crate::{create_architecture, open_image, parse_address};

/// Arguments of `rtlift lift`.
#[derive(Args)]
pub struct LiftArgs {
    /// Path to the raw code image
    image: PathBuf,

    /// Architecture name
    #[arg(short = 'A', long, default_value = "x86-protected-32")]
    arch: String,

    /// Load address of the image (e.g. 401000 or 0800:0100)
    #[arg(short, long)]
    base: String,

    /// Procedure entry points; defaults to the load address
    #[arg(short, long)]
    entry: Vec<String>,

    /// What to do with instructions that cannot be lifted: "partial" or "abort"
    #[arg(short, long, default_value = "partial")]
    policy: String,

    /// Maximum number of instructions lifted per procedure
    #[arg(short = 'n', long, default_value = "10000")]
    max_instructions: usize,

    /// Keep lifting past returns and unconditional jumps
    #[arg(long)]
    no_stop: bool,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ProcedureView {
    name: String,
    entry: String,
    end: String,
    partial: bool,
    stack_delta: i32,
    identifiers: Vec<String>,
    clusters: Vec<ClusterView>,
}

#[derive(Serialize)]
struct ClusterView {
    address: String,
    length: usize,
    statements: Vec<String>,
}

impl From<&LiftedProcedure> for ProcedureView {
    fn from(lifted: &LiftedProcedure) -> Self {
        Self {
            name: lifted.name.clone(),
            entry: lifted.entry.to_string(),
            end: lifted.end_address().to_string(),
            partial: lifted.is_partial(),
            stack_delta: lifted.signature.stack_delta,
            identifiers: lifted.frame.identifiers().iter().map(|id| id.to_string()).collect(),
            clusters: lifted
                .clusters
                .iter()
                .map(|c| ClusterView {
                    address: c.address.to_string(),
                    length: c.length,
                    statements: c.statements.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
        }
    }
}

/// Handle `rtlift lift`.
pub fn handle_lift_command(args: LiftArgs) -> Result<()> {
    let arch = create_architecture(&args.arch)?;
    let mem = open_image(arch.as_ref(), &args.image, &args.base)?;

    let Some(policy) = LiftConfig::parse_policy(&args.policy) else {
        bail!("Unknown policy '{}'. Use \"partial\" or \"abort\"", args.policy);
    };
    let config = LiftConfig::new()
        .with_unsupported(policy)
        .with_max_instructions(args.max_instructions)
        .with_stop_at_unconditional_transfer(!args.no_stop);

    let entries = if args.entry.is_empty() {
        vec![mem.base]
    } else {
        args.entry
            .iter()
            .map(|e| parse_address(arch.as_ref(), e))
            .collect::<Result<Vec<_>>>()?
    };

    let results = lift_procedures_parallel(arch.as_ref(), &mem, &entries, &NullHost, &config);
    let mut lifted = Vec::with_capacity(results.len());
    for (entry, result) in entries.iter().zip(results) {
        lifted.push(result.with_context(|| format!("Failed to lift procedure at {}", entry))?);
    }

    if args.json {
        let views: Vec<ProcedureView> = lifted.iter().map(ProcedureView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    for (i, procedure) in lifted.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_procedure(procedure);
    }
    Ok(())
}

fn print_procedure(lifted: &LiftedProcedure) {
    println!("// {} ({} .. {})", lifted.name, lifted.entry, lifted.end_address());
    if lifted.is_partial() {
        println!("// warning: contains instructions that could not be lifted");
    }
    println!("// {}", lifted.signature);
    for cluster in &lifted.clusters {
        println!("{}", cluster);
    }
}
