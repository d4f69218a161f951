//! Driving the rewriter over whole procedures.
//!
//! A lift owns its [`ProcessorState`] and [`Frame`]. Procedures share
//! nothing else, so many can be lifted in parallel.

use crate::{LiftError, ProcessorArchitecture, ProcessorState, RewriterHost};
use rayon::prelude::*;
use rtlift_core::{Address, Frame, FunctionSignature, MemoryArea, RtlInstructionCluster, RtlStatement};

/// What to do when an instruction cannot be lifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsupportedPolicy {
    /// Stop and return the error.
    Abort,
    /// Emit an invalid cluster covering the instruction and continue.
    #[default]
    MarkPartial,
}

/// Configuration for lifting a procedure.
#[derive(Debug, Clone)]
pub struct LiftConfig {
    /// Upper bound on clusters produced for one procedure.
    pub max_instructions: usize,
    pub unsupported: UnsupportedPolicy,
    /// Stop at the first return or unconditional jump.
    pub stop_at_unconditional_transfer: bool,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            max_instructions: 10_000,
            unsupported: UnsupportedPolicy::default(),
            stop_at_unconditional_transfer: true,
        }
    }
}

impl LiftConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_instructions(mut self, max: usize) -> Self {
        self.max_instructions = max;
        self
    }

    pub fn with_unsupported(mut self, policy: UnsupportedPolicy) -> Self {
        self.unsupported = policy;
        self
    }

    pub fn with_stop_at_unconditional_transfer(mut self, stop: bool) -> Self {
        self.stop_at_unconditional_transfer = stop;
        self
    }

    /// Parses an unsupported-instruction policy name.
    pub fn parse_policy(s: &str) -> Option<UnsupportedPolicy> {
        match s.to_lowercase().as_str() {
            "abort" | "strict" => Some(UnsupportedPolicy::Abort),
            "partial" | "mark-partial" | "lenient" => Some(UnsupportedPolicy::MarkPartial),
            _ => None,
        }
    }
}

/// The RTL of one procedure.
#[derive(Debug)]
pub struct LiftedProcedure {
    pub name: String,
    pub entry: Address,
    pub clusters: Vec<RtlInstructionCluster>,
    pub frame: Frame,
    /// Signature inferred from the observed return.
    pub signature: FunctionSignature,
    /// State after the last lifted instruction.
    pub state: Box<dyn ProcessorState>,
}

impl LiftedProcedure {
    /// Returns true if any instruction could not be lifted.
    pub fn is_partial(&self) -> bool {
        self.clusters.iter().any(|c| c.is_invalid())
    }

    /// Returns the address just past the last lifted instruction.
    pub fn end_address(&self) -> Address {
        self.clusters.last().map_or(self.entry, |c| c.end_address())
    }

    /// Returns the number of RTL statements.
    pub fn statement_count(&self) -> usize {
        self.clusters.iter().map(|c| c.statements.len()).sum()
    }
}

/// Returns the default name of the procedure at `entry`.
pub fn procedure_name(entry: Address) -> String {
    format!("fn{}", entry).replace(':', "_")
}

/// Returns `(is_transfer, extra_bytes_if_return)` for a cluster.
fn ends_flow(cluster: &RtlInstructionCluster) -> (bool, Option<u16>) {
    cluster
        .statements
        .iter()
        .fold((false, None), |(transfer, ret), stmt| match stmt {
            RtlStatement::Return { extra_bytes, .. } => (true, Some(*extra_bytes)),
            RtlStatement::Goto { .. } => (true, ret),
            _ => (transfer, ret),
        })
}

/// Lifts the procedure starting at `entry`.
pub fn lift_procedure(
    arch: &dyn ProcessorArchitecture,
    mem: &MemoryArea,
    entry: Address,
    host: &dyn RewriterHost,
    config: &LiftConfig,
) -> Result<LiftedProcedure, LiftError> {
    let missing = |capability| LiftError::MissingCapability {
        architecture: arch.name().to_string(),
        capability,
    };
    let disassembler = arch.disassembler_factory().ok_or_else(|| missing("disassembler"))?;
    let rewriter = arch.rewriter_factory().ok_or_else(|| missing("rewriter"))?;

    let rdr = arch.create_image_reader(mem, entry)?;
    let mut state = arch.create_processor_state();
    let mut frame = arch.create_frame();
    state.set_instruction_pointer(entry);
    state.on_procedure_entered();

    log::debug!("lifting {} on {}", entry, arch.name());

    let mut clusters = Vec::new();
    let mut extra_bytes = None;
    {
        let instrs = disassembler.create_disassembler(rdr);
        let stream = rewriter.create_rewriter(instrs, state.as_mut(), &mut frame, host);
        for item in stream.take(config.max_instructions) {
            let cluster = match item {
                Ok(cluster) => cluster,
                Err(e) => match config.unsupported {
                    UnsupportedPolicy::Abort => return Err(e.into()),
                    UnsupportedPolicy::MarkPartial => {
                        host.warn(e.address(), &e.to_string());
                        RtlInstructionCluster::new(e.address(), e.length(), vec![RtlStatement::Invalid])
                    }
                },
            };
            let (transfer, ret) = ends_flow(&cluster);
            clusters.push(cluster);
            if ret.is_some() {
                extra_bytes = ret;
            }
            if transfer && config.stop_at_unconditional_transfer {
                break;
            }
        }
    }

    let ras = arch.descriptor().return_address_size;
    let name = procedure_name(entry);
    let signature = match extra_bytes {
        Some(extra) => FunctionSignature::new(name.clone(), ras).with_stack_delta(ras as i32 + extra as i32),
        None => FunctionSignature::new(name.clone(), ras),
    };
    state.on_procedure_left(&signature);

    log::debug!(
        "lifted {}: {} cluster(s), ends at {}",
        name,
        clusters.len(),
        clusters.last().map_or(entry, |c| c.end_address())
    );

    Ok(LiftedProcedure {
        name,
        entry,
        clusters,
        frame,
        signature,
        state,
    })
}

/// Lifts several procedures in parallel, one independent lift per entry.
///
/// Results are in the order of `entries`.
pub fn lift_procedures_parallel(
    arch: &dyn ProcessorArchitecture,
    mem: &MemoryArea,
    entries: &[Address],
    host: &dyn RewriterHost,
    config: &LiftConfig,
) -> Vec<Result<LiftedProcedure, LiftError>> {
    entries
        .par_iter()
        .map(|&entry| lift_procedure(arch, mem, entry, host, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::{ProcessorMode, X86Architecture};
    use crate::{NullHost, RewriteError};

    fn image(bytes: &[u8]) -> MemoryArea {
        MemoryArea::new(Address::ptr32(0x1000), bytes.to_vec())
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(LiftConfig::parse_policy("Abort"), Some(UnsupportedPolicy::Abort));
        assert_eq!(LiftConfig::parse_policy("partial"), Some(UnsupportedPolicy::MarkPartial));
        assert_eq!(LiftConfig::parse_policy("maybe"), None);
    }

    #[test]
    fn test_procedure_name() {
        assert_eq!(procedure_name(Address::ptr32(0x401000)), "fn00401000");
        assert_eq!(
            procedure_name(Address::segmented(0x0C00, 0x0010).unwrap()),
            "fn0C00_0010"
        );
    }

    #[test]
    fn test_lift_stops_at_return() {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        // xor eax, eax; ret 4; nop
        let mem = image(&[0x31, 0xC0, 0xC2, 0x04, 0x00, 0x90]);
        let lifted = lift_procedure(&arch, &mem, mem.base, &NullHost, &LiftConfig::default()).unwrap();
        assert_eq!(lifted.clusters.len(), 2);
        assert_eq!(lifted.end_address(), Address::ptr32(0x1005));
        assert_eq!(lifted.signature.stack_delta, 8);
        assert_eq!(lifted.name, "fn00001000");
        assert!(!lifted.is_partial());
    }

    #[test]
    fn test_mark_partial_keeps_tiling() {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        // adc eax, ebx; hlt (undecoded); ret
        let mem = image(&[0x11, 0xD8, 0xF4, 0xC3]);
        let lifted = lift_procedure(&arch, &mem, mem.base, &NullHost, &LiftConfig::default()).unwrap();
        assert!(lifted.is_partial());
        assert_eq!(lifted.clusters.len(), 3);
        for pair in lifted.clusters.windows(2) {
            assert_eq!(pair[0].end_address(), pair[1].address);
        }
    }

    #[test]
    fn test_abort_policy() {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        let mem = image(&[0x11, 0xD8, 0xC3]);
        let config = LiftConfig::new().with_unsupported(UnsupportedPolicy::Abort);
        let err = lift_procedure(&arch, &mem, mem.base, &NullHost, &config).unwrap_err();
        assert!(matches!(
            err,
            LiftError::Rewrite(RewriteError::UnsupportedInstruction { .. })
        ));
    }

    #[test]
    fn test_unmapped_entry() {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        let mem = image(&[0xC3]);
        let err = lift_procedure(&arch, &mem, Address::ptr32(0x9000), &NullHost, &LiftConfig::default())
            .unwrap_err();
        assert!(matches!(err, LiftError::Image(_)));
    }

    #[test]
    fn test_max_instructions() {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        let mem = image(&[0x90; 32]);
        let config = LiftConfig::new().with_max_instructions(5);
        let lifted = lift_procedure(&arch, &mem, mem.base, &NullHost, &config).unwrap();
        assert_eq!(lifted.clusters.len(), 5);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let arch = X86Architecture::new(ProcessorMode::Protected32);
        // f0: mov eax, 1; ret   f1: push ebx; pop esi; ret
        let mem = image(&[0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3, 0x53, 0x5E, 0xC3]);
        let entries = [Address::ptr32(0x1000), Address::ptr32(0x1006)];
        let config = LiftConfig::default();
        let results = lift_procedures_parallel(&arch, &mem, &entries, &NullHost, &config);
        assert_eq!(results.len(), 2);
        for (entry, result) in entries.iter().zip(&results) {
            let parallel = result.as_ref().unwrap();
            let sequential = lift_procedure(&arch, &mem, *entry, &NullHost, &config).unwrap();
            assert_eq!(parallel.entry, *entry);
            assert_eq!(parallel.clusters, sequential.clusters);
        }
        assert_eq!(results[1].as_ref().unwrap().clusters[0].length, 2);
    }
}
