/**
 * Copyright 2022 - Jahred Love
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 * list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice, this
 * list of conditions and the following disclaimer in the documentation and/or other
 * materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors may
 * be used to endorse or promote products derived from this software without specific
 * prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS “AS IS” AND
 * ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT,
 * INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT
 * NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
 * PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
 * WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

// Build orchestration: pending procedures in, compiled units out.

use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::assemble::{Session, UnitOrigin};
use crate::call::CallControl;
use crate::config::Config;
use crate::descr::{Descr, DescrFactory, DescrKind};
use crate::effect::EffectAnalyzer;
use crate::error::{BuildError, ErrorKind, Result};
use crate::flatten::flatten_graph;
use crate::liveness::compute_liveness;
use crate::opt;
use crate::program::{GraphSource, Policy, ProcId};
use crate::regalloc::allocate_all;
use crate::unit::CompiledUnit;

/// Totals reported at the end of a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSummary {
    pub units: usize,
    pub opcodes: usize,
    pub descrs: usize,
    pub liveness_records: usize,
    pub liveness_hits: usize,
    pub indirect_call_targets: usize,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} units, {} opcodes, {} descriptors, {} liveness records ({} shared), {} indirect call targets",
            self.units, self.opcodes, self.descrs, self.liveness_records, self.liveness_hits, self.indirect_call_targets
        )
    }
}

pub struct CodeWriter<'a> {
    callcontrol: CallControl<'a>,
    session: Session,
    config: Config,
    source: &'a dyn GraphSource,
}

impl<'a> CodeWriter<'a> {
    pub fn new(
        source: &'a dyn GraphSource,
        policy: &'a dyn Policy,
        analyzer: &'a dyn EffectAnalyzer,
        descrs: Box<dyn DescrFactory + 'a>,
        config: Config,
    ) -> Self {
        Self {
            callcontrol: CallControl::new(source, policy, analyzer, descrs, Vec::new()),
            session: Session::from_config(&config),
            config,
            source,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn callcontrol(&self) -> &CallControl<'a> {
        &self.callcontrol
    }

    /// Compiles `proc`, whose unit is described by `unit`.
    pub fn transform_graph_to_unit(&mut self, proc: ProcId, unit: &Descr) -> Result<CompiledUnit> {
        let mut graph = self
            .source
            .graph(proc)
            .ok_or_else(|| {
                BuildError::new(
                    ErrorKind::Graph,
                    format!("{} has no graph to compile", self.source.proc_name(proc)),
                )
            })?
            .clone();
        if opt::run_passes(&mut graph, &self.config) {
            debug!(graph = %graph.name, "graph passes changed the graph");
        }

        let mut regallocs = allocate_all(&graph);
        let mut ssarepr = flatten_graph(&graph, proc, &mut regallocs, Some(&mut self.callcontrol))?;
        compute_liveness(&mut ssarepr);

        let calldescr = match unit.kind() {
            DescrKind::Unit { calldescr, .. } => calldescr.clone(),
            _ => {
                return Err(BuildError::new(
                    ErrorKind::Graph,
                    format!("{} is not a unit descriptor", unit),
                ))
            }
        };
        let compiled = self
            .session
            .assemble(&mut ssarepr, Some(UnitOrigin { proc, calldescr }))?;

        if let Some(dir) = &self.config.dump_dir {
            write_dump(dir, &compiled)?;
        }
        Ok(compiled)
    }

    /// Compiles `entries` and everything they call that gets a unit of its
    /// own, until nothing is pending.
    pub fn make_units(&mut self, entries: &[ProcId]) -> Result<Vec<CompiledUnit>> {
        info!(entries = entries.len(), "making units");
        self.callcontrol.set_entries(entries.to_vec());
        self.callcontrol.grab_initial_units()?;

        let mut units = Vec::new();
        while let Some((proc, unit)) = self.callcontrol.enum_pending() {
            units.push(self.transform_graph_to_unit(proc, &unit)?);
            if units.len() % 500 == 0 {
                info!(produced = units.len(), "units so far");
            }
        }
        info!(units = units.len(), "all units produced");
        Ok(units)
    }

    pub fn finished(&self) -> BuildSummary {
        let summary = BuildSummary {
            units: self.session.units_assembled(),
            opcodes: self.session.opcodes().len(),
            descrs: self.session.descrs().len(),
            liveness_records: self.session.liveness().len(),
            liveness_hits: self.session.liveness().hits(),
            indirect_call_targets: self.callcontrol.all_indirect_call_targets.len(),
        };
        info!(%summary, "build finished");
        summary
    }
}

fn write_dump(dir: &Path, unit: &CompiledUnit) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let file: String = unit
        .name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect();
    std::fs::write(dir.join(format!("{}.txt", file)), unit.dump())?;
    Ok(())
}
