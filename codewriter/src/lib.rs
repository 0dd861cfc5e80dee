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

// Backend turning typed control-flow graphs into register bytecode units.
//
// Per procedure: color registers, flatten the graph into labelled linear
// code, compute liveness, encode. `CodeWriter` drives this over every
// procedure reachable from the entry points.

pub mod assemble;
pub mod call;
pub mod codewriter;
pub mod config;
pub mod descr;
pub mod effect;
pub mod error;
pub mod flatten;
pub mod format;
pub mod ir;
pub mod liveness;
pub mod opt;
pub mod program;
pub mod regalloc;
pub mod ssa;
pub mod unit;

pub use assemble::{Session, UnitOrigin};
pub use call::{CallControl, CallKind};
pub use codewriter::{BuildSummary, CodeWriter};
pub use config::Config;
pub use error::{BuildError, ErrorKind, Result};
pub use format::{format_assembler, unformat_assembler};
pub use unit::{CompiledUnit, LiveVars};

#[cfg(test)]
mod tests;
