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

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A unit does not fit the bytecode format (registers, constants,
    /// opcodes, descriptors, labels).
    Encoding,
    /// Malformed input graph.
    Graph,
    /// Call arguments or result disagree with the callee signature.
    Signature,
    /// Declared purity contradicts the analyzed effects of a call.
    Effect,
    /// Liveness was requested at a pc that has no marker.
    MissingLiveness,
    /// Malformed textual instruction listing.
    Parse,
    Config,
    Io,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Encoding => "encoding error",
            ErrorKind::Graph => "graph error",
            ErrorKind::Signature => "signature error",
            ErrorKind::Effect => "effect error",
            ErrorKind::MissingLiveness => "missing liveness",
            ErrorKind::Parse => "parse error",
            ErrorKind::Config => "config error",
            ErrorKind::Io => "io error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BuildError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based line in a textual listing, when the error came from one.
    pub line: Option<usize>,
}

impl BuildError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(kind: ErrorKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: Some(line),
        }
    }

    pub fn render(&self, path: Option<&str>) -> String {
        let loc = match (path, self.line) {
            (Some(p), Some(l)) => format!("{}:{}", p, l),
            (Some(p), None) => p.to_string(),
            (None, Some(l)) => format!("line {}", l),
            (None, None) => return self.to_string(),
        };
        format!("{}: {}\n --> {}", self.kind, self.message, loc)
    }
}

impl From<std::io::Error> for BuildError {
    fn from(e: std::io::Error) -> Self {
        BuildError::new(ErrorKind::Io, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_kind() {
        let e = BuildError::new(ErrorKind::Encoding, "too many int registers");
        assert_eq!(e.to_string(), "encoding error: too many int registers");
    }

    #[test]
    fn render_points_at_the_listing_line() {
        let e = BuildError::at_line(ErrorKind::Parse, 4, "unknown operand 'x'");
        assert_eq!(
            e.render(Some("f.ssa")),
            "parse error: unknown operand 'x'\n --> f.ssa:4"
        );
        assert_eq!(e.render(None), "parse error: unknown operand 'x'\n --> line 4");
    }
}
