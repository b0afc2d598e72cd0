// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::PredictorError;

/// Byte-level operation a local model applies to its input stream.
///
/// A local model is a short text program: the first line that is neither
/// blank nor a `#` comment names the kernel and its operand.
///
/// | Program   | Effect                         |
/// |-----------|--------------------------------|
/// | `identity`| copy                           |
/// | `add <n>` | wrapping add of `n` to each byte |
/// | `xor <n>` | xor each byte with `n`         |
/// | `fail`    | every inference fails          |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Identity,
    Add(u8),
    Xor(u8),
    Fail,
}

impl Kernel {
    pub fn parse(program: &str) -> Result<Self, PredictorError> {
        let line = program
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .ok_or_else(|| PredictorError::InvalidModel("empty local model".to_string()))?;

        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let operand = words.next();
        if words.next().is_some() {
            return Err(PredictorError::InvalidModel(format!(
                "trailing words in kernel '{line}'"
            )));
        }

        match (name, operand) {
            ("identity", None) => Ok(Kernel::Identity),
            ("fail", None) => Ok(Kernel::Fail),
            ("add", Some(n)) => Ok(Kernel::Add(parse_operand(name, n)?)),
            ("xor", Some(n)) => Ok(Kernel::Xor(parse_operand(name, n)?)),
            _ => Err(PredictorError::InvalidModel(format!("unknown kernel '{line}'"))),
        }
    }

    pub fn apply(self, bytes: &mut [u8]) -> Result<(), PredictorError> {
        match self {
            Kernel::Identity => {}
            Kernel::Add(n) => bytes.iter_mut().for_each(|b| *b = b.wrapping_add(n)),
            Kernel::Xor(n) => bytes.iter_mut().for_each(|b| *b ^= n),
            Kernel::Fail => {
                return Err(PredictorError::Execution(
                    "kernel 'fail' always fails".to_string(),
                ))
            }
        }
        Ok(())
    }

    pub fn name(self) -> &'static str {
        match self {
            Kernel::Identity => "identity",
            Kernel::Add(_) => "add",
            Kernel::Xor(_) => "xor",
            Kernel::Fail => "fail",
        }
    }
}

fn parse_operand(kernel: &str, operand: &str) -> Result<u8, PredictorError> {
    operand.parse().map_err(|_| {
        PredictorError::InvalidModel(format!("kernel '{kernel}' needs a byte operand, got '{operand}'"))
    })
}
