//! Program buffer
//!
//! [`ByteCode`] owns the flat instruction stream of one pattern. Code
//! generators append instructions through the `emit_*` helpers; passes read
//! it through [`ByteCode::decode`] / [`ByteCode::iter`] and rewrite it by
//! index, never by address, since the vector may reallocate while a pass
//! runs.

use std::collections::HashSet;

use super::instruction::{
    decode, encode_offset, CompareOperand, CompareTypeAndValuePair, DecodeError, DecodeResult,
    Instruction, InstructionKind,
};
use super::opcodes::{BoundaryKind, OpCodeId};
use super::ByteCodeValue;

/// Owned, growable instruction buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteCode {
    code: Vec<ByteCodeValue>,
}

impl From<Vec<ByteCodeValue>> for ByteCode {
    fn from(code: Vec<ByteCodeValue>) -> Self {
        Self { code }
    }
}

impl ByteCode {
    /// Create an empty program
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[ByteCodeValue] {
        &self.code
    }

    pub fn into_values(self) -> Vec<ByteCodeValue> {
        self.code
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<ByteCodeValue> {
        self.code.get(index).copied()
    }

    /// Overwrite one unit in place
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: ByteCodeValue) {
        self.code[index] = value;
    }

    pub fn clear(&mut self) {
        self.code.clear();
    }

    pub fn push(&mut self, value: ByteCodeValue) {
        self.code.push(value);
    }

    pub fn extend_from_slice(&mut self, values: &[ByteCodeValue]) {
        self.code.extend_from_slice(values);
    }

    /// Append another program's units verbatim
    pub fn extend(&mut self, other: &ByteCode) {
        self.code.extend_from_slice(&other.code);
    }

    /// Decode the instruction starting at `ip`
    pub fn decode(&self, ip: usize) -> DecodeResult<Instruction<'_>> {
        decode(&self.code, ip)
    }

    /// Iterate over instructions, yielding decode errors
    pub fn try_iter(&self) -> TryInstructions<'_> {
        TryInstructions {
            code: &self.code,
            ip: 0,
            failed: false,
        }
    }

    /// Iterate over the instructions of a validated program
    ///
    /// # Panics
    ///
    /// Panics when an instruction fails to decode, which means the program
    /// was not validated or a pass corrupted it.
    pub fn iter(&self) -> Instructions<'_> {
        Instructions {
            code: &self.code,
            ip: 0,
            end: self.code.len(),
        }
    }

    /// Iterate over the instructions in `[start, end)` of a validated program
    pub fn iter_range(&self, start: usize, end: usize) -> Instructions<'_> {
        Instructions {
            code: &self.code,
            ip: start,
            end: end.min(self.code.len()),
        }
    }

    /// Check that the whole program decodes and that every jump lands on an
    /// instruction start or on the end of the program.
    pub fn validate(&self) -> DecodeResult<()> {
        let mut starts = HashSet::new();
        let mut jumps = Vec::new();
        for instruction in self.try_iter() {
            let instruction = instruction?;
            starts.insert(instruction.ip);
            if let Some(target) = instruction.jump_target() {
                jumps.push((instruction.ip, target));
            }
        }
        starts.insert(self.code.len());

        for (ip, target) in jumps {
            if !starts.contains(&(target as usize)) {
                return Err(DecodeError::InvalidJumpTarget { ip, target });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Emission
    // ========================================================================

    pub fn emit_opcode(&mut self, op: OpCodeId) {
        self.code.push(op.to_value());
    }

    /// Emit a Jump or fork with a relative offset, returning its index
    pub fn emit_jump_op(&mut self, op: OpCodeId, offset: isize) -> usize {
        debug_assert!(op == OpCodeId::Jump || op.is_fork());
        let ip = self.code.len();
        self.code.push(op.to_value());
        self.code.push(encode_offset(offset));
        ip
    }

    pub fn emit_jump(&mut self, offset: isize) -> usize {
        self.emit_jump_op(OpCodeId::Jump, offset)
    }

    pub fn emit_fork_jump(&mut self, offset: isize) -> usize {
        self.emit_jump_op(OpCodeId::ForkJump, offset)
    }

    pub fn emit_fork_stay(&mut self, offset: isize) -> usize {
        self.emit_jump_op(OpCodeId::ForkStay, offset)
    }

    pub fn emit_jump_non_empty(&mut self, offset: isize, checkpoint: usize, form: OpCodeId) -> usize {
        let ip = self.code.len();
        self.code.extend_from_slice(&[
            OpCodeId::JumpNonEmpty.to_value(),
            encode_offset(offset),
            checkpoint as ByteCodeValue,
            form.to_value(),
        ]);
        ip
    }

    /// Emit a Repeat jumping back `distance` units from its own start
    pub fn emit_repeat(&mut self, distance: usize, count: usize, id: usize) -> usize {
        let ip = self.code.len();
        self.code.extend_from_slice(&[
            OpCodeId::Repeat.to_value(),
            distance as ByteCodeValue,
            count as ByteCodeValue,
            id as ByteCodeValue,
        ]);
        ip
    }

    /// Emit a Compare from pre-encoded argument units
    pub fn emit_compare_units(&mut self, count: usize, args: &[ByteCodeValue]) {
        self.code.extend_from_slice(&[
            OpCodeId::Compare.to_value(),
            count as ByteCodeValue,
            args.len() as ByteCodeValue,
        ]);
        self.code.extend_from_slice(args);
    }

    pub fn emit_compare(&mut self, pairs: &[CompareTypeAndValuePair]) {
        let mut args = Vec::with_capacity(pairs.len() * 2);
        for pair in pairs {
            pair.encode_into(&mut args);
        }
        self.emit_compare_units(pairs.len(), &args);
    }

    pub fn emit_compare_operands(&mut self, operands: &[CompareOperand<'_>]) {
        let mut args = Vec::new();
        for operand in operands {
            operand.encode_into(&mut args);
        }
        self.emit_compare_units(operands.len(), &args);
    }

    /// Emit one Compare per character of `literal`
    pub fn emit_literal(&mut self, literal: &str) {
        for c in literal.chars() {
            self.emit_compare(&[CompareTypeAndValuePair::char(c)]);
        }
    }

    /// Emit a single String compare covering all of `literal`
    pub fn emit_compare_string(&mut self, literal: &str) {
        let cps: Vec<ByteCodeValue> = literal.chars().map(|c| c as ByteCodeValue).collect();
        self.emit_compare_operands(&[CompareOperand::String(&cps)]);
    }

    pub fn emit_check_begin(&mut self) {
        self.emit_opcode(OpCodeId::CheckBegin);
    }

    pub fn emit_check_end(&mut self) {
        self.emit_opcode(OpCodeId::CheckEnd);
    }

    pub fn emit_check_boundary(&mut self, kind: BoundaryKind) {
        self.code.push(OpCodeId::CheckBoundary.to_value());
        self.code.push(kind.to_value());
    }

    pub fn emit_fail_forks(&mut self) {
        self.emit_opcode(OpCodeId::FailForks);
    }

    pub fn emit_save(&mut self) {
        self.emit_opcode(OpCodeId::Save);
    }

    pub fn emit_restore(&mut self) {
        self.emit_opcode(OpCodeId::Restore);
    }

    pub fn emit_go_back(&mut self, count: usize) {
        self.code.push(OpCodeId::GoBack.to_value());
        self.code.push(count as ByteCodeValue);
    }

    pub fn emit_checkpoint(&mut self, id: usize) {
        self.code.push(OpCodeId::Checkpoint.to_value());
        self.code.push(id as ByteCodeValue);
    }

    pub fn emit_save_left_capture_group(&mut self, id: usize) {
        self.code.push(OpCodeId::SaveLeftCaptureGroup.to_value());
        self.code.push(id as ByteCodeValue);
    }

    pub fn emit_save_right_capture_group(&mut self, id: usize) {
        self.code.push(OpCodeId::SaveRightCaptureGroup.to_value());
        self.code.push(id as ByteCodeValue);
    }

    pub fn emit_clear_capture_group(&mut self, id: usize) {
        self.code.push(OpCodeId::ClearCaptureGroup.to_value());
        self.code.push(id as ByteCodeValue);
    }

    /// Point the jump emitted at `ip` to the current end of the program
    ///
    /// # Panics
    ///
    /// Panics if `ip` does not hold a Jump, fork or JumpNonEmpty.
    pub fn patch_jump_to_end(&mut self, ip: usize) {
        let target = self.code.len();
        self.patch_jump(ip, target);
    }

    /// Point the jump emitted at `ip` to `target`
    ///
    /// # Panics
    ///
    /// Panics if `ip` does not hold a Jump, fork or JumpNonEmpty.
    pub fn patch_jump(&mut self, ip: usize, target: usize) {
        let op = self
            .get(ip)
            .and_then(OpCodeId::from_value)
            .filter(|op| op.is_relative_jump());
        let Some(op) = op else {
            panic!("patch_jump: no jump instruction at {:04x}", ip);
        };
        let size = op.fixed_size().unwrap_or(2);
        let offset = target as isize - (ip + size) as isize;
        self.code[ip + 1] = encode_offset(offset);
    }

    // ========================================================================
    // Disassembly
    // ========================================================================

    /// Disassemble the whole program, one instruction per line
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("=== program ({} units) ===\n", self.code.len()));

        let mut ip = 0;
        while ip < self.code.len() {
            let (disasm, next) = self.disassemble_instruction(ip);
            output.push_str(&format!("{:04x} {}\n", ip, disasm));
            ip = next;
        }

        output
    }

    /// Disassemble a single instruction, returns (string, next_ip)
    pub fn disassemble_instruction(&self, ip: usize) -> (String, usize) {
        let instruction = match self.decode(ip) {
            Ok(instruction) => instruction,
            Err(e) => return (format!("??? ({})", e), self.code.len()),
        };
        let mnemonic = instruction.opcode().mnemonic();

        let operands = match instruction.kind {
            InstructionKind::JumpNonEmpty { checkpoint, form, .. } => format!(
                " -> {:04x} checkpoint={} form={}",
                instruction.jump_target().unwrap_or_default(),
                checkpoint,
                form
            ),
            InstructionKind::Repeat { count, id, .. } => format!(
                " -> {:04x} count={} id={}",
                instruction.jump_target().unwrap_or_default(),
                count,
                id
            ),
            _ if instruction.jump_offset().is_some() => {
                format!(" -> {:04x}", instruction.jump_target().unwrap_or_default())
            }
            InstructionKind::Compare(args) => {
                let rendered: Vec<String> = args.operands().map(|o| format!("{:?}", o)).collect();
                format!(" [{}]", rendered.join(", "))
            }
            InstructionKind::CheckBoundary(kind) => format!(" {:?}", kind),
            InstructionKind::GoBack(n)
            | InstructionKind::Checkpoint(n)
            | InstructionKind::SaveLeftCaptureGroup(n)
            | InstructionKind::SaveRightCaptureGroup(n)
            | InstructionKind::ClearCaptureGroup(n) => format!(" {}", n),
            _ => String::new(),
        };

        (format!("{}{}", mnemonic, operands), instruction.end())
    }
}

/// Fallible instruction iterator, stops after the first error
#[derive(Debug, Clone)]
pub struct TryInstructions<'a> {
    code: &'a [ByteCodeValue],
    ip: usize,
    failed: bool,
}

impl<'a> Iterator for TryInstructions<'a> {
    type Item = DecodeResult<Instruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.ip >= self.code.len() {
            return None;
        }
        match decode(self.code, self.ip) {
            Ok(instruction) => {
                self.ip = instruction.end();
                Some(Ok(instruction))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Instruction iterator over a validated program
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    code: &'a [ByteCodeValue],
    ip: usize,
    end: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ip >= self.end {
            return None;
        }
        match decode(self.code, self.ip) {
            Ok(instruction) => {
                self.ip = instruction.end();
                Some(instruction)
            }
            Err(e) => panic!("malformed bytecode in validated program: {}", e),
        }
    }
}
