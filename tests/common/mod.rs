//! Test utilities for optimizer integration tests
//!
//! This module provides a small pattern compiler that lowers a subset of
//! regex syntax into bytecode through the public emit API:
//! - Literals and escapes (`\.`, `\\`, ...)
//! - Classes `[a-z_]`, `[^0-9]`, shorthands `\d`, `\w`, `\s` and `.`
//! - Groups `(...)` and `(?:...)`, alternation `|`
//! - Greedy quantifiers `*`, `+`, `?`
//! - Anchors `^`, `$`, `\b`, `\B`

#![allow(dead_code)]

use rxopt::bytecode::instruction::CompareTypeAndValuePair as Pair;
use rxopt::bytecode::opcodes::{BoundaryKind, CharClass, OpCodeId};
use rxopt::bytecode::ByteCode;
use rxopt::{AlternationStrategy, PatternFlags};

/// Compile `pattern` with the given alternation layout
pub fn compile(pattern: &str, strategy: AlternationStrategy) -> Result<ByteCode, String> {
    let mut parser = PatternParser::new(pattern, strategy);
    let code = parser.alternation()?;
    if let Some(c) = parser.current() {
        return Err(format!("unexpected '{}' at {}", c, parser.pos));
    }
    code.validate().map_err(|e| e.to_string())?;
    Ok(code)
}

/// Install a test writer for `tracing` output; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

struct PatternParser {
    chars: Vec<char>,
    pos: usize,
    strategy: AlternationStrategy,
    next_group: usize,
    next_checkpoint: usize,
}

/// One parsed atom and whether it is a single character test
struct Atom {
    code: ByteCode,
    single_compare: bool,
}

impl PatternParser {
    fn new(pattern: &str, strategy: AlternationStrategy) -> Self {
        Self {
            chars: pattern.chars().collect(),
            pos: 0,
            strategy,
            next_group: 1,
            next_checkpoint: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.current();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.current() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(format!("expected '{}' at {}", expected, self.pos))
        }
    }

    fn alternation(&mut self) -> Result<ByteCode, String> {
        let mut alternatives = vec![self.sequence()?];
        while self.eat('|') {
            alternatives.push(self.sequence()?);
        }
        if alternatives.len() == 1 {
            return Ok(alternatives.remove(0));
        }
        let mut code = ByteCode::new();
        code.append_alternation(alternatives, self.strategy, PatternFlags::default());
        Ok(code)
    }

    fn sequence(&mut self) -> Result<ByteCode, String> {
        let mut code = ByteCode::new();
        while let Some(c) = self.current() {
            if c == '|' || c == ')' {
                break;
            }
            let atom = self.atom()?;
            let quantified = self.quantified(atom)?;
            code.extend(&quantified);
        }
        Ok(code)
    }

    fn atom(&mut self) -> Result<Atom, String> {
        let mut code = ByteCode::new();
        let c = self.advance().ok_or("unexpected end of pattern")?;
        let single_compare = match c {
            '(' => {
                let capture = if self.eat('?') {
                    self.expect(':')?;
                    None
                } else {
                    let id = self.next_group;
                    self.next_group += 1;
                    Some(id)
                };
                if let Some(id) = capture {
                    code.emit_save_left_capture_group(id);
                }
                code.extend(&self.alternation()?);
                self.expect(')')?;
                if let Some(id) = capture {
                    code.emit_save_right_capture_group(id);
                }
                false
            }
            '[' => {
                let pairs = self.class()?;
                code.append_character_class(&pairs);
                true
            }
            '.' => {
                code.emit_compare(&[Pair::inverse(), Pair::char('\n')]);
                true
            }
            '^' => {
                code.emit_check_begin();
                false
            }
            '$' => {
                code.emit_check_end();
                false
            }
            '\\' => match self.advance().ok_or("dangling escape")? {
                'b' => {
                    code.emit_check_boundary(BoundaryKind::Word);
                    false
                }
                'B' => {
                    code.emit_check_boundary(BoundaryKind::NonWord);
                    false
                }
                e => {
                    code.emit_compare(&[shorthand(e).unwrap_or_else(|| Pair::char(e))]);
                    true
                }
            },
            '*' | '+' | '?' | ')' | '|' => {
                return Err(format!("unexpected '{}' at {}", c, self.pos - 1));
            }
            c => {
                code.emit_compare(&[Pair::char(c)]);
                true
            }
        };
        Ok(Atom {
            code,
            single_compare,
        })
    }

    fn class(&mut self) -> Result<Vec<Pair>, String> {
        let mut pairs = Vec::new();
        if self.eat('^') {
            pairs.push(Pair::inverse());
        }
        loop {
            let c = self.advance().ok_or("unterminated class")?;
            let from = match c {
                ']' => break,
                '\\' => {
                    let e = self.advance().ok_or("dangling escape")?;
                    if let Some(pair) = shorthand(e) {
                        pairs.push(pair);
                        continue;
                    }
                    e
                }
                c => c,
            };
            let is_range = self.current() == Some('-') && self.chars.get(self.pos + 1) != Some(&']');
            if is_range {
                self.pos += 1;
                let to = match self.advance().ok_or("unterminated range")? {
                    '\\' => self.advance().ok_or("dangling escape")?,
                    c => c,
                };
                if to < from {
                    return Err(format!("reversed range {}-{}", from, to));
                }
                pairs.push(Pair::range(from, to));
            } else {
                pairs.push(Pair::char(from));
            }
        }
        Ok(pairs)
    }

    fn quantified(&mut self, atom: Atom) -> Result<ByteCode, String> {
        let Atom {
            code: body,
            single_compare,
        } = atom;
        let mut code = ByteCode::new();

        match self.current() {
            Some('*') if single_compare => {
                // L0: ForkStay L2; body; Jump L0; L2:
                self.pos += 1;
                let fork = code.emit_fork_stay(0);
                code.extend(&body);
                let back = code.emit_jump(0);
                code.patch_jump(back, fork);
                code.patch_jump_to_end(fork);
            }
            Some('+') if single_compare => {
                // L0: body; ForkJump L0
                self.pos += 1;
                code.extend(&body);
                let fork = code.emit_fork_jump(0);
                code.patch_jump(fork, 0);
            }
            Some(q @ ('*' | '+')) => {
                // Bodies that may match empty are guarded by a checkpoint
                self.pos += 1;
                let checkpoint = self.next_checkpoint;
                self.next_checkpoint += 1;
                let exit = (q == '*').then(|| code.emit_fork_stay(0));
                let start = code.len();
                code.emit_checkpoint(checkpoint);
                code.extend(&body);
                let back = code.emit_jump_non_empty(0, checkpoint, OpCodeId::ForkJump);
                code.patch_jump(back, start);
                if let Some(exit) = exit {
                    code.patch_jump_to_end(exit);
                }
            }
            Some('?') => {
                self.pos += 1;
                let fork = code.emit_fork_stay(0);
                code.extend(&body);
                code.patch_jump_to_end(fork);
            }
            _ => code = body,
        }

        if matches!(self.current(), Some('*' | '+' | '?')) {
            return Err(format!("nested quantifier at {}", self.pos));
        }
        Ok(code)
    }
}

fn shorthand(escape: char) -> Option<Pair> {
    match escape {
        'd' => Some(Pair::class(CharClass::Digit)),
        'w' => Some(Pair::class(CharClass::Word)),
        's' => Some(Pair::class(CharClass::Space)),
        'n' => Some(Pair::char('\n')),
        't' => Some(Pair::char('\t')),
        _ => None,
    }
}
