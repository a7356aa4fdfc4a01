use std::io::{Cursor, Write};
use std::rc::Rc;

use crate::error::{ErrorKind, Result};
use crate::runtime::host::Class;
use crate::vm::unit::ExceptionEntry;
use crate::vm::vp::Instr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Clone, Copy, Debug)]
pub enum Operand {
    U8(u8),
    U16(u16),
    I32(i32),
    I64(i64),
    F64(f64),
    Label(Label),
}

struct Handler {
    start: Label,
    end: Label,
    handler: Label,
    class: Option<Rc<Class>>,
}

pub struct Assembled {
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub lines: Vec<(u32, u32)>,
    pub listing: String,
}

pub struct BytecodeBuilder {
    cursor: Cursor<Vec<u8>>,
    pub listing: String,
    generate_asm: bool,
    labels: Vec<Option<u32>>,
    fixups: Vec<(u64, Label)>,
    handlers: Vec<Handler>,
    lines: Vec<(u32, u32)>,
}

impl BytecodeBuilder {
    pub fn new(generate_asm: bool) -> BytecodeBuilder {
        BytecodeBuilder {
            cursor: Cursor::new(vec![]),
            listing: String::new(),
            generate_asm,
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn position(&self) -> u32 {
        self.cursor.position() as u32
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn mark(&mut self, label: Label) {
        self.labels[label.0] = Some(self.position());
        if self.generate_asm {
            self.listing += &format!("L{}:\n", label.0);
        }
    }

    pub fn here(&mut self) -> Label {
        let label = self.new_label();
        self.mark(label);
        label
    }

    pub fn line_number(&mut self, line: u32) {
        if line == 0 || self.lines.last().map_or(false, |(_, l)| *l == line) {
            return;
        }
        let pos = self.position();
        match self.lines.last_mut() {
            Some(last) if last.0 == pos => last.1 = line,
            _ => self.lines.push((pos, line)),
        }
    }

    pub fn emit(&mut self, instr: Instr) {
        self.op(instr, &[]);
    }

    pub fn op(&mut self, instr: Instr, operands: &[Operand]) {
        self.write_op(instr, operands, None);
    }

    pub fn op_noted(&mut self, instr: Instr, operands: &[Operand], note: &str) {
        self.write_op(instr, operands, Some(note));
    }

    fn write_op(&mut self, instr: Instr, operands: &[Operand], note: Option<&str>) {
        let _ = self.cursor.write(&[instr as u8]);
        for operand in operands {
            self.write_operand(*operand);
        }
        if self.generate_asm {
            let rendered: Vec<String> = operands.iter().map(render).collect();
            self.listing += &instr.to_string();
            if !rendered.is_empty() {
                self.listing += &format!(" {}", rendered.join(", "));
            }
            if let Some(note) = note {
                self.listing += &format!(" ; {}", note);
            }
            self.listing.push('\n');
        }
    }

    fn write_operand(&mut self, operand: Operand) {
        let _ = match operand {
            Operand::U8(v) => self.cursor.write(&[v]),
            Operand::U16(v) => self.cursor.write(&v.to_le_bytes()),
            Operand::I32(v) => self.cursor.write(&v.to_le_bytes()),
            Operand::I64(v) => self.cursor.write(&v.to_le_bytes()),
            Operand::F64(v) => self.cursor.write(&v.to_le_bytes()),
            Operand::Label(l) => {
                self.fixups.push((self.cursor.position(), l));
                self.cursor.write(&0u32.to_le_bytes())
            }
        };
    }

    pub fn jump(&mut self, instr: Instr, target: Label) {
        self.op(instr, &[Operand::Label(target)]);
    }

    pub fn table_switch(&mut self, low: i32, high: i32, default: Label, targets: &[Label]) {
        let mut operands = vec![Operand::I32(low), Operand::I32(high), Operand::Label(default)];
        operands.extend(targets.iter().map(|l| Operand::Label(*l)));
        self.op(Instr::TableSwitch, &operands);
    }

    pub fn lookup_switch(&mut self, default: Label, pairs: &[(i32, Label)]) {
        let mut operands = vec![Operand::U16(pairs.len() as u16), Operand::Label(default)];
        for (key, label) in pairs {
            operands.push(Operand::I32(*key));
            operands.push(Operand::Label(*label));
        }
        self.op(Instr::LookupSwitch, &operands);
    }

    pub fn try_catch_block(&mut self, start: Label, end: Label, handler: Label, class: Option<Rc<Class>>) {
        self.handlers.push(Handler { start, end, handler, class });
    }

    fn resolve(&self, label: Label) -> Result<u32> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| ErrorKind::internal(format!("label L{} was never placed", label.0)).into())
    }

    pub fn finish(mut self) -> Result<Assembled> {
        for (pos, label) in std::mem::take(&mut self.fixups) {
            let target = self.resolve(label)?;
            let end = self.cursor.position();
            self.cursor.set_position(pos);
            let _ = self.cursor.write(&target.to_le_bytes());
            self.cursor.set_position(end);
        }
        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for h in &self.handlers {
            exception_table.push(ExceptionEntry {
                start: self.resolve(h.start)?,
                end: self.resolve(h.end)?,
                handler: self.resolve(h.handler)?,
                class: h.class.clone(),
            });
        }
        Ok(Assembled { code: self.cursor.into_inner(), exception_table, lines: self.lines, listing: self.listing })
    }
}

fn render(operand: &Operand) -> String {
    match operand {
        Operand::U8(v) => v.to_string(),
        Operand::U16(v) => v.to_string(),
        Operand::I32(v) => v.to_string(),
        Operand::I64(v) => v.to_string(),
        Operand::F64(v) => v.to_string(),
        Operand::Label(l) => format!("L{}", l.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::vp::CodeReader;

    #[test]
    fn forward_jumps_are_patched() {
        let mut b = BytecodeBuilder::new(false);
        let end = b.new_label();
        b.emit(Instr::True);
        b.jump(Instr::JumpIfFalse, end);
        b.emit(Instr::Nil);
        b.mark(end);
        b.emit(Instr::Return);
        let out = b.finish().unwrap();
        let mut r = CodeReader::new(&out.code);
        assert_eq!(r.read_u8(), Some(Instr::True as u8));
        assert_eq!(r.read_u8(), Some(Instr::JumpIfFalse as u8));
        assert_eq!(r.read_u32(), Some(7));
        assert_eq!(out.code[7], Instr::Return as u8);
    }

    #[test]
    fn unplaced_labels_are_an_error() {
        let mut b = BytecodeBuilder::new(false);
        let nowhere = b.new_label();
        b.jump(Instr::Jump, nowhere);
        assert!(b.finish().is_err());
    }

    #[test]
    fn listing_shows_labels_and_notes() {
        let mut b = BytecodeBuilder::new(true);
        let top = b.here();
        b.op_noted(Instr::Const, &[Operand::U16(0)], "const__0");
        b.jump(Instr::Jump, top);
        assert_eq!(b.listing, "L0:\nConst 0 ; const__0\nJump L0\n");
    }

    #[test]
    fn line_table_keeps_one_entry_per_change() {
        let mut b = BytecodeBuilder::new(false);
        b.line_number(3);
        b.emit(Instr::Nil);
        b.line_number(3);
        b.emit(Instr::Pop);
        b.line_number(4);
        let out = b.finish().unwrap();
        assert_eq!(out.lines, vec![(0, 3), (2, 4)]);
    }
}
