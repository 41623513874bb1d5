//! The interpreter loop: an untyped `u64` operand stack shared by all
//! frames, with block labels kept on a separate stack.

use super::{Trap, numeric};
use crate::instance::{Instance, Memory};
use crate::parse::ParsedModule;
use crate::parse::body::{BlockKind, LoadOp, Op, ParsedBody, StoreOp};
use crate::parse::func::ParsedFunction;
use crate::store::Store;
use crate::value::{NULL_REF, Val};

struct Frame {
    /// Index into the module's defined functions.
    local: usize,
    pc: usize,
    /// Index into the shared stack where this frame's locals begin.
    locals_start: usize,
    /// Index into `labels` of this frame's function label.
    labels_start: usize,
    arity: usize,
}

#[derive(Clone, Copy)]
struct Label {
    block: u32,
    /// Stack height below the block's parameters.
    stack_height: usize,
}

enum Branch {
    Jump(usize),
    Return,
}

pub(super) struct Machine<'a, T> {
    module: &'a ParsedModule,
    instance: &'a mut Instance,
    store: &'a mut Store<T>,
    stack: Vec<u64>,
    labels: Vec<Label>,
    frames: Vec<Frame>,
    fuel: Option<u64>,
    max_depth: usize,
}

impl<'a, T> Machine<'a, T> {
    pub(super) fn new(
        module: &'a ParsedModule,
        instance: &'a mut Instance,
        store: &'a mut Store<T>,
    ) -> Self {
        let config = *store.config();
        Self {
            module,
            instance,
            store,
            stack: Vec::new(),
            labels: Vec::new(),
            frames: Vec::new(),
            fuel: config.fuel,
            max_depth: config.max_call_depth,
        }
    }

    /// Call `func_idx` with `args` and return the raw result slots.
    pub(super) fn invoke(&mut self, func_idx: u32, args: &[Val]) -> Result<Vec<u64>, anyhow::Error> {
        self.stack.extend(args.iter().map(|arg| arg.to_bits()));
        self.call(func_idx)?;
        self.run()?;
        Ok(std::mem::take(&mut self.stack))
    }

    fn call(&mut self, func_idx: u32) -> Result<(), anyhow::Error> {
        let module = self.module;
        match module.local_func(func_idx) {
            Some(func) => self.enter(func_idx, func),
            None => self.call_host(func_idx),
        }
    }

    /// Push a frame for a module-defined function. Its parameters are
    /// already on the stack and become the first locals.
    fn enter(&mut self, func_idx: u32, func: &ParsedFunction) -> Result<(), anyhow::Error> {
        if self.frames.len() >= self.max_depth {
            return Err(Trap::CallStackExhausted.into());
        }
        let locals_start = self.stack.len() - func.param_count;
        self.stack.extend_from_slice(&func.local_defaults);
        let labels_start = self.labels.len();
        self.labels.push(Label {
            block: 0,
            stack_height: self.stack.len(),
        });
        self.frames.push(Frame {
            local: (func_idx - self.module.num_func_imports) as usize,
            pc: 0,
            locals_start,
            labels_start,
            arity: func.result_count,
        });
        Ok(())
    }

    fn call_host(&mut self, func_idx: u32) -> Result<(), anyhow::Error> {
        let module = self.module;
        let ty = module.func_type(func_idx)?;
        let base = self.stack.len() - ty.params().len();
        let args = ty
            .params()
            .iter()
            .zip(&self.stack[base..])
            .map(|(&ty, &bits)| Val::from_bits(bits, ty))
            .collect::<Result<Vec<_>, _>>()?;
        self.stack.truncate(base);

        let store_idx = self.instance.host_funcs[func_idx as usize];
        let memory = self.instance.memory.as_mut().map(Memory::data_mut);
        let results = self.store.call_host(store_idx, memory, &args, ty.results())?;
        self.stack.extend(results.iter().map(|val| val.to_bits()));
        Ok(())
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        let module = self.module;
        'frames: while let Some(frame) = self.frames.last() {
            let body = &module.funcs[frame.local].body;
            let locals_start = frame.locals_start;
            let mut pc = frame.pc;

            loop {
                self.consume_fuel()?;
                let op = body.ops[pc];
                pc += 1;

                match op {
                    Op::Unreachable => return Err(Trap::Unreachable.into()),
                    Op::Nop => {}

                    Op::Block(idx) | Op::Loop(idx) => self.push_label(body, idx),
                    Op::If(idx) => {
                        let block = &body.blocks[idx as usize];
                        if self.pop() as u32 != 0 {
                            self.push_label(body, idx);
                        } else if let Some(else_pc) = block.else_pc {
                            self.push_label(body, idx);
                            pc = else_pc as usize + 1;
                        } else {
                            pc = block.end_pc as usize + 1;
                        }
                    }
                    Op::Else(idx) => {
                        // Falling into `else` ends the taken `then` arm.
                        self.labels.pop();
                        pc = body.blocks[idx as usize].end_pc as usize + 1;
                    }
                    Op::End(0) | Op::Return => {
                        self.do_return();
                        continue 'frames;
                    }
                    Op::End(_) => {
                        self.labels.pop();
                    }

                    Op::Br(depth) => match self.branch(body, depth) {
                        Branch::Jump(target) => pc = target,
                        Branch::Return => {
                            self.do_return();
                            continue 'frames;
                        }
                    },
                    Op::BrIf(depth) => {
                        if self.pop() as u32 != 0 {
                            match self.branch(body, depth) {
                                Branch::Jump(target) => pc = target,
                                Branch::Return => {
                                    self.do_return();
                                    continue 'frames;
                                }
                            }
                        }
                    }
                    Op::BrTable(idx) => {
                        let table = &body.br_tables[idx as usize];
                        let i = self.pop() as u32 as usize;
                        let depth = table.depths.get(i).copied().unwrap_or(table.default);
                        match self.branch(body, depth) {
                            Branch::Jump(target) => pc = target,
                            Branch::Return => {
                                self.do_return();
                                continue 'frames;
                            }
                        }
                    }

                    Op::Call(func_idx) => {
                        self.save_pc(pc);
                        self.call(func_idx)?;
                        continue 'frames;
                    }
                    Op::CallIndirect { type_idx, table } => {
                        let func_idx = self.resolve_indirect(type_idx, table)?;
                        self.save_pc(pc);
                        self.call(func_idx)?;
                        continue 'frames;
                    }

                    Op::Drop => {
                        self.pop();
                    }
                    Op::Select => {
                        let cond = self.pop() as u32;
                        let b = self.pop();
                        let a = self.pop();
                        self.stack.push(if cond != 0 { a } else { b });
                    }

                    Op::LocalGet(i) => {
                        let value = self.stack[locals_start + i as usize];
                        self.stack.push(value);
                    }
                    Op::LocalSet(i) => {
                        let value = self.pop();
                        self.stack[locals_start + i as usize] = value;
                    }
                    Op::LocalTee(i) => {
                        let value = self.stack.last().copied().unwrap_or_default();
                        self.stack[locals_start + i as usize] = value;
                    }
                    Op::GlobalGet(i) => {
                        let bits = self.instance.globals[i as usize].bits;
                        self.stack.push(bits);
                    }
                    Op::GlobalSet(i) => {
                        let value = self.pop();
                        self.instance.globals[i as usize].bits = value;
                    }

                    Op::Load(op, offset) => self.load(op, offset)?,
                    Op::Store(op, offset) => self.store_value(op, offset)?,
                    Op::MemorySize => {
                        let pages = self.memory()?.pages();
                        self.stack.push(pages as u64);
                    }
                    Op::MemoryGrow => {
                        let delta = self.pop() as u32;
                        let old = self.memory_mut()?.grow(delta).map_or(-1, |old| old as i32);
                        self.stack.push(old as u32 as u64);
                    }
                    Op::MemoryFill => {
                        let len = self.pop_addr();
                        let value = self.pop() as u8;
                        let dst = self.pop_addr();
                        self.memory_mut()?.fill(dst, value, len)?;
                    }
                    Op::MemoryCopy => {
                        let len = self.pop_addr();
                        let src = self.pop_addr();
                        let dst = self.pop_addr();
                        self.memory_mut()?.copy_within(dst, src, len)?;
                    }
                    Op::MemoryInit(seg) => {
                        let len = self.pop_addr();
                        let src = self.pop_addr();
                        let dst = self.pop_addr();
                        let Instance { memory, data, .. } = &mut *self.instance;
                        let memory = memory.as_mut().ok_or(Trap::MemoryOutOfBounds)?;
                        let segment = data[seg as usize].as_deref().unwrap_or_default();
                        memory.init(dst, segment, src, len)?;
                    }
                    Op::DataDrop(seg) => self.instance.data[seg as usize] = None,

                    Op::Const(bits) => self.stack.push(bits),

                    Op::RefNull => self.stack.push(NULL_REF),
                    Op::RefIsNull => {
                        let value = self.pop();
                        self.stack.push((value == NULL_REF) as u64);
                    }
                    Op::RefFunc(func_idx) => self.stack.push(func_idx as u64),

                    Op::Numeric(op) => numeric::exec(&mut self.stack, op)?,
                }
            }
        }
        Ok(())
    }

    // Validated code never pops an empty stack.
    #[inline(always)]
    fn pop(&mut self) -> u64 {
        self.stack.pop().unwrap_or_default()
    }

    #[inline(always)]
    fn pop_addr(&mut self) -> u64 {
        self.pop() as u32 as u64
    }

    fn consume_fuel(&mut self) -> Result<(), Trap> {
        if let Some(fuel) = &mut self.fuel {
            *fuel = fuel.checked_sub(1).ok_or(Trap::OutOfFuel)?;
        }
        Ok(())
    }

    fn save_pc(&mut self, pc: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = pc;
        }
    }

    fn push_label(&mut self, body: &ParsedBody, block: u32) {
        let params = body.blocks[block as usize].params as usize;
        self.labels.push(Label {
            block,
            stack_height: self.stack.len() - params,
        });
    }

    /// Keep the top `arity` values and drop everything above `height`.
    fn unwind(&mut self, height: usize, arity: usize) {
        let top = self.stack.len() - arity;
        if top > height {
            self.stack.copy_within(top.., height);
        }
        self.stack.truncate(height + arity);
    }

    fn branch(&mut self, body: &ParsedBody, depth: u32) -> Branch {
        let labels_start = self.frames.last().map_or(0, |frame| frame.labels_start);
        let label_idx = self.labels.len() - 1 - depth as usize;
        if label_idx == labels_start {
            return Branch::Return;
        }
        let Label {
            block,
            stack_height,
        } = self.labels[label_idx];
        let block = &body.blocks[block as usize];
        self.unwind(stack_height, block.branch_arity());
        if block.kind == BlockKind::Loop {
            self.labels.truncate(label_idx + 1);
            Branch::Jump(block.start_pc as usize + 1)
        } else {
            self.labels.truncate(label_idx);
            Branch::Jump(block.end_pc as usize + 1)
        }
    }

    /// Pop the current frame, leaving its results where its locals began.
    fn do_return(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.unwind(frame.locals_start, frame.arity);
            self.labels.truncate(frame.labels_start);
        }
    }

    fn resolve_indirect(&mut self, type_idx: u32, table: u32) -> Result<u32, anyhow::Error> {
        let module = self.module;
        let elem = self.pop() as u32;
        let table = &self.instance.tables[table as usize];
        let slot = *table
            .elems
            .get(elem as usize)
            .ok_or(Trap::UndefinedElement)?;
        let func_idx = slot.ok_or(Trap::UninitializedElement)?;
        let expected = module.types.get(type_idx as usize);
        if expected != Some(module.func_type(func_idx)?) {
            return Err(Trap::IndirectCallTypeMismatch.into());
        }
        Ok(func_idx)
    }

    fn memory(&self) -> Result<&Memory, Trap> {
        self.instance.memory.as_ref().ok_or(Trap::MemoryOutOfBounds)
    }

    fn memory_mut(&mut self) -> Result<&mut Memory, Trap> {
        self.instance.memory.as_mut().ok_or(Trap::MemoryOutOfBounds)
    }

    fn load(&mut self, op: LoadOp, offset: u64) -> Result<(), Trap> {
        let addr = self.pop_addr().saturating_add(offset);
        let memory = self.memory()?;
        let bits = match op {
            LoadOp::I32 | LoadOp::F32 => u32::from_le_bytes(memory.load(addr)?) as u64,
            LoadOp::I64 | LoadOp::F64 => u64::from_le_bytes(memory.load(addr)?),
            LoadOp::I32Load8S => i8::from_le_bytes(memory.load(addr)?) as i32 as u32 as u64,
            LoadOp::I32Load8U | LoadOp::I64Load8U => u8::from_le_bytes(memory.load(addr)?) as u64,
            LoadOp::I32Load16S => i16::from_le_bytes(memory.load(addr)?) as i32 as u32 as u64,
            LoadOp::I32Load16U | LoadOp::I64Load16U => {
                u16::from_le_bytes(memory.load(addr)?) as u64
            }
            LoadOp::I64Load8S => i8::from_le_bytes(memory.load(addr)?) as i64 as u64,
            LoadOp::I64Load16S => i16::from_le_bytes(memory.load(addr)?) as i64 as u64,
            LoadOp::I64Load32S => i32::from_le_bytes(memory.load(addr)?) as i64 as u64,
            LoadOp::I64Load32U => u32::from_le_bytes(memory.load(addr)?) as u64,
        };
        self.stack.push(bits);
        Ok(())
    }

    fn store_value(&mut self, op: StoreOp, offset: u64) -> Result<(), Trap> {
        let value = self.pop();
        let addr = self.pop_addr().saturating_add(offset);
        let memory = self.memory_mut()?;
        match op {
            StoreOp::I32 | StoreOp::F32 | StoreOp::I64Store32 => {
                memory.store(addr, &(value as u32).to_le_bytes())
            }
            StoreOp::I64 | StoreOp::F64 => memory.store(addr, &value.to_le_bytes()),
            StoreOp::I32Store8 | StoreOp::I64Store8 => memory.store(addr, &[value as u8]),
            StoreOp::I32Store16 | StoreOp::I64Store16 => {
                memory.store(addr, &(value as u16).to_le_bytes())
            }
        }
    }
}
