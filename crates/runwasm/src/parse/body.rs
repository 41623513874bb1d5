use wasmparser::{BlockType, FuncType, FunctionBody, Operator};
#[cfg(test)]
mod tests;

/// A parsed function body, pre-decoded from raw wasm bytes.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedBody {
    /// One entry per instruction.
    pub(crate) ops: Vec<Op>,

    /// Block metadata, indexed by block index. Block 0 is the
    /// implicit function-level block.
    pub(crate) blocks: Vec<Block>,

    /// Out-of-line `br_table` data, indexed by `Op::BrTable`.
    pub(crate) br_tables: Vec<BrTable>,
}

/// A pre-decoded instruction. Control instructions refer to blocks by
/// index; branch instructions keep their relative depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Op {
    Unreachable,
    Nop,
    Block(u32),
    Loop(u32),
    If(u32),
    Else(u32),
    End(u32),
    Br(u32),
    BrIf(u32),
    BrTable(u32),
    Return,
    Call(u32),
    CallIndirect { type_idx: u32, table: u32 },

    Drop,
    Select,

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    /// Load with a static offset.
    Load(LoadOp, u64),
    /// Store with a static offset.
    Store(StoreOp, u64),
    MemorySize,
    MemoryGrow,
    MemoryFill,
    MemoryCopy,
    MemoryInit(u32),
    DataDrop(u32),

    /// Any numeric constant, already packed into stack bits.
    Const(u64),

    RefNull,
    RefIsNull,
    RefFunc(u32),

    Numeric(NumOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadOp {
    I32,
    I64,
    F32,
    F64,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreOp {
    I32,
    I64,
    F32,
    F64,
    I32Store8,
    I32Store16,
    I64Store8,
    I64Store16,
    I64Store32,
}

/// Declares `NumOp` with one variant per stack-only numeric operator
/// and the matching decoder. Variant names follow wasmparser's.
macro_rules! numeric_ops {
    ($($name:ident),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) enum NumOp {
            $($name),*
        }

        fn decode_numeric(op: &Operator) -> Option<NumOp> {
            match op {
                $(Operator::$name => Some(NumOp::$name),)*
                _ => None,
            }
        }
    };
}

numeric_ops!(
    // i32 comparison
    I32Eqz, I32Eq, I32Ne, I32LtS, I32LtU, I32GtS, I32GtU, I32LeS, I32LeU, I32GeS, I32GeU,
    // i64 comparison
    I64Eqz, I64Eq, I64Ne, I64LtS, I64LtU, I64GtS, I64GtU, I64LeS, I64LeU, I64GeS, I64GeU,
    // float comparison
    F32Eq, F32Ne, F32Lt, F32Gt, F32Le, F32Ge,
    F64Eq, F64Ne, F64Lt, F64Gt, F64Le, F64Ge,
    // i32 arithmetic
    I32Clz, I32Ctz, I32Popcnt, I32Add, I32Sub, I32Mul, I32DivS, I32DivU, I32RemS, I32RemU,
    I32And, I32Or, I32Xor, I32Shl, I32ShrS, I32ShrU, I32Rotl, I32Rotr,
    // i64 arithmetic
    I64Clz, I64Ctz, I64Popcnt, I64Add, I64Sub, I64Mul, I64DivS, I64DivU, I64RemS, I64RemU,
    I64And, I64Or, I64Xor, I64Shl, I64ShrS, I64ShrU, I64Rotl, I64Rotr,
    // f32 arithmetic
    F32Abs, F32Neg, F32Ceil, F32Floor, F32Trunc, F32Nearest, F32Sqrt,
    F32Add, F32Sub, F32Mul, F32Div, F32Min, F32Max, F32Copysign,
    // f64 arithmetic
    F64Abs, F64Neg, F64Ceil, F64Floor, F64Trunc, F64Nearest, F64Sqrt,
    F64Add, F64Sub, F64Mul, F64Div, F64Min, F64Max, F64Copysign,
    // conversions
    I32WrapI64, I32TruncF32S, I32TruncF32U, I32TruncF64S, I32TruncF64U,
    I64ExtendI32S, I64ExtendI32U, I64TruncF32S, I64TruncF32U, I64TruncF64S, I64TruncF64U,
    F32ConvertI32S, F32ConvertI32U, F32ConvertI64S, F32ConvertI64U, F32DemoteF64,
    F64ConvertI32S, F64ConvertI32U, F64ConvertI64S, F64ConvertI64U, F64PromoteF32,
    I32ReinterpretF32, I64ReinterpretF64, F32ReinterpretI32, F64ReinterpretI64,
    // sign extension
    I32Extend8S, I32Extend16S, I64Extend8S, I64Extend16S, I64Extend32S,
    // saturating truncation
    I32TruncSatF32S, I32TruncSatF32U, I32TruncSatF64S, I32TruncSatF64U,
    I64TruncSatF32S, I64TruncSatF32U, I64TruncSatF64S, I64TruncSatF64U,
);

/// Metadata for a block/loop/if/function, resolved at parse time.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) kind: BlockKind,
    /// PC of the block opener (block/loop/if instruction).
    pub(crate) start_pc: u32,
    /// PC of the `end` instruction (patched when `end` is parsed).
    pub(crate) end_pc: u32,
    /// PC of the `else` instruction, if any.
    pub(crate) else_pc: Option<u32>,
    pub(crate) params: u32,
    pub(crate) results: u32,
}

impl Block {
    /// Number of values a branch to this block carries.
    pub(crate) fn branch_arity(&self) -> usize {
        match self.kind {
            BlockKind::Loop => self.params as usize,
            _ => self.results as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BlockKind {
    /// Implicit function-level block.
    Function,
    Block,
    Loop,
    If,
}

#[derive(Debug, Clone)]
pub(crate) struct BrTable {
    pub(crate) depths: Box<[u32]>,
    pub(crate) default: u32,
}

impl ParsedBody {
    /// Parse a validated function body. `types` is the module's type
    /// section, needed to resolve multi-value block types.
    pub(crate) fn parse(
        reader: &FunctionBody,
        types: &[FuncType],
        result_count: usize,
    ) -> Result<Self, anyhow::Error> {
        let mut body = Self::default();

        let func_block_idx = body.open_block(BlockKind::Function, 0, result_count as u32);
        // Track open block indices so `else`/`end` can find the right one.
        let mut block_stack: Vec<u32> = vec![func_block_idx];

        for op in reader.get_operators_reader()? {
            body.parse_op(op?, types, &mut block_stack)?;
        }
        anyhow::ensure!(block_stack.is_empty(), "function body has unclosed blocks");
        Ok(body)
    }

    /// Allocate a new block entry, returning its index.
    fn open_block(&mut self, kind: BlockKind, params: u32, results: u32) -> u32 {
        let idx = self.blocks.len() as u32;
        self.blocks.push(Block {
            kind,
            start_pc: self.ops.len() as u32,
            end_pc: 0,
            else_pc: None,
            params,
            results,
        });
        idx
    }

    fn open_typed_block(
        &mut self,
        kind: BlockKind,
        blockty: BlockType,
        types: &[FuncType],
        block_stack: &mut Vec<u32>,
    ) -> Result<u32, anyhow::Error> {
        let (params, results) = block_arity(blockty, types)?;
        let idx = self.open_block(kind, params, results);
        block_stack.push(idx);
        Ok(idx)
    }

    fn parse_op(
        &mut self,
        op: Operator,
        types: &[FuncType],
        block_stack: &mut Vec<u32>,
    ) -> Result<(), anyhow::Error> {
        if let Some(num) = decode_numeric(&op) {
            self.ops.push(Op::Numeric(num));
            return Ok(());
        }

        let decoded = match op {
            Operator::Unreachable => Op::Unreachable,
            Operator::Nop => Op::Nop,
            Operator::Return => Op::Return,

            // Block control flow
            Operator::Block { blockty } => {
                Op::Block(self.open_typed_block(BlockKind::Block, blockty, types, block_stack)?)
            }
            Operator::Loop { blockty } => {
                Op::Loop(self.open_typed_block(BlockKind::Loop, blockty, types, block_stack)?)
            }
            Operator::If { blockty } => {
                Op::If(self.open_typed_block(BlockKind::If, blockty, types, block_stack)?)
            }
            Operator::Else => {
                let &idx = block_stack
                    .last()
                    .ok_or_else(|| anyhow::anyhow!("else without open block"))?;
                self.blocks[idx as usize].else_pc = Some(self.ops.len() as u32);
                Op::Else(idx)
            }
            Operator::End => {
                let idx = block_stack
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("end without open block"))?;
                self.blocks[idx as usize].end_pc = self.ops.len() as u32;
                Op::End(idx)
            }
            Operator::Br { relative_depth } => Op::Br(relative_depth),
            Operator::BrIf { relative_depth } => Op::BrIf(relative_depth),
            Operator::BrTable { targets } => {
                let depths = targets.targets().collect::<Result<Box<[u32]>, _>>()?;
                let idx = self.br_tables.len() as u32;
                self.br_tables.push(BrTable {
                    depths,
                    default: targets.default(),
                });
                Op::BrTable(idx)
            }

            // Calls
            Operator::Call { function_index } => Op::Call(function_index),
            Operator::CallIndirect {
                type_index,
                table_index,
            } => Op::CallIndirect {
                type_idx: type_index,
                table: table_index,
            },

            // Parametric
            Operator::Drop => Op::Drop,
            Operator::Select | Operator::TypedSelect { .. } => Op::Select,

            // Variables
            Operator::LocalGet { local_index } => Op::LocalGet(local_index),
            Operator::LocalSet { local_index } => Op::LocalSet(local_index),
            Operator::LocalTee { local_index } => Op::LocalTee(local_index),
            Operator::GlobalGet { global_index } => Op::GlobalGet(global_index),
            Operator::GlobalSet { global_index } => Op::GlobalSet(global_index),

            // Memory
            Operator::I32Load { memarg } => Op::Load(LoadOp::I32, memarg.offset),
            Operator::I64Load { memarg } => Op::Load(LoadOp::I64, memarg.offset),
            Operator::F32Load { memarg } => Op::Load(LoadOp::F32, memarg.offset),
            Operator::F64Load { memarg } => Op::Load(LoadOp::F64, memarg.offset),
            Operator::I32Load8S { memarg } => Op::Load(LoadOp::I32Load8S, memarg.offset),
            Operator::I32Load8U { memarg } => Op::Load(LoadOp::I32Load8U, memarg.offset),
            Operator::I32Load16S { memarg } => Op::Load(LoadOp::I32Load16S, memarg.offset),
            Operator::I32Load16U { memarg } => Op::Load(LoadOp::I32Load16U, memarg.offset),
            Operator::I64Load8S { memarg } => Op::Load(LoadOp::I64Load8S, memarg.offset),
            Operator::I64Load8U { memarg } => Op::Load(LoadOp::I64Load8U, memarg.offset),
            Operator::I64Load16S { memarg } => Op::Load(LoadOp::I64Load16S, memarg.offset),
            Operator::I64Load16U { memarg } => Op::Load(LoadOp::I64Load16U, memarg.offset),
            Operator::I64Load32S { memarg } => Op::Load(LoadOp::I64Load32S, memarg.offset),
            Operator::I64Load32U { memarg } => Op::Load(LoadOp::I64Load32U, memarg.offset),
            Operator::I32Store { memarg } => Op::Store(StoreOp::I32, memarg.offset),
            Operator::I64Store { memarg } => Op::Store(StoreOp::I64, memarg.offset),
            Operator::F32Store { memarg } => Op::Store(StoreOp::F32, memarg.offset),
            Operator::F64Store { memarg } => Op::Store(StoreOp::F64, memarg.offset),
            Operator::I32Store8 { memarg } => Op::Store(StoreOp::I32Store8, memarg.offset),
            Operator::I32Store16 { memarg } => Op::Store(StoreOp::I32Store16, memarg.offset),
            Operator::I64Store8 { memarg } => Op::Store(StoreOp::I64Store8, memarg.offset),
            Operator::I64Store16 { memarg } => Op::Store(StoreOp::I64Store16, memarg.offset),
            Operator::I64Store32 { memarg } => Op::Store(StoreOp::I64Store32, memarg.offset),
            Operator::MemorySize { .. } => Op::MemorySize,
            Operator::MemoryGrow { .. } => Op::MemoryGrow,
            Operator::MemoryFill { .. } => Op::MemoryFill,
            Operator::MemoryCopy { .. } => Op::MemoryCopy,
            Operator::MemoryInit { data_index, .. } => Op::MemoryInit(data_index),
            Operator::DataDrop { data_index } => Op::DataDrop(data_index),

            // Constants
            Operator::I32Const { value } => Op::Const(value as u32 as u64),
            Operator::I64Const { value } => Op::Const(value as u64),
            Operator::F32Const { value } => Op::Const(value.bits() as u64),
            Operator::F64Const { value } => Op::Const(value.bits()),

            // References
            Operator::RefNull { .. } => Op::RefNull,
            Operator::RefIsNull => Op::RefIsNull,
            Operator::RefFunc { function_index } => Op::RefFunc(function_index),

            other => anyhow::bail!("unsupported operator: {other:?}"),
        };
        self.ops.push(decoded);
        Ok(())
    }
}

/// Resolve a block type into (param count, result count).
fn block_arity(blockty: BlockType, types: &[FuncType]) -> Result<(u32, u32), anyhow::Error> {
    Ok(match blockty {
        BlockType::Empty => (0, 0),
        BlockType::Type(_) => (0, 1),
        BlockType::FuncType(idx) => {
            let ty = types
                .get(idx as usize)
                .ok_or_else(|| anyhow::anyhow!("block type index {idx} out of bounds"))?;
            (ty.params().len() as u32, ty.results().len() as u32)
        }
    })
}
