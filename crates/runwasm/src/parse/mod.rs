pub(crate) mod body;
pub(crate) mod func;

use std::collections::HashMap;
use std::sync::Arc;

use crate::Engine;
use crate::value::Val;
use body::ParsedBody;
use func::ParsedFunction;
use wasmparser::{
    ConstExpr, DataKind, ElementItems, ElementKind, ExternalKind, FuncType, FunctionBody,
    GlobalType, Operator, Parser, Payload, RefType, TypeRef, ValType,
};

/// Everything the linker and interpreter need from a module binary.
#[derive(Debug)]
pub(crate) struct ParsedModule {
    pub(crate) types: Vec<FuncType>,
    pub(crate) imports: Vec<Import>,
    /// Type index of every function, imports first.
    pub(crate) func_types: Vec<u32>,
    pub(crate) num_func_imports: u32,
    /// Functions defined in the module (excludes imports).
    pub(crate) funcs: Vec<ParsedFunction>,
    pub(crate) tables: Vec<TableDef>,
    pub(crate) memory: Option<MemoryDef>,
    pub(crate) globals: Vec<GlobalDef>,
    pub(crate) exports: Vec<Export>,
    pub(crate) export_index: HashMap<String, usize>,
    pub(crate) start: Option<u32>,
    pub(crate) elements: Vec<ElemSegment>,
    pub(crate) data: Vec<DataSegment>,
}

/// A declared import.
#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone)]
pub enum ImportKind {
    /// Function import with its signature.
    Func(FuncType),
    Table,
    Memory,
    Global(GlobalType),
}

/// A declared export.
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

#[derive(Debug, Clone)]
pub(crate) struct TableDef {
    pub(crate) min: u64,
    /// Initial element; `None` means `ref.null`.
    pub(crate) init: Option<Vec<ConstOp>>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MemoryDef {
    pub(crate) min_pages: u64,
    pub(crate) max_pages: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalDef {
    pub(crate) ty: ValType,
    pub(crate) init: Vec<ConstOp>,
}

#[derive(Debug, Clone)]
pub(crate) struct ElemSegment {
    pub(crate) mode: ElemMode,
    pub(crate) items: Vec<Vec<ConstOp>>,
}

#[derive(Debug, Clone)]
pub(crate) enum ElemMode {
    Active { table: u32, offset: Vec<ConstOp> },
    Passive,
    Declared,
}

#[derive(Debug, Clone)]
pub(crate) struct DataSegment {
    /// Offset expression for active segments; `None` for passive ones.
    pub(crate) offset: Option<Vec<ConstOp>>,
    pub(crate) bytes: Arc<[u8]>,
}

/// Instruction allowed in a constant expression (extended-const included).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ConstOp {
    Val(Val),
    GlobalGet(u32),
    RefNull,
    RefFunc(u32),
    I32Add,
    I32Sub,
    I32Mul,
    I64Add,
    I64Sub,
    I64Mul,
}

pub(crate) fn parse(engine: &Engine, bytes: &[u8]) -> Result<ParsedModule, anyhow::Error> {
    let mut validator = engine.new_validator();
    validator.validate_all(bytes)?;

    let mut builder = ModuleBuilder::default();
    for payload in Parser::new(0).parse_all(bytes) {
        builder.process_payload(payload?)?;
    }
    Ok(builder.build())
}

/// Accumulates parsed sections while walking through WASM payloads.
#[derive(Default)]
struct ModuleBuilder {
    types: Vec<FuncType>,
    imports: Vec<Import>,
    func_types: Vec<u32>,
    num_func_imports: u32,
    funcs: Vec<ParsedFunction>,
    tables: Vec<TableDef>,
    memory: Option<MemoryDef>,
    globals: Vec<GlobalDef>,
    exports: Vec<Export>,
    start: Option<u32>,
    elements: Vec<ElemSegment>,
    data: Vec<DataSegment>,
}

impl ModuleBuilder {
    fn process_payload(&mut self, payload: Payload) -> Result<(), anyhow::Error> {
        match payload {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    self.types.push(ty?);
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    self.parse_import(import?)?;
                }
            }
            Payload::FunctionSection(reader) => {
                for type_idx in reader {
                    self.func_types.push(type_idx?);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table?;
                    let init = match table.init {
                        wasmparser::TableInit::RefNull => None,
                        wasmparser::TableInit::Expr(expr) => Some(decode_const_expr(&expr)?),
                    };
                    self.tables.push(TableDef {
                        min: table.ty.initial,
                        init,
                    });
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    let memory = memory?;
                    self.memory = Some(MemoryDef {
                        min_pages: memory.initial,
                        max_pages: memory.maximum,
                    });
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global?;
                    self.globals.push(GlobalDef {
                        ty: global.ty.content_type,
                        init: decode_const_expr(&global.init_expr)?,
                    });
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExportKind::Func,
                        ExternalKind::Table => ExportKind::Table,
                        ExternalKind::Memory => ExportKind::Memory,
                        ExternalKind::Global => ExportKind::Global,
                        other => anyhow::bail!("unsupported export kind: {other:?}"),
                    };
                    self.exports.push(Export {
                        name: export.name.to_string(),
                        kind,
                        index: export.index,
                    });
                }
            }
            Payload::StartSection { func, .. } => self.start = Some(func),
            Payload::ElementSection(reader) => {
                for element in reader {
                    self.parse_element(element?)?;
                }
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data?;
                    let offset = match data.kind {
                        DataKind::Active { offset_expr, .. } => {
                            Some(decode_const_expr(&offset_expr)?)
                        }
                        DataKind::Passive => None,
                    };
                    self.data.push(DataSegment {
                        offset,
                        bytes: data.data.into(),
                    });
                }
            }
            Payload::CodeSectionEntry(body) => self.parse_body(body)?,
            _ => {}
        }
        Ok(())
    }

    fn parse_import(&mut self, import: wasmparser::Import) -> Result<(), anyhow::Error> {
        let kind = match import.ty {
            TypeRef::Func(type_idx) => {
                self.func_types.push(type_idx);
                self.num_func_imports += 1;
                ImportKind::Func(self.func_type(type_idx)?.clone())
            }
            TypeRef::Table(_) => ImportKind::Table,
            TypeRef::Memory(_) => ImportKind::Memory,
            TypeRef::Global(ty) => ImportKind::Global(ty),
            other => anyhow::bail!("unsupported import kind: {other:?}"),
        };
        self.imports.push(Import {
            module: import.module.to_string(),
            name: import.name.to_string(),
            kind,
        });
        Ok(())
    }

    fn parse_element(&mut self, element: wasmparser::Element) -> Result<(), anyhow::Error> {
        let mut items = Vec::new();
        match element.items {
            ElementItems::Functions(reader) => {
                for idx in reader {
                    items.push(vec![ConstOp::RefFunc(idx?)]);
                }
            }
            ElementItems::Expressions(ty, reader) => {
                anyhow::ensure!(
                    ty == RefType::FUNCREF,
                    "unsupported element type: {ty:?}"
                );
                for expr in reader {
                    items.push(decode_const_expr(&expr?)?);
                }
            }
        }
        let mode = match element.kind {
            ElementKind::Active {
                table_index,
                offset_expr,
            } => ElemMode::Active {
                table: table_index.unwrap_or(0),
                offset: decode_const_expr(&offset_expr)?,
            },
            ElementKind::Passive => ElemMode::Passive,
            ElementKind::Declared => ElemMode::Declared,
        };
        self.elements.push(ElemSegment { mode, items });
        Ok(())
    }

    fn parse_body(&mut self, body: FunctionBody) -> Result<(), anyhow::Error> {
        let func_idx = self.num_func_imports as usize + self.funcs.len();
        let type_idx = *self
            .func_types
            .get(func_idx)
            .ok_or_else(|| anyhow::anyhow!("code entry {func_idx} has no declared type"))?;
        let func_type = self.func_type(type_idx)?;
        let param_count = func_type.params().len();
        let result_count = func_type.results().len();

        let mut local_defaults = Vec::new();
        for local in body.get_locals_reader()? {
            let (count, ty) = local?;
            let bits = Val::zero_for(ty)?.to_bits();
            local_defaults.extend(std::iter::repeat_n(bits, count as usize));
        }

        let parsed = ParsedBody::parse(&body, &self.types, result_count)?;
        self.funcs.push(ParsedFunction {
            type_idx,
            param_count,
            result_count,
            local_defaults: local_defaults.into(),
            body: parsed,
        });
        Ok(())
    }

    fn func_type(&self, type_idx: u32) -> Result<&FuncType, anyhow::Error> {
        self.types
            .get(type_idx as usize)
            .ok_or_else(|| anyhow::anyhow!("type index {type_idx} out of bounds"))
    }

    fn build(self) -> ParsedModule {
        let export_index = self
            .exports
            .iter()
            .enumerate()
            .map(|(i, export)| (export.name.clone(), i))
            .collect();
        ParsedModule {
            types: self.types,
            imports: self.imports,
            func_types: self.func_types,
            num_func_imports: self.num_func_imports,
            funcs: self.funcs,
            tables: self.tables,
            memory: self.memory,
            globals: self.globals,
            exports: self.exports,
            export_index,
            start: self.start,
            elements: self.elements,
            data: self.data,
        }
    }
}

fn decode_const_expr(expr: &ConstExpr) -> Result<Vec<ConstOp>, anyhow::Error> {
    let mut ops = Vec::new();
    for op in expr.get_operators_reader() {
        let op = match op? {
            Operator::End => break,
            Operator::I32Const { value } => ConstOp::Val(Val::I32(value)),
            Operator::I64Const { value } => ConstOp::Val(Val::I64(value)),
            Operator::F32Const { value } => ConstOp::Val(Val::F32(f32::from_bits(value.bits()))),
            Operator::F64Const { value } => ConstOp::Val(Val::F64(f64::from_bits(value.bits()))),
            Operator::GlobalGet { global_index } => ConstOp::GlobalGet(global_index),
            Operator::RefNull { .. } => ConstOp::RefNull,
            Operator::RefFunc { function_index } => ConstOp::RefFunc(function_index),
            Operator::I32Add => ConstOp::I32Add,
            Operator::I32Sub => ConstOp::I32Sub,
            Operator::I32Mul => ConstOp::I32Mul,
            Operator::I64Add => ConstOp::I64Add,
            Operator::I64Sub => ConstOp::I64Sub,
            Operator::I64Mul => ConstOp::I64Mul,
            other => anyhow::bail!("unsupported const expr op: {other:?}"),
        };
        ops.push(op);
    }
    Ok(ops)
}
