use super::*;
use wasmparser::{Parser, Payload};

/// Parse the first function body of a single-function module.
fn parse_first_body(wat: &str) -> ParsedBody {
    let bytes = wat::parse_str(wat).unwrap();
    let mut types = Vec::new();
    for payload in Parser::new(0).parse_all(&bytes) {
        match payload.unwrap() {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    types.push(ty.unwrap());
                }
            }
            Payload::CodeSectionEntry(body) => {
                return ParsedBody::parse(&body, &types, 1).unwrap();
            }
            _ => {}
        }
    }
    panic!("module has no function body");
}

#[test]
fn constants_are_packed_into_stack_bits() {
    let body = parse_first_body(
        r#"(module (func (result f32) f32.const 42 drop i32.const -1 drop f32.const 1.5))"#,
    );
    assert_eq!(body.ops[0], Op::Const(42.0f32.to_bits() as u64));
    assert_eq!(body.ops[2], Op::Const(0xFFFF_FFFF));
    assert_eq!(body.ops[4], Op::Const(1.5f32.to_bits() as u64));
}

#[test]
fn function_block_spans_whole_body() {
    let body = parse_first_body(r#"(module (func (result i32) i32.const 1 i32.const 2 i32.add))"#);
    assert_eq!(body.ops.len(), 4);
    assert_eq!(body.ops[2], Op::Numeric(NumOp::I32Add));
    assert_eq!(body.ops[3], Op::End(0));
    let func_block = &body.blocks[0];
    assert_eq!(func_block.kind, BlockKind::Function);
    assert_eq!(func_block.start_pc, 0);
    assert_eq!(func_block.end_pc, 3);
    assert_eq!(func_block.results, 1);
}

#[test]
fn if_else_records_else_and_end() {
    let body = parse_first_body(
        r#"(module (func (param i32) (result i32)
            local.get 0
            if (result i32)
                i32.const 1
            else
                i32.const 2
            end))"#,
    );
    // local.get, if, const, else, const, end, end
    assert_eq!(body.ops[1], Op::If(1));
    let block = &body.blocks[1];
    assert_eq!(block.kind, BlockKind::If);
    assert_eq!(block.start_pc, 1);
    assert_eq!(block.else_pc, Some(3));
    assert_eq!(block.end_pc, 5);
    assert_eq!(block.branch_arity(), 1);
}

#[test]
fn loop_branches_carry_params() {
    let body = parse_first_body(
        r#"(module
            (type $t (func (param i32) (result i32)))
            (func (result i32) (local i32)
                i32.const 3
                loop (type $t)
                    i32.const 1
                    i32.sub
                    local.tee 0
                    local.get 0
                    br_if 0
                end))"#,
    );
    let block = &body.blocks[1];
    assert_eq!(block.kind, BlockKind::Loop);
    assert_eq!(block.params, 1);
    assert_eq!(block.results, 1);
    assert_eq!(block.branch_arity(), 1);
    assert!(body.ops.contains(&Op::BrIf(0)));
}

#[test]
fn br_table_goes_out_of_line() {
    let body = parse_first_body(
        r#"(module (func (param i32) (result i32)
            block
                block
                    local.get 0
                    br_table 0 1 1
                end
                i32.const 10
                return
            end
            i32.const 20))"#,
    );
    assert!(body.ops.contains(&Op::BrTable(0)));
    assert_eq!(&*body.br_tables[0].depths, &[0, 1]);
    assert_eq!(body.br_tables[0].default, 1);
}

#[test]
fn memory_ops_keep_static_offset() {
    let body = parse_first_body(
        r#"(module (memory 1) (func (result i32)
            i32.const 0
            i32.load8_u offset=16))"#,
    );
    assert_eq!(body.ops[1], Op::Load(LoadOp::I32Load8U, 16));
}

#[test]
fn simd_is_rejected() {
    let bytes = wat::parse_str(
        r#"(module (func (result i32) v128.const i64x2 0 0 i32x4.extract_lane 0))"#,
    )
    .unwrap();
    for payload in Parser::new(0).parse_all(&bytes) {
        if let Payload::CodeSectionEntry(body) = payload.unwrap() {
            let err = ParsedBody::parse(&body, &[], 1).unwrap_err();
            assert!(err.to_string().contains("unsupported operator"), "{err}");
            return;
        }
    }
    panic!("module has no function body");
}
