//! The instruction model: nested control-flow trees, the flat editing view,
//! and structural search over code bodies.
//!
//! Code bodies are stored *nested*: `block` and `loop` own their body as a
//! sub-sequence, `if` owns two. For linear editing the nested form is
//! [`flatten`]ed into a list in which `else`/`end` appear as explicit
//! terminator entries; [`fold`] is the exact inverse. Offsets used by
//! [`locate`] count tree nodes in depth-first pre-order over the nested form
//! and never count terminators (the nested form has none).

use crate::error::Error;
use crate::types::ValType;

/// The declared result shape of a `block`/`loop`/`if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Result(ValType),
    Func(u32),
}

/// One instruction.
///
/// The opcode table is deliberately not modeled in full: control-flow
/// headers, index-bearing operators, and numeric constants are structured
/// variants (the rewriter needs to see through them), and every other
/// operator rides along as its exact encoded bytes in [`Instruction::Raw`].
#[derive(Debug, Clone)]
pub enum Instruction {
    Block {
        ty: BlockType,
        body: Vec<Instruction>,
    },
    Loop {
        ty: BlockType,
        body: Vec<Instruction>,
    },
    If {
        ty: BlockType,
        then_body: Vec<Instruction>,
        else_body: Vec<Instruction>,
    },
    /// Terminator between the two arms of an `if`. Only appears in the flat
    /// view produced by [`flatten`].
    Else,
    /// Terminator closing a `block`/`loop`/`if`. Only appears in the flat
    /// view produced by [`flatten`].
    End,
    Unreachable,
    Nop,
    Return,
    Drop,
    Select,
    Br(u32),
    BrIf(u32),
    Call(u32),
    CallIndirect { type_index: u32, table_index: u32 },
    RefFunc(u32),
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    /// The encoded bytes of an operator the model does not interpret.
    Raw(Vec<u8>),
}

// Float payloads compare by bit pattern, so NaN-bearing constants are
// equal to their own copies and distinct NaN encodings stay distinct.
impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        use Instruction as I;
        match (self, other) {
            (I::Block { ty: a, body: ab }, I::Block { ty: b, body: bb }) => a == b && ab == bb,
            (I::Loop { ty: a, body: ab }, I::Loop { ty: b, body: bb }) => a == b && ab == bb,
            (
                I::If {
                    ty: a,
                    then_body: at,
                    else_body: ae,
                },
                I::If {
                    ty: b,
                    then_body: bt,
                    else_body: be,
                },
            ) => a == b && at == bt && ae == be,
            (I::Else, I::Else)
            | (I::End, I::End)
            | (I::Unreachable, I::Unreachable)
            | (I::Nop, I::Nop)
            | (I::Return, I::Return)
            | (I::Drop, I::Drop)
            | (I::Select, I::Select) => true,
            (I::Br(a), I::Br(b))
            | (I::BrIf(a), I::BrIf(b))
            | (I::Call(a), I::Call(b))
            | (I::RefFunc(a), I::RefFunc(b))
            | (I::LocalGet(a), I::LocalGet(b))
            | (I::LocalSet(a), I::LocalSet(b))
            | (I::LocalTee(a), I::LocalTee(b))
            | (I::GlobalGet(a), I::GlobalGet(b))
            | (I::GlobalSet(a), I::GlobalSet(b)) => a == b,
            (
                I::CallIndirect {
                    type_index: at,
                    table_index: ai,
                },
                I::CallIndirect {
                    type_index: bt,
                    table_index: bi,
                },
            ) => at == bt && ai == bi,
            (I::I32Const(a), I::I32Const(b)) => a == b,
            (I::I64Const(a), I::I64Const(b)) => a == b,
            (I::F32Const(a), I::F32Const(b)) => a.to_bits() == b.to_bits(),
            (I::F64Const(a), I::F64Const(b)) => a.to_bits() == b.to_bits(),
            (I::Raw(a), I::Raw(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Instruction {}

/// Fieldless mirror of [`Instruction`], for shape-only matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Block,
    Loop,
    If,
    Else,
    End,
    Unreachable,
    Nop,
    Return,
    Drop,
    Select,
    Br,
    BrIf,
    Call,
    CallIndirect,
    RefFunc,
    LocalGet,
    LocalSet,
    LocalTee,
    GlobalGet,
    GlobalSet,
    I32Const,
    I64Const,
    F32Const,
    F64Const,
    Raw,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Block { .. } => Opcode::Block,
            Instruction::Loop { .. } => Opcode::Loop,
            Instruction::If { .. } => Opcode::If,
            Instruction::Else => Opcode::Else,
            Instruction::End => Opcode::End,
            Instruction::Unreachable => Opcode::Unreachable,
            Instruction::Nop => Opcode::Nop,
            Instruction::Return => Opcode::Return,
            Instruction::Drop => Opcode::Drop,
            Instruction::Select => Opcode::Select,
            Instruction::Br(_) => Opcode::Br,
            Instruction::BrIf(_) => Opcode::BrIf,
            Instruction::Call(_) => Opcode::Call,
            Instruction::CallIndirect { .. } => Opcode::CallIndirect,
            Instruction::RefFunc(_) => Opcode::RefFunc,
            Instruction::LocalGet(_) => Opcode::LocalGet,
            Instruction::LocalSet(_) => Opcode::LocalSet,
            Instruction::LocalTee(_) => Opcode::LocalTee,
            Instruction::GlobalGet(_) => Opcode::GlobalGet,
            Instruction::GlobalSet(_) => Opcode::GlobalSet,
            Instruction::I32Const(_) => Opcode::I32Const,
            Instruction::I64Const(_) => Opcode::I64Const,
            Instruction::F32Const(_) => Opcode::F32Const,
            Instruction::F64Const(_) => Opcode::F64Const,
            Instruction::Raw(_) => Opcode::Raw,
        }
    }
}

/// Converts a nested instruction sequence into its flat editing view.
///
/// Headers are emitted with their owned bodies drained to empty, followed by
/// the flattened body and an explicit `end` (for `if`: then-arm, `else`,
/// else-arm, `end`). Pure function; same input always yields the same
/// output.
pub fn flatten(instrs: &[Instruction]) -> Vec<Instruction> {
    let mut flat = Vec::new();
    flatten_into(instrs, &mut flat);
    flat
}

fn flatten_into(instrs: &[Instruction], out: &mut Vec<Instruction>) {
    for instr in instrs {
        match instr {
            Instruction::Block { ty, body } => {
                out.push(Instruction::Block {
                    ty: *ty,
                    body: Vec::new(),
                });
                flatten_into(body, out);
                out.push(Instruction::End);
            }
            Instruction::Loop { ty, body } => {
                out.push(Instruction::Loop {
                    ty: *ty,
                    body: Vec::new(),
                });
                flatten_into(body, out);
                out.push(Instruction::End);
            }
            Instruction::If {
                ty,
                then_body,
                else_body,
            } => {
                out.push(Instruction::If {
                    ty: *ty,
                    then_body: Vec::new(),
                    else_body: Vec::new(),
                });
                flatten_into(then_body, out);
                out.push(Instruction::Else);
                flatten_into(else_body, out);
                out.push(Instruction::End);
            }
            other => out.push(other.clone()),
        }
    }
}

/// What stopped a folding pass over one nesting level.
enum Stop {
    EndOfInput,
    End,
    Else,
}

/// Re-folds a flat instruction sequence into nested form. Exact left inverse
/// of [`flatten`]: `fold(&flatten(x)) == x` for every valid nested `x`.
///
/// Terminators are matched by balance, so arbitrarily deep nesting folds
/// correctly. A sequence whose terminators do not balance its headers is
/// rejected.
pub fn fold(flat: &[Instruction]) -> Result<Vec<Instruction>, Error> {
    let mut pos = 0;
    let (seq, stop) = fold_seq(flat, &mut pos)?;
    match stop {
        Stop::EndOfInput => Ok(seq),
        Stop::End => Err(Error::UnbalancedSequence("`end` without an open block")),
        Stop::Else => Err(Error::UnbalancedSequence("`else` without an open `if`")),
    }
}

/// Folds until a terminator or the end of input, threading the cursor
/// explicitly so sibling levels never share hidden state.
fn fold_seq(flat: &[Instruction], pos: &mut usize) -> Result<(Vec<Instruction>, Stop), Error> {
    let mut out = Vec::new();
    while *pos < flat.len() {
        match &flat[*pos] {
            Instruction::End => {
                *pos += 1;
                return Ok((out, Stop::End));
            }
            Instruction::Else => {
                *pos += 1;
                return Ok((out, Stop::Else));
            }
            Instruction::Block { ty, .. } => {
                let ty = *ty;
                *pos += 1;
                let (body, stop) = fold_seq(flat, pos)?;
                if !matches!(stop, Stop::End) {
                    return Err(Error::UnbalancedSequence("`block` is missing its `end`"));
                }
                out.push(Instruction::Block { ty, body });
            }
            Instruction::Loop { ty, .. } => {
                let ty = *ty;
                *pos += 1;
                let (body, stop) = fold_seq(flat, pos)?;
                if !matches!(stop, Stop::End) {
                    return Err(Error::UnbalancedSequence("`loop` is missing its `end`"));
                }
                out.push(Instruction::Loop { ty, body });
            }
            Instruction::If { ty, .. } => {
                let ty = *ty;
                *pos += 1;
                let (then_body, stop) = fold_seq(flat, pos)?;
                let else_body = match stop {
                    Stop::Else => {
                        let (else_body, stop) = fold_seq(flat, pos)?;
                        if !matches!(stop, Stop::End) {
                            return Err(Error::UnbalancedSequence("`if` is missing its `end`"));
                        }
                        else_body
                    }
                    Stop::End => Vec::new(),
                    Stop::EndOfInput => {
                        return Err(Error::UnbalancedSequence("`if` is missing its `end`"))
                    }
                };
                out.push(Instruction::If {
                    ty,
                    then_body,
                    else_body,
                });
            }
            other => {
                out.push(other.clone());
                *pos += 1;
            }
        }
    }
    Ok((out, Stop::EndOfInput))
}

/// Which owned sub-sequence of a header node a path step descends into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqArm {
    Body,
    Then,
    Else,
}

/// Structural address of one instruction in a nested sequence: the header
/// nodes to descend through, then the index within the final sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstrPath {
    pub steps: Vec<(usize, SeqArm)>,
    pub index: usize,
}

/// One hit returned by [`locate`]: the address plus a copy of the matched
/// instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrMatch {
    pub path: InstrPath,
    pub instr: Instruction,
}

/// How [`locate`] decides whether an instruction matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Depth-first pre-order offset over the nested form.
    Offset(usize),
    /// Opcode shape only, operands ignored.
    Opcode(Opcode),
    /// Opcode and operands (for headers, owned bodies included).
    Instr(Instruction),
}

/// Finds every structural location matching `selector`, recursing into
/// `block`/`loop`/`if` bodies.
pub fn locate(instrs: &[Instruction], selector: &Selector) -> Vec<InstrMatch> {
    // A fresh accumulator every call.
    let mut matches = Vec::new();
    let mut offset = 0;
    locate_in(instrs, selector, &mut Vec::new(), &mut offset, &mut matches);
    matches
}

fn locate_in(
    instrs: &[Instruction],
    selector: &Selector,
    steps: &mut Vec<(usize, SeqArm)>,
    offset: &mut usize,
    matches: &mut Vec<InstrMatch>,
) {
    for (index, instr) in instrs.iter().enumerate() {
        let hit = match selector {
            Selector::Offset(want) => *want == *offset,
            Selector::Opcode(op) => instr.opcode() == *op,
            Selector::Instr(template) => instr == template,
        };
        *offset += 1;
        if hit {
            matches.push(InstrMatch {
                path: InstrPath {
                    steps: steps.clone(),
                    index,
                },
                instr: instr.clone(),
            });
        }
        match instr {
            Instruction::Block { body, .. } | Instruction::Loop { body, .. } => {
                steps.push((index, SeqArm::Body));
                locate_in(body, selector, steps, offset, matches);
                steps.pop();
            }
            Instruction::If {
                then_body,
                else_body,
                ..
            } => {
                steps.push((index, SeqArm::Then));
                locate_in(then_body, selector, steps, offset, matches);
                steps.pop();
                steps.push((index, SeqArm::Else));
                locate_in(else_body, selector, steps, offset, matches);
                steps.pop();
            }
            _ => {}
        }
    }
}

fn subseq<'a>(root: &'a [Instruction], steps: &[(usize, SeqArm)]) -> Option<&'a [Instruction]> {
    let mut seq = root;
    for (index, arm) in steps {
        seq = match (seq.get(*index)?, arm) {
            (Instruction::Block { body, .. }, SeqArm::Body)
            | (Instruction::Loop { body, .. }, SeqArm::Body) => body,
            (Instruction::If { then_body, .. }, SeqArm::Then) => then_body,
            (Instruction::If { else_body, .. }, SeqArm::Else) => else_body,
            _ => return None,
        };
    }
    Some(seq)
}

fn subseq_mut<'a>(
    root: &'a mut Vec<Instruction>,
    steps: &[(usize, SeqArm)],
) -> Option<&'a mut Vec<Instruction>> {
    let mut seq = root;
    for (index, arm) in steps {
        seq = match (seq.get_mut(*index)?, arm) {
            (Instruction::Block { body, .. }, SeqArm::Body)
            | (Instruction::Loop { body, .. }, SeqArm::Body) => body,
            (Instruction::If { then_body, .. }, SeqArm::Then) => then_body,
            (Instruction::If { else_body, .. }, SeqArm::Else) => else_body,
            _ => return None,
        };
    }
    Some(seq)
}

/// The instruction addressed by `path`, if the path is still valid.
pub fn instr_at<'a>(root: &'a [Instruction], path: &InstrPath) -> Option<&'a Instruction> {
    subseq(root, &path.steps)?.get(path.index)
}

/// Replaces the instruction at `path` in place. Returns false if the path no
/// longer addresses anything.
pub fn replace_at(root: &mut Vec<Instruction>, path: &InstrPath, instr: Instruction) -> bool {
    match subseq_mut(root, &path.steps).and_then(|seq| seq.get_mut(path.index)) {
        Some(slot) => {
            *slot = instr;
            true
        }
        None => false,
    }
}

/// Removes and returns the instruction at `path`.
pub fn remove_at(root: &mut Vec<Instruction>, path: &InstrPath) -> Option<Instruction> {
    let seq = subseq_mut(root, &path.steps)?;
    if path.index < seq.len() {
        Some(seq.remove(path.index))
    } else {
        None
    }
}

/// Inserts `instr` immediately before the instruction at `path`. A path one
/// past the end of its sequence appends.
pub fn insert_at(root: &mut Vec<Instruction>, path: &InstrPath, instr: Instruction) -> bool {
    match subseq_mut(root, &path.steps) {
        Some(seq) if path.index <= seq.len() => {
            seq.insert(path.index, instr);
            true
        }
        _ => false,
    }
}

/// Applies `f` to every instruction in the tree, headers included, recursing
/// through owned bodies.
pub(crate) fn for_each_instr_mut(seq: &mut [Instruction], f: &mut dyn FnMut(&mut Instruction)) {
    for instr in seq {
        f(instr);
        match instr {
            Instruction::Block { body, .. } | Instruction::Loop { body, .. } => {
                for_each_instr_mut(body, f);
            }
            Instruction::If {
                then_body,
                else_body,
                ..
            } => {
                for_each_instr_mut(then_body, f);
                for_each_instr_mut(else_body, f);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_instr() -> impl Strategy<Value = Instruction> {
        let leaf = prop_oneof![
            Just(Instruction::Nop),
            Just(Instruction::Drop),
            any::<u32>().prop_map(Instruction::Call),
            any::<u32>().prop_map(Instruction::LocalGet),
            any::<u32>().prop_map(Instruction::GlobalSet),
            any::<i32>().prop_map(Instruction::I32Const),
            prop::collection::vec(any::<u8>(), 1..4).prop_map(Instruction::Raw),
        ];
        leaf.prop_recursive(4, 48, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(|body| Instruction::Block {
                    ty: BlockType::Empty,
                    body,
                }),
                prop::collection::vec(inner.clone(), 0..4).prop_map(|body| Instruction::Loop {
                    ty: BlockType::Result(ValType::I32),
                    body,
                }),
                (
                    prop::collection::vec(inner.clone(), 0..3),
                    prop::collection::vec(inner, 0..3)
                )
                    .prop_map(|(then_body, else_body)| Instruction::If {
                        ty: BlockType::Empty,
                        then_body,
                        else_body,
                    }),
            ]
        })
    }

    proptest! {
        #[test]
        fn fold_inverts_flatten(tree in prop::collection::vec(arb_instr(), 0..8)) {
            let flat = flatten(&tree);
            prop_assert_eq!(fold(&flat).unwrap(), tree.clone());
            // Flatten is deterministic.
            prop_assert_eq!(flatten(&tree), flat);
        }
    }

    #[test]
    fn flatten_emits_headers_and_terminators() {
        let tree = vec![Instruction::Block {
            ty: BlockType::Empty,
            body: vec![Instruction::If {
                ty: BlockType::Empty,
                then_body: vec![Instruction::I32Const(1)],
                else_body: vec![Instruction::I32Const(2)],
            }],
        }];
        let flat = flatten(&tree);
        assert_eq!(
            flat,
            vec![
                Instruction::Block {
                    ty: BlockType::Empty,
                    body: vec![],
                },
                Instruction::If {
                    ty: BlockType::Empty,
                    then_body: vec![],
                    else_body: vec![],
                },
                Instruction::I32Const(1),
                Instruction::Else,
                Instruction::I32Const(2),
                Instruction::End,
                Instruction::End,
            ]
        );
    }

    #[test]
    fn fold_rejects_unbalanced_input() {
        let missing_end = vec![
            Instruction::Block {
                ty: BlockType::Empty,
                body: vec![],
            },
            Instruction::Nop,
        ];
        assert!(matches!(
            fold(&missing_end),
            Err(Error::UnbalancedSequence(_))
        ));

        let stray_else = vec![Instruction::Else];
        assert!(matches!(
            fold(&stray_else),
            Err(Error::UnbalancedSequence(_))
        ));
    }

    #[test]
    fn offsets_count_nodes_in_preorder_without_terminators() {
        // 0: loop, 1: nop, 2: if, 3: call 1, 4: call 2, 5: drop
        let tree = vec![
            Instruction::Loop {
                ty: BlockType::Empty,
                body: vec![
                    Instruction::Nop,
                    Instruction::If {
                        ty: BlockType::Empty,
                        then_body: vec![Instruction::Call(1)],
                        else_body: vec![Instruction::Call(2)],
                    },
                ],
            },
            Instruction::Drop,
        ];
        let hit = locate(&tree, &Selector::Offset(4));
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].instr, Instruction::Call(2));
        assert_eq!(hit[0].path.steps, vec![(0, SeqArm::Body), (1, SeqArm::Else)]);
        assert_eq!(hit[0].path.index, 0);

        let last = locate(&tree, &Selector::Offset(5));
        assert_eq!(last[0].instr, Instruction::Drop);
        assert!(locate(&tree, &Selector::Offset(6)).is_empty());
    }

    #[test]
    fn locate_by_opcode_recurses_into_bodies() {
        let tree = vec![
            Instruction::Call(3),
            Instruction::Block {
                ty: BlockType::Empty,
                body: vec![Instruction::Call(4)],
            },
        ];
        let hits = locate(&tree, &Selector::Opcode(Opcode::Call));
        assert_eq!(hits.len(), 2);
        // Full templates match operands too.
        let exact = locate(&tree, &Selector::Instr(Instruction::Call(4)));
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].path.steps, vec![(1, SeqArm::Body)]);
    }

    #[test]
    fn path_accessors_edit_in_place() {
        let mut tree = vec![Instruction::Block {
            ty: BlockType::Empty,
            body: vec![Instruction::Call(1), Instruction::Drop],
        }];
        let hits = locate(&tree, &Selector::Instr(Instruction::Call(1)));
        let path = hits[0].path.clone();

        assert!(replace_at(&mut tree, &path, Instruction::Call(9)));
        assert_eq!(instr_at(&tree, &path), Some(&Instruction::Call(9)));

        assert!(insert_at(&mut tree, &path, Instruction::Nop));
        assert_eq!(instr_at(&tree, &path), Some(&Instruction::Nop));

        assert_eq!(remove_at(&mut tree, &path), Some(Instruction::Nop));
        assert_eq!(remove_at(&mut tree, &path), Some(Instruction::Call(9)));
        assert_eq!(
            tree,
            vec![Instruction::Block {
                ty: BlockType::Empty,
                body: vec![Instruction::Drop],
            }]
        );
    }
}
