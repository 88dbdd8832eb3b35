//! Property-based checks that the engine stays well-behaved on arbitrary
//! input, which is what an editor feeds it most of the time.

use aurion_avm::{instruction::Instruction, program::Program};
use aurion_engine::{optimize::optimize, syntax::parse_recovering};
use aurion_errors::location::LineIndex;
use proptest::prelude::*;

/// Fragments of Aurion that, joined at random, make plausible broken files.
fn fragment() -> impl Strategy<Value = String> {
    let tokens = prop::sample::select(vec![
        "contract ",
        "{",
        "}",
        "(",
        ")",
        "require(",
        "self.",
        "msg.sender",
        " == ",
        " -= ",
        "u64",
        "map<address, u64>",
        "\n",
    ])
    .prop_map(str::to_string);
    prop_oneof![
        4 => tokens,
        1 => "[a-z_][a-z0-9_]{0,8}",
        1 => "[0-9]{1,25}",
        1 => "[ -~]{0,4}",
    ]
}

fn source() -> impl Strategy<Value = String> {
    prop::collection::vec(fragment(), 0..40).prop_map(|parts| parts.join(" "))
}

/// Straight-line AVM programs, made of instructions whose stack effects the
/// optimizer has to reason about.
fn program() -> impl Strategy<Value = Vec<Instruction>> {
    let operations = prop::sample::select(vec![
        Instruction::Add,
        Instruction::Sub,
        Instruction::Mul,
        Instruction::Div,
        Instruction::IsZero,
        Instruction::Pop,
        Instruction::Dup,
        Instruction::Swap,
        Instruction::Caller,
        Instruction::Timestamp,
    ]);
    let instruction = prop_oneof![
        1 => any::<u64>().prop_map(Instruction::push),
        2 => (0u64..4).prop_map(Instruction::push),
        1 => (0u32..4).prop_map(Instruction::sload),
        1 => (0u32..4).prop_map(Instruction::sstore),
        1 => (0u8..3).prop_map(Instruction::Arg),
        1 => (0u8..3).prop_map(Instruction::Emit),
        4 => operations,
    ];
    prop::collection::vec(instruction, 0..32).prop_map(|mut instructions| {
        instructions.push(Instruction::Stop);
        instructions
    })
}

proptest! {
    #[test]
    fn parsing_never_panics_and_locates_every_diagnostic(source in source()) {
        let outcome = parse_recovering(&source);
        let index = LineIndex::new(&source);
        let lines = source.split('\n').count();

        for diagnostic in &outcome.diagnostics {
            prop_assert!(diagnostic.location.line >= 1);
            prop_assert!(diagnostic.location.line <= lines);
            prop_assert!(diagnostic.location.column >= 1);
            prop_assert!(diagnostic.span.start <= index.len());
        }
        prop_assert_eq!(outcome.is_ok(), outcome.diagnostics.is_empty());
    }

    #[test]
    fn optimizing_is_idempotent_and_never_grows_a_buffer(instructions in program()) {
        let Ok(bytes) = Program::new(instructions).encode() else {
            return Ok(());
        };

        let first = optimize(&bytes);
        prop_assert!(first.optimized_size <= first.original_size);
        prop_assert_eq!(first.optimized_size, first.bytes.len());
        prop_assert!(Program::decode(&first.bytes).is_ok());

        let second = optimize(&first.bytes);
        prop_assert_eq!(second.optimized_size, first.optimized_size);
        prop_assert!(second.notes.is_empty(), "{:?}", second.notes);
    }

    #[test]
    fn garbage_buffers_come_back_untouched(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let result = optimize(&bytes);
        if Program::decode(&bytes).is_err() {
            prop_assert_eq!(result.bytes, bytes);
            prop_assert!(result.notes.is_empty());
        }
    }
}
