use super::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::Rng;

fn run(state: &[u8], program: &[Instruction]) -> (Result<Vec<u64>, VMError>, Vec<u8>) {
    let mut vm = VM::new(state).with_sleep_bound(Duration::ZERO);
    let result = vm.execute(program);
    (result, vm.into_memory().snapshot())
}

fn run_ok(program: &[Instruction]) -> Vec<u64> {
    let (result, _) = run(&[], program);
    result.expect("program should run")
}

#[test]
fn arithmetic_pops_a_then_b() {
    use Instruction as I;
    assert_eq!(run_ok(&[I::push(7), I::push(3), I::sub()]), vec![4]);
    assert_eq!(run_ok(&[I::push(10), I::push(3), I::div()]), vec![3]);
    assert_eq!(run_ok(&[I::push(6), I::push(7), I::mul()]), vec![42]);
    assert_eq!(run_ok(&[I::push(5), I::push(3), I::cmp()]), vec![1]);
    assert_eq!(run_ok(&[I::push(3), I::push(5), I::cmp()]), vec![0]);
    assert_eq!(run_ok(&[I::push(3), I::push(3), I::cmp()]), vec![0]);
}

#[test]
fn arithmetic_wraps() {
    use Instruction as I;
    assert_eq!(run_ok(&[I::push(u64::MAX), I::push(2), I::add()]), vec![1]);
    assert_eq!(run_ok(&[I::push(0), I::push(1), I::sub()]), vec![u64::MAX]);
    assert_eq!(
        run_ok(&[I::push(u64::MAX), I::push(2), I::mul()]),
        vec![u64::MAX - 1]
    );
}

#[test]
fn div_by_zero_halts_at_the_opcode() {
    let program = vec![
        Instruction::push(10),
        Instruction::push(0),
        Instruction::div(),
        Instruction::push(1),
    ];
    let mut memory = Memory::new(&[]);
    let mut ctx = Context::new(&mut memory);
    assert_eq!(VM::run(&mut ctx, &program), Err(VMError::DivisionByZero));
    assert_eq!(ctx.pc, 2);
    assert!(ctx.stack.is_empty());
}

#[test]
fn jeq_sets_pc_only_on_match() {
    let mut memory = Memory::new(&[]);
    let mut ctx = Context::new(&mut memory);
    let args = [Arg::Word(5), Arg::Word(0)];

    ctx.push(0);
    op_jeq(&mut ctx, &args).unwrap();
    assert_eq!(ctx.pc, 5);

    ctx.set_pc(0);
    ctx.push(3);
    op_jeq(&mut ctx, &args).unwrap();
    assert_eq!(ctx.pc, 0);
    assert_eq!(ctx.stack, vec![0, 3]);
}

#[test]
fn jeq_resumes_after_target() {
    use Instruction as I;
    let taken = [I::push(0), I::jeq(3, 0), I::push(99), I::push(98), I::push(7)];
    assert_eq!(run_ok(&taken), vec![0, 7]);

    let not_taken = [I::push(1), I::jeq(3, 0), I::push(99), I::push(98), I::push(7)];
    assert_eq!(run_ok(&not_taken), vec![1, 99, 98, 7]);
}

#[test]
fn jmp_reads_target_from_stack() {
    use Instruction as I;
    assert_eq!(
        run_ok(&[I::push(2), I::jmp(), I::push(99), I::push(5)]),
        vec![2, 5]
    );
    assert_eq!(run_ok(&[I::push(u64::MAX), I::jmp(), I::push(1)]), vec![u64::MAX]);
}

#[test]
fn malloc_zero_returns_size_and_keeps_memory() {
    let (result, memory) = run(&[], &[Instruction::malloc(0)]);
    assert_eq!(result.unwrap(), vec![32]);
    assert_eq!(memory.len(), 32);
}

#[test]
fn malloc_grows_at_end() {
    use Instruction as I;
    let (result, memory) = run(&[], &[I::malloc(8), I::malloc(16)]);
    assert_eq!(result.unwrap(), vec![32, 40]);
    assert_eq!(memory.len(), 56);
}

#[test]
fn malloc_past_limit_fails() {
    let (result, memory) = run(&[], &[Instruction::malloc(u64::MAX)]);
    assert!(matches!(result, Err(VMError::MemoryLimit { .. })));
    assert_eq!(memory.len(), 32);
}

#[test]
fn load_boundaries() {
    let (ok, _) = run(&[], &[Instruction::load(24, 8)]);
    assert_eq!(ok.unwrap(), vec![0]);

    let (err, _) = run(&[], &[Instruction::load(25, 8)]);
    assert_eq!(
        err,
        Err(VMError::OutOfBounds {
            offset: 25,
            length: 8,
            size: 32
        })
    );
}

#[test]
fn load_decodes_big_endian_words_with_partial_tail() {
    let state: Vec<u8> = (1..=10).collect();
    let (result, _) = run(&state, &[Instruction::load(0, 10)]);
    assert_eq!(
        result.unwrap(),
        vec![0x0102_0304_0506_0708, 0x090A_0000_0000_0000]
    );
}

#[test]
fn store_keeps_top_of_stack() {
    use Instruction as I;
    let (result, memory) = run(&[], &[I::push(0x0102), I::store(8)]);
    assert_eq!(result.unwrap(), vec![0x0102]);
    assert_eq!(&memory[8..16], &0x0102u64.to_be_bytes());
}

#[test]
fn storei_writes_raw_bytes() {
    let (result, memory) = run(&[], &[Instruction::storei(30, [0xAA, 0xBB])]);
    assert!(result.unwrap().is_empty());
    assert_eq!(&memory[30..], &[0xAA, 0xBB]);
}

#[test]
fn failed_store_keeps_earlier_writes() {
    use Instruction as I;
    let (result, memory) = run(&[], &[I::storei(0, [0xAA]), I::push(1), I::store(32)]);
    assert!(matches!(result, Err(VMError::OutOfBounds { offset: 32, .. })));
    assert_eq!(memory[0], 0xAA);
    assert_eq!(memory.len(), 32);
}

#[test]
fn memory_persists_across_executions() {
    use Instruction as I;
    let mut vm = VM::new(&[]).with_sleep_bound(Duration::ZERO);
    vm.execute(&[I::push(9), I::store(0)]).unwrap();
    assert_eq!(vm.execute(&[I::load(0, 8)]).unwrap(), vec![9]);
}

#[test]
fn unknown_opcode() {
    let program = vec![Instruction::new("NOPE", vec![])];
    let (result, _) = run(&[], &program);
    assert_eq!(result, Err(VMError::UnknownOpcode("NOPE".to_string())));
}

#[test]
fn bad_arguments_are_rejected() {
    let (arity, _) = run(&[], &[Instruction::new(isa::PUSH, vec![])]);
    assert!(matches!(
        arity,
        Err(VMError::ArityMismatch {
            instruction: "PUSH",
            expected: 1,
            actual: 0
        })
    ));

    let bad_kind = Instruction::new(isa::STOREI, vec![Arg::Word(0), Arg::Word(1)]);
    let (kind, _) = run(&[], &[bad_kind]);
    assert!(matches!(kind, Err(VMError::TypeMismatch { arg_index: 1, .. })));
}

#[test]
#[should_panic(expected = "pop from an empty stack")]
fn add_on_empty_stack_panics() {
    let _ = run(&[], &[Instruction::add()]);
}

#[test]
fn sleep_has_no_side_effects() {
    use Instruction as I;
    let mut vm = VM::new(&[]).with_sleep_bound(Duration::from_micros(200));
    let stack = vm.execute(&[I::push(4), I::sleep(), I::dup()]).unwrap();
    assert_eq!(stack, vec![4, 4]);
    assert_eq!(vm.memory().as_slice(), &[0u8; 32][..]);
}

/// Builds a random program that never underflows the stack or leaves memory.
fn random_program(rng: &mut StdRng, len: usize) -> Vec<Instruction> {
    use Instruction as I;
    let mut program = Vec::with_capacity(len);
    let mut depth = 0usize;
    for _ in 0..len {
        let choice = if depth < 2 {
            rng.gen_range(0..3)
        } else {
            rng.gen_range(0..9)
        };
        let (instruction, delta): (Instruction, isize) = match choice {
            0 => (I::push(rng.r#gen()), 1),
            1 => (I::load(rng.gen_range(0..4) * 8, 8), 1),
            2 => (I::malloc(rng.gen_range(0..16)), 1),
            3 => (I::add(), -1),
            4 => (I::sub(), -1),
            5 => (I::mul(), -1),
            6 => (I::cmp(), -1),
            7 => (I::dup(), 1),
            _ => (I::store(rng.gen_range(0..4) * 8), 0),
        };
        depth = depth.saturating_add_signed(delta);
        program.push(instruction);
    }
    program
}

#[test]
fn execution_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let program = random_program(&mut rng, 64);
        let state: Vec<u8> = (0..64).map(|_| rng.r#gen()).collect();
        let first = run(&state, &program);
        let second = run(&state, &program);
        assert!(first.0.is_ok());
        assert_eq!(first, second);
    }
}
