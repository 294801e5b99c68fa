use retrobasic::compiler::compile;
use retrobasic::console::BufferConsole;
use retrobasic::error::RuntimeErrorKind;
use retrobasic::graphics::NullGraphicsHost;
use retrobasic::program::StoredProgram;
use retrobasic::vm::Vm;

fn run(lines: &[(u32, &str)], input: &str) -> String {
    let mut p = StoredProgram::new();
    for (n, s) in lines {
        p.set_line(*n, s);
    }
    let compiled = compile(&p).expect("compiles");
    let mut vm = Vm::new(&compiled, Some(1));
    let mut console = BufferConsole::new(input);
    let mut gfx = NullGraphicsHost::new();
    vm.run(&mut console, &mut gfx).expect("runs");
    console.output
}

fn run_expect_err(lines: &[(u32, &str)]) -> RuntimeErrorKind {
    let mut p = StoredProgram::new();
    for (n, s) in lines {
        p.set_line(*n, s);
    }
    let compiled = compile(&p).expect("compiles");
    let mut vm = Vm::new(&compiled, Some(1));
    let mut console = BufferConsole::default();
    let mut gfx = NullGraphicsHost::new();
    vm.run(&mut console, &mut gfx).unwrap_err().kind
}

// ---- end-to-end scenarios ----

#[test]
fn scenario_assignment_and_print() {
    let out = run(&[(10, "A = 3 : B = 4"), (20, "PRINT A + B")], "");
    assert_eq!(out, "7\n");
}

#[test]
fn scenario_mixed_string_number_print() {
    let out = run(&[(10, "A$=\"HI\" : N=7"), (20, "PRINT A$; N"), (30, "PRINT A$, N")], "");
    assert_eq!(out, "HI7\nHI            7\n");
}

#[test]
fn scenario_for_next_sum() {
    let out = run(&[(10, "S=0"), (20, "FOR I=1 TO 5 : S=S+I : NEXT"), (30, "PRINT S")], "");
    assert_eq!(out, "15\n");
}

#[test]
fn scenario_gosub_return() {
    let out = run(&[(10, "GOSUB 100"), (20, "PRINT \"B\""), (30, "END"), (100, "PRINT \"A\" : RETURN")], "");
    assert_eq!(out, "A\nB\n");
}

#[test]
fn scenario_if_then_else_line_targets() {
    let lines = [
        (10, "INPUT S"),
        (20, "IF S >= 60 THEN 100 ELSE 200"),
        (100, "PRINT \"PASS\" : END"),
        (200, "PRINT \"FAIL\" : END"),
    ];
    assert_eq!(run(&lines, "59\n"), "FAIL\n");
    assert_eq!(run(&lines, "60\n"), "PASS\n");
}

#[test]
fn scenario_def_fn_recursion_free_use() {
    let out = run(&[(10, "DEF FN SQR2(X) = X*X"), (20, "PRINT FN SQR2(6)")], "");
    assert_eq!(out, "36\n");
}

// ---- boundary behaviors ----

#[test]
fn boundary_for_to_zero_skips_body() {
    let out = run(&[(10, "FOR I=1 TO 0 : PRINT I : NEXT"), (20, "PRINT \"END\"")], "");
    assert_eq!(out, "END\n");
}

#[test]
fn boundary_for_descending_step_runs_full_range() {
    let out = run(&[(10, "FOR I=5 TO 1 STEP -1"), (20, "PRINT I;"), (30, "NEXT I"), (40, "PRINT \"\"")], "");
    assert_eq!(out, "54321\n");
}

#[test]
fn boundary_on_goto_out_of_range_falls_through() {
    let out = run(&[(10, "ON 9 GOTO 100,200,300"), (20, "PRINT \"OK\"")], "");
    assert_eq!(out, "OK\n");
}

#[test]
fn boundary_if_zero_never_executes_then() {
    let out = run(&[(10, "IF 0 THEN PRINT \"NO\""), (20, "PRINT \"YES\"")], "");
    assert_eq!(out, "YES\n");
}

#[test]
fn boundary_if_negative_one_always_executes_then() {
    let out = run(&[(10, "IF -1 THEN PRINT \"YES\"")], "");
    assert_eq!(out, "YES\n");
}

#[test]
fn boundary_dim_subscript_zero_valid() {
    let out = run(&[(10, "DIM A(5)"), (20, "A(0) = 42"), (30, "PRINT A(0)")], "");
    assert_eq!(out, "42\n");
}

#[test]
fn boundary_dim_subscript_n_valid_n_plus_one_out_of_range() {
    let kind = run_expect_err(&[(10, "DIM A(5)"), (20, "PRINT A(6)")]);
    assert_eq!(kind, RuntimeErrorKind::SubscriptOutOfRange);
}

// ---- named NEXT closing multiple nested loops at once ----

#[test]
fn named_next_closes_intervening_nested_loops() {
    let lines = [
        (10, "FOR I=1 TO 2"),
        (20, "FOR J=1 TO 2"),
        (30, "PRINT I; J"),
        (40, "NEXT I"),
    ];
    // NEXT I discards the still-open J frame each time through, so the
    // inner loop restarts at J=1 on every I iteration and never reaches
    // J=2; the outer I loop itself still runs to completion.
    let out = run(&lines, "");
    assert_eq!(out, "11\n21\n");
}

// ---- error kinds ----

#[test]
fn error_division_by_zero() {
    assert_eq!(run_expect_err(&[(10, "PRINT 1/0")]), RuntimeErrorKind::DivisionByZero);
}

#[test]
fn error_mod_by_zero() {
    assert_eq!(run_expect_err(&[(10, "PRINT 5 MOD 0")]), RuntimeErrorKind::DivisionByZero);
}

#[test]
fn error_log_domain() {
    assert_eq!(run_expect_err(&[(10, "PRINT LOG(-1)")]), RuntimeErrorKind::DomainError);
}

#[test]
fn error_return_without_gosub() {
    assert_eq!(run_expect_err(&[(10, "RETURN")]), RuntimeErrorKind::ReturnWithoutGosub);
}

#[test]
fn error_undefined_array_access() {
    assert_eq!(run_expect_err(&[(10, "PRINT A(1)")]), RuntimeErrorKind::UndefinedArray);
}

#[test]
fn error_type_mismatch_on_array_rank() {
    assert_eq!(run_expect_err(&[(10, "DIM A(3)"), (20, "PRINT A(1,1)")]), RuntimeErrorKind::TypeMismatch);
}

#[test]
fn error_string_as_condition_is_type_mismatch() {
    assert_eq!(run_expect_err(&[(10, "A$=\"X\""), (20, "IF A$ THEN PRINT 1")]), RuntimeErrorKind::TypeMismatch);
}

#[test]
fn compile_error_undefined_statement() {
    let mut p = StoredProgram::new();
    p.set_line(10, "GOTO 999");
    assert!(compile(&p).is_err());
}

// ---- round-trips / idempotence ----

#[test]
fn roundtrip_val_str_dollar() {
    let out = run(&[(10, "PRINT VAL(STR$(3.5))")], "");
    assert_eq!(out, "3.5\n");
}

#[test]
fn roundtrip_asc_chr_dollar() {
    let out = run(&[(10, "PRINT ASC(CHR$(90))")], "");
    assert_eq!(out, "90\n");
}

#[test]
fn roundtrip_left_len_matches_min_k_len() {
    let out = run(&[(10, "A$=\"HELLO\""), (20, "PRINT LEN(LEFT$(A$,100))")], "");
    assert_eq!(out, "5\n");
}

#[test]
fn roundtrip_left_right_concat_reconstructs_string() {
    let out = run(&[(10, "A$=\"RETROBASIC\""), (20, "PRINT LEFT$(A$,4) + RIGHT$(A$,LEN(A$)-4)")], "");
    assert_eq!(out, "RETROBASIC\n");
}

// ---- graphics delegation ----

#[test]
fn graphics_line_shorthand_uses_pen_position() {
    // exercises the `LINE -(x2,y2)` shorthand form and its bit-30 argc flag
    // end to end, against the null graphics host.
    let out = run(
        &[(10, "PSET(1,1)"), (20, "LINE -(5,5)"), (30, "PRINT \"DRAWN\"")],
        "",
    );
    assert_eq!(out, "DRAWN\n");
}

#[test]
fn graphics_string_dollar_numeric_vs_string_arg() {
    let out = run(&[(10, "PRINT STRING$(3, 65)"), (20, "PRINT STRING$(3, \"Z\")")], "");
    assert_eq!(out, "AAA\nZZZ\n");
}

// ---- input-driven numeric coercion ----

#[test]
fn input_unparseable_numeric_defaults_to_zero() {
    let out = run(&[(10, "INPUT N"), (20, "PRINT N")], "NOTANUMBER\n");
    assert_eq!(out, "0\n");
}
